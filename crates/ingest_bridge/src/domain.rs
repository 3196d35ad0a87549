mod bridge;
mod live_state_store;
mod reconnect_policy;

pub use bridge::*;
pub use live_state_store::*;
pub use reconnect_policy::*;
