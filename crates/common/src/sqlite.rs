mod event_log;
mod timestamp;

pub use event_log::*;
pub use timestamp::*;
