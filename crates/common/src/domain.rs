mod catalog;
mod command;
mod error;
mod event_log;
mod publisher;
mod reading;

pub use catalog::*;
pub use command::*;
pub use error::*;
pub use event_log::*;
pub use publisher::*;
pub use reading::*;
