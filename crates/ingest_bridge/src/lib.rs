pub mod domain;
mod ingest_bridge;
pub mod mqtt;

pub use ingest_bridge::*;
