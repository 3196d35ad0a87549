use crate::domain::{CommandFormat, CommandRecord};
use std::time::Duration;
use thiserror::Error;

/// Invalid sensor or actuator catalog configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Invalid catalog entry '{0}': expected 'id=topic[:kind]'")]
    MalformedEntry(String),

    #[error("Unknown kind '{kind}' for '{id}'")]
    UnknownKind { id: String, kind: String },

    #[error("Duplicate id in catalog: {0}")]
    DuplicateId(String),

    #[error("Duplicate topic in catalog: {0}")]
    DuplicateTopic(String),

    #[error("Catalog has no entries")]
    Empty,
}

/// Inbound message that cannot become a reading
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("No sensor is mapped to topic '{0}'")]
    UnknownTopic(String),

    #[error("Payload on topic '{topic}' is not valid UTF-8")]
    InvalidUtf8 { topic: String },

    #[error("Payload on topic '{topic}' is empty")]
    EmptyPayload { topic: String },

    #[error("Sensor {sensor_id} expects a numeric value, got '{value}'")]
    NotNumeric { sensor_id: String, value: String },
}

/// Durable log failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("Failed to open event log: {0}")]
    Open(String),

    #[error("Failed to append to event log: {0}")]
    Write(String),

    #[error("Failed to read event log: {0}")]
    Read(String),
}

/// Failure of the inbound path for a single message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Write(#[from] LogError),
}

/// Broker publish failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Broker connection is not established")]
    NotConnected,

    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("Broker client error: {0}")]
    Client(String),
}

/// Failure of the outbound command path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Invalid payload '{payload}' for {device_id}: expected {expected}")]
    InvalidPayload {
        device_id: String,
        payload: String,
        expected: CommandFormat,
    },

    #[error(transparent)]
    Write(#[from] LogError),

    /// The command is in the log but delivery failed
    #[error("Command {} recorded at {} but not delivered: {source}", record.device_id, record.recorded_at)]
    Publish {
        record: CommandRecord,
        #[source]
        source: PublishError,
    },
}

impl CommandError {
    /// The log row written before the failure, if any
    pub fn recorded(&self) -> Option<&CommandRecord> {
        match self {
            CommandError::Publish { record, .. } => Some(record),
            _ => None,
        }
    }
}

/// Broker connection lifecycle failures, handled inside the bridge
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Broker refused connection: {0}")]
    Refused(String),

    #[error("Broker connection failed: {0}")]
    Broker(String),
}
