use chrono::{DateTime, Utc};

/// One decoded sensor observation
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub sensor_id: String,
    /// Trimmed payload text as delivered by the broker
    pub value: String,
    /// Local receipt time, not a time claimed by the sender
    pub observed_at: DateTime<Utc>,
}

/// A reading as stored in the durable log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorRecord {
    /// Ordering key of the row, unique within the sensor stream
    pub recorded_at: String,
    pub sensor_id: String,
    pub value: String,
}
