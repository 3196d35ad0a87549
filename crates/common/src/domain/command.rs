use chrono::{DateTime, Utc};

/// One actuator instruction destined for the broker
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub device_id: String,
    pub payload: String,
    pub issued_at: DateTime<Utc>,
}

impl Command {
    /// Create a command issued now
    pub fn new(device_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            payload: payload.into(),
            issued_at: Utc::now(),
        }
    }

    /// Buzzer tone, encoded as `frequency,volume`
    pub fn buzzer(frequency: u32, volume: u32) -> Self {
        Self::new("buzzer", format!("{},{}", frequency, volume))
    }

    /// Servo position, encoded as a bare angle
    pub fn servo(angle: i32) -> Self {
        Self::new("servo", angle.to_string())
    }
}

/// A command as stored in the durable log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    /// Ordering key of the row, unique within the command stream
    pub recorded_at: String,
    pub device_id: String,
    pub command: String,
}
