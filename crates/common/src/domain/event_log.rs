use crate::domain::{Command, CommandRecord, LogError, Reading, SensorRecord};
use async_trait::async_trait;

/// Number of history rows returned when the caller does not ask for a size
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Append-only history of readings and commands
///
/// Implementations should:
/// - Make an append durable before returning
/// - Keep row keys strictly increasing within each stream
/// - Never update or delete rows
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a reading to the sensor stream
    async fn append_reading(&self, reading: &Reading) -> Result<SensorRecord, LogError>;

    /// Append a command to the command stream
    async fn append_command(&self, command: &Command) -> Result<CommandRecord, LogError>;

    /// At most `limit` readings, newest first
    async fn recent_readings(&self, limit: usize) -> Result<Vec<SensorRecord>, LogError>;

    /// At most `limit` commands, newest first
    async fn recent_commands(&self, limit: usize) -> Result<Vec<CommandRecord>, LogError>;
}
