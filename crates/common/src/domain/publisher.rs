use crate::domain::PublishError;
use async_trait::async_trait;

/// Trait for delivering command payloads to the message broker
///
/// Implementations should:
/// - Bound every attempt with a timeout
/// - Make a single attempt per call; reconnecting is not their concern
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
}
