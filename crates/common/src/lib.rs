pub mod domain;
pub mod sqlite;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockCommandPublisher;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEventLog;
