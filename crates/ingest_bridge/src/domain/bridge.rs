use crate::domain::{LatestValues, LiveStateStore};
use chrono::Utc;
use common::domain::{
    ActuatorCatalog, Command, CommandError, CommandPublisher, CommandRecord, EventLog,
    IngestError, LogError, Reading, SensorCatalog, SensorRecord, DEFAULT_HISTORY_LIMIT,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Mediates both data paths between the broker and the durable log
///
/// Inbound:  decode → append to log → update live state.
/// Outbound: validate → append to log → publish to broker.
///
/// The request layer holds an `Arc<Bridge>` and only uses the methods below;
/// it never sees the storage or the broker client.
pub struct Bridge {
    sensors: SensorCatalog,
    actuators: ActuatorCatalog,
    live_state: LiveStateStore,
    event_log: Arc<dyn EventLog>,
    publisher: Arc<dyn CommandPublisher>,
    history_limit: usize,
    // Held for a whole inbound message so readings are applied in arrival order
    ingest_lock: Mutex<()>,
}

impl Bridge {
    pub fn new(
        sensors: SensorCatalog,
        actuators: ActuatorCatalog,
        event_log: Arc<dyn EventLog>,
        publisher: Arc<dyn CommandPublisher>,
    ) -> Self {
        let live_state = LiveStateStore::new(sensors.sensor_ids());
        Self {
            sensors,
            actuators,
            live_state,
            event_log,
            publisher,
            history_limit: DEFAULT_HISTORY_LIMIT,
            ingest_lock: Mutex::new(()),
        }
    }

    /// Page size the request layer uses when its caller gives none
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn sensors(&self) -> &SensorCatalog {
        &self.sensors
    }

    pub fn actuators(&self) -> &ActuatorCatalog {
        &self.actuators
    }

    /// Process one inbound broker message
    ///
    /// The live value is only updated once the reading is in the log; a
    /// failed append drops the message.
    #[instrument(skip(self, payload), fields(payload_size = payload.len()))]
    pub async fn ingest(&self, topic: &str, payload: &[u8]) -> Result<Reading, IngestError> {
        let _guard = self.ingest_lock.lock().await;

        let reading = self.sensors.decode(topic, payload, Utc::now())?;
        let record = self.event_log.append_reading(&reading).await?;
        self.live_state.update(&reading).await;

        debug!(
            sensor_id = %reading.sensor_id,
            recorded_at = %record.recorded_at,
            "reading accepted"
        );
        Ok(reading)
    }

    /// Record a command, then deliver it to the broker
    ///
    /// A delivery failure after the log append returns
    /// [`CommandError::Publish`] carrying the row that was written.
    #[instrument(skip(self, command), fields(device_id = %command.device_id))]
    pub async fn publish(&self, command: Command) -> Result<CommandRecord, CommandError> {
        let entry = self.actuators.validate(&command.device_id, &command.payload)?;

        let record = self.event_log.append_command(&command).await?;

        match self.publisher.publish(&entry.topic, &command.payload).await {
            Ok(()) => {
                debug!(
                    topic = %entry.topic,
                    recorded_at = %record.recorded_at,
                    "command published"
                );
                Ok(record)
            }
            Err(source) => {
                warn!(
                    topic = %entry.topic,
                    recorded_at = %record.recorded_at,
                    error = %source,
                    "command recorded but not delivered"
                );
                Err(CommandError::Publish { record, source })
            }
        }
    }

    /// Latest value per known sensor
    pub async fn latest(&self) -> LatestValues {
        self.live_state.snapshot().await
    }

    /// Up to `limit` readings, newest first
    pub async fn sensor_history(&self, limit: usize) -> Result<Vec<SensorRecord>, LogError> {
        self.event_log.recent_readings(limit).await
    }

    /// Up to `limit` commands, newest first
    pub async fn command_history(&self, limit: usize) -> Result<Vec<CommandRecord>, LogError> {
        self.event_log.recent_commands(limit).await
    }

    /// Issue a command for `device_id` on behalf of the request layer
    pub async fn submit_command(
        &self,
        device_id: &str,
        payload: &str,
    ) -> Result<CommandRecord, CommandError> {
        self.publish(Command::new(device_id, payload.trim())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{DecodeError, PublishError};
    use common::{MockCommandPublisher, MockEventLog};

    fn sensors() -> SensorCatalog {
        SensorCatalog::parse("humidity=sensors/humidity,gas=sensors/gas").unwrap()
    }

    fn actuators() -> ActuatorCatalog {
        ActuatorCatalog::parse("buzzer=actuators/buzzer:pair,servo=actuators/servo:scalar")
            .unwrap()
    }

    fn sensor_record(reading: &Reading) -> SensorRecord {
        SensorRecord {
            recorded_at: "2026-10-15T12:00:00.000000Z".to_string(),
            sensor_id: reading.sensor_id.clone(),
            value: reading.value.clone(),
        }
    }

    fn command_record(command: &Command) -> CommandRecord {
        CommandRecord {
            recorded_at: "2026-10-15T12:00:00.000000Z".to_string(),
            device_id: command.device_id.clone(),
            command: command.payload.clone(),
        }
    }

    fn bridge(log: MockEventLog, publisher: MockCommandPublisher) -> Bridge {
        Bridge::new(sensors(), actuators(), Arc::new(log), Arc::new(publisher))
    }

    #[tokio::test]
    async fn test_ingest_appends_then_updates_live_state() {
        let mut log = MockEventLog::new();
        log.expect_append_reading()
            .withf(|r: &Reading| r.sensor_id == "humidity" && r.value == "57")
            .times(1)
            .returning(|r| Ok(sensor_record(r)));

        let bridge = bridge(log, MockCommandPublisher::new());
        let reading = bridge.ingest("sensors/humidity", b"57").await.unwrap();

        assert_eq!(reading.value, "57");
        assert_eq!(bridge.latest().await.get("humidity"), Some("57"));
    }

    #[tokio::test]
    async fn test_ingest_unknown_topic_writes_nothing() {
        let mut log = MockEventLog::new();
        log.expect_append_reading().times(0);

        let bridge = bridge(log, MockCommandPublisher::new());
        let result = bridge.ingest("sensors/pressure", b"1013").await;

        assert_eq!(
            result.unwrap_err(),
            IngestError::Decode(DecodeError::UnknownTopic("sensors/pressure".to_string()))
        );
        assert_eq!(bridge.latest().await.get("humidity"), None);
    }

    #[tokio::test]
    async fn test_ingest_write_failure_leaves_live_state_untouched() {
        let mut log = MockEventLog::new();
        log.expect_append_reading()
            .times(1)
            .returning(|_| Err(LogError::Write("disk full".to_string())));

        let bridge = bridge(log, MockCommandPublisher::new());
        let result = bridge.ingest("sensors/gas", b"812").await;

        assert_eq!(
            result.unwrap_err(),
            IngestError::Write(LogError::Write("disk full".to_string()))
        );
        assert_eq!(bridge.latest().await.get("gas"), None);
    }

    #[tokio::test]
    async fn test_publish_logs_before_delivery() {
        let mut seq = mockall::Sequence::new();
        let mut log = MockEventLog::new();
        let mut publisher = MockCommandPublisher::new();

        log.expect_append_command()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|c| Ok(command_record(c)));
        publisher
            .expect_publish()
            .withf(|topic: &str, payload: &str| topic == "actuators/servo" && payload == "90")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let bridge = bridge(log, publisher);
        let record = bridge.submit_command("servo", "90").await.unwrap();

        assert_eq!(record.device_id, "servo");
        assert_eq!(record.command, "90");
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_audit_row() {
        let mut log = MockEventLog::new();
        let mut publisher = MockCommandPublisher::new();

        log.expect_append_command()
            .times(1)
            .returning(|c| Ok(command_record(c)));
        publisher
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(PublishError::NotConnected));

        let bridge = bridge(log, publisher);
        let err = bridge.publish(Command::buzzer(440, 3)).await.unwrap_err();

        match &err {
            CommandError::Publish { record, source } => {
                assert_eq!(record.command, "440,3");
                assert_eq!(source, &PublishError::NotConnected);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.recorded().is_some());
    }

    #[tokio::test]
    async fn test_write_failure_skips_publish() {
        let mut log = MockEventLog::new();
        let mut publisher = MockCommandPublisher::new();

        log.expect_append_command()
            .times(1)
            .returning(|_| Err(LogError::Write("locked".to_string())));
        publisher.expect_publish().times(0);

        let bridge = bridge(log, publisher);
        let err = bridge.submit_command("servo", "45").await.unwrap_err();

        assert_eq!(err, CommandError::Write(LogError::Write("locked".to_string())));
        assert!(err.recorded().is_none());
    }

    #[tokio::test]
    async fn test_invalid_command_is_rejected_before_logging() {
        let mut log = MockEventLog::new();
        let mut publisher = MockCommandPublisher::new();
        log.expect_append_command().times(0);
        publisher.expect_publish().times(0);

        let bridge = bridge(log, publisher);

        assert!(matches!(
            bridge.submit_command("buzzer", "loud").await,
            Err(CommandError::InvalidPayload { .. })
        ));
        assert_eq!(
            bridge.submit_command("laser", "1").await.unwrap_err(),
            CommandError::UnknownDevice("laser".to_string())
        );
    }

    #[tokio::test]
    async fn test_history_delegates_to_log() {
        let mut log = MockEventLog::new();
        log.expect_recent_readings()
            .withf(|limit| *limit == 20)
            .times(1)
            .returning(|_| Ok(Vec::new()));
        log.expect_recent_commands()
            .withf(|limit| *limit == 5)
            .times(1)
            .returning(|_| Err(LogError::Read("busy".to_string())));

        let bridge = bridge(log, MockCommandPublisher::new());

        assert!(bridge.sensor_history(20).await.unwrap().is_empty());
        assert!(bridge.command_history(5).await.is_err());
    }

    #[tokio::test]
    async fn test_history_limit_defaults_and_overrides() {
        let mut log = MockEventLog::new();
        log.expect_recent_readings()
            .withf(|limit| *limit == 50)
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let default = bridge(MockEventLog::new(), MockCommandPublisher::new());
        assert_eq!(default.history_limit(), DEFAULT_HISTORY_LIMIT);

        let bridge = bridge(log, MockCommandPublisher::new()).with_history_limit(50);
        assert_eq!(bridge.history_limit(), 50);
        bridge.sensor_history(bridge.history_limit()).await.unwrap();
    }
}
