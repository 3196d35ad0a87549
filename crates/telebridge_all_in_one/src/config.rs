use common::telemetry::{LogFormat, TelemetryConfig};
use config::{Config, ConfigError, Environment};
use ingest_bridge::domain::ReconnectPolicy;
use ingest_bridge::IngestBridgeConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Console log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,

    // MQTT configuration
    /// Broker URL (mqtt://host:port, tcp://host:port, host:port)
    #[serde(default = "default_mqtt_broker_url")]
    pub mqtt_broker_url: String,

    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,

    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,

    /// Bound on a single connection attempt
    #[serde(default = "default_mqtt_connect_timeout_secs")]
    pub mqtt_connect_timeout_secs: u64,

    /// Bound on a single command publish
    #[serde(default = "default_mqtt_publish_timeout_secs")]
    pub mqtt_publish_timeout_secs: u64,

    #[serde(default = "default_mqtt_reconnect_initial_delay_ms")]
    pub mqtt_reconnect_initial_delay_ms: u64,

    #[serde(default = "default_mqtt_reconnect_max_delay_secs")]
    pub mqtt_reconnect_max_delay_secs: u64,

    #[serde(default = "default_mqtt_channel_capacity")]
    pub mqtt_channel_capacity: usize,

    // Catalogs
    /// Inbound sensors as comma-separated `id=topic[:numeric|text]`
    #[serde(default = "default_sensor_topics")]
    pub sensor_topics: String,

    /// Actuators as comma-separated `id=topic[:scalar|pair|raw]`
    #[serde(default = "default_actuator_topics")]
    pub actuator_topics: String,

    // Durable log
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Default number of rows in a history query
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    // OpenTelemetry configuration
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_mqtt_broker_url() -> String {
    "mqtt://broker.mqttdashboard.com:1883".to_string()
}

fn default_mqtt_client_id() -> String {
    "telebridge".to_string()
}

fn default_mqtt_keep_alive_secs() -> u64 {
    60
}

fn default_mqtt_connect_timeout_secs() -> u64 {
    10
}

fn default_mqtt_publish_timeout_secs() -> u64 {
    5
}

fn default_mqtt_reconnect_initial_delay_ms() -> u64 {
    500
}

fn default_mqtt_reconnect_max_delay_secs() -> u64 {
    30
}

fn default_mqtt_channel_capacity() -> usize {
    100
}

fn default_sensor_topics() -> String {
    "humidity=sensors/humidity,gas=sensors/gas".to_string()
}

fn default_actuator_topics() -> String {
    "buzzer=actuators/buzzer:pair,servo=actuators/servo:scalar".to_string()
}

fn default_database_path() -> String {
    "dados.db".to_string()
}

fn default_history_limit() -> usize {
    common::domain::DEFAULT_HISTORY_LIMIT
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "telebridge".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("TELEBRIDGE"))
            .build()?
            .try_deserialize()
    }

    pub fn telemetry(&self) -> Result<TelemetryConfig, String> {
        Ok(TelemetryConfig {
            service_name: self.otel_service_name.clone(),
            log_level: self.log_level.clone(),
            log_format: self.log_format.parse::<LogFormat>()?,
            otel_enabled: self.otel_enabled,
            otel_endpoint: self.otel_endpoint.clone(),
        })
    }

    pub fn ingest_bridge(&self) -> IngestBridgeConfig {
        IngestBridgeConfig {
            broker_url: self.mqtt_broker_url.clone(),
            client_id: self.mqtt_client_id.clone(),
            keep_alive: Duration::from_secs(self.mqtt_keep_alive_secs),
            connect_timeout: Duration::from_secs(self.mqtt_connect_timeout_secs),
            publish_timeout: Duration::from_secs(self.mqtt_publish_timeout_secs),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(self.mqtt_reconnect_initial_delay_ms),
                max_delay: Duration::from_secs(self.mqtt_reconnect_max_delay_secs),
            },
            channel_capacity: self.mqtt_channel_capacity,
            history_limit: self.history_limit,
        }
    }
}
