mod config;

use common::domain::{ActuatorCatalog, SensorCatalog};
use common::sqlite::SqliteEventLog;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryProviders};
use config::ServiceConfig;
use ingest_bridge::IngestBridge;
use std::sync::Arc;
use std::time::Duration;
use telebridge_runner::Runner;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize configuration and tracing
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_config = match config.telemetry() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Invalid telemetry configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&telemetry_config)
    {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        broker = %config.mqtt_broker_url,
        database = %config.database_path,
        "Starting telebridge service"
    );
    debug!("Configuration: {:?}", config);

    // The durable log must be usable before anything is accepted
    let event_log = match SqliteEventLog::open(&config.database_path) {
        Ok(log) => Arc::new(log),
        Err(e) => {
            error!("Failed to open event log: {}", e);
            std::process::exit(1);
        }
    };

    let (sensors, actuators) = match load_catalogs(&config) {
        Ok(catalogs) => catalogs,
        Err(e) => {
            error!("Invalid topic catalog: {:#}", e);
            std::process::exit(1);
        }
    };

    let ingest_bridge = match IngestBridge::new(
        config.ingest_bridge(),
        sensors,
        actuators,
        event_log,
    ) {
        Ok(module) => module,
        Err(e) => {
            error!("Failed to initialize ingest bridge: {:#}", e);
            std::process::exit(1);
        }
    };

    // Request layers receive this handle; the bridge itself has no outer surface
    let bridge = ingest_bridge.bridge();
    match bridge.sensor_history(bridge.history_limit()).await {
        Ok(history) => info!(
            sensors = bridge.sensors().entries().len(),
            actuators = bridge.actuators().entries().len(),
            recent_readings = history.len(),
            "ingest bridge ready"
        ),
        Err(e) => warn!("Failed to read recent history: {}", e),
    }

    let code = Runner::new()
        .with_boxed_process("mqtt_subscriber", ingest_bridge.into_runner_process())
        .with_closer(move || async move {
            info!("Running cleanup tasks...");
            // Flush pending traces and logs
            shutdown_telemetry(telemetry_providers);
            info!("Cleanup complete");
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10))
        .run()
        .await;

    std::process::exit(code);
}

fn load_catalogs(config: &ServiceConfig) -> anyhow::Result<(SensorCatalog, ActuatorCatalog)> {
    let sensors = SensorCatalog::parse(&config.sensor_topics)?;
    let actuators = ActuatorCatalog::parse(&config.actuator_topics)?;
    Ok((sensors, actuators))
}
