use crate::domain::{Bridge, ReconnectPolicy};
use crate::mqtt::{
    parse_broker_url, run_mqtt_subscriber, ConnectionState, MqttCommandPublisher,
    SubscriberOptions,
};
use common::domain::{ActuatorCatalog, EventLog, SensorCatalog, DEFAULT_HISTORY_LIMIT};
use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct IngestBridgeConfig {
    pub broker_url: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Capacity of the client's request channel
    pub channel_capacity: usize,
    /// Default page size for history queries
    pub history_limit: usize,
}

impl Default for IngestBridgeConfig {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://localhost:1883".to_string(),
            client_id: "telebridge".to_string(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            channel_capacity: 100,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Owns the broker connection and the bridge built on top of it
///
/// Constructed once per process. Hand [`bridge`](Self::bridge) to the request
/// layer, then turn the module into its runner process.
pub struct IngestBridge {
    bridge: Arc<Bridge>,
    client: AsyncClient,
    eventloop: EventLoop,
    state_tx: watch::Sender<ConnectionState>,
    options: SubscriberOptions,
}

impl IngestBridge {
    pub fn new(
        config: IngestBridgeConfig,
        sensors: SensorCatalog,
        actuators: ActuatorCatalog,
        event_log: Arc<dyn EventLog>,
    ) -> anyhow::Result<Self> {
        debug!("initializing ingest bridge module");

        let (host, port) = parse_broker_url(&config.broker_url)?;
        let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
        mqtt_options.set_keep_alive(config.keep_alive);
        mqtt_options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(mqtt_options, config.channel_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let publisher = Arc::new(MqttCommandPublisher::new(
            client.clone(),
            state_rx,
            config.publish_timeout,
        ));
        let bridge = Arc::new(
            Bridge::new(sensors, actuators, event_log, publisher)
                .with_history_limit(config.history_limit),
        );

        Ok(Self {
            bridge,
            client,
            eventloop,
            state_tx,
            options: SubscriberOptions {
                connect_timeout: config.connect_timeout,
                reconnect: config.reconnect,
            },
        })
    }

    /// The operations the request layer is allowed to use
    pub fn bridge(&self) -> Arc<Bridge> {
        Arc::clone(&self.bridge)
    }

    /// Observe connection state changes
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    #[allow(clippy::type_complexity)]
    pub fn into_runner_process(
        self,
    ) -> Box<
        dyn FnOnce(
                CancellationToken,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
            > + Send,
    > {
        let Self {
            bridge,
            client,
            eventloop,
            state_tx,
            options,
        } = self;

        Box::new(move |ctx| {
            Box::pin(async move {
                run_mqtt_subscriber(eventloop, client, bridge, state_tx, options, ctx).await
            })
        })
    }
}
