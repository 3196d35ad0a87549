use crate::mqtt::ConnectionState;
use async_trait::async_trait;
use common::domain::{CommandPublisher, PublishError};
use rumqttc::{AsyncClient, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Publishes command payloads through the shared MQTT client
///
/// Refuses up front while the session is down instead of queueing work the
/// broker may never see.
pub struct MqttCommandPublisher {
    client: AsyncClient,
    state: watch::Receiver<ConnectionState>,
    timeout: Duration,
}

impl MqttCommandPublisher {
    pub fn new(
        client: AsyncClient,
        state: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            state,
            timeout,
        }
    }
}

#[async_trait]
impl CommandPublisher for MqttCommandPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let state = *self.state.borrow();
        if !state.is_connected() {
            debug!(topic = %topic, state = %state, "refusing publish while disconnected");
            return Err(PublishError::NotConnected);
        }

        let request = self
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec());

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PublishError::Client(e.to_string())),
            Err(_) => Err(PublishError::Timeout(self.timeout)),
        }
    }
}
