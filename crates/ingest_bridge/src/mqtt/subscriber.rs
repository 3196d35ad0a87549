use crate::domain::{Bridge, ReconnectPolicy};
use crate::mqtt::ConnectionState;
use common::domain::{ConnectionError, IngestError};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Outgoing, Packet, QoS, SubscribeFilter,
    SubscribeReasonCode,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Timing knobs for the subscriber loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberOptions {
    /// Upper bound for a connection attempt, up to the broker's ConnAck
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// What the loop does with an event once the state has moved
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    None,
    /// Subscriptions confirmed, reset the backoff
    Activated,
    /// Hand the message to the bridge
    Ingest,
    /// Message arrived before the bridge was active
    Drop,
    /// Drop the session and reconnect with backoff
    Fail(ConnectionError),
}

/// State transition for one event of a live session
///
/// `Connected` requests subscriptions at the top of the next loop turn, so
/// every ConnAck, including one after a reconnect, subscribes again.
pub(crate) fn on_event(state: ConnectionState, event: &Event) -> (ConnectionState, Action) {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => {
            if ack.code == ConnectReturnCode::Success {
                (ConnectionState::Connected, Action::None)
            } else {
                let refused = ConnectionError::Refused(format!("{:?}", ack.code));
                (state, Action::Fail(refused))
            }
        }
        Event::Incoming(Packet::SubAck(ack)) if state == ConnectionState::Subscribing => {
            let all_rejected = !ack.return_codes.is_empty()
                && ack
                    .return_codes
                    .iter()
                    .all(|code| matches!(code, SubscribeReasonCode::Failure));
            if all_rejected {
                let rejected = ConnectionError::Broker("broker rejected every subscription".into());
                (state, Action::Fail(rejected))
            } else {
                (ConnectionState::Active, Action::Activated)
            }
        }
        Event::Incoming(Packet::Publish(_)) if state == ConnectionState::Active => {
            (state, Action::Ingest)
        }
        Event::Incoming(Packet::Publish(_)) => (state, Action::Drop),
        _ => (state, Action::None),
    }
}

/// Drive the broker connection until `shutdown` is cancelled
///
/// Connection failures never end the loop: the state drops to
/// `Disconnected`, the policy's backoff elapses, and the event loop
/// reconnects on the next poll. Every known sensor topic is subscribed again
/// after each ConnAck.
#[instrument(name = "mqtt_subscriber", skip_all)]
pub async fn run_mqtt_subscriber(
    mut eventloop: EventLoop,
    client: AsyncClient,
    bridge: Arc<Bridge>,
    state_tx: watch::Sender<ConnectionState>,
    options: SubscriberOptions,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let filters: Vec<SubscribeFilter> = bridge
        .sensors()
        .topics()
        .map(|topic| SubscribeFilter::new(topic.to_string(), QoS::AtLeastOnce))
        .collect();

    info!(topics = filters.len(), "starting MQTT subscriber");

    let mut attempt: u32 = 0;
    set_state(&state_tx, ConnectionState::Connecting);

    loop {
        // Retried every turn until the request channel accepts it
        if *state_tx.borrow() == ConnectionState::Connected {
            request_subscriptions(&client, &filters, &state_tx);
        }

        let state = *state_tx.borrow();
        let polled = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("shutdown signal received");
                if state.is_connected() {
                    disconnect(&client, &mut eventloop).await;
                }
                set_state(&state_tx, ConnectionState::Disconnected);
                break;
            }
            polled = poll(&mut eventloop, state, options.connect_timeout) => polled,
        };

        let failure = match polled {
            Err(e) => Some(e),
            Ok(event) => {
                let (next, action) = on_event(state, &event);
                set_state(&state_tx, next);

                match (action, event) {
                    (Action::Activated, Event::Incoming(Packet::SubAck(ack))) => {
                        let rejected = ack
                            .return_codes
                            .iter()
                            .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                            .count();
                        if rejected > 0 {
                            warn!(rejected, "broker rejected some subscriptions");
                        }
                        attempt = 0;
                        info!("bridge active");
                        None
                    }
                    (Action::Ingest, Event::Incoming(Packet::Publish(publish))) => {
                        handle_mqtt_message(&bridge, &publish.topic, &publish.payload).await;
                        None
                    }
                    (Action::Drop, Event::Incoming(Packet::Publish(publish))) => {
                        debug!(topic = %publish.topic, state = %state, "dropping message received before subscriptions completed");
                        None
                    }
                    (Action::Fail(e), _) => {
                        disconnect(&client, &mut eventloop).await;
                        Some(e)
                    }
                    (_, Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(session_present = ack.session_present, "connected to MQTT broker");
                        None
                    }
                    _ => None,
                }
            }
        };

        if let Some(e) = failure {
            attempt = attempt.saturating_add(1);
            let delay = options.reconnect.delay_for(attempt);
            set_state(&state_tx, ConnectionState::Disconnected);
            error!(error = %e, attempt, "MQTT connection error");
            warn!(?delay, "retrying MQTT connection");

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            set_state(&state_tx, ConnectionState::Connecting);
        }
    }

    info!("MQTT subscriber stopped");
    Ok(())
}

/// Poll the event loop once; a poll made while connecting is bounded
async fn poll(
    eventloop: &mut EventLoop,
    state: ConnectionState,
    connect_timeout: Duration,
) -> Result<Event, ConnectionError> {
    if state == ConnectionState::Connecting {
        tokio::time::timeout(connect_timeout, eventloop.poll())
            .await
            .map_err(|_| ConnectionError::Timeout(connect_timeout))?
            .map_err(classify)
    } else {
        eventloop.poll().await.map_err(classify)
    }
}

/// Send DISCONNECT on a live session and poll until it is written
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.try_disconnect() {
        warn!(error = %e, "could not queue MQTT disconnect");
        return;
    }

    let sent = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    })
    .await;

    match sent {
        Ok(true) => debug!("sent MQTT disconnect"),
        _ => warn!("MQTT session closed without a clean disconnect"),
    }
}

fn classify(err: rumqttc::ConnectionError) -> ConnectionError {
    match err {
        rumqttc::ConnectionError::ConnectionRefused(code) => {
            ConnectionError::Refused(format!("{:?}", code))
        }
        other => ConnectionError::Broker(other.to_string()),
    }
}

fn request_subscriptions(
    client: &AsyncClient,
    filters: &[SubscribeFilter],
    state_tx: &watch::Sender<ConnectionState>,
) {
    if filters.is_empty() {
        set_state(state_tx, ConnectionState::Active);
        return;
    }

    match client.try_subscribe_many(filters.to_vec()) {
        Ok(()) => {
            for filter in filters {
                info!(topic = %filter.path, "subscribing to MQTT topic");
            }
            set_state(state_tx, ConnectionState::Subscribing);
        }
        Err(e) => {
            warn!(error = %e, "could not queue subscriptions, will retry");
        }
    }
}

fn set_state(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
    let previous = state_tx.send_replace(next);
    if previous != next {
        debug!(from = %previous, to = %next, "connection state changed");
    }
}

/// Handle an incoming MQTT message
///
/// Creates a new independent trace for each message. Failures are logged and
/// the message is dropped; they never stop the subscriber.
pub(crate) async fn handle_mqtt_message(bridge: &Bridge, topic: &str, payload: &[u8]) {
    let span = info_span!(
        parent: Span::none(),
        "mqtt_message",
        topic = %topic,
        payload_size = payload.len(),
        sensor_id = tracing::field::Empty,
    );

    async {
        match bridge.ingest(topic, payload).await {
            Ok(reading) => {
                Span::current().record("sensor_id", reading.sensor_id.as_str());
                debug!(value = %reading.value, "reading stored");
            }
            Err(IngestError::Decode(e)) => {
                warn!(error = %e, "failed to decode MQTT message, skipping");
            }
            Err(IngestError::Write(e)) => {
                error!(error = %e, "failed to persist reading, message dropped");
            }
        }
    }
    .instrument(span)
    .await
}
