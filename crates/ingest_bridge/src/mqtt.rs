mod broker_url;
mod connection_state;
mod publisher;
pub(crate) mod subscriber;

pub use broker_url::{parse_broker_url, BrokerUrlError};
pub use connection_state::ConnectionState;
pub use publisher::MqttCommandPublisher;
pub use subscriber::{run_mqtt_subscriber, SubscriberOptions};
