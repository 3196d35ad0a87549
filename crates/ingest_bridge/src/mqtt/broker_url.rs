use thiserror::Error;

pub const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerUrlError {
    #[error("Invalid broker URL format: {0}")]
    Format(String),

    #[error("Invalid port in broker URL: {0}")]
    Port(String),
}

/// Parse broker URL in format mqtt://host:port, tcp://host:port, host:port or host
pub fn parse_broker_url(url: &str) -> Result<(&str, u16), BrokerUrlError> {
    let address = url
        .trim()
        .trim_start_matches("mqtt://")
        .trim_start_matches("tcp://")
        .trim_end_matches('/');

    let (host, port) = match address.split_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| BrokerUrlError::Port(port.to_string()))?;
            (host, port)
        }
        None => (address, DEFAULT_MQTT_PORT),
    };

    if host.is_empty() || host.contains('/') || port == 0 {
        return Err(BrokerUrlError::Format(url.to_string()));
    }

    Ok((host, port))
}
