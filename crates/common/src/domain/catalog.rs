use crate::domain::{CatalogError, CommandError, DecodeError, Reading};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Shape of the value a sensor publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueKind {
    /// Finite decimal number
    #[default]
    Numeric,
    /// Any non-empty text
    Text,
}

impl FromStr for ValueKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "numeric" | "number" => Ok(ValueKind::Numeric),
            "text" => Ok(ValueKind::Text),
            _ => Err(()),
        }
    }
}

/// Encoding an actuator expects for its command payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandFormat {
    /// A single number, e.g. a servo angle
    Scalar,
    /// Two comma-separated numbers, e.g. buzzer `frequency,volume`
    Pair,
    /// Any non-empty text
    #[default]
    Raw,
}

impl FromStr for CommandFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalar" => Ok(CommandFormat::Scalar),
            "pair" => Ok(CommandFormat::Pair),
            "raw" => Ok(CommandFormat::Raw),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CommandFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CommandFormat::Scalar => "a single number",
            CommandFormat::Pair => "two comma-separated numbers",
            CommandFormat::Raw => "non-empty text",
        };
        f.write_str(text)
    }
}

impl CommandFormat {
    pub fn accepts(&self, payload: &str) -> bool {
        match self {
            CommandFormat::Scalar => is_number(payload),
            CommandFormat::Pair => match payload.split_once(',') {
                Some((first, second)) => is_number(first) && is_number(second),
                None => false,
            },
            CommandFormat::Raw => !payload.trim().is_empty(),
        }
    }
}

fn is_number(text: &str) -> bool {
    text.trim().parse::<f64>().is_ok_and(f64::is_finite)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorEntry {
    pub sensor_id: String,
    pub topic: String,
    pub kind: ValueKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorEntry {
    pub device_id: String,
    pub topic: String,
    pub format: CommandFormat,
}

/// Static mapping between inbound topics and sensor identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorCatalog {
    entries: Vec<SensorEntry>,
}

impl SensorCatalog {
    pub fn new(entries: Vec<SensorEntry>) -> Result<Self, CatalogError> {
        check_unique(entries.iter().map(|e| (e.sensor_id.as_str(), e.topic.as_str())))?;
        Ok(Self { entries })
    }

    /// Parse `id=topic[:kind]` entries separated by commas
    ///
    /// # Examples
    /// ```
    /// use common::domain::{SensorCatalog, ValueKind};
    ///
    /// let catalog = SensorCatalog::parse("humidity=sensors/humidity,label=sensors/label:text").unwrap();
    /// assert_eq!(catalog.by_topic("sensors/humidity").unwrap().kind, ValueKind::Numeric);
    /// assert_eq!(catalog.by_topic("sensors/label").unwrap().kind, ValueKind::Text);
    /// ```
    pub fn parse(list: &str) -> Result<Self, CatalogError> {
        let entries = parse_entries(list)?
            .into_iter()
            .map(|(id, topic, kind)| {
                let kind = match kind {
                    Some(kind) => kind.parse().map_err(|_| CatalogError::UnknownKind {
                        id: id.clone(),
                        kind,
                    })?,
                    None => ValueKind::default(),
                };
                Ok(SensorEntry {
                    sensor_id: id,
                    topic,
                    kind,
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        Self::new(entries)
    }

    pub fn entries(&self) -> &[SensorEntry] {
        &self.entries
    }

    pub fn sensor_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.sensor_id.as_str())
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.topic.as_str())
    }

    pub fn by_topic(&self, topic: &str) -> Option<&SensorEntry> {
        self.entries.iter().find(|e| e.topic == topic)
    }

    /// Turn a raw broker message into a reading observed at `observed_at`
    pub fn decode(
        &self,
        topic: &str,
        payload: &[u8],
        observed_at: DateTime<Utc>,
    ) -> Result<Reading, DecodeError> {
        let entry = self
            .by_topic(topic)
            .ok_or_else(|| DecodeError::UnknownTopic(topic.to_string()))?;

        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8 {
            topic: topic.to_string(),
        })?;
        let value = text.trim();

        if value.is_empty() {
            return Err(DecodeError::EmptyPayload {
                topic: topic.to_string(),
            });
        }

        if entry.kind == ValueKind::Numeric && !is_number(value) {
            return Err(DecodeError::NotNumeric {
                sensor_id: entry.sensor_id.clone(),
                value: value.to_string(),
            });
        }

        Ok(Reading {
            sensor_id: entry.sensor_id.clone(),
            value: value.to_string(),
            observed_at,
        })
    }
}

/// Static mapping between actuator identifiers and outbound topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorCatalog {
    entries: Vec<ActuatorEntry>,
}

impl ActuatorCatalog {
    pub fn new(entries: Vec<ActuatorEntry>) -> Result<Self, CatalogError> {
        check_unique(entries.iter().map(|e| (e.device_id.as_str(), e.topic.as_str())))?;
        Ok(Self { entries })
    }

    /// Parse `id=topic[:format]` entries separated by commas
    pub fn parse(list: &str) -> Result<Self, CatalogError> {
        let entries = parse_entries(list)?
            .into_iter()
            .map(|(id, topic, format)| {
                let format = match format {
                    Some(format) => format.parse().map_err(|_| CatalogError::UnknownKind {
                        id: id.clone(),
                        kind: format,
                    })?,
                    None => CommandFormat::default(),
                };
                Ok(ActuatorEntry {
                    device_id: id,
                    topic,
                    format,
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        Self::new(entries)
    }

    pub fn entries(&self) -> &[ActuatorEntry] {
        &self.entries
    }

    pub fn by_device(&self, device_id: &str) -> Option<&ActuatorEntry> {
        self.entries.iter().find(|e| e.device_id == device_id)
    }

    /// Look up the device and check the payload against its format
    pub fn validate(&self, device_id: &str, payload: &str) -> Result<&ActuatorEntry, CommandError> {
        let entry = self
            .by_device(device_id)
            .ok_or_else(|| CommandError::UnknownDevice(device_id.to_string()))?;

        if !entry.format.accepts(payload) {
            return Err(CommandError::InvalidPayload {
                device_id: device_id.to_string(),
                payload: payload.to_string(),
                expected: entry.format,
            });
        }

        Ok(entry)
    }
}

/// Split `id=topic[:kind]` entries; the kind is taken after the last colon
fn parse_entries(list: &str) -> Result<Vec<(String, String, Option<String>)>, CatalogError> {
    let mut entries = Vec::new();

    for raw in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (id, rest) = raw
            .split_once('=')
            .ok_or_else(|| CatalogError::MalformedEntry(raw.to_string()))?;

        let (topic, kind) = match rest.rsplit_once(':') {
            Some((topic, kind)) => (topic, Some(kind.trim().to_string())),
            None => (rest, None),
        };

        let (id, topic) = (id.trim(), topic.trim());
        if id.is_empty() || topic.is_empty() {
            return Err(CatalogError::MalformedEntry(raw.to_string()));
        }

        entries.push((id.to_string(), topic.to_string(), kind));
    }

    if entries.is_empty() {
        return Err(CatalogError::Empty);
    }

    Ok(entries)
}

fn check_unique<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> Result<(), CatalogError> {
    let mut ids = HashSet::new();
    let mut topics = HashSet::new();

    for (id, topic) in pairs {
        if id.is_empty() || topic.is_empty() {
            return Err(CatalogError::MalformedEntry(format!("{}={}", id, topic)));
        }
        if !ids.insert(id) {
            return Err(CatalogError::DuplicateId(id.to_string()));
        }
        if !topics.insert(topic) {
            return Err(CatalogError::DuplicateTopic(topic.to_string()));
        }
    }

    if ids.is_empty() {
        return Err(CatalogError::Empty);
    }

    Ok(())
}
