use common::domain::Reading;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Point-in-time copy of the latest value per known sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestValues(Arc<BTreeMap<String, Option<String>>>);

impl LatestValues {
    /// Latest value, `None` when the sensor is unknown or has not reported yet
    pub fn get(&self, sensor_id: &str) -> Option<&str> {
        self.0.get(sensor_id).and_then(|v| v.as_deref())
    }

    pub fn is_known(&self, sensor_id: &str) -> bool {
        self.0.contains_key(sensor_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// In-memory latest value per sensor
///
/// Writers replace the whole map behind the lock (copy-on-write when a
/// snapshot is still held), so a snapshot is never a torn view.
pub struct LiveStateStore {
    latest: RwLock<Arc<BTreeMap<String, Option<String>>>>,
}

impl LiveStateStore {
    /// Create a store with one empty slot per known sensor
    pub fn new<I, S>(sensor_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let latest = sensor_ids
            .into_iter()
            .map(|id| (id.into(), None))
            .collect::<BTreeMap<_, _>>();
        Self {
            latest: RwLock::new(Arc::new(latest)),
        }
    }

    /// Replace the value for the reading's sensor
    ///
    /// Returns false, leaving the store untouched, for a sensor outside the
    /// known set.
    pub async fn update(&self, reading: &Reading) -> bool {
        let mut latest = self.latest.write().await;
        if !latest.contains_key(&reading.sensor_id) {
            return false;
        }
        Arc::make_mut(&mut *latest).insert(reading.sensor_id.clone(), Some(reading.value.clone()));
        true
    }

    pub async fn snapshot(&self) -> LatestValues {
        LatestValues(Arc::clone(&*self.latest.read().await))
    }
}
