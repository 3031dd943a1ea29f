use crate::{
    checkpoint::{CheckpointError, CheckpointStore},
    fingerprint::Fingerprint,
    registry::Registry,
};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub x: f64,
    pub y: f64,
}

/// metric series by name, in recording order
pub type Metrics = BTreeMap<String, Vec<Metric>>;

/// Handle given to a job body, bound to the fingerprint of the configuration it runs
pub struct Context<'a> {
    job: &'a str,
    fingerprint: &'a Fingerprint,
    checkpoints: &'a CheckpointStore,
    registry: &'a Registry,
    metrics: Mutex<Metrics>,
}

impl<'a> Context<'a> {
    pub fn new(
        job: &'a str,
        fingerprint: &'a Fingerprint,
        checkpoints: &'a CheckpointStore,
        registry: &'a Registry,
    ) -> Self {
        Self {
            job,
            fingerprint,
            checkpoints,
            registry,
            metrics: Mutex::new(Metrics::new()),
        }
    }

    pub fn job(&self) -> &str {
        self.job
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        self.fingerprint
    }

    /// components referenced by the configuration are built through this registry
    pub fn registry(&self) -> &Registry {
        self.registry
    }

    pub fn checkpoint_exists(&self) -> bool {
        self.checkpoints.exists(self.job, self.fingerprint)
    }

    pub fn restore(&self) -> Result<Vec<u8>, CheckpointError> {
        self.checkpoints.restore(self.job, self.fingerprint)
    }

    pub fn save(&self, payload: &[u8]) -> Result<(), CheckpointError> {
        self.checkpoints.save(self.job, self.fingerprint, payload)
    }

    pub fn save_value<T: Serialize>(&self, state: &T) -> Result<(), CheckpointError> {
        self.save(&serde_json::to_vec(state)?)
    }

    pub fn restore_value<T: DeserializeOwned>(&self) -> Result<T, CheckpointError> {
        Ok(serde_json::from_slice(&self.restore()?)?)
    }

    /// append `y` to the series `name`, `x` is the position in the series
    pub fn record(&self, name: &str, y: f64) {
        let mut metrics = self.metrics.lock();
        let series = metrics.entry(name.to_owned()).or_default();
        let x = series.len() as f64;

        series.push(Metric { x, y });
    }

    pub fn record_xy(&self, name: &str, x: f64, y: f64) {
        self.metrics
            .lock()
            .entry(name.to_owned())
            .or_default()
            .push(Metric { x, y });
    }

    pub fn into_metrics(self) -> Metrics {
        self.metrics.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::StorageConfig, matrix::Matrix};

    #[test]
    fn checkpoint_round_trip() {
        let store = CheckpointStore::open(&StorageConfig::Memory).unwrap();
        let registry = Registry::new();
        let configuration = Matrix::new().parameter("x", [1]).expand().unwrap().remove(0);
        let fingerprint = configuration.fingerprint();
        let context = Context::new("train", &fingerprint, &store, &registry);

        assert!(!context.checkpoint_exists());
        assert!(matches!(context.restore(), Err(CheckpointError::NotFound(_))));

        context.save_value(&vec![1u32, 2, 3]).unwrap();

        assert!(context.checkpoint_exists());
        assert_eq!(context.restore_value::<Vec<u32>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn metrics_are_collected_per_series() {
        let store = CheckpointStore::open(&StorageConfig::Memory).unwrap();
        let registry = Registry::new();
        let configuration = Matrix::new().parameter("x", [1]).expand().unwrap().remove(0);
        let fingerprint = configuration.fingerprint();
        let context = Context::new("train", &fingerprint, &store, &registry);

        context.record("loss", 0.5);
        context.record("loss", 0.25);
        context.record_xy("accuracy", 10.0, 0.9);

        let metrics = context.into_metrics();

        assert_eq!(
            metrics["loss"],
            vec![Metric { x: 0.0, y: 0.5 }, Metric { x: 1.0, y: 0.25 }]
        );
        assert_eq!(metrics["accuracy"], vec![Metric { x: 10.0, y: 0.9 }]);
    }
}
