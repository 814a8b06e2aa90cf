use crate::access::AccessMode;
use crate::drain_pod::DrainPodTemplate;
use crate::error::{ControllerError, Result};
use crate::queue::ExponentialBackoff;
use crate::registry::{workload_name, BrokerMetadata, WorkloadRegistry};
use scaledown_core::ObjectRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Retry delay bounds for failed passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackoffConfig {
    pub base_secs: u64,
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_secs: 5,
            max_secs: 300,
        }
    }
}

/// A broker workload registered at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerRegistration {
    pub namespace: String,
    /// StatefulSet name; defaults to `<clusterName>-ss`
    #[serde(default)]
    pub stateful_set: Option<String>,
    #[serde(flatten)]
    pub metadata: BrokerMetadata,
}

impl BrokerRegistration {
    pub fn workload(&self) -> ObjectRef {
        let name = self
            .stateful_set
            .clone()
            .unwrap_or_else(|| workload_name(&self.metadata.cluster_name));
        ObjectRef::new(&self.namespace, name)
    }
}

/// Configuration for the drain controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DrainControllerConfig {
    /// Only watch this namespace; all namespaces when unset
    pub namespace: Option<String>,
    /// Number of concurrent workers
    pub workers: usize,
    /// Interval at which every cached object is replayed
    pub resync_secs: u64,
    pub backoff: BackoffConfig,
    pub access: AccessMode,
    pub drain_pod: DrainPodTemplate,
    pub brokers: Vec<BrokerRegistration>,
    /// Annotation maps copied from broker resources (`CRNAME`, `CRNAMESPACE`, ...)
    pub broker_annotations: Vec<BTreeMap<String, String>>,
}

impl Default for DrainControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: 2,
            resync_secs: 30,
            backoff: BackoffConfig::default(),
            access: AccessMode::default(),
            drain_pod: DrainPodTemplate::default(),
            brokers: Vec::new(),
            broker_annotations: Vec::new(),
        }
    }
}

impl DrainControllerConfig {
    /// Load from a YAML file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = scaledown_core::from_yaml_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ControllerError::invalid_config(
                "workers must be at least 1",
                "Set workers to a positive number, e.g. 2",
            ));
        }
        if self.resync_secs == 0 {
            return Err(ControllerError::invalid_config(
                "resyncSecs must be positive",
                "Set resyncSecs to the replay interval in seconds, e.g. 30",
            ));
        }
        if self.backoff.base_secs == 0 || self.backoff.base_secs > self.backoff.max_secs {
            return Err(ControllerError::invalid_config(
                format!(
                    "invalid backoff bounds {}s..{}s",
                    self.backoff.base_secs, self.backoff.max_secs
                ),
                "backoff.baseSecs must be positive and no larger than backoff.maxSecs",
            ));
        }
        if let Some(broker) = self.brokers.iter().find(|b| b.metadata.cluster_name.is_empty()) {
            return Err(ControllerError::invalid_config(
                format!("broker entry in namespace '{}' has no clusterName", broker.namespace),
                "Every entry under brokers needs clusterName",
            ));
        }
        for annotations in &self.broker_annotations {
            BrokerMetadata::from_annotations(annotations)?;
        }
        Ok(())
    }

    /// Register every configured broker workload
    pub fn register_brokers(&self, registry: &WorkloadRegistry) -> Result<()> {
        for broker in &self.brokers {
            registry.register(broker.workload(), broker.metadata.clone());
        }
        for annotations in &self.broker_annotations {
            registry.register_annotations(annotations)?;
        }
        Ok(())
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_secs(self.backoff.base_secs),
            Duration::from_secs(self.backoff.max_secs),
        )
    }
}
