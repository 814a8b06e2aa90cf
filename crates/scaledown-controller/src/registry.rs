use crate::error::{ControllerError, Result};
use parking_lot::Mutex;
use scaledown_core::ObjectRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Identity and credential values a drain pod is rendered with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerMetadata {
    /// Broker cluster name; also names the data volume mount
    pub cluster_name: String,
    pub headless_service: String,
    pub ping_service: String,
    pub cluster_user: String,
    pub cluster_password: String,
}

impl BrokerMetadata {
    /// Build from the annotation map a broker scaledown resource carries.
    ///
    /// Returns the StatefulSet the entry belongs to: `<CRNAME>-ss` in
    /// `CRNAMESPACE`.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<(ObjectRef, Self)> {
        let field = |key: &str| annotations.get(key).cloned().unwrap_or_default();

        let cluster_name = field("CRNAME");
        if cluster_name.is_empty() {
            return Err(ControllerError::invalid_config(
                "broker annotations carry no CRNAME",
                "Set the CRNAME annotation to the broker resource name",
            ));
        }

        let workload = ObjectRef::new(field("CRNAMESPACE"), workload_name(&cluster_name));
        let metadata = Self {
            cluster_name,
            headless_service: field("HEADLESSSVCNAMEVALUE"),
            ping_service: field("PINGSVCNAMEVALUE"),
            cluster_user: field("CLUSTERUSER"),
            cluster_password: field("CLUSTERPASS"),
        };
        Ok((workload, metadata))
    }
}

/// Log-safe summary; omits the password
impl std::fmt::Display for BrokerMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cluster={} headless={} ping={} user={}",
            self.cluster_name, self.headless_service, self.ping_service, self.cluster_user
        )
    }
}

/// StatefulSet name the broker operator derives from a broker resource name
pub fn workload_name(cluster_name: &str) -> String {
    format!("{}-ss", cluster_name)
}

/// Per-workload drain pod parameters, shared between registration and workers
#[derive(Clone, Default)]
pub struct WorkloadRegistry {
    entries: Arc<Mutex<HashMap<ObjectRef, BrokerMetadata>>>,
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite the entry for a workload
    pub fn register(&self, workload: ObjectRef, metadata: BrokerMetadata) {
        let mut entries = self.entries.lock();
        info!("Registering broker workload {} ({})", workload, metadata);
        entries.insert(workload, metadata);
        debug!("Registry now holds {} workloads", entries.len());
    }

    /// Register straight from a broker resource's annotations
    pub fn register_annotations(&self, annotations: &BTreeMap<String, String>) -> Result<ObjectRef> {
        let (workload, metadata) = BrokerMetadata::from_annotations(annotations)?;
        self.register(workload.clone(), metadata);
        Ok(workload)
    }

    pub fn lookup(&self, workload: &ObjectRef) -> Option<BrokerMetadata> {
        self.entries.lock().get(workload).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
