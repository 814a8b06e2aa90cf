use crate::client::{create_object, ClusterClient};
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use scaledown_core::{ObjectMeta, WorkloadSpec};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Source component stamped on every recorded event
pub const COMPONENT: &str = "statefulset-drain-controller";

/// Progress notifications attached to the StatefulSet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainEvent {
    DrainPodCreated { pod: String },
    DrainSucceeded { pod: String },
    ClaimDeleted { claim: String },
    DrainPodDeleted { pod: String },
}

impl DrainEvent {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::DrainPodCreated { .. } => "SuccessfulCreate",
            Self::DrainSucceeded { .. } => "DrainSuccess",
            Self::ClaimDeleted { .. } => "SuccessfulPVCDelete",
            Self::DrainPodDeleted { .. } => "SuccessfulDelete",
        }
    }

    pub fn message(&self, workload: &str) -> String {
        match self {
            Self::DrainPodCreated { pod } => {
                format!("create Drain Pod {} in StatefulSet {} successful", pod, workload)
            }
            Self::DrainSucceeded { pod } => format!(
                "drain Pod {} in StatefulSet {} completed successfully",
                pod, workload
            ),
            Self::ClaimDeleted { claim } => {
                format!("delete Claim {} in StatefulSet {} successful", claim, workload)
            }
            Self::DrainPodDeleted { pod } => {
                format!("delete Drain Pod {} in StatefulSet {} successful", pod, workload)
            }
        }
    }
}

impl fmt::Display for DrainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// Build the core/v1 Event for a workload
pub fn workload_event(workload: &WorkloadSpec, event: &DrainEvent) -> Event {
    let now = Time(chrono::Utc::now());
    Event {
        metadata: ObjectMeta {
            name: Some(format!("{}.{}", workload.name, uuid::Uuid::new_v4().simple())),
            namespace: Some(workload.namespace.clone()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some("apps/v1".to_string()),
            kind: Some("StatefulSet".to_string()),
            name: Some(workload.name.clone()),
            namespace: Some(workload.namespace.clone()),
            ..Default::default()
        },
        reason: Some(event.reason().to_string()),
        message: Some(event.message(&workload.name)),
        type_: Some("Normal".to_string()),
        source: Some(EventSource {
            component: Some(COMPONENT.to_string()),
            host: None,
        }),
        reporting_component: Some(COMPONENT.to_string()),
        count: Some(1),
        first_timestamp: Some(now.clone()),
        last_timestamp: Some(now),
        ..Default::default()
    }
}

/// Best-effort event sink; failures are logged and swallowed
#[derive(Clone)]
pub struct EventRecorder {
    client: Arc<dyn ClusterClient>,
}

impl EventRecorder {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    pub async fn record(&self, workload: &WorkloadSpec, event: &DrainEvent) {
        let message = event.message(&workload.name);
        info!(
            namespace = %workload.namespace,
            reason = event.reason(),
            "{}", message
        );

        let object = workload_event(workload, event);
        if let Err(e) = create_object(self.client.as_ref(), &object).await {
            warn!(
                "Failed to record {} event for StatefulSet {}/{}: {}",
                event.reason(),
                workload.namespace,
                workload.name,
                e
            );
        }
    }
}
