use crate::error::{Result, ScaledownError};
use crate::naming;
use crate::ObjectRef;
use k8s_openapi::api::apps::v1::StatefulSet;

/// StatefulSet pod management policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PodManagementPolicy {
    /// Pods are created and removed one ordinal at a time (the API default)
    #[default]
    OrderedReady,
    /// Pods are created and removed concurrently
    Parallel,
}

impl PodManagementPolicy {
    pub fn parse(policy: Option<&str>) -> Self {
        match policy {
            Some("Parallel") => Self::Parallel,
            _ => Self::OrderedReady,
        }
    }
}

/// The parts of a StatefulSet the drain controller reasons about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub namespace: String,
    pub name: String,
    /// Desired replica count (`spec.replicas`, defaulting to 1 like the API server)
    pub replicas: i32,
    /// Names of the volume claim templates, in declaration order
    pub claim_templates: Vec<String>,
    pub policy: PodManagementPolicy,
    /// Image of the first container in the pod template
    pub image: Option<String>,
}

impl WorkloadSpec {
    pub fn from_statefulset(sts: &StatefulSet) -> Result<Self> {
        let name = sts
            .metadata
            .name
            .clone()
            .ok_or_else(|| ScaledownError::missing_field("metadata.name"))?;
        let namespace = sts.metadata.namespace.clone().unwrap_or_default();

        let spec = sts.spec.as_ref().ok_or_else(|| {
            ScaledownError::invalid_resource(
                format!("StatefulSet {} has no spec", name),
                "StatefulSets read from the API server always carry a spec",
            )
        })?;

        let claim_templates = spec
            .volume_claim_templates
            .as_ref()
            .map(|templates| {
                templates
                    .iter()
                    .filter_map(|t| t.metadata.name.clone())
                    .collect()
            })
            .unwrap_or_default();

        let image = spec
            .template
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .and_then(|c| c.image.clone());

        Ok(Self {
            namespace,
            name,
            replicas: spec.replicas.unwrap_or(1),
            claim_templates,
            policy: PodManagementPolicy::parse(spec.pod_management_policy.as_deref()),
            image,
        })
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(&self.namespace, &self.name)
    }

    /// Name of the pod at `ordinal`
    pub fn pod_name(&self, ordinal: u32) -> String {
        naming::pod_name(&self.name, ordinal)
    }

    /// Names of every claim bound to `ordinal`, one per claim template
    pub fn claim_names(&self, ordinal: u32) -> Vec<String> {
        self.claim_templates
            .iter()
            .map(|t| naming::claim_name(t, &self.name, ordinal))
            .collect()
    }

    /// An ordinal at or above the desired replica count has no pod of its own
    pub fn is_orphaned(&self, ordinal: u32) -> bool {
        i64::from(ordinal) >= i64::from(self.replicas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSetSpec;
    use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaim, PodSpec, PodTemplateSpec};

    fn claim_template(name: &str) -> PersistentVolumeClaim {
        let mut pvc = PersistentVolumeClaim::default();
        pvc.metadata.name = Some(name.to_string());
        pvc
    }

    fn statefulset(replicas: Option<i32>, policy: Option<&str>) -> StatefulSet {
        let mut sts = StatefulSet::default();
        sts.metadata.name = Some("b1".to_string());
        sts.metadata.namespace = Some("brokers".to_string());
        sts.spec = Some(StatefulSetSpec {
            replicas,
            pod_management_policy: policy.map(str::to_string),
            volume_claim_templates: Some(vec![claim_template("data"), claim_template("logs")]),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "broker".to_string(),
                        image: Some("quay.io/artemis/broker:7.9".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        });
        sts
    }

    #[test]
    fn test_from_statefulset() {
        let spec = WorkloadSpec::from_statefulset(&statefulset(Some(3), Some("Parallel"))).unwrap();
        assert_eq!(spec.name, "b1");
        assert_eq!(spec.namespace, "brokers");
        assert_eq!(spec.replicas, 3);
        assert_eq!(spec.claim_templates, vec!["data", "logs"]);
        assert_eq!(spec.policy, PodManagementPolicy::Parallel);
        assert_eq!(spec.image.as_deref(), Some("quay.io/artemis/broker:7.9"));
    }

    #[test]
    fn test_defaults() {
        let spec = WorkloadSpec::from_statefulset(&statefulset(None, None)).unwrap();
        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.policy, PodManagementPolicy::OrderedReady);
    }

    #[test]
    fn test_missing_spec_is_rejected() {
        let mut sts = statefulset(Some(1), None);
        sts.spec = None;
        assert!(WorkloadSpec::from_statefulset(&sts).is_err());
    }

    #[test]
    fn test_names_and_orphans() {
        let spec = WorkloadSpec::from_statefulset(&statefulset(Some(1), None)).unwrap();
        assert_eq!(spec.pod_name(2), "b1-2");
        assert_eq!(spec.claim_names(2), vec!["data-b1-2", "logs-b1-2"]);
        assert!(!spec.is_orphaned(0));
        assert!(spec.is_orphaned(1));
        assert!(spec.is_orphaned(2));
    }
}
