pub mod pod;
pub mod statefulset;

pub use pod::{is_pod_ready, PodPhase};
pub use statefulset::{PodManagementPolicy, WorkloadSpec};

use crate::error::{Result, ScaledownError};
use crate::{GroupVersionKind, ObjectRef, ResourceKey, ResourceVersion};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::{Metadata, Resource as ApiResource};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Capability shared by every Kubernetes object this controller reads or writes.
///
/// Implemented for all k8s-openapi types with standard object metadata, so the
/// cache, the cluster client and the mock cluster can be written once.
pub trait Resource:
    ApiResource + Metadata<Ty = ObjectMeta> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// GroupVersionKind of this resource type
    fn type_gvk() -> GroupVersionKind {
        GroupVersionKind::new(Self::GROUP, Self::VERSION, Self::KIND)
    }

    fn object_name(&self) -> Option<&str> {
        self.metadata().name.as_deref()
    }

    fn object_namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// Namespace/name identity; cluster-scoped objects get an empty namespace
    fn object_ref(&self) -> Result<ObjectRef> {
        let name = self
            .object_name()
            .ok_or_else(|| ScaledownError::missing_field("metadata.name"))?;
        Ok(ObjectRef::new(self.object_namespace().unwrap_or_default(), name))
    }

    fn resource_key(&self) -> Result<ResourceKey> {
        let obj = self.object_ref()?;
        Ok(ResourceKey::new(Self::type_gvk(), obj.namespace, obj.name))
    }

    fn resource_version(&self) -> Option<ResourceVersion> {
        self.metadata()
            .resource_version
            .as_ref()
            .map(ResourceVersion::new)
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// True once the API server has stamped a deletion timestamp
    fn is_being_deleted(&self) -> bool {
        self.metadata().deletion_timestamp.is_some()
    }
}

impl<K> Resource for K where
    K: ApiResource
        + Metadata<Ty = ObjectMeta>
        + Serialize
        + DeserializeOwned
        + Clone
        + Send
        + Sync
        + 'static
{
}

/// Any object that can name the object controlling it
pub trait Ownable {
    fn owner_references(&self) -> &[OwnerReference];

    /// The owner reference flagged `controller: true`, if any
    fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references()
            .iter()
            .find(|r| r.controller == Some(true))
    }

    /// The controlling owner, only when it is of the given kind
    fn controller_owner_of_kind(&self, kind: &str) -> Option<&OwnerReference> {
        self.controller_owner().filter(|r| r.kind == kind)
    }
}

impl<K: Resource> Ownable for K {
    fn owner_references(&self) -> &[OwnerReference] {
        self.metadata().owner_references.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn owner(kind: &str, name: &str, controller: Option<bool>) -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: "uid-1".to_string(),
            controller,
            block_owner_deletion: None,
        }
    }

    #[test]
    fn test_type_gvk() {
        assert_eq!(Pod::type_gvk().api_version(), "v1");
        assert_eq!(Pod::type_gvk().kind, "Pod");
        assert_eq!(StatefulSet::type_gvk().api_version(), "apps/v1");
        assert_eq!(
            PersistentVolumeClaim::type_gvk().resource_name(),
            "persistentvolumeclaims"
        );
    }

    #[test]
    fn test_pod_resource_key() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("b1-0".to_string());
        pod.metadata.namespace = Some("brokers".to_string());

        let key = pod.resource_key().unwrap();
        assert_eq!(key.name, "b1-0");
        assert_eq!(key.namespace, "brokers");
        assert_eq!(key.gvk.kind, "Pod");
        assert_eq!(pod.object_ref().unwrap().key(), "brokers/b1-0");
    }

    #[test]
    fn test_missing_name_is_an_error() {
        let pod = Pod::default();
        assert!(pod.object_ref().is_err());
    }

    #[test]
    fn test_controller_owner() {
        let mut pod = Pod::default();
        assert!(pod.controller_owner().is_none());

        pod.metadata.owner_references = Some(vec![
            owner("ReplicaSet", "rs", None),
            owner("StatefulSet", "b1", Some(true)),
        ]);
        assert_eq!(pod.controller_owner().unwrap().name, "b1");
        assert!(pod.controller_owner_of_kind("StatefulSet").is_some());
        assert!(pod.controller_owner_of_kind("ReplicaSet").is_none());
    }

    #[test]
    fn test_deletion_and_annotations() {
        let mut claim = PersistentVolumeClaim::default();
        assert!(!claim.is_being_deleted());
        claim.metadata.deletion_timestamp = Some(Time(Default::default()));
        assert!(claim.is_being_deleted());

        claim.metadata.annotations = Some([("a".to_string(), "b".to_string())].into());
        assert_eq!(claim.annotation("a"), Some("b"));
        assert_eq!(claim.annotation("missing"), None);
    }
}
