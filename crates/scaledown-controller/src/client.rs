use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use scaledown_core::{GroupVersionKind, Resource, ResourceEvent, ResourceKey};
use serde::Deserialize;

/// A consistent snapshot of one collection
#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    pub items: Vec<serde_json::Value>,
    /// Collection version to start a watch from
    pub resource_version: String,
}

/// Stream of change notifications for one collection
pub type WatchStream = BoxStream<'static, Result<ResourceEvent>>;

/// Trait for cluster API access
///
/// This trait abstracts over the Kubernetes API server. It works on raw JSON
/// so it stays object safe; the typed helpers below convert to and from
/// k8s-openapi types. `MockCluster` implements it in memory for tests.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List a collection, optionally scoped to one namespace
    async fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<ObjectList>;

    /// Watch a collection for changes after `resource_version`
    async fn watch(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream>;

    /// Fetch one object; `NotFound` when absent
    async fn get(&self, key: &ResourceKey) -> Result<serde_json::Value>;

    /// Create an object in `namespace`; `AlreadyExists` when the name is taken
    async fn create(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: serde_json::Value,
    ) -> Result<serde_json::Value>;

    /// Delete one object; `NotFound` when absent
    async fn delete(&self, key: &ResourceKey) -> Result<()>;
}

/// Fetch a typed object, mapping `NotFound` to `None`
pub async fn get_object<K: Resource>(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
) -> Result<Option<K>> {
    let key = ResourceKey::new(K::type_gvk(), namespace, name);
    match client.get(&key).await {
        Ok(value) => Ok(Some(scaledown_core::from_value(value)?)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Create a typed object in its own namespace
pub async fn create_object<K: Resource>(client: &dyn ClusterClient, object: &K) -> Result<K> {
    let namespace = object.object_namespace().ok_or_else(|| {
        ControllerError::internal_error(format!(
            "{} {} has no namespace",
            K::KIND,
            object.object_name().unwrap_or("<unnamed>")
        ))
    })?;
    let value = scaledown_core::to_value(object)?;
    let created = client.create(&K::type_gvk(), namespace, value).await?;
    Ok(scaledown_core::from_value(created)?)
}

/// Create a typed object, treating an existing object of the same name as success.
///
/// Returns `true` when the object was created by this call.
pub async fn ensure_object<K: Resource>(client: &dyn ClusterClient, object: &K) -> Result<bool> {
    match create_object(client, object).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_already_exists() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete a typed object. Idempotent: an already-absent object is not an error.
///
/// Returns `true` when this call removed the object.
pub async fn delete_object<K: Resource>(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
) -> Result<bool> {
    let key = ResourceKey::new(K::type_gvk(), namespace, name);
    match client.delete(&key).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decode the collection version from a list response body
pub(crate) fn list_from_body(body: serde_json::Value) -> ObjectList {
    #[derive(Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    struct ListMeta {
        resource_version: Option<String>,
    }

    #[derive(Deserialize, Default)]
    struct Body {
        #[serde(default)]
        items: Option<Vec<serde_json::Value>>,
        #[serde(default)]
        metadata: Option<ListMeta>,
    }

    let body: Body = serde_json::from_value(body).unwrap_or_default();
    ObjectList {
        items: body.items.unwrap_or_default(),
        resource_version: body
            .metadata
            .and_then(|m| m.resource_version)
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};

    fn pod(name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("brokers".to_string());
        pod
    }

    #[test]
    fn test_list_from_body() {
        let list = list_from_body(serde_json::json!({
            "kind": "PodList",
            "metadata": {"resourceVersion": "42"},
            "items": [{"metadata": {"name": "a"}}, {"metadata": {"name": "b"}}]
        }));
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.resource_version, "42");

        let empty = list_from_body(serde_json::json!({"items": null}));
        assert!(empty.items.is_empty());
        assert_eq!(empty.resource_version, "");
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let cluster = MockCluster::new();

        let created = create_object(&cluster, &pod("b1-1")).await.unwrap();
        assert!(created.metadata.resource_version.is_some());

        let fetched: Option<Pod> = get_object(&cluster, "brokers", "b1-1").await.unwrap();
        assert!(fetched.is_some());
        let missing: Option<Pod> = get_object(&cluster, "brokers", "b1-9").await.unwrap();
        assert!(missing.is_none());

        assert!(!ensure_object(&cluster, &pod("b1-1")).await.unwrap());
        assert!(create_object(&cluster, &pod("b1-1"))
            .await
            .unwrap_err()
            .is_already_exists());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cluster = MockCluster::new();
        create_object(&cluster, &pod("b1-1")).await.unwrap();

        assert!(delete_object::<Pod>(&cluster, "brokers", "b1-1").await.unwrap());
        assert!(!delete_object::<Pod>(&cluster, "brokers", "b1-1").await.unwrap());
        assert!(!delete_object::<PersistentVolumeClaim>(&cluster, "brokers", "data-b1-1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_create_requires_namespace() {
        let cluster = MockCluster::new();
        let mut pod = pod("b1-1");
        pod.metadata.namespace = None;
        assert!(create_object(&cluster, &pod).await.is_err());
    }
}
