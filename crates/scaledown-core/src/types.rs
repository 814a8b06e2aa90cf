use crate::error::{Result, ScaledownError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// GroupVersionKind uniquely identifies a Kubernetes resource type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group (e.g., "", "apps", "rbac.authorization.k8s.io")
    pub group: String,
    /// API version (e.g., "v1")
    pub version: String,
    /// Resource kind (e.g., "Pod", "StatefulSet")
    pub kind: String,
}

impl GroupVersionKind {
    /// Create a new GVK
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Create a GVK from apiVersion and kind
    /// apiVersion format: "v1" or "group/version"
    pub fn from_api_version_kind(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };

        Self {
            group,
            version,
            kind: kind.to_string(),
        }
    }

    /// Get the apiVersion string (group/version or just version)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Get the full API path segment
    pub fn api_path(&self) -> String {
        if self.group.is_empty() {
            format!("api/{}", self.version)
        } else {
            format!("apis/{}/{}", self.group, self.version)
        }
    }

    /// Get the resource name (lowercase, plural)
    pub fn resource_name(&self) -> String {
        let lower = self.kind.to_lowercase();
        if lower.ends_with('s') {
            format!("{}es", lower)
        } else if lower.ends_with('y') {
            format!("{}ies", &lower[..lower.len() - 1])
        } else {
            format!("{}s", lower)
        }
    }

    /// Collection path, optionally scoped to a namespace
    pub fn collection_path(&self, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!(
                "/{}/namespaces/{}/{}",
                self.api_path(),
                ns,
                self.resource_name()
            ),
            None => format!("/{}/{}", self.api_path(), self.resource_name()),
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// ResourceKey uniquely identifies a specific resource instance
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// GroupVersionKind of the resource
    pub gvk: GroupVersionKind,
    /// Namespace (empty for cluster-scoped resources)
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ResourceKey {
    /// Create a new ResourceKey
    pub fn new(
        gvk: GroupVersionKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            gvk,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Check if this is a namespaced resource
    pub fn is_namespaced(&self) -> bool {
        !self.namespace.is_empty()
    }

    /// Get the API path for this resource
    pub fn api_path(&self) -> String {
        format!("{}/{}", self.collection_path(), self.name)
    }

    /// Get the API path for the collection (without name)
    pub fn collection_path(&self) -> String {
        let namespace = self.is_namespaced().then_some(self.namespace.as_str());
        self.gvk.collection_path(namespace)
    }

    /// The namespace/name part of this key
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(&self.namespace, &self.name)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_namespaced() {
            write!(f, "{}/{}/{}", self.gvk, self.namespace, self.name)
        } else {
            write!(f, "{}/{}", self.gvk, self.name)
        }
    }
}

/// Opaque version token assigned by the API server on every write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVersion(pub String);

impl ResourceVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Namespace/name identity of an object, independent of its kind.
///
/// This is also the work queue key format: `namespace/name`, or just `name`
/// when the namespace is empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Render as a work queue key
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ObjectRef {
    type Err = ScaledownError;

    fn from_str(key: &str) -> Result<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::new("", *name)),
            [namespace, name] if !name.is_empty() => Ok(Self::new(*namespace, *name)),
            _ => Err(ScaledownError::invalid_key(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk_from_api_version() {
        let gvk = GroupVersionKind::from_api_version_kind("v1", "Pod");
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.api_version(), "v1");

        let gvk = GroupVersionKind::from_api_version_kind("apps/v1", "StatefulSet");
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "StatefulSet");
        assert_eq!(gvk.api_version(), "apps/v1");
    }

    #[test]
    fn test_gvk_resource_name() {
        let cases = [
            ("v1", "Pod", "pods"),
            ("v1", "PersistentVolumeClaim", "persistentvolumeclaims"),
            ("v1", "ServiceAccount", "serviceaccounts"),
            ("apps/v1", "StatefulSet", "statefulsets"),
            ("rbac.authorization.k8s.io/v1", "RoleBinding", "rolebindings"),
        ];
        for (api_version, kind, plural) in cases {
            let gvk = GroupVersionKind::from_api_version_kind(api_version, kind);
            assert_eq!(gvk.resource_name(), plural);
        }
    }

    #[test]
    fn test_resource_key_api_path() {
        let gvk = GroupVersionKind::from_api_version_kind("v1", "Pod");
        let key = ResourceKey::new(gvk, "brokers", "b1-2");
        assert_eq!(key.api_path(), "/api/v1/namespaces/brokers/pods/b1-2");

        let gvk = GroupVersionKind::from_api_version_kind("apps/v1", "StatefulSet");
        assert_eq!(
            gvk.collection_path(None),
            "/apis/apps/v1/statefulsets"
        );
        let key = ResourceKey::new(gvk, "brokers", "b1");
        assert_eq!(
            key.collection_path(),
            "/apis/apps/v1/namespaces/brokers/statefulsets"
        );
    }

    #[test]
    fn test_object_ref_key_roundtrip() {
        let obj = ObjectRef::new("brokers", "b1");
        assert_eq!(obj.key(), "brokers/b1");
        assert_eq!("brokers/b1".parse::<ObjectRef>().unwrap(), obj);

        let cluster_scoped: ObjectRef = "b1".parse().unwrap();
        assert_eq!(cluster_scoped.namespace, "");
        assert_eq!(cluster_scoped.key(), "b1");
    }

    #[test]
    fn test_object_ref_rejects_malformed_keys() {
        assert!("a/b/c".parse::<ObjectRef>().is_err());
        assert!("".parse::<ObjectRef>().is_err());
        assert!("ns/".parse::<ObjectRef>().is_err());
    }
}
