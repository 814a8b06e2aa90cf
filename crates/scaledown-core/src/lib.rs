//! Scaledown Core - Fundamental types for the StatefulSet drain controller
//!
//! This crate provides:
//! - Type-safe resource keys and namespace/name identities
//! - A `Resource` capability over k8s-openapi types and the `Ownable` owner lookup
//! - Ordinal naming conventions for StatefulSet pods and claims
//! - Error types with miette diagnostics
//! - Serialization helpers

pub mod error;
pub mod events;
pub mod naming;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use error::{Result, ScaledownError};
pub use events::{ResourceEvent, WatchEventType};
pub use resources::{
    is_pod_ready, Ownable, PodManagementPolicy, PodPhase, Resource, WorkloadSpec,
};
pub use types::{GroupVersionKind, ObjectRef, ResourceKey, ResourceVersion};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::apps::v1::StatefulSet;
pub use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use std::path::Path;

/// Convert a resource to a JSON value
pub fn to_value<T: serde::Serialize>(resource: &T) -> Result<serde_json::Value> {
    serde_json::to_value(resource).map_err(|e| {
        ScaledownError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Convert a JSON value into a typed resource
pub fn from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        ScaledownError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a resource to YAML
pub fn to_yaml<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_yaml::to_string(resource).map_err(|e| {
        ScaledownError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from YAML
pub fn from_yaml<T: serde::de::DeserializeOwned>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        ScaledownError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Read and deserialize a YAML (or JSON) document from disk
pub fn from_yaml_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        ScaledownError::serialization_error(
            format!("Failed to read {}: {}", path.display(), e),
            Some(Box::new(e)),
        )
    })?;
    from_yaml(&data)
}
