// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for scaledown operations
#[derive(Error, Debug, Diagnostic)]
pub enum ScaledownError {
    /// Object key is not of the form `namespace/name` or `name`
    #[error("Invalid object key: {key}")]
    #[diagnostic(
        code(scaledown::invalid_key),
        help("Keys must look like 'namespace/name' (or just 'name' for cluster-scoped objects)")
    )]
    InvalidKey {
        #[allow(unused)]
        key: String,
    },

    /// A required metadata field is missing
    #[error("Missing required field: {field}")]
    #[diagnostic(
        code(scaledown::missing_field),
        help("Objects read from the cluster always carry metadata.name and metadata.namespace; check the object source")
    )]
    MissingField {
        #[allow(unused)]
        field: String,
    },

    /// Invalid resource
    #[error("Invalid resource: {reason}")]
    #[diagnostic(code(scaledown::invalid_resource), help("{suggestion}"))]
    InvalidResource {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(scaledown::serialization_error),
        help("Ensure the document is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, ScaledownError>;

impl ScaledownError {
    /// Create an InvalidKey error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    /// Create a MissingField error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create an InvalidResource error
    pub fn invalid_resource(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }
}
