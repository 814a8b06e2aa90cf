use miette::Diagnostic;
use thiserror::Error;

/// Controller error type for cluster access and drain orchestration
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// Object not found on the API server
    #[error("{kind} not found: {namespace}/{name}")]
    #[diagnostic(
        code(scaledown::controller::not_found),
        help("The object may have been deleted concurrently. Absent objects are usually a valid state for the drain controller")
    )]
    NotFound {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
    },

    /// Object already exists
    #[error("{kind} already exists: {namespace}/{name}")]
    #[diagnostic(
        code(scaledown::controller::already_exists),
        help("Another pass or another actor created this object first; the next pass will observe it")
    )]
    AlreadyExists {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
    },

    /// API server answered with a non-success status
    #[error("{verb} {path} failed with status {status}: {body}")]
    #[diagnostic(
        code(scaledown::controller::api_error),
        help("Check the controller's RBAC permissions and the API server logs. The work item is retried with backoff")
    )]
    ApiError {
        #[allow(unused)]
        verb: String,
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        status: u16,
        #[allow(unused)]
        body: String,
    },

    /// The request never produced a response
    #[error("HTTP request failed: {message}")]
    #[diagnostic(
        code(scaledown::controller::transport_error),
        help("Verify the API server URL and network connectivity. The work item is retried with backoff")
    )]
    Transport {
        #[allow(unused)]
        message: String,
    },

    /// A watch stream broke or delivered an error event
    #[error("Watch on {kind} failed: {message}")]
    #[diagnostic(
        code(scaledown::controller::watch_failed),
        help("The reflector relists and re-establishes the watch automatically")
    )]
    WatchFailed {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        message: String,
    },

    /// Cache read before its first list completed
    #[error("Cache for {kind} has not synced yet")]
    #[diagnostic(
        code(scaledown::controller::cache_not_synced),
        help("Workers only start once caches sync; this indicates a read from outside the worker loop")
    )]
    CacheNotSynced {
        #[allow(unused)]
        kind: String,
    },

    /// No registry entry for a workload that needs a drain pod
    #[error("No drain pod data for StatefulSet {workload}")]
    #[diagnostic(
        code(scaledown::controller::missing_registration),
        help("Register the broker workload (config file 'brokers' list or register_workload) before scaling it down")
    )]
    MissingRegistration {
        #[allow(unused)]
        workload: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(scaledown::controller::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] scaledown_core::ScaledownError),

    /// Internal error
    #[error("Internal controller error: {message}")]
    #[diagnostic(
        code(scaledown::controller::internal_error),
        help("This is likely a bug in scaledown-controller. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn already_exists(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn api_error(
        verb: impl Into<String>,
        path: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Self::ApiError {
            verb: verb.into(),
            path: path.into(),
            status,
            body: body.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn watch_failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WatchFailed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn cache_not_synced(kind: impl Into<String>) -> Self {
        Self::CacheNotSynced { kind: kind.into() }
    }

    pub fn missing_registration(workload: impl Into<String>) -> Self {
        Self::MissingRegistration {
            workload: workload.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}
