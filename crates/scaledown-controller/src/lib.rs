// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod access;
pub mod api_client;
pub mod cache;
pub mod claims;
pub mod client;
pub mod config;
pub mod controller;
pub mod decide;
pub mod drain_pod;
pub mod error;
pub mod mock;
pub mod queue;
pub mod recorder;
pub mod registry;

// Re-export primary types
pub use error::{ControllerError, Result};
pub use mock::MockCluster;

// Re-export cluster access
pub use access::{AccessMode, DrainAccess};
pub use api_client::{ApiClient, ApiClientConfig};
pub use client::ClusterClient;

// Re-export controller types
pub use config::{BackoffConfig, BrokerRegistration, DrainControllerConfig};
pub use controller::DrainController;
pub use decide::{decide, Action, ClusterView, DecideOptions, PeerState, PodState, Skip};
pub use drain_pod::{build_drain_pod, DrainPodFactory, DrainPodSpec, DrainPodTemplate};
pub use queue::{ExponentialBackoff, WorkQueue};
pub use recorder::{DrainEvent, EventRecorder};
pub use registry::{BrokerMetadata, WorkloadRegistry};
