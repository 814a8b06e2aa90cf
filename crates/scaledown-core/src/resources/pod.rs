use k8s_openapi::api::core::v1::Pod;
use std::fmt;

/// Lifecycle phase reported in `status.phase`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown(String),
}

impl PodPhase {
    pub fn of(pod: &Pod) -> Self {
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("");
        Self::parse(phase)
    }

    pub fn parse(phase: &str) -> Self {
        match phase {
            // No phase yet means the kubelet has not picked the pod up
            "" | "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Succeeded and Failed pods never run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::Unknown(p) => write!(f, "{}", p),
        }
    }
}

/// True when the pod reports a `Ready` condition with status `True`
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};

    fn pod_with(phase: Option<&str>, ready: Option<&str>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: phase.map(str::to_string),
                conditions: ready.map(|status| {
                    vec![PodCondition {
                        type_: "Ready".to_string(),
                        status: status.to_string(),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!(PodPhase::of(&Pod::default()), PodPhase::Pending);
        assert_eq!(PodPhase::of(&pod_with(Some("Running"), None)), PodPhase::Running);
        assert_eq!(
            PodPhase::of(&pod_with(Some("Succeeded"), None)),
            PodPhase::Succeeded
        );
        assert_eq!(
            PodPhase::parse("Evicted"),
            PodPhase::Unknown("Evicted".to_string())
        );
        assert!(PodPhase::Failed.is_terminal());
        assert!(!PodPhase::Running.is_terminal());
    }

    #[test]
    fn test_readiness() {
        assert!(is_pod_ready(&pod_with(Some("Running"), Some("True"))));
        assert!(!is_pod_ready(&pod_with(Some("Running"), Some("False"))));
        assert!(!is_pod_ready(&pod_with(Some("Running"), None)));
        assert!(!is_pod_ready(&Pod::default()));
    }
}
