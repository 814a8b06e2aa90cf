//! Per-ordinal drain decisions
//!
//! `decide` looks at one StatefulSet and what currently lives at each of its
//! claimed ordinals, and returns the ordered list of actions a pass should
//! take. It performs no I/O; the controller gathers a `ClusterView` from its
//! caches and executes the actions in order, stopping at the first failure.
//!
//! Ordinals are visited highest first and ordinal 0 is never touched. Under
//! `OrderedReady` a pass stops at the first ordinal holding or receiving a
//! drain pod: it does not move on to lower ordinals after a successful
//! create, so at most one drain pod is in flight per workload. A drain pod
//! moves through the following states, all inferred from the
//! cluster on every pass:
//!
//! ```text
//! orphaned claims, no pod --(peer ready)--> drain pod running
//! drain pod Succeeded --> claims deleted, pod deleted
//! drain pod Failed    --> left alone for inspection
//! ```

use crate::recorder::DrainEvent;
use scaledown_core::{PodManagementPolicy, PodPhase, WorkloadSpec};
use std::collections::BTreeMap;
use std::fmt;

/// What occupies the pod name of one ordinal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodState {
    Absent,
    /// A StatefulSet replica
    Regular,
    Drain { phase: PodPhase },
}

/// State of the ordinal-0 pod every drain pod forwards data to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    Missing,
    NotRunning(PodPhase),
    NotReady,
    Ready,
}

/// Snapshot of the cluster state one pass decides on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterView {
    /// Every ordinal with live claims, with whatever holds its pod name
    pub ordinals: BTreeMap<u32, PodState>,
    pub peer: PeerState,
}

/// Why a pass leaves something alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    ScaledToZero,
    NoClaimTemplates,
    OrdinalZero,
    PodExists,
    PeerUnavailable(PeerState),
    DrainInProgress(PodPhase),
    DrainFailed,
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScaledToZero => write!(f, "replicas set to 0, not touching any data"),
            Self::NoClaimTemplates => write!(f, "no volume claim templates"),
            Self::OrdinalZero => write!(f, "ordinal 0 has no peer to drain to"),
            Self::PodExists => write!(f, "a regular pod holds the ordinal"),
            Self::PeerUnavailable(peer) => write!(f, "ordinal zero pod unavailable: {:?}", peer),
            Self::DrainInProgress(phase) => write!(f, "drain pod phase is {}", phase),
            Self::DrainFailed => write!(f, "drain pod failed, leaving pod and claims for inspection"),
        }
    }
}

/// One step of a pass, in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ProvisionAccess { ordinal: u32 },
    CreateDrainPod { ordinal: u32 },
    DeleteClaim { ordinal: u32, claim: String },
    DeletePod { ordinal: u32, pod: String },
    RevokeAccess { ordinal: u32 },
    EmitEvent { ordinal: u32, event: DrainEvent },
    NoOp { ordinal: Option<u32>, reason: Skip },
}

impl Action {
    pub fn ordinal(&self) -> Option<u32> {
        match self {
            Self::ProvisionAccess { ordinal }
            | Self::CreateDrainPod { ordinal }
            | Self::DeleteClaim { ordinal, .. }
            | Self::DeletePod { ordinal, .. }
            | Self::RevokeAccess { ordinal }
            | Self::EmitEvent { ordinal, .. } => Some(*ordinal),
            Self::NoOp { ordinal, .. } => *ordinal,
        }
    }

    /// True for actions that change cluster objects
    pub fn mutates(&self) -> bool {
        !matches!(self, Self::NoOp { .. } | Self::EmitEvent { .. })
    }
}

/// Knobs that change what a pass does, independent of cluster state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecideOptions {
    /// Drain pods need access objects provisioned before creation and
    /// revoked once they reach a terminal phase
    pub provision_access: bool,
}

/// Decide the actions for one pass over `workload`
pub fn decide(workload: &WorkloadSpec, view: &ClusterView, options: DecideOptions) -> Vec<Action> {
    if workload.replicas == 0 {
        return vec![Action::NoOp {
            ordinal: None,
            reason: Skip::ScaledToZero,
        }];
    }
    if workload.claim_templates.is_empty() {
        return vec![Action::NoOp {
            ordinal: None,
            reason: Skip::NoClaimTemplates,
        }];
    }

    let ordered = workload.policy == PodManagementPolicy::OrderedReady;
    let mut actions = Vec::new();

    for (&ordinal, pod) in view.ordinals.iter().rev() {
        if ordinal == 0 {
            actions.push(Action::NoOp {
                ordinal: Some(0),
                reason: Skip::OrdinalZero,
            });
            continue;
        }

        match pod {
            PodState::Drain { phase } => {
                cleanup(workload, ordinal, phase, options, &mut actions);
                if ordered {
                    break;
                }
            }
            PodState::Regular => {
                if workload.is_orphaned(ordinal) {
                    actions.push(Action::NoOp {
                        ordinal: Some(ordinal),
                        reason: Skip::PodExists,
                    });
                }
            }
            PodState::Absent if workload.is_orphaned(ordinal) => {
                if view.peer != PeerState::Ready {
                    actions.push(Action::NoOp {
                        ordinal: Some(ordinal),
                        reason: Skip::PeerUnavailable(view.peer.clone()),
                    });
                    continue;
                }
                if options.provision_access {
                    actions.push(Action::ProvisionAccess { ordinal });
                }
                actions.push(Action::CreateDrainPod { ordinal });
                actions.push(Action::EmitEvent {
                    ordinal,
                    event: DrainEvent::DrainPodCreated {
                        pod: workload.pod_name(ordinal),
                    },
                });
                // Lower ordinals wait for this drain to finish
                if ordered {
                    break;
                }
            }
            PodState::Absent => {}
        }
    }

    actions
}

fn cleanup(
    workload: &WorkloadSpec,
    ordinal: u32,
    phase: &PodPhase,
    options: DecideOptions,
    actions: &mut Vec<Action>,
) {
    let pod = workload.pod_name(ordinal);
    match phase {
        PodPhase::Succeeded => {
            actions.push(Action::EmitEvent {
                ordinal,
                event: DrainEvent::DrainSucceeded { pod: pod.clone() },
            });
            for claim in workload.claim_names(ordinal) {
                actions.push(Action::DeleteClaim {
                    ordinal,
                    claim: claim.clone(),
                });
                actions.push(Action::EmitEvent {
                    ordinal,
                    event: DrainEvent::ClaimDeleted { claim },
                });
            }
            actions.push(Action::DeletePod {
                ordinal,
                pod: pod.clone(),
            });
            actions.push(Action::EmitEvent {
                ordinal,
                event: DrainEvent::DrainPodDeleted { pod },
            });
        }
        PodPhase::Failed => actions.push(Action::NoOp {
            ordinal: Some(ordinal),
            reason: Skip::DrainFailed,
        }),
        other => actions.push(Action::NoOp {
            ordinal: Some(ordinal),
            reason: Skip::DrainInProgress(other.clone()),
        }),
    }

    if phase.is_terminal() && options.provision_access {
        actions.push(Action::RevokeAccess { ordinal });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(replicas: i32, policy: PodManagementPolicy) -> WorkloadSpec {
        WorkloadSpec {
            namespace: "brokers".to_string(),
            name: "b1".to_string(),
            replicas,
            claim_templates: vec!["data".to_string()],
            policy,
            image: Some("broker:latest".to_string()),
        }
    }

    fn view(ordinals: &[(u32, PodState)], peer: PeerState) -> ClusterView {
        ClusterView {
            ordinals: ordinals.iter().cloned().collect(),
            peer,
        }
    }

    fn drain(phase: PodPhase) -> PodState {
        PodState::Drain { phase }
    }

    fn mutations(actions: &[Action]) -> Vec<Action> {
        actions.iter().filter(|a| a.mutates()).cloned().collect()
    }

    fn local() -> DecideOptions {
        DecideOptions::default()
    }

    fn provisioned() -> DecideOptions {
        DecideOptions {
            provision_access: true,
        }
    }

    #[test]
    fn test_scaled_to_zero_does_nothing() {
        let view = view(
            &[(1, drain(PodPhase::Succeeded)), (2, PodState::Absent)],
            PeerState::Ready,
        );
        let actions = decide(&workload(0, PodManagementPolicy::Parallel), &view, provisioned());
        assert_eq!(
            actions,
            vec![Action::NoOp {
                ordinal: None,
                reason: Skip::ScaledToZero
            }]
        );
    }

    #[test]
    fn test_no_claim_templates_does_nothing() {
        let mut workload = workload(1, PodManagementPolicy::Parallel);
        workload.claim_templates.clear();
        let view = view(&[(2, PodState::Absent)], PeerState::Ready);
        assert!(mutations(&decide(&workload, &view, local())).is_empty());
    }

    #[test]
    fn test_creates_highest_orphan_first_ordered() {
        let view = view(
            &[(0, PodState::Regular), (1, PodState::Absent), (2, PodState::Absent)],
            PeerState::Ready,
        );
        let actions = decide(&workload(1, PodManagementPolicy::OrderedReady), &view, local());
        assert_eq!(
            actions,
            vec![
                Action::CreateDrainPod { ordinal: 2 },
                Action::EmitEvent {
                    ordinal: 2,
                    event: DrainEvent::DrainPodCreated {
                        pod: "b1-2".to_string()
                    }
                },
            ]
        );
    }

    #[test]
    fn test_parallel_creates_all_orphans_descending() {
        let view = view(
            &[
                (0, PodState::Regular),
                (3, PodState::Absent),
                (1, PodState::Absent),
                (2, PodState::Absent),
            ],
            PeerState::Ready,
        );
        let created: Vec<u32> = decide(&workload(1, PodManagementPolicy::Parallel), &view, local())
            .iter()
            .filter_map(|a| match a {
                Action::CreateDrainPod { ordinal } => Some(*ordinal),
                _ => None,
            })
            .collect();
        assert_eq!(created, vec![3, 2, 1]);
    }

    #[test]
    fn test_peer_not_ready_skips_creation() {
        for peer in [
            PeerState::Missing,
            PeerState::NotRunning(PodPhase::Pending),
            PeerState::NotReady,
        ] {
            let view = view(&[(1, PodState::Absent), (2, PodState::Absent)], peer);
            let actions = decide(&workload(1, PodManagementPolicy::Parallel), &view, provisioned());
            assert!(mutations(&actions).is_empty());
            assert_eq!(actions.len(), 2);
        }
    }

    #[test]
    fn test_ordinal_zero_is_never_drained() {
        let view = view(
            &[(0, drain(PodPhase::Succeeded))],
            PeerState::Ready,
        );
        let actions = decide(&workload(1, PodManagementPolicy::Parallel), &view, provisioned());
        assert_eq!(
            actions,
            vec![Action::NoOp {
                ordinal: Some(0),
                reason: Skip::OrdinalZero
            }]
        );
    }

    #[test]
    fn test_succeeded_drain_pod_is_cleaned_up() {
        let mut workload = workload(1, PodManagementPolicy::OrderedReady);
        workload.claim_templates = vec!["data".to_string(), "journal".to_string()];
        let view = view(
            &[(1, PodState::Absent), (2, drain(PodPhase::Succeeded))],
            PeerState::Ready,
        );

        let actions = decide(&workload, &view, provisioned());
        assert_eq!(
            actions,
            vec![
                Action::EmitEvent {
                    ordinal: 2,
                    event: DrainEvent::DrainSucceeded {
                        pod: "b1-2".to_string()
                    }
                },
                Action::DeleteClaim {
                    ordinal: 2,
                    claim: "data-b1-2".to_string()
                },
                Action::EmitEvent {
                    ordinal: 2,
                    event: DrainEvent::ClaimDeleted {
                        claim: "data-b1-2".to_string()
                    }
                },
                Action::DeleteClaim {
                    ordinal: 2,
                    claim: "journal-b1-2".to_string()
                },
                Action::EmitEvent {
                    ordinal: 2,
                    event: DrainEvent::ClaimDeleted {
                        claim: "journal-b1-2".to_string()
                    }
                },
                Action::DeletePod {
                    ordinal: 2,
                    pod: "b1-2".to_string()
                },
                Action::EmitEvent {
                    ordinal: 2,
                    event: DrainEvent::DrainPodDeleted {
                        pod: "b1-2".to_string()
                    }
                },
                Action::RevokeAccess { ordinal: 2 },
            ]
        );
    }

    #[test]
    fn test_failed_drain_pod_is_left_alone() {
        let view = view(&[(2, drain(PodPhase::Failed))], PeerState::Ready);

        let actions = decide(&workload(1, PodManagementPolicy::OrderedReady), &view, local());
        assert_eq!(
            actions,
            vec![Action::NoOp {
                ordinal: Some(2),
                reason: Skip::DrainFailed
            }]
        );

        let actions = decide(
            &workload(1, PodManagementPolicy::OrderedReady),
            &view,
            provisioned(),
        );
        assert_eq!(mutations(&actions), vec![Action::RevokeAccess { ordinal: 2 }]);
    }

    #[test]
    fn test_running_drain_pod_waits_and_blocks_ordered() {
        let view = view(
            &[(1, PodState::Absent), (2, drain(PodPhase::Running))],
            PeerState::Ready,
        );

        let ordered = decide(
            &workload(1, PodManagementPolicy::OrderedReady),
            &view,
            provisioned(),
        );
        assert!(mutations(&ordered).is_empty());

        let parallel = decide(&workload(1, PodManagementPolicy::Parallel), &view, local());
        assert_eq!(mutations(&parallel), vec![Action::CreateDrainPod { ordinal: 1 }]);
    }

    #[test]
    fn test_regular_pod_blocks_creation() {
        let view = view(&[(2, PodState::Regular)], PeerState::Ready);
        let actions = decide(&workload(1, PodManagementPolicy::Parallel), &view, local());
        assert_eq!(
            actions,
            vec![Action::NoOp {
                ordinal: Some(2),
                reason: Skip::PodExists
            }]
        );
    }

    #[test]
    fn test_live_ordinals_are_untouched() {
        let view = view(
            &[(1, PodState::Regular), (2, PodState::Absent)],
            PeerState::Ready,
        );
        let actions = decide(&workload(3, PodManagementPolicy::Parallel), &view, local());
        assert!(actions.is_empty());
    }

    #[test]
    fn test_drain_pod_at_live_ordinal_is_still_cleaned_up() {
        // Scaled back up while a drain pod still holds the name
        let view = view(&[(2, drain(PodPhase::Succeeded))], PeerState::Ready);
        let actions = decide(&workload(3, PodManagementPolicy::Parallel), &view, local());
        assert!(actions.contains(&Action::DeletePod {
            ordinal: 2,
            pod: "b1-2".to_string()
        }));
    }

    #[test]
    fn test_provisioning_precedes_creation() {
        let view = view(&[(1, PodState::Absent)], PeerState::Ready);
        let actions = decide(&workload(1, PodManagementPolicy::OrderedReady), &view, provisioned());
        assert_eq!(
            mutations(&actions),
            vec![
                Action::ProvisionAccess { ordinal: 1 },
                Action::CreateDrainPod { ordinal: 1 }
            ]
        );
        assert!(actions.iter().all(|a| a.ordinal() == Some(1)));
    }
}
