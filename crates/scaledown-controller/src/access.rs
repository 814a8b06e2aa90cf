use crate::client::{delete_object, ensure_object, ClusterClient};
use crate::error::Result;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use scaledown_core::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DRAIN_SERVICE_ACCOUNT: &str = "drain-pod-service-account";
pub const DRAIN_ROLE: &str = "drain-pod-role";

/// Role binding name for a namespace
pub fn drain_role_binding(namespace: &str) -> String {
    format!("{}-drain-rb", namespace)
}

/// How drain pods get their API credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum AccessMode {
    /// Drain pods run in the controller's own namespace under an existing
    /// service account (or the namespace default)
    Local {
        #[serde(default, rename = "serviceAccount")]
        service_account: Option<String>,
    },
    /// A dedicated service account, role and binding are created in the
    /// workload namespace before each drain and removed afterwards
    #[default]
    Provisioned,
}

impl AccessMode {
    /// Service account the drain pod runs as
    pub fn service_account(&self) -> Option<&str> {
        match self {
            Self::Local { service_account } => service_account.as_deref(),
            Self::Provisioned => Some(DRAIN_SERVICE_ACCOUNT),
        }
    }

    pub fn is_provisioned(&self) -> bool {
        matches!(self, Self::Provisioned)
    }
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn rule(resource: &str, verb: &str) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![String::new()]),
        resources: Some(vec![resource.to_string()]),
        verbs: vec![verb.to_string()],
        ..Default::default()
    }
}

/// The read-only role a drain pod needs to find its peers
pub fn drain_role(namespace: &str) -> Role {
    Role {
        metadata: meta(namespace, DRAIN_ROLE),
        rules: Some(vec![
            rule("pods", "list"),
            rule("namespaces", "get"),
            rule("endpoints", "get"),
        ]),
    }
}

pub fn drain_role_binding_object(namespace: &str) -> RoleBinding {
    RoleBinding {
        metadata: meta(namespace, &drain_role_binding(namespace)),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: DRAIN_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            api_group: None,
            kind: "ServiceAccount".to_string(),
            name: DRAIN_SERVICE_ACCOUNT.to_string(),
            namespace: Some(namespace.to_string()),
        }]),
    }
}

/// Creates and removes drain pod credentials in a workload namespace
#[derive(Clone)]
pub struct DrainAccess {
    client: Arc<dyn ClusterClient>,
}

impl DrainAccess {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Ensure the service account, role and binding exist.
    /// Objects that already exist are left as they are.
    pub async fn provision(&self, namespace: &str) -> Result<()> {
        info!("Creating drain pod access objects in namespace {}", namespace);
        let client = self.client.as_ref();

        let account = ServiceAccount {
            metadata: meta(namespace, DRAIN_SERVICE_ACCOUNT),
            ..Default::default()
        };
        if !ensure_object(client, &account).await? {
            debug!("ServiceAccount {}/{} already exists", namespace, DRAIN_SERVICE_ACCOUNT);
        }
        ensure_object(client, &drain_role(namespace)).await?;
        ensure_object(client, &drain_role_binding_object(namespace)).await?;
        Ok(())
    }

    /// Remove the binding, role and service account. Failures are logged,
    /// absent objects are ignored.
    pub async fn revoke(&self, namespace: &str) {
        info!("Cleaning up drain pod access objects in namespace {}", namespace);
        let client = self.client.as_ref();
        let binding = drain_role_binding(namespace);

        if let Err(e) = delete_object::<RoleBinding>(client, namespace, &binding).await {
            warn!("Failed to delete RoleBinding {}/{}: {}", namespace, binding, e);
        }
        if let Err(e) = delete_object::<Role>(client, namespace, DRAIN_ROLE).await {
            warn!("Failed to delete Role {}/{}: {}", namespace, DRAIN_ROLE, e);
        }
        if let Err(e) = delete_object::<ServiceAccount>(client, namespace, DRAIN_SERVICE_ACCOUNT).await
        {
            warn!(
                "Failed to delete ServiceAccount {}/{}: {}",
                namespace, DRAIN_SERVICE_ACCOUNT, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCluster, MockVerb};

    #[test]
    fn test_access_mode_service_account() {
        assert_eq!(
            AccessMode::Provisioned.service_account(),
            Some(DRAIN_SERVICE_ACCOUNT)
        );
        let local = AccessMode::Local {
            service_account: None,
        };
        assert_eq!(local.service_account(), None);
        assert!(!local.is_provisioned());
    }

    #[test]
    fn test_access_mode_from_yaml() {
        let mode: AccessMode =
            scaledown_core::from_yaml("mode: local\nserviceAccount: broker-operator\n").unwrap();
        assert_eq!(
            mode,
            AccessMode::Local {
                service_account: Some("broker-operator".to_string())
            }
        );
        let mode: AccessMode = scaledown_core::from_yaml("mode: provisioned\n").unwrap();
        assert!(mode.is_provisioned());
    }

    #[test]
    fn test_drain_role_rules() {
        let role = drain_role("brokers");
        let rules = role.rules.unwrap();
        let summary: Vec<(String, String)> = rules
            .iter()
            .map(|r| (r.resources.as_ref().unwrap()[0].clone(), r.verbs[0].clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("pods".to_string(), "list".to_string()),
                ("namespaces".to_string(), "get".to_string()),
                ("endpoints".to_string(), "get".to_string()),
            ]
        );
        assert_eq!(drain_role_binding("brokers"), "brokers-drain-rb");
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let cluster = Arc::new(MockCluster::new());
        let access = DrainAccess::new(cluster.clone());

        access.provision("brokers").await.unwrap();
        access.provision("brokers").await.unwrap();

        assert!(cluster.contains::<ServiceAccount>("brokers", DRAIN_SERVICE_ACCOUNT));
        assert!(cluster.contains::<Role>("brokers", DRAIN_ROLE));
        assert!(cluster.contains::<RoleBinding>("brokers", "brokers-drain-rb"));
        assert_eq!(cluster.ops().len(), 3);
    }

    #[tokio::test]
    async fn test_revoke_tolerates_absence_and_failure() {
        let cluster = Arc::new(MockCluster::new());
        let access = DrainAccess::new(cluster.clone());

        access.revoke("brokers").await;
        assert!(cluster.ops().is_empty());

        access.provision("brokers").await.unwrap();
        cluster.fail_next(MockVerb::Delete, "Role", DRAIN_ROLE);
        access.revoke("brokers").await;

        assert!(!cluster.contains::<RoleBinding>("brokers", "brokers-drain-rb"));
        assert!(cluster.contains::<Role>("brokers", DRAIN_ROLE));
        assert!(!cluster.contains::<ServiceAccount>("brokers", DRAIN_SERVICE_ACCOUNT));
    }
}
