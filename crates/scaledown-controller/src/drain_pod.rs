use crate::access::AccessMode;
use crate::error::{ControllerError, Result};
use crate::registry::{BrokerMetadata, WorkloadRegistry};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, ObjectFieldSelector, PersistentVolumeClaimVolumeSource, Pod,
    PodSpec, Volume, VolumeMount,
};
use scaledown_core::naming::claim_name;
use scaledown_core::{ObjectMeta, Resource, WorkloadSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation naming the StatefulSet a drain pod works for
pub const DRAIN_OWNER_ANNOTATION: &str = "statefulsets.kubernetes.io/drainer-pod-owner";

/// Label carried by every drain pod; the value is the pod's own name
pub const DRAIN_POD_LABEL: &str = "drain-pod";

/// True when the pod carries a non-empty drain owner annotation
pub fn is_drain_pod(pod: &Pod) -> bool {
    pod.annotation(DRAIN_OWNER_ANNOTATION)
        .is_some_and(|owner| !owner.is_empty())
}

/// Tunable parts of the drain pod. Every field has a working default and
/// can be overridden from the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DrainPodTemplate {
    pub container_name: String,
    pub command: Vec<String>,
    pub termination_grace_period_seconds: i64,
    /// Appended to the cluster name to form the `app` label
    pub app_label_suffix: String,
    /// Broker data lives under `<data_root>/<cluster>/data`
    pub data_root: String,
    pub extra_args: String,
    pub user: String,
    pub password: String,
    pub role: String,
    pub broker_name: String,
    pub transports: String,
    pub global_max_size: String,
    pub replicas: String,
    pub dns_ping_service_port: u16,
    /// Additional environment, appended after the built-in variables
    pub extra_env: BTreeMap<String, String>,
}

impl Default for DrainPodTemplate {
    fn default() -> Self {
        Self {
            container_name: "drainer-amq".to_string(),
            command: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "echo \"Starting the drainer\" ; /opt/amq/bin/drain.sh; echo \"Drain completed! Exit code $?\""
                    .to_string(),
            ],
            termination_grace_period_seconds: 5,
            app_label_suffix: "-amq-drainer".to_string(),
            data_root: "/opt".to_string(),
            extra_args: "--no-autotune".to_string(),
            user: "admin".to_string(),
            password: "admin".to_string(),
            role: "admin".to_string(),
            broker_name: "amq-broker".to_string(),
            transports: "openwire,amqp,stomp,mqtt,hornetq".to_string(),
            global_max_size: "100mb".to_string(),
            replicas: "1".to_string(),
            dns_ping_service_port: 8888,
            extra_env: BTreeMap::new(),
        }
    }
}

impl DrainPodTemplate {
    fn data_dir(&self, cluster_name: &str) -> String {
        format!(
            "{}/{}/data",
            self.data_root.trim_end_matches('/'),
            cluster_name
        )
    }

    fn env(&self, broker: &BrokerMetadata) -> Vec<EnvVar> {
        let value = |name: &str, value: &str| EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        };

        let mut env = vec![
            value("AMQ_EXTRA_ARGS", &self.extra_args),
            value("HEADLESS_SVC_NAME", &broker.headless_service),
            value("PING_SVC_NAME", &broker.ping_service),
            value("AMQ_USER", &self.user),
            value("AMQ_PASSWORD", &self.password),
            value("AMQ_ROLE", &self.role),
            value("AMQ_NAME", &self.broker_name),
            value("AMQ_TRANSPORTS", &self.transports),
            value("AMQ_GLOBAL_MAX_SIZE", &self.global_max_size),
            value("AMQ_DATA_DIR", &self.data_dir(&broker.cluster_name)),
            value("AMQ_DATA_DIR_LOGGING", "true"),
            value("AMQ_CLUSTERED", "true"),
            value("AMQ_REPLICAS", &self.replicas),
            value("AMQ_CLUSTER_USER", &broker.cluster_user),
            value("AMQ_CLUSTER_PASSWORD", &broker.cluster_password),
            EnvVar {
                name: "POD_NAMESPACE".to_string(),
                value: None,
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        api_version: None,
                        field_path: "metadata.namespace".to_string(),
                    }),
                    ..Default::default()
                }),
            },
            value(
                "OPENSHIFT_DNS_PING_SERVICE_PORT",
                &self.dns_ping_service_port.to_string(),
            ),
        ];
        env.extend(self.extra_env.iter().map(|(k, v)| value(k, v)));
        env
    }
}

/// Everything a drain pod is rendered from
#[derive(Debug, Clone)]
pub struct DrainPodSpec<'a> {
    pub workload: &'a WorkloadSpec,
    pub ordinal: u32,
    pub broker: &'a BrokerMetadata,
    pub image: &'a str,
    pub service_account: Option<&'a str>,
    pub template: &'a DrainPodTemplate,
}

/// Build the drain pod for one orphaned ordinal
pub fn build_drain_pod(spec: &DrainPodSpec<'_>) -> Pod {
    let workload = spec.workload;
    let template = spec.template;
    let cluster = &spec.broker.cluster_name;
    let pod_name = workload.pod_name(spec.ordinal);

    let volumes: Vec<Volume> = workload
        .claim_templates
        .iter()
        .map(|t| Volume {
            name: t.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim_name(t, &workload.name, spec.ordinal),
                read_only: None,
            }),
            ..Default::default()
        })
        .collect();

    // The broker operator names its data claim template after the cluster
    let data_volume = workload
        .claim_templates
        .iter()
        .find(|t| *t == cluster)
        .or(workload.claim_templates.first())
        .cloned()
        .unwrap_or_else(|| cluster.clone());

    let container = Container {
        name: template.container_name.clone(),
        image: Some(spec.image.to_string()),
        command: Some(template.command.clone()),
        env: Some(template.env(spec.broker)),
        volume_mounts: Some(vec![VolumeMount {
            name: data_volume,
            mount_path: template.data_dir(cluster),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let labels = BTreeMap::from([
        ("app".to_string(), format!("{}{}", cluster, template.app_label_suffix)),
        (DRAIN_POD_LABEL.to_string(), pod_name.clone()),
    ]);
    let annotations = BTreeMap::from([(DRAIN_OWNER_ANNOTATION.to_string(), workload.name.clone())]);

    let service_account = spec
        .service_account
        .filter(|sa| !sa.is_empty())
        .map(str::to_string);

    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name),
            namespace: Some(workload.namespace.clone()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some("OnFailure".to_string()),
            termination_grace_period_seconds: Some(template.termination_grace_period_seconds),
            service_account: service_account.clone(),
            service_account_name: service_account,
            volumes: Some(volumes),
            ..Default::default()
        }),
        status: None,
    }
}

/// Renders drain pods for registered workloads
#[derive(Clone)]
pub struct DrainPodFactory {
    registry: WorkloadRegistry,
    template: DrainPodTemplate,
    access: AccessMode,
}

impl DrainPodFactory {
    pub fn new(registry: WorkloadRegistry, template: DrainPodTemplate, access: AccessMode) -> Self {
        Self {
            registry,
            template,
            access,
        }
    }

    pub fn registry(&self) -> &WorkloadRegistry {
        &self.registry
    }

    /// Render the drain pod for `ordinal` of `workload`.
    ///
    /// Fails when the workload was never registered or its pod template
    /// names no image.
    pub fn render(&self, workload: &WorkloadSpec, ordinal: u32) -> Result<Pod> {
        let broker = self
            .registry
            .lookup(&workload.object_ref())
            .ok_or_else(|| ControllerError::missing_registration(&workload.name))?;

        let image = workload
            .image
            .as_deref()
            .filter(|image| !image.is_empty())
            .ok_or_else(|| {
                ControllerError::invalid_config(
                    format!("No drain pod image configured for StatefulSet {}", workload.name),
                    "The first container of the StatefulSet pod template must name an image",
                )
            })?;

        Ok(build_drain_pod(&DrainPodSpec {
            workload,
            ordinal,
            broker: &broker,
            image,
            service_account: self.access.service_account(),
            template: &self.template,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scaledown_core::{ObjectRef, PodManagementPolicy};

    fn workload() -> WorkloadSpec {
        WorkloadSpec {
            namespace: "brokers".to_string(),
            name: "ex-aao-ss".to_string(),
            replicas: 1,
            claim_templates: vec!["ex-aao".to_string()],
            policy: PodManagementPolicy::OrderedReady,
            image: Some("quay.io/artemiscloud/broker:1.0".to_string()),
        }
    }

    fn broker() -> BrokerMetadata {
        BrokerMetadata {
            cluster_name: "ex-aao".to_string(),
            headless_service: "ex-aao-hdls-svc".to_string(),
            ping_service: "ex-aao-ping-svc".to_string(),
            cluster_user: "cu".to_string(),
            cluster_password: "cp".to_string(),
        }
    }

    fn env_value(pod: &Pod, name: &str) -> Option<String> {
        pod.spec.as_ref().unwrap().containers[0]
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.clone())
    }

    fn factory(access: AccessMode) -> DrainPodFactory {
        let registry = WorkloadRegistry::new();
        registry.register(ObjectRef::new("brokers", "ex-aao-ss"), broker());
        DrainPodFactory::new(registry, DrainPodTemplate::default(), access)
    }

    #[test]
    fn test_build_drain_pod() {
        let workload = workload();
        let broker = broker();
        let template = DrainPodTemplate::default();
        let pod = build_drain_pod(&DrainPodSpec {
            workload: &workload,
            ordinal: 2,
            broker: &broker,
            image: "broker:1",
            service_account: Some("drainer"),
            template: &template,
        });

        assert_eq!(pod.metadata.name.as_deref(), Some("ex-aao-ss-2"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("brokers"));
        assert!(is_drain_pod(&pod));
        assert_eq!(pod.annotation(DRAIN_OWNER_ANNOTATION), Some("ex-aao-ss"));

        let labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["app"], "ex-aao-amq-drainer");
        assert_eq!(labels[DRAIN_POD_LABEL], "ex-aao-ss-2");

        let spec = pod.spec.as_ref().unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("OnFailure"));
        assert_eq!(spec.termination_grace_period_seconds, Some(5));
        assert_eq!(spec.service_account_name.as_deref(), Some("drainer"));

        let volumes = spec.volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(
            volumes[0].persistent_volume_claim.as_ref().unwrap().claim_name,
            "ex-aao-ex-aao-ss-2"
        );

        let container = &spec.containers[0];
        assert_eq!(container.name, "drainer-amq");
        assert_eq!(container.image.as_deref(), Some("broker:1"));
        let mount = &container.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.name, "ex-aao");
        assert_eq!(mount.mount_path, "/opt/ex-aao/data");

        assert_eq!(env_value(&pod, "AMQ_DATA_DIR").as_deref(), Some("/opt/ex-aao/data"));
        assert_eq!(env_value(&pod, "HEADLESS_SVC_NAME").as_deref(), Some("ex-aao-hdls-svc"));
        assert_eq!(env_value(&pod, "AMQ_CLUSTER_PASSWORD").as_deref(), Some("cp"));
        assert_eq!(
            env_value(&pod, "OPENSHIFT_DNS_PING_SERVICE_PORT").as_deref(),
            Some("8888")
        );
    }

    #[test]
    fn test_one_volume_per_claim_template() {
        let mut workload = workload();
        workload.claim_templates = vec!["data".to_string(), "journal".to_string()];
        let broker = broker();
        let template = DrainPodTemplate::default();
        let pod = build_drain_pod(&DrainPodSpec {
            workload: &workload,
            ordinal: 1,
            broker: &broker,
            image: "broker:1",
            service_account: None,
            template: &template,
        });

        let spec = pod.spec.unwrap();
        let claims: Vec<String> = spec
            .volumes
            .unwrap()
            .into_iter()
            .map(|v| v.persistent_volume_claim.unwrap().claim_name)
            .collect();
        assert_eq!(claims, vec!["data-ex-aao-ss-1", "journal-ex-aao-ss-1"]);
        assert!(spec.service_account_name.is_none());
        assert_eq!(spec.containers[0].volume_mounts.as_ref().unwrap()[0].name, "data");
    }

    #[test]
    fn test_render_requires_registration() {
        let factory = DrainPodFactory::new(
            WorkloadRegistry::new(),
            DrainPodTemplate::default(),
            AccessMode::Provisioned,
        );
        let err = factory.render(&workload(), 1).unwrap_err();
        assert_eq!(err.to_string(), "No drain pod data for StatefulSet ex-aao-ss");
    }

    #[test]
    fn test_render_requires_image() {
        let mut workload = workload();
        workload.image = Some(String::new());
        let err = factory(AccessMode::Provisioned)
            .render(&workload, 1)
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig { .. }));
    }

    #[test]
    fn test_render_uses_access_mode_service_account() {
        let pod = factory(AccessMode::Provisioned).render(&workload(), 1).unwrap();
        assert_eq!(
            pod.spec.unwrap().service_account_name.as_deref(),
            Some(crate::access::DRAIN_SERVICE_ACCOUNT)
        );

        let local = AccessMode::Local {
            service_account: Some("broker-operator".to_string()),
        };
        let pod = factory(local).render(&workload(), 1).unwrap();
        assert_eq!(
            pod.spec.unwrap().service_account.as_deref(),
            Some("broker-operator")
        );
    }

    #[test]
    fn test_template_overrides_from_yaml() {
        let template: DrainPodTemplate =
            scaledown_core::from_yaml("dataRoot: /var/lib\nextraEnv:\n  JAVA_OPTS: -Xmx512m\n")
                .unwrap();
        assert_eq!(template.data_root, "/var/lib");
        assert_eq!(template.container_name, "drainer-amq");
        assert_eq!(template.extra_env["JAVA_OPTS"], "-Xmx512m");
    }
}
