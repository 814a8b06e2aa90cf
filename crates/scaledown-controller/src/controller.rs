use crate::access::DrainAccess;
use crate::cache::{
    wait_for_cache_sync, EventHandler, IgnoreEvents, Reflector, Store, SyncStatus,
};
use crate::claims::group_claims_by_ordinal;
use crate::client::{create_object, delete_object, get_object, ClusterClient};
use crate::config::DrainControllerConfig;
use crate::decide::{decide, Action, ClusterView, DecideOptions, PeerState, PodState, Skip};
use crate::drain_pod::{is_drain_pod, DrainPodFactory, DRAIN_OWNER_ANNOTATION};
use crate::error::Result;
use crate::queue::WorkQueue;
use crate::recorder::EventRecorder;
use crate::registry::{BrokerMetadata, WorkloadRegistry};
use scaledown_core::naming::split_ordinal;
use scaledown_core::{
    is_pod_ready, ObjectRef, Ownable, PersistentVolumeClaim, Pod, PodPhase, Resource, StatefulSet,
    WorkloadSpec,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drain controller: watches StatefulSets and their pods, and drains the
/// claims left behind by a scale-down into the surviving ordinal-0 pod
pub struct DrainController {
    client: Arc<dyn ClusterClient>,
    config: DrainControllerConfig,
    queue: WorkQueue,
    workloads: Store<StatefulSet>,
    pods: Store<Pod>,
    claims: Store<PersistentVolumeClaim>,
    factory: DrainPodFactory,
    access: DrainAccess,
    recorder: EventRecorder,
}

impl DrainController {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        config: DrainControllerConfig,
        registry: WorkloadRegistry,
    ) -> Self {
        if let Err(e) = config.register_brokers(&registry) {
            error!("Failed to register configured brokers: {}", e);
        }

        let factory = DrainPodFactory::new(
            registry,
            config.drain_pod.clone(),
            config.access.clone(),
        );

        Self {
            queue: WorkQueue::new(config.backoff()),
            workloads: Store::new(),
            pods: Store::new(),
            claims: Store::new(),
            factory,
            access: DrainAccess::new(client.clone()),
            recorder: EventRecorder::new(client.clone()),
            client,
            config,
        }
    }

    pub fn registry(&self) -> &WorkloadRegistry {
        self.factory.registry()
    }

    /// Store or overwrite the drain pod parameters for a workload
    pub fn register_workload(&self, workload: ObjectRef, metadata: BrokerMetadata) {
        self.registry().register(workload, metadata);
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Run until the token is cancelled.
    ///
    /// Starts a reflector per watched kind, waits for all caches to sync,
    /// then starts the configured number of workers. On cancellation the
    /// queue stops handing out keys and in-flight passes finish.
    pub async fn run(self: Arc<Self>, token: CancellationToken) -> Result<()> {
        info!(
            "Starting drain controller (namespace: {}, workers: {})",
            self.config.namespace.as_deref().unwrap_or("<all>"),
            self.config.workers
        );

        let namespace = self.config.namespace.clone();
        let resync = self.config.resync_period();
        let workload_events: Arc<dyn EventHandler<StatefulSet>> = Arc::new(WorkloadEvents {
            queue: self.queue.clone(),
        });
        let pod_events: Arc<dyn EventHandler<Pod>> = Arc::new(PodEvents {
            queue: self.queue.clone(),
            workloads: self.workloads.clone(),
        });

        let reflectors = vec![
            tokio::spawn(
                Reflector::new(
                    self.client.clone(),
                    namespace.clone(),
                    self.workloads.clone(),
                    workload_events,
                    resync,
                )
                .run(token.clone()),
            ),
            tokio::spawn(
                Reflector::new(
                    self.client.clone(),
                    namespace.clone(),
                    self.pods.clone(),
                    pod_events,
                    resync,
                )
                .run(token.clone()),
            ),
            tokio::spawn(
                Reflector::new(
                    self.client.clone(),
                    namespace,
                    self.claims.clone(),
                    Arc::new(IgnoreEvents),
                    resync,
                )
                .run(token.clone()),
            ),
        ];

        let stores: [&dyn SyncStatus; 3] = [&self.workloads, &self.pods, &self.claims];
        let synced = wait_for_cache_sync(&stores, &token).await;

        let mut workers = Vec::new();
        if synced {
            info!("Caches synced, starting {} workers", self.config.workers);
            for id in 0..self.config.workers {
                let controller = Arc::clone(&self);
                workers.push(tokio::spawn(async move { controller.run_worker(id).await }));
            }
            token.cancelled().await;
        }

        info!("Shutting down drain controller");
        self.queue.shut_down();
        for handle in workers.into_iter().chain(reflectors) {
            if let Err(e) = handle.await {
                error!("Drain controller task panicked: {}", e);
            }
        }
        info!("Drain controller stopped");
        Ok(())
    }

    async fn run_worker(&self, id: usize) {
        debug!("Worker {} started", id);
        while self.process_next_work_item().await {}
        debug!("Worker {} stopped", id);
    }

    /// Pop one key and run a pass for it. Returns `false` once the queue is
    /// shut down.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        match key.parse::<ObjectRef>() {
            Err(e) => {
                error!("Dropping invalid work item '{}': {}", key, e);
                self.queue.forget(&key);
            }
            Ok(workload) => match self.sync_handler(&workload).await {
                Ok(()) => {
                    debug!("Successfully synced {}", key);
                    self.queue.forget(&key);
                }
                Err(e) => {
                    error!("Error syncing StatefulSet {}, requeueing: {}", key, e);
                    self.queue.add_rate_limited(&key);
                }
            },
        }

        self.queue.done(&key);
        true
    }

    /// Run one pass over a StatefulSet
    pub async fn sync_handler(&self, workload: &ObjectRef) -> Result<()> {
        let Some(sts) = self.workloads.get(&workload.namespace, &workload.name)? else {
            info!("StatefulSet {} no longer exists", workload);
            return Ok(());
        };

        let spec = WorkloadSpec::from_statefulset(&sts)?;
        debug!(
            "Processing StatefulSet {} (replicas: {}, claim templates: {})",
            workload,
            spec.replicas,
            spec.claim_templates.len()
        );

        let view = self.cluster_view(&spec)?;
        let options = DecideOptions {
            provision_access: self.config.access.is_provisioned(),
        };
        let actions = decide(&spec, &view, options);
        self.execute(&spec, actions).await
    }

    /// Gather what a pass decides on from the caches
    fn cluster_view(&self, workload: &WorkloadSpec) -> Result<ClusterView> {
        let namespace = &workload.namespace;
        let claims = self.claims.list(namespace)?;
        let grouped = group_claims_by_ordinal(workload, &claims);

        let mut ordinals = BTreeMap::new();
        for &ordinal in grouped.keys() {
            let state = match self.pods.get(namespace, &workload.pod_name(ordinal))? {
                None => PodState::Absent,
                Some(pod) if is_drain_pod(&pod) => PodState::Drain {
                    phase: PodPhase::of(&pod),
                },
                Some(_) => PodState::Regular,
            };
            ordinals.insert(ordinal, state);
        }

        // Drain pods outlive their claims when a cleanup pass fails halfway
        for pod in self.pods.list(namespace)? {
            if pod.annotation(DRAIN_OWNER_ANNOTATION) != Some(workload.name.as_str()) {
                continue;
            }
            let Some((prefix, ordinal)) = pod.object_name().and_then(split_ordinal) else {
                continue;
            };
            if prefix == workload.name {
                ordinals.entry(ordinal).or_insert(PodState::Drain {
                    phase: PodPhase::of(&pod),
                });
            }
        }

        let peer = match self.pods.get(namespace, &workload.pod_name(0))? {
            None => PeerState::Missing,
            Some(pod) => match PodPhase::of(&pod) {
                PodPhase::Running if is_pod_ready(&pod) => PeerState::Ready,
                PodPhase::Running => PeerState::NotReady,
                phase => PeerState::NotRunning(phase),
            },
        };

        Ok(ClusterView { ordinals, peer })
    }

    /// Apply actions in order. On failure, revocations still pending for the
    /// failing ordinal run before the error is returned.
    async fn execute(&self, workload: &WorkloadSpec, actions: Vec<Action>) -> Result<()> {
        let mut actions = actions.into_iter();
        // Set when the last mutation found the object already in its target state
        let mut unchanged = false;
        // Drain pod rendered ahead of provisioning, consumed by the create
        let mut prepared = None;

        while let Some(action) = actions.next() {
            if matches!(action, Action::EmitEvent { .. }) && unchanged {
                unchanged = false;
                continue;
            }

            match self.apply(workload, &action, &mut prepared).await {
                Ok(changed) => unchanged = action.mutates() && !changed,
                Err(e) => {
                    let ordinal = action.ordinal();
                    for deferred in actions.filter(|a| {
                        matches!(a, Action::RevokeAccess { .. }) && a.ordinal() == ordinal
                    }) {
                        self.apply(workload, &deferred, &mut None).await?;
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Apply one action. Returns `false` when the cluster already matched.
    async fn apply(
        &self,
        workload: &WorkloadSpec,
        action: &Action,
        prepared: &mut Option<Pod>,
    ) -> Result<bool> {
        let namespace = &workload.namespace;
        let client = self.client.as_ref();

        match action {
            Action::NoOp { ordinal, reason } => {
                let target = match ordinal {
                    Some(o) => workload.pod_name(*o),
                    None => workload.name.clone(),
                };
                match reason {
                    Skip::DrainFailed => warn!("Drain pod {}/{} failed: {}", namespace, target, reason),
                    _ => debug!("Skipping {}/{}: {}", namespace, target, reason),
                }
                Ok(false)
            }
            Action::ProvisionAccess { ordinal } => {
                // Nothing is provisioned for a pod that cannot be created
                let Some(pod) = self.prepare_drain_pod(workload, *ordinal).await? else {
                    return Ok(false);
                };
                self.access.provision(namespace).await?;
                *prepared = Some(pod);
                Ok(true)
            }
            Action::CreateDrainPod { ordinal } => {
                let name = workload.pod_name(*ordinal);
                let pod = match prepared
                    .take()
                    .filter(|pod| pod.metadata.name.as_deref() == Some(name.as_str()))
                {
                    Some(pod) => pod,
                    None => match self.prepare_drain_pod(workload, *ordinal).await? {
                        Some(pod) => pod,
                        None => return Ok(false),
                    },
                };
                info!(
                    "Found orphaned claims for ordinal {} of {}/{}, creating drain pod {}",
                    ordinal,
                    namespace,
                    workload.name,
                    workload.pod_name(*ordinal)
                );
                match create_object(client, &pod).await {
                    Ok(_) => Ok(true),
                    Err(e) if e.is_already_exists() => {
                        debug!("Drain pod {} already exists", workload.pod_name(*ordinal));
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            }
            Action::DeleteClaim { claim, .. } => {
                info!("Deleting claim {}/{}", namespace, claim);
                delete_object::<PersistentVolumeClaim>(client, namespace, claim).await
            }
            Action::DeletePod { pod, .. } => {
                info!("Deleting drain pod {}/{}", namespace, pod);
                delete_object::<Pod>(client, namespace, pod).await
            }
            Action::RevokeAccess { .. } => {
                self.access.revoke(namespace).await;
                Ok(true)
            }
            Action::EmitEvent { event, .. } => {
                self.recorder.record(workload, event).await;
                Ok(true)
            }
        }
    }
}

impl DrainController {
    /// Render the drain pod for `ordinal`. Returns `None` when its claims are
    /// already gone from the cluster.
    async fn prepare_drain_pod(&self, workload: &WorkloadSpec, ordinal: u32) -> Result<Option<Pod>> {
        let pod = self.factory.render(workload, ordinal)?;
        if !self.claims_exist(workload, ordinal).await? {
            debug!(
                "Claims of {} already deleted, not creating a drain pod",
                workload.pod_name(ordinal)
            );
            return Ok(None);
        }
        Ok(Some(pod))
    }

    /// Live check that at least one claim of `ordinal` is still present.
    /// Guards against a claim cache lagging behind a finished cleanup.
    async fn claims_exist(&self, workload: &WorkloadSpec, ordinal: u32) -> Result<bool> {
        for claim in workload.claim_names(ordinal) {
            let found = get_object::<PersistentVolumeClaim>(
                self.client.as_ref(),
                &workload.namespace,
                &claim,
            )
            .await?;
            if found.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Enqueues every StatefulSet add and update
struct WorkloadEvents {
    queue: WorkQueue,
}

impl WorkloadEvents {
    fn enqueue(&self, sts: &StatefulSet) {
        match sts.object_ref() {
            Ok(obj) => {
                debug!("Enqueueing StatefulSet {}", obj);
                self.queue.add(&obj.key());
            }
            Err(e) => warn!("Ignoring StatefulSet without identity: {}", e),
        }
    }
}

impl EventHandler<StatefulSet> for WorkloadEvents {
    fn on_add(&self, obj: &StatefulSet) {
        self.enqueue(obj);
    }

    fn on_update(&self, _old: &StatefulSet, new: &StatefulSet) {
        self.enqueue(new);
    }

    fn on_delete(&self, _obj: &StatefulSet) {}
}

/// Resolves pod changes to the owning StatefulSet and enqueues it
struct PodEvents {
    queue: WorkQueue,
    workloads: Store<StatefulSet>,
}

/// Name of the StatefulSet a pod belongs to: the drain annotation first,
/// then a controller owner reference of kind StatefulSet
fn owning_workload(pod: &Pod) -> Option<&str> {
    pod.annotation(DRAIN_OWNER_ANNOTATION)
        .filter(|name| !name.is_empty())
        .or_else(|| {
            pod.controller_owner_of_kind("StatefulSet")
                .map(|owner| owner.name.as_str())
        })
}

impl PodEvents {
    fn handle(&self, pod: &Pod) {
        let Some(name) = owning_workload(pod) else {
            return;
        };
        let namespace = pod.object_namespace().unwrap_or_default();

        match self.workloads.get(namespace, name) {
            Ok(Some(sts)) => {
                let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                if replicas == 0 {
                    debug!(
                        "Not enqueueing StatefulSet {}/{}: replicas set to 0",
                        namespace, name
                    );
                    return;
                }
                self.queue.add(&ObjectRef::new(namespace, name).key());
            }
            Ok(None) => debug!(
                "Ignoring pod {} of missing StatefulSet {}/{}",
                pod.object_name().unwrap_or_default(),
                namespace,
                name
            ),
            Err(e) => debug!("Ignoring pod event: {}", e),
        }
    }
}

impl EventHandler<Pod> for PodEvents {
    fn on_add(&self, obj: &Pod) {
        self.handle(obj);
    }

    fn on_update(&self, old: &Pod, new: &Pod) {
        if old.resource_version() == new.resource_version() {
            return;
        }
        self.handle(new);
    }

    fn on_delete(&self, obj: &Pod) {
        self.handle(obj);
    }
}
