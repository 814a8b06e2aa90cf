use crate::client::{ClusterClient, ObjectList, WatchStream};
use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use scaledown_core::{
    GroupVersionKind, Resource, ResourceEvent, ResourceKey, WatchEventType,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

/// A mutating call observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    Create(ResourceKey),
    Delete(ResourceKey),
}

impl MockOp {
    pub fn key(&self) -> &ResourceKey {
        match self {
            Self::Create(key) | Self::Delete(key) => key,
        }
    }
}

/// Verb a failure can be injected for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockVerb {
    Get,
    Create,
    Delete,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    verb: MockVerb,
    kind: String,
    name: String,
}

struct MockState {
    objects: BTreeMap<ResourceKey, serde_json::Value>,
    history: Vec<ResourceEvent>,
    next_version: u64,
    ops: Vec<MockOp>,
    failures: Vec<InjectedFailure>,
}

/// In-memory cluster for testing
///
/// Stores objects as JSON keyed by resource key, assigns monotonically
/// increasing resource versions, and keeps a full event history so a watch
/// started from any version replays what it missed before going live.
/// Every create and delete issued through `ClusterClient` is recorded.
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
    event_tx: broadcast::Sender<ResourceEvent>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(4096);
        Self {
            state: Arc::new(Mutex::new(MockState {
                objects: BTreeMap::new(),
                history: Vec::new(),
                next_version: 1,
                ops: Vec::new(),
                failures: Vec::new(),
            })),
            event_tx,
        }
    }

    /// Insert or replace an object, as another actor in the cluster would.
    /// Not recorded as an operation.
    pub fn apply<K: Resource>(&self, object: K) -> K {
        let key = object
            .resource_key()
            .unwrap_or_else(|e| panic!("mock object without identity: {}", e));
        let mut value = scaledown_core::to_value(&object)
            .unwrap_or_else(|e| panic!("mock object not serializable: {}", e));

        let mut state = self.state.lock();
        let event_type = if state.objects.contains_key(&key) {
            WatchEventType::Modified
        } else {
            WatchEventType::Added
        };
        let version = self.store(&mut state, key, &mut value, event_type);
        drop(state);

        let mut object = object;
        object.metadata_mut().resource_version = Some(version);
        object
    }

    /// Remove an object without recording an operation
    pub fn remove<K: Resource>(&self, namespace: &str, name: &str) -> bool {
        let key = ResourceKey::new(K::type_gvk(), namespace, name);
        let mut state = self.state.lock();
        self.evict(&mut state, &key)
    }

    /// Typed read of the current object
    pub fn object<K: Resource>(&self, namespace: &str, name: &str) -> Option<K> {
        let key = ResourceKey::new(K::type_gvk(), namespace, name);
        let value = self.state.lock().objects.get(&key).cloned()?;
        scaledown_core::from_value(value).ok()
    }

    /// Typed list of every object of a kind in a namespace
    pub fn objects<K: Resource>(&self, namespace: &str) -> Vec<K> {
        let gvk = K::type_gvk();
        self.state
            .lock()
            .objects
            .iter()
            .filter(|(k, _)| k.gvk == gvk && k.namespace == namespace)
            .filter_map(|(_, v)| scaledown_core::from_value(v.clone()).ok())
            .collect()
    }

    pub fn contains<K: Resource>(&self, namespace: &str, name: &str) -> bool {
        let key = ResourceKey::new(K::type_gvk(), namespace, name);
        self.state.lock().objects.contains_key(&key)
    }

    /// Mutating operations issued through the client, in order
    pub fn ops(&self) -> Vec<MockOp> {
        self.state.lock().ops.clone()
    }

    /// Operations against one kind
    pub fn ops_for_kind(&self, kind: &str) -> Vec<MockOp> {
        self.ops()
            .into_iter()
            .filter(|op| op.key().gvk.kind == kind)
            .collect()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    /// Make the next matching call fail with a server error. A name of `*`
    /// matches any object of the kind.
    pub fn fail_next(&self, verb: MockVerb, kind: &str, name: &str) {
        self.state.lock().failures.push(InjectedFailure {
            verb,
            kind: kind.to_string(),
            name: name.to_string(),
        });
    }

    fn take_failure(&self, verb: MockVerb, key: &ResourceKey) -> Result<()> {
        let mut state = self.state.lock();
        let position = state
            .failures
            .iter()
            .position(|f| {
                f.verb == verb && f.kind == key.gvk.kind && (f.name == "*" || f.name == key.name)
            });
        match position {
            Some(i) => {
                state.failures.remove(i);
                Err(ControllerError::api_error(
                    format!("{:?}", verb).to_uppercase(),
                    key.api_path(),
                    500,
                    "injected failure",
                ))
            }
            None => Ok(()),
        }
    }

    fn store(
        &self,
        state: &mut MockState,
        key: ResourceKey,
        value: &mut serde_json::Value,
        event_type: WatchEventType,
    ) -> String {
        let version = state.next_version.to_string();
        state.next_version += 1;
        value["metadata"]["resourceVersion"] = serde_json::Value::String(version.clone());

        let event = ResourceEvent::new(event_type, key.clone(), value.clone(), version.clone());
        state.objects.insert(key, value.clone());
        state.history.push(event.clone());
        // No receivers is fine
        let _ = self.event_tx.send(event);
        version
    }

    fn evict(&self, state: &mut MockState, key: &ResourceKey) -> bool {
        let Some(mut value) = state.objects.remove(key) else {
            return false;
        };
        let version = state.next_version.to_string();
        state.next_version += 1;
        value["metadata"]["resourceVersion"] = serde_json::Value::String(version.clone());

        let event = ResourceEvent::deleted(key.clone(), value, version);
        state.history.push(event.clone());
        let _ = self.event_tx.send(event);
        true
    }
}

fn matches_scope(event: &ResourceEvent, gvk: &GroupVersionKind, namespace: Option<&str>) -> bool {
    event.gvk == *gvk && namespace.is_none_or(|ns| event.resource_key.namespace == ns)
}

fn version_after(event: &ResourceEvent, resource_version: u64) -> bool {
    event
        .resource_version
        .parse::<u64>()
        .is_ok_and(|v| v > resource_version)
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<ObjectList> {
        let state = self.state.lock();
        let items = state
            .objects
            .iter()
            .filter(|(k, _)| k.gvk == *gvk && namespace.is_none_or(|ns| k.namespace == ns))
            .map(|(_, v)| v.clone())
            .collect();
        Ok(ObjectList {
            items,
            resource_version: (state.next_version - 1).to_string(),
        })
    }

    async fn watch(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream> {
        let since: u64 = resource_version.parse().unwrap_or(0);
        let gvk = gvk.clone();
        let namespace = namespace.map(str::to_string);

        // Subscribe and snapshot history under one lock so nothing falls in between
        let (backlog, rx) = {
            let state = self.state.lock();
            let rx = self.event_tx.subscribe();
            let backlog: Vec<ResourceEvent> = state
                .history
                .iter()
                .filter(|e| matches_scope(e, &gvk, namespace.as_deref()))
                .filter(|e| version_after(e, since))
                .cloned()
                .collect();
            (backlog, rx)
        };

        let live = BroadcastStream::new(rx).filter_map(move |item| {
            let gvk = gvk.clone();
            let namespace = namespace.clone();
            async move {
                match item {
                    Ok(event) if matches_scope(&event, &gvk, namespace.as_deref()) => {
                        Some(Ok(event))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(ControllerError::watch_failed(
                        gvk.kind.clone(),
                        e.to_string(),
                    ))),
                }
            }
        });

        let replay = futures_util::stream::iter(backlog.into_iter().map(Ok));
        Ok(replay.chain(live).boxed())
    }

    async fn get(&self, key: &ResourceKey) -> Result<serde_json::Value> {
        self.take_failure(MockVerb::Get, key)?;
        self.state
            .lock()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found(&key.gvk.kind, &key.namespace, &key.name))
    }

    async fn create(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        mut object: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let name = object["metadata"]["name"]
            .as_str()
            .ok_or_else(|| ControllerError::internal_error("object has no metadata.name"))?
            .to_string();
        let key = ResourceKey::new(gvk.clone(), namespace, &name);
        self.take_failure(MockVerb::Create, &key)?;

        let mut state = self.state.lock();
        if state.objects.contains_key(&key) {
            return Err(ControllerError::already_exists(&gvk.kind, namespace, &name));
        }

        object["metadata"]["namespace"] = serde_json::Value::String(namespace.to_string());
        object["metadata"]["uid"] = serde_json::Value::String(uuid::Uuid::new_v4().to_string());
        state.ops.push(MockOp::Create(key.clone()));
        self.store(&mut state, key, &mut object, WatchEventType::Added);
        debug!("Mock: created {}/{} {}", namespace, name, gvk.kind);
        Ok(object)
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        self.take_failure(MockVerb::Delete, key)?;

        let mut state = self.state.lock();
        if !self.evict(&mut state, key) {
            return Err(ControllerError::not_found(&key.gvk.kind, &key.namespace, &key.name));
        }
        state.ops.push(MockOp::Delete(key.clone()));
        debug!("Mock: deleted {}", key);
        Ok(())
    }
}
