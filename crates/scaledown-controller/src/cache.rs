//! Watch-backed object cache
//!
//! A `Reflector` lists one resource kind, then watches it from the list's
//! resource version, keeping a `Store` current and forwarding every change to
//! an `EventHandler`. After a watch error or the end of a watch stream it
//! relists and diffs the fresh list against the store, so handlers observe a
//! delete for anything that vanished while the watch was down. Every cached
//! object is replayed as an update once per resync period.

use crate::client::ClusterClient;
use crate::error::{ControllerError, Result};
use futures_util::StreamExt;
use parking_lot::RwLock;
use scaledown_core::{ObjectRef, Resource, ResourceEvent, WatchEventType};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives change notifications from a reflector
pub trait EventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, obj: &K);
}

/// Handler for kinds that are cached but trigger nothing
pub struct IgnoreEvents;

impl<K> EventHandler<K> for IgnoreEvents {
    fn on_add(&self, _obj: &K) {}
    fn on_update(&self, _old: &K, _new: &K) {}
    fn on_delete(&self, _obj: &K) {}
}

/// Object-safe view of a store's sync state
pub trait SyncStatus: Send + Sync {
    fn kind(&self) -> &str;
    fn has_synced(&self) -> bool;
}

enum Delta<K> {
    Added(K),
    Updated(K, K),
    Deleted(K),
}

struct StoreInner<K> {
    objects: BTreeMap<ObjectRef, K>,
    synced: bool,
}

/// Local copy of one resource kind, keyed by namespace/name
pub struct Store<K> {
    kind: String,
    inner: Arc<RwLock<StoreInner<K>>>,
}

impl<K> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Resource> Default for Store<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Resource> Store<K> {
    pub fn new() -> Self {
        Self {
            kind: K::KIND.to_string(),
            inner: Arc::new(RwLock::new(StoreInner {
                objects: BTreeMap::new(),
                synced: false,
            })),
        }
    }

    fn ensure_synced(&self, inner: &StoreInner<K>) -> Result<()> {
        if inner.synced {
            Ok(())
        } else {
            Err(ControllerError::cache_not_synced(&self.kind))
        }
    }

    pub fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let inner = self.inner.read();
        self.ensure_synced(&inner)?;
        Ok(inner.objects.get(&ObjectRef::new(namespace, name)).cloned())
    }

    /// All cached objects in one namespace
    pub fn list(&self, namespace: &str) -> Result<Vec<K>> {
        let inner = self.inner.read();
        self.ensure_synced(&inner)?;
        Ok(inner
            .objects
            .iter()
            .filter(|(obj, _)| obj.namespace == namespace)
            .map(|(_, k)| k.clone())
            .collect())
    }

    pub fn list_all(&self) -> Result<Vec<K>> {
        let inner = self.inner.read();
        self.ensure_synced(&inner)?;
        Ok(inner.objects.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swap in a complete list and mark the store synced
    fn replace(&self, items: Vec<K>) -> Vec<Delta<K>> {
        let mut fresh = BTreeMap::new();
        for item in items {
            if let Ok(obj) = item.object_ref() {
                fresh.insert(obj, item);
            }
        }

        let mut inner = self.inner.write();
        let mut deltas = Vec::new();
        for (obj, new) in &fresh {
            match inner.objects.get(obj) {
                Some(old) => deltas.push(Delta::Updated(old.clone(), new.clone())),
                None => deltas.push(Delta::Added(new.clone())),
            }
        }
        for (obj, old) in &inner.objects {
            if !fresh.contains_key(obj) {
                deltas.push(Delta::Deleted(old.clone()));
            }
        }
        inner.objects = fresh;
        inner.synced = true;
        deltas
    }

    fn upsert(&self, obj: ObjectRef, new: K) -> Delta<K> {
        match self.inner.write().objects.insert(obj, new.clone()) {
            Some(old) => Delta::Updated(old, new),
            None => Delta::Added(new),
        }
    }

    fn remove(&self, obj: &ObjectRef, last_known: K) -> Delta<K> {
        let cached = self.inner.write().objects.remove(obj);
        Delta::Deleted(cached.unwrap_or(last_known))
    }

    /// Insert without notifying anyone, for seeding tests
    #[cfg(test)]
    pub(crate) fn seed(&self, items: Vec<K>) {
        self.replace(items);
    }
}

impl<K: Resource> SyncStatus for Store<K> {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn has_synced(&self) -> bool {
        self.inner.read().synced
    }
}

/// Wait until every store has synced. Returns `false` if cancelled first.
pub async fn wait_for_cache_sync(stores: &[&dyn SyncStatus], token: &CancellationToken) -> bool {
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    loop {
        if stores.iter().all(|s| s.has_synced()) {
            return true;
        }
        tokio::select! {
            _ = token.cancelled() => {
                let pending: Vec<&str> = stores
                    .iter()
                    .filter(|s| !s.has_synced())
                    .map(|s| s.kind())
                    .collect();
                warn!("Shutdown before caches synced: {:?}", pending);
                return false;
            }
            _ = poll.tick() => {}
        }
    }
}

/// Keeps a `Store` in step with the cluster for one resource kind
pub struct Reflector<K: Resource> {
    client: Arc<dyn ClusterClient>,
    namespace: Option<String>,
    store: Store<K>,
    handler: Arc<dyn EventHandler<K>>,
    resync_period: Duration,
    retry_delay: Duration,
}

impl<K: Resource> Reflector<K> {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        namespace: Option<String>,
        store: Store<K>,
        handler: Arc<dyn EventHandler<K>>,
        resync_period: Duration,
    ) -> Self {
        Self {
            client,
            namespace,
            store,
            handler,
            resync_period,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Run until cancelled
    pub async fn run(self, token: CancellationToken) {
        info!(
            "Starting {} reflector (namespace: {})",
            K::KIND,
            self.namespace.as_deref().unwrap_or("<all>")
        );

        loop {
            match self.list_and_watch(&token).await {
                Ok(()) if token.is_cancelled() => break,
                Ok(()) => debug!("{} watch ended, relisting", K::KIND),
                Err(e) => {
                    warn!("{} reflector error, relisting: {}", K::KIND, e);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        info!("{} reflector stopped", K::KIND);
    }

    async fn list_and_watch(&self, token: &CancellationToken) -> Result<()> {
        let gvk = K::type_gvk();
        let namespace = self.namespace.as_deref();

        let list = self.client.list(&gvk, namespace).await?;
        let items: Vec<K> = list
            .items
            .into_iter()
            .filter_map(|value| match scaledown_core::from_value(value) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("Skipping undecodable {}: {}", K::KIND, e);
                    None
                }
            })
            .collect();
        debug!(
            "Listed {} {} objects at version {}",
            items.len(),
            K::KIND,
            list.resource_version
        );
        self.dispatch(self.store.replace(items));

        let mut stream = self
            .client
            .watch(&gvk, namespace, &list.resource_version)
            .await?;

        let start = tokio::time::Instant::now() + self.resync_period;
        let mut resync = tokio::time::interval_at(start, self.resync_period);

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = resync.tick() => self.resync(),
                item = stream.next() => match item {
                    None => return Ok(()),
                    Some(Err(e)) => return Err(e),
                    Some(Ok(event)) => self.apply(event),
                },
            }
        }
    }

    fn apply(&self, event: ResourceEvent) {
        let object: K = match event.event_type {
            WatchEventType::Bookmark | WatchEventType::Error => return,
            _ => match scaledown_core::from_value(event.object) {
                Ok(object) => object,
                Err(e) => {
                    warn!("Skipping undecodable {} event: {}", K::KIND, e);
                    return;
                }
            },
        };
        let obj = event.resource_key.object_ref();

        let delta = match event.event_type {
            WatchEventType::Deleted => self.store.remove(&obj, object),
            _ => self.store.upsert(obj, object),
        };
        self.dispatch(vec![delta]);
    }

    fn resync(&self) {
        let Ok(objects) = self.store.list_all() else {
            return;
        };
        debug!("Resyncing {} cached {} objects", objects.len(), K::KIND);
        for object in &objects {
            self.handler.on_update(object, object);
        }
    }

    fn dispatch(&self, deltas: Vec<Delta<K>>) {
        for delta in deltas {
            match delta {
                Delta::Added(new) => self.handler.on_add(&new),
                Delta::Updated(old, new) => self.handler.on_update(&old, &new),
                Delta::Deleted(old) => self.handler.on_delete(&old),
            }
        }
    }
}
