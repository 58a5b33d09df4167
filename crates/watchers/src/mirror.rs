//! Local mirrors of remote state, one per watched kind.
//!
//! A mirror keeps an eventually consistent copy of every object of one kind,
//! tells registered [`NotificationHandler`]s about adds, updates and deletes,
//! and reports when its initial list has been loaded. [`MirrorStore`] is the
//! in-memory index; [`KubeMirror`] keeps one fed from a kube list+watch stream.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
    Api, Resource,
};
use metrics::counter;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use skiff_core::{split_meta_namespace_key, KeyError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::object_key;

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("invalid key: {0}")]
    Key(#[from] KeyError),
}

/// Receives change notifications from a mirror. Called on the mirror's own
/// task; implementations must not block.
pub trait NotificationHandler<K>: Send + Sync {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, obj: &K);
}

/// Read access plus lifecycle of a per-kind mirror.
#[async_trait::async_trait]
pub trait Mirror<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Point lookup. An absent key is `Ok(None)`.
    fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>, MirrorError>;
    fn list(&self) -> Vec<Arc<K>>;
    fn has_synced(&self) -> bool;
    /// Flips to `true` once the initial list has been loaded.
    fn synced(&self) -> watch::Receiver<bool>;
    fn add_event_handler(&self, handler: Arc<dyn NotificationHandler<K>>);
    /// Interval of periodic re-delivery; zero when the mirror never resyncs.
    fn resync_period(&self) -> Duration {
        Duration::ZERO
    }
    /// Keep the mirror current until `stop` fires.
    async fn run(&self, stop: CancellationToken);
}

/// Thread-safe in-memory index with change notifications.
pub struct MirrorStore<K> {
    kind: String,
    items: RwLock<FxHashMap<String, Arc<K>>>,
    handlers: RwLock<Vec<Arc<dyn NotificationHandler<K>>>>,
    synced: watch::Sender<bool>,
}

impl<K> MirrorStore<K>
where
    K: Resource + Send + Sync + 'static,
{
    pub fn new(kind: impl Into<String>) -> Self {
        let (synced, _) = watch::channel(false);
        Self { kind: kind.into(), items: RwLock::new(FxHashMap::default()), handlers: RwLock::new(Vec::new()), synced }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    fn handlers(&self) -> Vec<Arc<dyn NotificationHandler<K>>> {
        self.handlers.read().clone()
    }

    fn keyed(&self, obj: &K) -> Option<String> {
        match object_key(obj) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(kind = %self.kind, error = %e, "skipping object without a usable key");
                None
            }
        }
    }

    /// Record an added or modified object.
    pub fn apply(&self, obj: K) {
        let Some(key) = self.keyed(&obj) else { return };
        let obj = Arc::new(obj);
        let old = self.items.write().insert(key, Arc::clone(&obj));
        for h in self.handlers() {
            match &old {
                Some(old) => h.on_update(old, &obj),
                None => h.on_add(&obj),
            }
        }
        let op = if old.is_some() { "update" } else { "add" };
        counter!("skiff_mirror_events_total", 1u64, "kind" => self.kind.clone(), "op" => op);
    }

    /// Record a deleted object. Handlers see the final state reported by the source.
    pub fn delete(&self, obj: K) {
        let Some(key) = self.keyed(&obj) else { return };
        self.items.write().remove(&key);
        for h in self.handlers() {
            h.on_delete(&obj);
        }
        counter!("skiff_mirror_events_total", 1u64, "kind" => self.kind.clone(), "op" => "delete");
    }

    /// Replace the whole content after a (re)list. Objects missing from `list`
    /// are reported as deleted. Marks the mirror synced.
    pub fn replace(&self, list: Vec<K>) {
        let mut fresh: FxHashMap<String, Arc<K>> = FxHashMap::default();
        for obj in list {
            if let Some(key) = self.keyed(&obj) {
                fresh.insert(key, Arc::new(obj));
            }
        }
        let previous = std::mem::replace(&mut *self.items.write(), fresh.clone());
        debug!(kind = %self.kind, before = previous.len(), after = fresh.len(), "mirror relisted");

        let handlers = self.handlers();
        for (key, obj) in &fresh {
            for h in &handlers {
                match previous.get(key) {
                    Some(old) => h.on_update(old, obj),
                    None => h.on_add(obj),
                }
            }
        }
        for (key, old) in &previous {
            if !fresh.contains_key(key) {
                for h in &handlers {
                    h.on_delete(old);
                }
            }
        }
        self.mark_synced();
    }

    /// Re-deliver every mirrored object as an update.
    pub fn resync(&self) {
        let snapshot: Vec<Arc<K>> = self.items.read().values().cloned().collect();
        let handlers = self.handlers();
        for obj in &snapshot {
            for h in &handlers {
                h.on_update(obj, obj);
            }
        }
        debug!(kind = %self.kind, count = snapshot.len(), "mirror resync");
    }

    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl<K> Mirror<K> for MirrorStore<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>, MirrorError> {
        split_meta_namespace_key(key)?;
        Ok(self.items.read().get(key).cloned())
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.items.read().values().cloned().collect()
    }

    fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    fn synced(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }

    fn add_event_handler(&self, handler: Arc<dyn NotificationHandler<K>>) {
        self.handlers.write().push(handler);
    }

    /// Fed by its owner; nothing to drive.
    async fn run(&self, stop: CancellationToken) {
        stop.cancelled().await;
    }
}

/// Mirror kept current by a kube list+watch stream with periodic resync.
pub struct KubeMirror<K>
where
    K: Resource,
{
    api: Api<K>,
    config: watcher::Config,
    resync: Duration,
    store: MirrorStore<K>,
}

impl<K> KubeMirror<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    /// `resync` of zero disables periodic re-delivery.
    pub fn new(kind: impl Into<String>, api: Api<K>, config: watcher::Config, resync: Duration) -> Self {
        Self { api, config, resync, store: MirrorStore::new(kind) }
    }

    pub fn store(&self) -> &MirrorStore<K> {
        &self.store
    }
}

#[async_trait::async_trait]
impl<K> Mirror<K> for KubeMirror<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>, MirrorError> {
        self.store.get_by_key(key)
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.store.list()
    }

    fn has_synced(&self) -> bool {
        self.store.has_synced()
    }

    fn synced(&self) -> watch::Receiver<bool> {
        self.store.synced()
    }

    fn add_event_handler(&self, handler: Arc<dyn NotificationHandler<K>>) {
        self.store.add_event_handler(handler);
    }

    fn resync_period(&self) -> Duration {
        self.resync
    }

    async fn run(&self, stop: CancellationToken) {
        let kind = self.store.kind().to_string();
        let stream = watcher::watcher(self.api.clone(), self.config.clone()).default_backoff();
        futures::pin_mut!(stream);

        let resync_enabled = !self.resync.is_zero();
        let period = if resync_enabled { self.resync } else { Duration::from_secs(3600) };
        let mut resync = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        info!(kind = %kind, resync_secs = self.resync.as_secs(), "mirror started");
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = resync.tick(), if resync_enabled => self.store.resync(),
                ev = stream.next() => match ev {
                    Some(Ok(Event::Applied(o))) => self.store.apply(o),
                    Some(Ok(Event::Deleted(o))) => self.store.delete(o),
                    Some(Ok(Event::Restarted(list))) => {
                        debug!(kind = %kind, count = list.len(), "watch restart");
                        self.store.replace(list);
                    }
                    Some(Err(e)) => warn!(kind = %kind, error = %e, "watch error; backing off"),
                    None => {
                        warn!(kind = %kind, "watch stream ended");
                        break;
                    }
                },
            }
        }
        info!(kind = %kind, "mirror stopped");
    }
}
