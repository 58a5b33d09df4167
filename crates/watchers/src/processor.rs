//! The event processor: one queue, one dispatch loop, many watchers.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use futures::FutureExt;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::{
    core::{ApiResource, DynamicObject},
    runtime::watcher,
    Api, Client, Resource,
};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use skiff_core::ProcessorConfig;
use skiff_queue::WorkQueue;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::callback::CallbackHandler;
use crate::mirror::{KubeMirror, Mirror, NotificationHandler};
use crate::probe::{CapabilityProbe, DiscoveryProbe};
use crate::watcher::{boxed_handler, ManagedWatcher, WatchedResource, Watcher};
use crate::{object_key, DynamicWatcher, ResourceChange, ResourceChangeHandler};

/// Handles events from many watchers on a single task.
///
/// Every watcher registered through one of the `watch_*` methods feeds the
/// same rate-limited work queue. Events for a given object coalesce while
/// they wait, and each dequeued event is dispatched to the watcher that
/// produced it, which resolves the key to the latest mirrored state.
pub struct EventProcessor {
    name: String,
    client: Client,
    probe: Arc<dyn CapabilityProbe>,
    queue: Arc<WorkQueue<ResourceChange>>,
    config: ProcessorConfig,
    watchers: Mutex<Vec<Arc<dyn ManagedWatcher>>>,
}

impl EventProcessor {
    /// Processor that probes optional kinds through API discovery.
    pub fn new(name: impl Into<String>, client: Client, config: ProcessorConfig) -> Self {
        let probe = Arc::new(DiscoveryProbe::new(client.clone()));
        Self::with_probe(name, client, config, probe)
    }

    pub fn with_probe(
        name: impl Into<String>,
        client: Client,
        config: ProcessorConfig,
        probe: Arc<dyn CapabilityProbe>,
    ) -> Self {
        let name = name.into();
        let queue = Arc::new(WorkQueue::with_config(name.clone(), &config));
        Self { name, client, probe, queue, config, watchers: Mutex::new(Vec::new()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Events ready for dispatch (delayed and in-flight events excluded).
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().len()
    }

    /// Run the dispatch loop on its own task. Cancelling `stop` has the same
    /// effect as [`stop`](Self::stop); the task ends once the event in flight
    /// has been handled.
    pub fn start(self: &Arc<Self>, stop: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!(processor = %this.name, "event processing started");
            let dispatch = async {
                while this.process().await {}
            };
            let refuse_on_stop = async {
                stop.cancelled().await;
                this.queue.shut_down();
                futures::future::pending::<()>().await
            };
            tokio::select! {
                _ = dispatch => {}
                _ = refuse_on_stop => {}
            }
            info!(processor = %this.name, "event processing stopped");
        })
    }

    /// Dispatch a single event, waiting for one if the queue is empty.
    /// Returns `false` once the queue has been shut down.
    pub async fn process(&self) -> bool {
        let Some(event) = self.queue.get().await else {
            return false;
        };

        let started = Instant::now();
        let outcome = match AssertUnwindSafe(event.handler.handle(&event)).catch_unwind().await {
            Ok(res) => res,
            Err(panic) => Err(anyhow!("handler panicked: {}", panic_message(panic.as_ref()))),
        };
        histogram!("skiff_handle_ms", started.elapsed().as_secs_f64() * 1000.0, "processor" => self.name.clone());

        match outcome {
            Ok(()) => self.queue.forget(&event),
            Err(e) => {
                counter!("skiff_handler_errors_total", 1u64, "processor" => self.name.clone());
                let retries = self.queue.num_requeues(&event);
                if retries < self.config.max_requeues {
                    warn!(processor = %self.name, event = %event.describe(), retries, error = %format!("{e:#}"), "error while handling event");
                    self.queue.add_rate_limited(event.clone());
                } else {
                    error!(processor = %self.name, event = %event.describe(), retries, error = %format!("{e:#}"), "dropping event after repeated failures");
                    counter!("skiff_events_dropped_total", 1u64, "processor" => self.name.clone());
                    self.queue.forget(&event);
                }
            }
        }
        self.queue.done(&event);
        true
    }

    /// Dispatch until no event is ready. Delayed events are not waited for.
    pub async fn process_all(&self) {
        while !self.queue.is_empty() {
            if !self.process().await {
                break;
            }
        }
    }

    /// Stop dispatching. The event being handled, if any, runs to completion;
    /// everything still queued is discarded.
    pub fn stop(&self) {
        info!(processor = %self.name, "stopping event processor");
        self.queue.shut_down();
    }

    /// Start the mirror behind every registered watcher.
    pub fn start_watchers(&self, stop: &CancellationToken) -> Vec<JoinHandle<()>> {
        let watchers = self.watchers.lock().clone();
        debug!(processor = %self.name, count = watchers.len(), "starting watchers");
        watchers.iter().map(|w| w.start(stop.clone())).collect()
    }

    /// Wait until every registered watcher has synced. `false` if `stop`
    /// fires first.
    pub async fn wait_for_cache_sync(&self, stop: &CancellationToken) -> bool {
        let watchers = self.watchers.lock().clone();
        let all = futures::future::join_all(watchers.iter().map(|w| w.wait_synced()));
        tokio::select! {
            biased;
            results = all => {
                let synced = results.iter().all(|ok| *ok);
                if !synced {
                    warn!(processor = %self.name, "a mirror closed before it synced");
                }
                synced
            }
            _ = stop.cancelled() => {
                let pending: Vec<&str> = watchers.iter().filter(|w| !w.has_synced()).map(|w| w.kind()).collect();
                warn!(processor = %self.name, ?pending, "cache sync cancelled");
                false
            }
        }
    }

    /// Run `callback(context)` on the dispatch loop once `delay` has elapsed.
    /// A failing callback is retried like any other event.
    pub fn callback_after<F, Fut>(&self, delay: Duration, callback: F, context: impl Into<String>)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: Arc<dyn ResourceChangeHandler> = Arc::new(CallbackHandler::new(callback, context));
        self.queue.add_after(ResourceChange::new(handler, ""), delay);
    }

    /// Register a watcher over an arbitrary mirror. The mirror's change
    /// notifications are turned into queue events for the new watcher.
    pub fn watch_with_mirror<K, F, Fut>(
        &self,
        resource: ApiResource,
        mirror: Arc<dyn Mirror<K>>,
        namespace: Option<&str>,
        handler: F,
    ) -> Arc<Watcher<K>>
    where
        K: Resource + Send + Sync + 'static,
        F: Fn(String, Option<Arc<K>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let kind = resource.kind.clone();
        let watcher = Arc::new(Watcher::new(
            resource,
            boxed_handler(handler),
            Arc::clone(&mirror),
            namespace.map(str::to_string),
        ));
        let as_handler: Arc<dyn ResourceChangeHandler> = watcher.clone();
        mirror.add_event_handler(Arc::new(EnqueueOnChange {
            queue: Arc::clone(&self.queue),
            handler: Arc::downgrade(&as_handler),
            kind: kind.clone(),
        }));
        self.watchers.lock().push(watcher.clone());
        debug!(processor = %self.name, kind = %kind, namespace = ?namespace, "watcher registered");
        watcher
    }

    /// Watch a namespaced kind, in `namespace` or across all namespaces.
    pub fn watch<K, F, Fut>(&self, config: watcher::Config, namespace: Option<&str>, handler: F) -> Arc<Watcher<K>>
    where
        K: WatchedResource + Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
        F: Fn(String, Option<Arc<K>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_namespaced_with_resync(config, namespace, self.config.resync, handler)
    }

    pub(crate) fn watch_namespaced_with_resync<K, F, Fut>(
        &self,
        config: watcher::Config,
        namespace: Option<&str>,
        resync: Duration,
        handler: F,
    ) -> Arc<Watcher<K>>
    where
        K: WatchedResource + Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
        F: Fn(String, Option<Arc<K>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let namespace = scope(namespace);
        let api = match namespace {
            Some(ns) => Api::<K>::namespaced(self.client.clone(), ns),
            None => Api::<K>::all(self.client.clone()),
        };
        let resource = ApiResource::erase::<K>(&());
        let mirror: Arc<dyn Mirror<K>> = Arc::new(KubeMirror::new(resource.kind.clone(), api, config, resync));
        self.watch_with_mirror(resource, mirror, namespace, handler)
    }

    /// Watch a cluster-scoped kind.
    pub fn watch_cluster<K, F, Fut>(&self, config: watcher::Config, handler: F) -> Arc<Watcher<K>>
    where
        K: WatchedResource + Resource<Scope = ClusterResourceScope, DynamicType = ()>,
        F: Fn(String, Option<Arc<K>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let api = Api::<K>::all(self.client.clone());
        let resource = ApiResource::erase::<K>(&());
        let mirror: Arc<dyn Mirror<K>> =
            Arc::new(KubeMirror::new(resource.kind.clone(), api, config, self.config.resync));
        self.watch_with_mirror(resource, mirror, None, handler)
    }

    /// Watch any served kind as untyped objects.
    pub fn watch_dynamic<F, Fut>(
        &self,
        resource: ApiResource,
        config: watcher::Config,
        namespace: Option<&str>,
        handler: F,
    ) -> Arc<DynamicWatcher>
    where
        F: Fn(String, Option<Arc<DynamicObject>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let namespace = scope(namespace);
        let api = match namespace {
            Some(ns) => Api::<DynamicObject>::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::<DynamicObject>::all_with(self.client.clone(), &resource),
        };
        let mirror: Arc<dyn Mirror<DynamicObject>> =
            Arc::new(KubeMirror::new(resource.kind.clone(), api, config, self.config.resync));
        self.watch_with_mirror(resource, mirror, namespace, handler)
    }

    pub(crate) async fn is_available(&self, resource: &ApiResource) -> bool {
        self.probe.is_available(resource).await
    }
}

/// Treats an empty namespace as "all namespaces".
fn scope(namespace: Option<&str>) -> Option<&str> {
    namespace.filter(|ns| !ns.is_empty())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Mirror notification handler that enqueues `{watcher, key}`. Holds the
/// watcher weakly since the watcher owns the mirror that owns this handler.
struct EnqueueOnChange {
    queue: Arc<WorkQueue<ResourceChange>>,
    handler: Weak<dyn ResourceChangeHandler>,
    kind: String,
}

impl EnqueueOnChange {
    fn enqueue<K: Resource>(&self, obj: &K) {
        let Some(handler) = self.handler.upgrade() else { return };
        match object_key(obj) {
            Ok(key) => self.queue.add(ResourceChange::new(handler, key)),
            Err(e) => warn!(kind = %self.kind, error = %e, "cannot derive key for changed object"),
        }
    }
}

impl<K> NotificationHandler<K> for EnqueueOnChange
where
    K: Resource + Send + Sync,
{
    fn on_add(&self, obj: &K) {
        self.enqueue(obj);
    }

    fn on_update(&self, _old: &K, new: &K) {
        self.enqueue(new);
    }

    fn on_delete(&self, obj: &K) {
        self.enqueue(obj);
    }
}
