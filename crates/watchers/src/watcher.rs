//! The generic per-kind watcher.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use kube::{core::ApiResource, runtime::watcher, Resource};
use serde::de::DeserializeOwned;
use skiff_core::key_namespace;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::mirror::{Mirror, MirrorError};
use crate::{ResourceChange, ResourceChangeHandler};

/// Everything a kind needs to be watchable.
pub trait WatchedResource: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static {}

impl<K> WatchedResource for K where K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static {}

/// Type-erased domain handler: `(key, latest object or None when deleted)`.
pub type HandlerFn<K> = Arc<dyn Fn(String, Option<Arc<K>>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub(crate) fn boxed_handler<K, F, Fut>(handler: F) -> HandlerFn<K>
where
    K: Send + Sync + 'static,
    F: Fn(String, Option<Arc<K>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |key, obj| handler(key, obj).boxed())
}

/// Lifecycle view of a watcher, used by the processor to start and sync all
/// registered watchers without knowing their kinds.
#[async_trait::async_trait]
pub trait ManagedWatcher: Send + Sync {
    fn kind(&self) -> &str;
    fn has_synced(&self) -> bool;
    /// Spawn the underlying mirror.
    fn start(&self, stop: CancellationToken) -> JoinHandle<()>;
    /// Resolve once the mirror has completed its initial list. `false` if the
    /// mirror went away before it ever synced.
    async fn wait_synced(&self) -> bool;
}

/// Bridges one kind's mirror into the shared dispatch protocol.
pub struct Watcher<K: Send + Sync + 'static> {
    resource: ApiResource,
    handler: HandlerFn<K>,
    mirror: Arc<dyn Mirror<K>>,
    namespace: Option<String>,
}

impl<K> Watcher<K>
where
    K: Send + Sync + 'static,
{
    pub(crate) fn new(
        resource: ApiResource,
        handler: HandlerFn<K>,
        mirror: Arc<dyn Mirror<K>>,
        namespace: Option<String>,
    ) -> Self {
        Self { resource, handler, mirror, namespace }
    }

    pub fn kind(&self) -> &str {
        &self.resource.kind
    }

    /// Group/version/kind/plural of the watched resource.
    pub fn resource(&self) -> &ApiResource {
        &self.resource
    }

    /// Namespace scope, `None` when watching every namespace.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Latest mirrored object for `key`; `Ok(None)` when it does not exist.
    pub fn get(&self, key: &str) -> Result<Option<Arc<K>>, MirrorError> {
        self.mirror.get_by_key(key)
    }

    /// All currently mirrored objects, in no particular order.
    pub fn list(&self) -> Vec<Arc<K>> {
        self.mirror.list()
    }

    pub fn has_synced(&self) -> bool {
        self.mirror.has_synced()
    }

    /// How often the mirror re-delivers every object.
    pub fn resync_period(&self) -> Duration {
        self.mirror.resync_period()
    }

    /// Wait for this watcher's initial sync. `false` if `stop` fires first.
    pub async fn sync(&self, stop: &CancellationToken) -> bool {
        let mut synced = self.mirror.synced();
        tokio::select! {
            biased;
            res = synced.wait_for(|s| *s) => res.is_ok(),
            _ = stop.cancelled() => false,
        }
    }
}

#[async_trait::async_trait]
impl<K> ResourceChangeHandler for Watcher<K>
where
    K: Send + Sync + 'static,
{
    /// Resolves the key against the mirror at dispatch time, so coalesced or
    /// delayed events always see the newest state.
    async fn handle(&self, event: &ResourceChange) -> anyhow::Result<()> {
        let obj = self.get(&event.key)?;
        (self.handler)(event.key.clone(), obj).await
    }

    fn describe(&self, event: &ResourceChange) -> String {
        format!("{} {}", self.resource.kind, event.key)
    }
}

#[async_trait::async_trait]
impl<K> ManagedWatcher for Watcher<K>
where
    K: Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        &self.resource.kind
    }

    fn has_synced(&self) -> bool {
        self.mirror.has_synced()
    }

    fn start(&self, stop: CancellationToken) -> JoinHandle<()> {
        let mirror = Arc::clone(&self.mirror);
        tokio::spawn(async move { mirror.run(stop).await })
    }

    async fn wait_synced(&self) -> bool {
        let mut synced = self.mirror.synced();
        let ok = synced.wait_for(|s| *s).await.is_ok();
        ok
    }
}

/// Narrow a watch to a single object by name.
pub fn by_name(name: &str) -> watcher::Config {
    watcher::Config::default().fields(&format!("metadata.name={}", name))
}

/// Wrap `handler` so it only runs for keys whose namespace satisfies
/// `matcher`. With no matcher every event passes.
pub fn filter_by_namespace<V, M, F, Fut>(
    matcher: Option<M>,
    handler: F,
) -> impl Fn(String, V) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static
where
    V: Send + 'static,
    M: Fn(&str) -> bool + Send + Sync + 'static,
    F: Fn(String, V) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    move |key: String, value: V| {
        let pass = match &matcher {
            Some(m) => m(key_namespace(&key)),
            None => true,
        };
        if pass {
            handler(key, value).boxed()
        } else {
            futures::future::ready(Ok(())).boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::NotificationHandler;
    use k8s_openapi::api::core::v1::ConfigMap;
    use parking_lot::Mutex;

    /// Mirror whose sync channel has already lost its sender.
    struct ClosedMirror;

    #[async_trait::async_trait]
    impl Mirror<ConfigMap> for ClosedMirror {
        fn get_by_key(&self, _key: &str) -> Result<Option<Arc<ConfigMap>>, MirrorError> {
            Ok(None)
        }
        fn list(&self) -> Vec<Arc<ConfigMap>> {
            Vec::new()
        }
        fn has_synced(&self) -> bool {
            false
        }
        fn synced(&self) -> tokio::sync::watch::Receiver<bool> {
            tokio::sync::watch::channel(false).1
        }
        fn add_event_handler(&self, _handler: Arc<dyn NotificationHandler<ConfigMap>>) {}
        async fn run(&self, _stop: CancellationToken) {}
    }

    #[tokio::test]
    async fn closed_mirror_never_reports_synced() {
        let w = Watcher::new(
            ApiResource::erase::<ConfigMap>(&()),
            boxed_handler(|_key, _obj: Option<Arc<ConfigMap>>| async { anyhow::Ok(()) }),
            Arc::new(ClosedMirror),
            None,
        );
        assert!(!ManagedWatcher::wait_synced(&w).await);
        assert!(!w.sync(&CancellationToken::new()).await);
        assert_eq!(w.resync_period(), Duration::ZERO);
    }

    #[test]
    fn by_name_sets_field_selector() {
        let cfg = by_name("skiff-site");
        assert_eq!(cfg.field_selector.as_deref(), Some("metadata.name=skiff-site"));
    }

    #[tokio::test]
    async fn namespace_filter_skips_other_namespaces() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let f = {
            let seen = Arc::clone(&seen);
            filter_by_namespace(Some(|ns: &str| ns == "prod"), move |key: String, _v: u32| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(key);
                    anyhow::Ok(())
                }
            })
        };
        f("prod/a".into(), 1).await.unwrap();
        f("dev/b".into(), 2).await.unwrap();
        f("cluster-c".into(), 3).await.unwrap();
        assert_eq!(*seen.lock(), vec!["prod/a".to_string()]);
    }

    #[tokio::test]
    async fn missing_matcher_passes_everything() {
        let count = Arc::new(Mutex::new(0u32));
        let f = {
            let count = Arc::clone(&count);
            filter_by_namespace(None::<fn(&str) -> bool>, move |_key: String, _v: ()| {
                let count = Arc::clone(&count);
                async move {
                    *count.lock() += 1;
                    anyhow::Ok(())
                }
            })
        };
        f("a/x".into(), ()).await.unwrap();
        f("y".into(), ()).await.unwrap();
        assert_eq!(*count.lock(), 2);
    }
}
