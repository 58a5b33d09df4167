//! Skiff watchers: funnel changes from many resource kinds through one
//! serialized dispatch loop.
//!
//! Each [`Watcher`] bridges one kind's [`Mirror`] into the shared work queue
//! owned by the [`EventProcessor`]. The queue only ever sees
//! [`ResourceChange`] values (`{handler, key}`); the watcher that produced an
//! event is also the one that turns the key back into a typed object when the
//! event is dispatched.

#![forbid(unsafe_code)]

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use kube::Resource;
use skiff_core::{meta_namespace_key, KeyError};

pub mod callback;
mod kinds;
pub mod mirror;
pub mod probe;
pub mod processor;
pub mod watcher;

pub use callback::CallbackHandler;
pub use kinds::{contour_http_proxy_resource, gateway_resource, route_resource, tls_route_resource};
pub use mirror::{KubeMirror, Mirror, MirrorError, MirrorStore, NotificationHandler};
pub use probe::{CapabilityProbe, DiscoveryProbe, StaticProbe};
pub use processor::EventProcessor;
pub use watcher::{by_name, filter_by_namespace, HandlerFn, ManagedWatcher, WatchedResource, Watcher};

pub type ConfigMapWatcher = Watcher<k8s_openapi::api::core::v1::ConfigMap>;
pub type SecretWatcher = Watcher<k8s_openapi::api::core::v1::Secret>;
pub type ServiceWatcher = Watcher<k8s_openapi::api::core::v1::Service>;
pub type PodWatcher = Watcher<k8s_openapi::api::core::v1::Pod>;
pub type NamespaceWatcher = Watcher<k8s_openapi::api::core::v1::Namespace>;
pub type NodeWatcher = Watcher<k8s_openapi::api::core::v1::Node>;
pub type IngressWatcher = Watcher<k8s_openapi::api::networking::v1::Ingress>;
pub type DynamicWatcher = Watcher<kube::core::DynamicObject>;

/// Unit of work on the shared queue.
///
/// Two changes are equal when they point at the same handler instance and
/// carry the same key, which is what lets the queue coalesce bursts of
/// notifications for one object.
#[derive(Clone)]
pub struct ResourceChange {
    pub handler: Arc<dyn ResourceChangeHandler>,
    pub key: String,
}

impl ResourceChange {
    pub fn new(handler: Arc<dyn ResourceChangeHandler>, key: impl Into<String>) -> Self {
        Self { handler, key: key.into() }
    }

    fn handler_addr(&self) -> *const () {
        Arc::as_ptr(&self.handler) as *const ()
    }

    pub fn describe(&self) -> String {
        self.handler.describe(self)
    }
}

impl PartialEq for ResourceChange {
    fn eq(&self, other: &Self) -> bool {
        self.handler_addr() == other.handler_addr() && self.key == other.key
    }
}

impl Eq for ResourceChange {}

impl Hash for ResourceChange {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.handler_addr() as usize).hash(state);
        self.key.hash(state);
    }
}

impl fmt::Debug for ResourceChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceChange").field("handler", &self.describe()).field("key", &self.key).finish()
    }
}

/// What the dispatch loop needs from whoever produced an event.
#[async_trait::async_trait]
pub trait ResourceChangeHandler: Send + Sync {
    /// Process the event. Errors are retried with backoff by the processor.
    async fn handle(&self, event: &ResourceChange) -> anyhow::Result<()>;

    /// Human readable description used when logging failures.
    fn describe(&self, event: &ResourceChange) -> String;
}

/// Stable key of a watched object (`namespace/name`, or `name` when cluster-scoped).
pub fn object_key<K: Resource>(obj: &K) -> Result<String, KeyError> {
    let meta = obj.meta();
    let name = meta.name.as_deref().ok_or(KeyError::MissingName)?;
    Ok(meta_namespace_key(meta.namespace.as_deref(), name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Node};
    use kube::api::ObjectMeta;

    struct Named(&'static str);

    #[async_trait::async_trait]
    impl ResourceChangeHandler for Named {
        async fn handle(&self, _event: &ResourceChange) -> anyhow::Result<()> {
            Ok(())
        }

        fn describe(&self, event: &ResourceChange) -> String {
            format!("{} {}", self.0, event.key)
        }
    }

    #[test]
    fn equality_is_handler_identity_plus_key() {
        let a: Arc<dyn ResourceChangeHandler> = Arc::new(Named("A"));
        let b: Arc<dyn ResourceChangeHandler> = Arc::new(Named("A"));
        assert_eq!(ResourceChange::new(a.clone(), "ns/x"), ResourceChange::new(a.clone(), "ns/x"));
        assert_ne!(ResourceChange::new(a.clone(), "ns/x"), ResourceChange::new(a.clone(), "ns/y"));
        assert_ne!(ResourceChange::new(a, "ns/x"), ResourceChange::new(b, "ns/x"));
    }

    #[test]
    fn debug_uses_describe() {
        let h: Arc<dyn ResourceChangeHandler> = Arc::new(Named("Site"));
        let rendered = format!("{:?}", ResourceChange::new(h, "ns/s1"));
        assert!(rendered.contains("Site ns/s1"), "{rendered}");
    }

    #[test]
    fn object_keys_for_namespaced_and_cluster_objects() {
        let cm = ConfigMap {
            metadata: ObjectMeta { name: Some("cfg".into()), namespace: Some("ns1".into()), ..Default::default() },
            ..Default::default()
        };
        let node = Node { metadata: ObjectMeta { name: Some("n1".into()), ..Default::default() }, ..Default::default() };
        assert_eq!(object_key(&cm).unwrap(), "ns1/cfg");
        assert_eq!(object_key(&node).unwrap(), "n1");
        assert_eq!(object_key(&ConfigMap::default()).unwrap_err(), KeyError::MissingName);
    }
}
