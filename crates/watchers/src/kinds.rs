//! Per-kind registration helpers.
//!
//! Each of these is a thin instantiation of the generic watcher for one
//! resource kind. Optional kinds (Gateway API, Contour, OpenShift routes) are
//! probed first and are silently skipped when the cluster does not serve them.

use std::future::Future;
use std::sync::Arc;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    core::{ApiResource, DynamicObject, GroupVersionKind},
    runtime::watcher,
    Resource,
};
use skiff_api::{
    AccessGrant, AccessToken, AttachedConnector, AttachedConnectorBinding, Certificate, Connector, Link, Listener,
    RouterAccess, SecuredAccess, Site,
};
use tracing::info;

use crate::processor::EventProcessor;
use crate::watcher::{WatchedResource, Watcher};
use crate::{
    ConfigMapWatcher, DynamicWatcher, IngressWatcher, NamespaceWatcher, NodeWatcher, PodWatcher, SecretWatcher,
    ServiceWatcher,
};

/// Contour `HTTPProxy`.
pub fn contour_http_proxy_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk("projectcontour.io", "v1", "HTTPProxy"), "httpproxies")
}

/// Gateway API `Gateway`.
pub fn gateway_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk("gateway.networking.k8s.io", "v1", "Gateway"), "gateways")
}

/// Gateway API `TLSRoute`.
pub fn tls_route_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("gateway.networking.k8s.io", "v1alpha2", "TLSRoute"),
        "tlsroutes",
    )
}

/// OpenShift `Route`.
pub fn route_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk("route.openshift.io", "v1", "Route"), "routes")
}

impl EventProcessor {
    pub async fn has_contour_http_proxy(&self) -> bool {
        self.is_available(&contour_http_proxy_resource()).await
    }

    pub async fn has_gateway(&self) -> bool {
        self.is_available(&gateway_resource()).await
    }

    pub async fn has_tls_route(&self) -> bool {
        self.is_available(&tls_route_resource()).await
    }

    pub async fn has_route(&self) -> bool {
        self.is_available(&route_resource()).await
    }

    /// `skiff.dev` kinds resync on their own, shorter interval.
    fn watch_crd<K, F, Fut>(&self, config: watcher::Config, namespace: Option<&str>, handler: F) -> Arc<Watcher<K>>
    where
        K: WatchedResource + Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
        F: Fn(String, Option<Arc<K>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_namespaced_with_resync(config, namespace, self.config().crd_resync, handler)
    }

    async fn watch_optional<F, Fut>(
        &self,
        resource: ApiResource,
        config: watcher::Config,
        namespace: Option<&str>,
        handler: F,
    ) -> Option<Arc<DynamicWatcher>>
    where
        F: Fn(String, Option<Arc<DynamicObject>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if !self.is_available(&resource).await {
            info!(processor = %self.name(), kind = %resource.kind, group = %resource.group, "resource not installed; not watching");
            return None;
        }
        Some(self.watch_dynamic(resource, config, namespace, handler))
    }

    /// `None` when Contour is not installed.
    pub async fn watch_contour_http_proxies<F, Fut>(
        &self,
        config: watcher::Config,
        namespace: Option<&str>,
        handler: F,
    ) -> Option<Arc<DynamicWatcher>>
    where
        F: Fn(String, Option<Arc<DynamicObject>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_optional(contour_http_proxy_resource(), config, namespace, handler).await
    }

    /// `None` when the Gateway API is not installed.
    pub async fn watch_gateways<F, Fut>(
        &self,
        config: watcher::Config,
        namespace: Option<&str>,
        handler: F,
    ) -> Option<Arc<DynamicWatcher>>
    where
        F: Fn(String, Option<Arc<DynamicObject>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_optional(gateway_resource(), config, namespace, handler).await
    }

    /// `None` when the experimental TLSRoute CRD is not installed.
    pub async fn watch_tls_routes<F, Fut>(
        &self,
        config: watcher::Config,
        namespace: Option<&str>,
        handler: F,
    ) -> Option<Arc<DynamicWatcher>>
    where
        F: Fn(String, Option<Arc<DynamicObject>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_optional(tls_route_resource(), config, namespace, handler).await
    }

    /// `None` outside OpenShift.
    pub async fn watch_routes<F, Fut>(
        &self,
        config: watcher::Config,
        namespace: Option<&str>,
        handler: F,
    ) -> Option<Arc<DynamicWatcher>>
    where
        F: Fn(String, Option<Arc<DynamicObject>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_optional(route_resource(), config, namespace, handler).await
    }

    pub fn watch_config_maps<F, Fut>(
        &self,
        config: watcher::Config,
        namespace: Option<&str>,
        handler: F,
    ) -> Arc<ConfigMapWatcher>
    where
        F: Fn(String, Option<Arc<ConfigMap>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch(config, namespace, handler)
    }

    pub fn watch_secrets<F, Fut>(&self, config: watcher::Config, namespace: Option<&str>, handler: F) -> Arc<SecretWatcher>
    where
        F: Fn(String, Option<Arc<Secret>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch(config, namespace, handler)
    }

    /// Every secret in `namespace`, unfiltered.
    pub fn watch_all_secrets<F, Fut>(&self, namespace: Option<&str>, handler: F) -> Arc<SecretWatcher>
    where
        F: Fn(String, Option<Arc<Secret>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch(watcher::Config::default(), namespace, handler)
    }

    pub fn watch_services<F, Fut>(
        &self,
        config: watcher::Config,
        namespace: Option<&str>,
        handler: F,
    ) -> Arc<ServiceWatcher>
    where
        F: Fn(String, Option<Arc<Service>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch(config, namespace, handler)
    }

    /// Pods matching the label `selector`.
    pub fn watch_pods<F, Fut>(&self, selector: &str, namespace: Option<&str>, handler: F) -> Arc<PodWatcher>
    where
        F: Fn(String, Option<Arc<Pod>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch(watcher::Config::default().labels(selector), namespace, handler)
    }

    pub fn watch_ingresses<F, Fut>(
        &self,
        config: watcher::Config,
        namespace: Option<&str>,
        handler: F,
    ) -> Arc<IngressWatcher>
    where
        F: Fn(String, Option<Arc<Ingress>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch(config, namespace, handler)
    }

    pub fn watch_namespaces<F, Fut>(&self, config: watcher::Config, handler: F) -> Arc<NamespaceWatcher>
    where
        F: Fn(String, Option<Arc<Namespace>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_cluster(config, handler)
    }

    pub fn watch_nodes<F, Fut>(&self, handler: F) -> Arc<NodeWatcher>
    where
        F: Fn(String, Option<Arc<Node>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_cluster(watcher::Config::default(), handler)
    }

    pub fn watch_sites<F, Fut>(&self, namespace: Option<&str>, handler: F) -> Arc<Watcher<Site>>
    where
        F: Fn(String, Option<Arc<Site>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_crd(watcher::Config::default(), namespace, handler)
    }

    pub fn watch_listeners<F, Fut>(&self, namespace: Option<&str>, handler: F) -> Arc<Watcher<Listener>>
    where
        F: Fn(String, Option<Arc<Listener>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_crd(watcher::Config::default(), namespace, handler)
    }

    pub fn watch_connectors<F, Fut>(&self, namespace: Option<&str>, handler: F) -> Arc<Watcher<Connector>>
    where
        F: Fn(String, Option<Arc<Connector>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_crd(watcher::Config::default(), namespace, handler)
    }

    pub fn watch_links<F, Fut>(&self, namespace: Option<&str>, handler: F) -> Arc<Watcher<Link>>
    where
        F: Fn(String, Option<Arc<Link>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_crd(watcher::Config::default(), namespace, handler)
    }

    pub fn watch_access_tokens<F, Fut>(&self, namespace: Option<&str>, handler: F) -> Arc<Watcher<AccessToken>>
    where
        F: Fn(String, Option<Arc<AccessToken>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_crd(watcher::Config::default(), namespace, handler)
    }

    pub fn watch_access_grants<F, Fut>(&self, namespace: Option<&str>, handler: F) -> Arc<Watcher<AccessGrant>>
    where
        F: Fn(String, Option<Arc<AccessGrant>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_crd(watcher::Config::default(), namespace, handler)
    }

    pub fn watch_secured_accesses<F, Fut>(&self, namespace: Option<&str>, handler: F) -> Arc<Watcher<SecuredAccess>>
    where
        F: Fn(String, Option<Arc<SecuredAccess>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_secured_accesses_with_options(watcher::Config::default(), namespace, handler)
    }

    pub fn watch_secured_accesses_with_options<F, Fut>(
        &self,
        config: watcher::Config,
        namespace: Option<&str>,
        handler: F,
    ) -> Arc<Watcher<SecuredAccess>>
    where
        F: Fn(String, Option<Arc<SecuredAccess>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_crd(config, namespace, handler)
    }

    pub fn watch_certificates<F, Fut>(&self, namespace: Option<&str>, handler: F) -> Arc<Watcher<Certificate>>
    where
        F: Fn(String, Option<Arc<Certificate>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_crd(watcher::Config::default(), namespace, handler)
    }

    pub fn watch_router_accesses<F, Fut>(&self, namespace: Option<&str>, handler: F) -> Arc<Watcher<RouterAccess>>
    where
        F: Fn(String, Option<Arc<RouterAccess>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_crd(watcher::Config::default(), namespace, handler)
    }

    pub fn watch_attached_connectors<F, Fut>(
        &self,
        namespace: Option<&str>,
        handler: F,
    ) -> Arc<Watcher<AttachedConnector>>
    where
        F: Fn(String, Option<Arc<AttachedConnector>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_crd(watcher::Config::default(), namespace, handler)
    }

    pub fn watch_attached_connector_bindings<F, Fut>(
        &self,
        namespace: Option<&str>,
        handler: F,
    ) -> Arc<Watcher<AttachedConnectorBinding>>
    where
        F: Fn(String, Option<Arc<AttachedConnectorBinding>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.watch_crd(watcher::Config::default(), namespace, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_resources_carry_plurals() {
        let gw = gateway_resource();
        assert_eq!(gw.api_version, "gateway.networking.k8s.io/v1");
        assert_eq!(gw.plural, "gateways");
        assert_eq!(tls_route_resource().version, "v1alpha2");
        assert_eq!(contour_http_proxy_resource().plural, "httpproxies");
        assert_eq!(route_resource().group, "route.openshift.io");
    }
}
