//! `skiff.dev/v2alpha1` custom resources.
//!
//! Only the shape the watcher layer and its handlers need is modelled here;
//! validation and defaulting live with the handlers.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status block shared by every kind.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResourceStatus {
    pub fn is_ready(&self) -> bool {
        self.status.as_deref() == Some("Ready")
    }
}

/// A site: one participant in the application network.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "skiff.dev",
    version = "v2alpha1",
    kind = "Site",
    plural = "sites",
    status = "ResourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SiteSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default)]
    pub ha: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

/// Exposes a routing key as a local service.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "skiff.dev",
    version = "v2alpha1",
    kind = "Listener",
    plural = "listeners",
    status = "ResourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSpec {
    pub routing_key: String,
    pub host: String,
    pub port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_credentials: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub listener_type: Option<String>,
}

/// Binds local workloads to a routing key.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "skiff.dev",
    version = "v2alpha1",
    kind = "Connector",
    plural = "connectors",
    status = "ResourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSpec {
    pub routing_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_credentials: Option<String>,
    #[serde(default)]
    pub include_not_ready: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub name: String,
    pub host: String,
    pub port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// An outgoing link to another site.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "skiff.dev",
    version = "v2alpha1",
    kind = "Link",
    plural = "links",
    status = "ResourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct LinkSpec {
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_credentials: Option<String>,
    #[serde(default)]
    pub cost: i32,
}

/// A redeemable token that turns into a Link.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "skiff.dev",
    version = "v2alpha1",
    kind = "AccessToken",
    plural = "accesstokens",
    status = "ResourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenSpec {
    pub url: String,
    pub code: String,
    pub ca: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_cost: Option<i32>,
}

/// Permission to redeem tokens against this site.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "skiff.dev",
    version = "v2alpha1",
    kind = "AccessGrant",
    plural = "accessgrants",
    status = "ResourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrantSpec {
    #[serde(default)]
    pub redemptions_allowed: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_window: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecuredAccessPort {
    pub name: String,
    pub port: i32,
    pub target_port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Externally reachable, TLS-secured access to selected pods.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "skiff.dev",
    version = "v2alpha1",
    kind = "SecuredAccess",
    plural = "securedaccesses",
    status = "ResourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SecuredAccessSpec {
    #[serde(default)]
    pub ports: Vec<SecuredAccessPort>,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

/// Request for a certificate signed by a site CA.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "skiff.dev",
    version = "v2alpha1",
    kind = "Certificate",
    plural = "certificates",
    status = "ResourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    pub ca: String,
    pub subject: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub client: bool,
    #[serde(default)]
    pub server: bool,
    #[serde(default)]
    pub signing: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouterAccessRole {
    pub name: String,
    pub port: i32,
}

/// Router ports exposed for inter-site or edge traffic.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "skiff.dev",
    version = "v2alpha1",
    kind = "RouterAccess",
    plural = "routeraccesses",
    status = "ResourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RouterAccessSpec {
    #[serde(default)]
    pub roles: Vec<RouterAccessRole>,
    pub tls_credentials: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_type: Option<String>,
    #[serde(default)]
    pub generate_tls_credentials: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_host: Option<String>,
    #[serde(default)]
    pub subject_alternative_names: Vec<String>,
}

/// A connector defined in one namespace on behalf of a site in another.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "skiff.dev",
    version = "v2alpha1",
    kind = "AttachedConnector",
    plural = "attachedconnectors",
    status = "ResourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AttachedConnectorSpec {
    pub site_namespace: String,
    pub port: i32,
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_credentials: Option<String>,
    #[serde(default)]
    pub include_not_ready: bool,
}

/// The site-side half of an AttachedConnector.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "skiff.dev",
    version = "v2alpha1",
    kind = "AttachedConnectorBinding",
    plural = "attachedconnectorbindings",
    status = "ResourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AttachedConnectorBindingSpec {
    pub connector_namespace: String,
    pub routing_key: String,
}
