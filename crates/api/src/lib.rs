//! Skiff domain resource kinds.
//!
//! Handlers registered with the event processor receive these types; the
//! watcher layer only needs them to be `kube::Resource`s with serde support.

#![forbid(unsafe_code)]

pub mod v2alpha1;

pub use v2alpha1::{
    AccessGrant, AccessToken, AttachedConnector, AttachedConnectorBinding, Certificate, Connector, Link, Listener,
    ResourceStatus, RouterAccess, SecuredAccess, Site,
};
