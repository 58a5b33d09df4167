//! Skiff core types: stable object keys and shared configuration.

#![forbid(unsafe_code)]

pub mod config;

pub use config::ProcessorConfig;

/// Errors raised while building or parsing object keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("object has no metadata.name")]
    MissingName,
    #[error("unexpected key format: {0:?}")]
    UnexpectedFormat(String),
}

/// Build the stable key for an object: `"<namespace>/<name>"`, or just
/// `"<name>"` for cluster-scoped objects.
pub fn meta_namespace_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}

/// Split a key produced by [`meta_namespace_key`] back into namespace and name.
pub fn split_meta_namespace_key(key: &str) -> Result<(Option<&str>, &str), KeyError> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] => Ok((None, name)),
        [ns, name] => Ok((Some(ns), name)),
        _ => Err(KeyError::UnexpectedFormat(key.to_string())),
    }
}

/// Namespace component of a key, `""` for cluster-scoped or malformed keys.
pub fn key_namespace(key: &str) -> &str {
    match split_meta_namespace_key(key) {
        Ok((Some(ns), _)) => ns,
        _ => "",
    }
}

pub mod prelude {
    pub use super::{key_namespace, meta_namespace_key, split_meta_namespace_key, KeyError, ProcessorConfig};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_and_cluster_keys() {
        assert_eq!(meta_namespace_key(Some("ns1"), "a"), "ns1/a");
        assert_eq!(meta_namespace_key(None, "node-1"), "node-1");
        assert_eq!(meta_namespace_key(Some(""), "node-1"), "node-1");
    }

    #[test]
    fn split_roundtrips_both_shapes() {
        assert_eq!(split_meta_namespace_key("ns1/a").unwrap(), (Some("ns1"), "a"));
        assert_eq!(split_meta_namespace_key("node-1").unwrap(), (None, "node-1"));
    }

    #[test]
    fn split_rejects_extra_segments() {
        let err = split_meta_namespace_key("a/b/c").unwrap_err();
        assert_eq!(err, KeyError::UnexpectedFormat("a/b/c".into()));
    }

    #[test]
    fn key_namespace_defaults_to_empty() {
        assert_eq!(key_namespace("prod/site"), "prod");
        assert_eq!(key_namespace("cluster-thing"), "");
        assert_eq!(key_namespace("x/y/z"), "");
    }
}
