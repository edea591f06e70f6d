//! Cache key generation.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::borrow::Borrow;
use std::sync::Arc;

/// Hex digits of the parameter digest kept in a [`QueryKey`]-built key.
const DIGEST_PREFIX_LEN: usize = 16;

/// Opaque identifier of one logical fetchable resource.
///
/// The cache never inspects the contents; uniqueness is the caller's responsibility.
/// Cloning is cheap (shared string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Arc::from(key.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(k: &CacheKey) -> Self {
        k.clone()
    }
}

/// Builds a stable [`CacheKey`] for a remote collection query.
///
/// The key is `"<resource>:<digest>"`, where the digest is a SHA-256 prefix over the
/// JSON-encoded parameters in insertion order. Two builders with the same resource and the
/// same parameters in the same order always produce the same key.
///
/// ```rust
/// use swr_cache::cache::QueryKey;
///
/// let key = QueryKey::new("projects")
///     .param("client_id", 42)
///     .param("status", "active")
///     .build();
/// assert!(key.as_str().starts_with("projects:"));
/// ```
#[derive(Debug, Clone)]
pub struct QueryKey {
    resource: String,
    params: Vec<(String, serde_json::Value)>,
    salt: Option<String>,
}

impl QueryKey {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            params: Vec::new(),
            salt: None,
        }
    }

    /// Append a query parameter. Values that fail to serialize are encoded as `null`.
    pub fn param(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.params.push((name.into(), value));
        self
    }

    /// Mix an extra namespace (e.g. tenant id) into the digest.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn build(&self) -> CacheKey {
        if self.params.is_empty() && self.salt.is_none() {
            return CacheKey::new(self.resource.clone());
        }

        let canonical = serde_json::json!({
            "params": self.params,
            "salt": self.salt,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        let digest: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();

        CacheKey::new(format!(
            "{}:{}",
            self.resource,
            &digest[..DIGEST_PREFIX_LEN]
        ))
    }
}

impl From<QueryKey> for CacheKey {
    fn from(q: QueryKey) -> Self {
        q.build()
    }
}
