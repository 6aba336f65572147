//! # Echo Cache
//!
//! The Cache Store: a set of named, versioned containers mapping request
//! keys to response snapshots.
//!
//! ## Architecture
//!
//! ```text
//! CacheStore
//!     ├── "v2-static"   ── CacheKey → CachedEntry
//!     ├── "v2-dynamic"  ── CacheKey → CachedEntry
//!     ├── "v2-image"    ── ...
//!     └── "v2-api"      ── ...
//! ```
//!
//! Two backends are provided: [`MemoryCacheStore`] for ephemeral hosts and
//! tests, and [`SqliteCacheStore`] which survives restarts.

use std::fmt;
use std::str::FromStr;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;

// ==================== Errors ====================

/// Errors that can occur in cache operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Quota exceeded for container {0}")]
    QuotaExceeded(String),

    #[error("Cache store lock poisoned")]
    Poisoned,
}

// ==================== Containers ====================

/// What a container holds. Each purpose has exactly one current container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePurpose {
    /// Pre-warmed application shell.
    Static,
    /// Pages, scripts and anything else fetched at runtime.
    Dynamic,
    Image,
    Api,
}

impl CachePurpose {
    pub const ALL: [CachePurpose; 4] = [
        CachePurpose::Static,
        CachePurpose::Dynamic,
        CachePurpose::Image,
        CachePurpose::Api,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CachePurpose::Static => "static",
            CachePurpose::Dynamic => "dynamic",
            CachePurpose::Image => "image",
            CachePurpose::Api => "api",
        }
    }
}

impl fmt::Display for CachePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CachePurpose {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(CachePurpose::Static),
            "dynamic" => Ok(CachePurpose::Dynamic),
            "image" => Ok(CachePurpose::Image),
            "api" => Ok(CachePurpose::Api),
            _ => Err(()),
        }
    }
}

/// A container identity, encoded as `"{version}-{purpose}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerName {
    pub version: String,
    pub purpose: CachePurpose,
}

impl ContainerName {
    pub fn new(version: impl Into<String>, purpose: CachePurpose) -> Self {
        Self {
            version: version.into(),
            purpose,
        }
    }

    /// Decode a container name. Names that were not produced by this
    /// encoding return `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let (version, purpose) = name.rsplit_once('-')?;
        if version.is_empty() {
            return None;
        }
        Some(Self::new(version, purpose.parse().ok()?))
    }

    /// The four container names that are current for a version.
    pub fn current(version: &str) -> Vec<String> {
        CachePurpose::ALL
            .iter()
            .map(|purpose| ContainerName::new(version, *purpose).to_string())
            .collect()
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.version, self.purpose)
    }
}

// ==================== Entries ====================

/// Lookup key: method plus the absolute URL with its fragment removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    pub fn new(method: &str, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.to_ascii_uppercase(),
            url: url.into(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new("GET", url)
    }

    /// Flat string form used as the storage key.
    pub fn encoded(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub key: CacheKey,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Milliseconds since the Unix epoch.
    pub stored_at: i64,
}

impl CachedEntry {
    /// Snapshot a response taken now.
    pub fn new(key: CacheKey, status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            key,
            status,
            headers,
            body,
            stored_at: echo_common::now_millis(),
        }
    }
}

// ==================== Store ====================

/// A set of named containers.
///
/// Every operation is atomic per entry: a `put` is never observable as
/// partially written. Cross-entry transactions are not offered.
pub trait CacheStore: Send + Sync {
    /// Create the container if it does not exist yet.
    fn open(&self, name: &str) -> Result<(), CacheError>;

    /// Check if a container exists.
    fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// All container names, sorted.
    fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Delete a container and everything in it.
    fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Look up an entry in one container.
    fn match_entry(&self, name: &str, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError>;

    /// Store an entry, replacing any entry with the same key. The
    /// container is created if needed.
    fn put(&self, name: &str, entry: CachedEntry) -> Result<(), CacheError>;

    /// Delete an entry.
    fn delete_entry(&self, name: &str, key: &CacheKey) -> Result<bool, CacheError>;

    /// Keys stored in a container.
    fn entry_keys(&self, name: &str) -> Result<Vec<CacheKey>, CacheError>;

    /// Look up an entry across every container, in name order.
    fn match_any(&self, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError> {
        for name in self.keys()? {
            if let Some(entry) = self.match_entry(&name, key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_roundtrip() {
        let name = ContainerName::new("v2", CachePurpose::Static);
        assert_eq!(name.to_string(), "v2-static");
        assert_eq!(ContainerName::parse("v2-static"), Some(name));
    }

    #[test]
    fn test_container_name_with_dashed_version() {
        let parsed = ContainerName::parse("echochat-v1.4-image").unwrap();
        assert_eq!(parsed.version, "echochat-v1.4");
        assert_eq!(parsed.purpose, CachePurpose::Image);
    }

    #[test]
    fn test_foreign_container_names() {
        assert_eq!(ContainerName::parse("workbox-precache"), None);
        assert_eq!(ContainerName::parse("-static"), None);
        assert_eq!(ContainerName::parse("static"), None);
    }

    #[test]
    fn test_current_names() {
        assert_eq!(
            ContainerName::current("v3"),
            vec!["v3-static", "v3-dynamic", "v3-image", "v3-api"]
        );
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let a = CacheKey::get(&Url::parse("https://example.com/chat#latest").unwrap());
        let b = CacheKey::new("get", &Url::parse("https://example.com/chat").unwrap());
        assert_eq!(a, b);
        assert_eq!(a.encoded(), "GET https://example.com/chat");
    }
}
