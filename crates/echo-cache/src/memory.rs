//! In-memory cache store.

use std::sync::RwLock;

use hashbrown::HashMap;

use crate::{CacheError, CacheKey, CacheStore, CachedEntry};

/// A single container.
#[derive(Debug, Default)]
struct Container {
    entries: HashMap<String, CachedEntry>,
}

/// Cache store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    containers: RwLock<HashMap<String, Container>>,
    /// Maximum entries per container, if any.
    entry_limit: Option<usize>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects new keys once a container holds
    /// `limit` entries.
    pub fn with_entry_limit(limit: usize) -> Self {
        Self {
            entry_limit: Some(limit),
            ..Default::default()
        }
    }
}

impl CacheStore for MemoryCacheStore {
    fn open(&self, name: &str) -> Result<(), CacheError> {
        let mut containers = self.containers.write().map_err(|_| CacheError::Poisoned)?;
        containers.entry(name.to_string()).or_default();
        Ok(())
    }

    fn has(&self, name: &str) -> Result<bool, CacheError> {
        let containers = self.containers.read().map_err(|_| CacheError::Poisoned)?;
        Ok(containers.contains_key(name))
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        let containers = self.containers.read().map_err(|_| CacheError::Poisoned)?;
        let mut names: Vec<String> = containers.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut containers = self.containers.write().map_err(|_| CacheError::Poisoned)?;
        Ok(containers.remove(name).is_some())
    }

    fn match_entry(&self, name: &str, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError> {
        let containers = self.containers.read().map_err(|_| CacheError::Poisoned)?;
        Ok(containers
            .get(name)
            .and_then(|c| c.entries.get(&key.encoded()))
            .cloned())
    }

    fn put(&self, name: &str, entry: CachedEntry) -> Result<(), CacheError> {
        let mut containers = self.containers.write().map_err(|_| CacheError::Poisoned)?;
        let container = containers.entry(name.to_string()).or_default();
        let encoded = entry.key.encoded();

        if let Some(limit) = self.entry_limit {
            if !container.entries.contains_key(&encoded) && container.entries.len() >= limit {
                return Err(CacheError::QuotaExceeded(name.to_string()));
            }
        }

        container.entries.insert(encoded, entry);
        Ok(())
    }

    fn delete_entry(&self, name: &str, key: &CacheKey) -> Result<bool, CacheError> {
        let mut containers = self.containers.write().map_err(|_| CacheError::Poisoned)?;
        Ok(containers
            .get_mut(name)
            .map(|c| c.entries.remove(&key.encoded()).is_some())
            .unwrap_or(false))
    }

    fn entry_keys(&self, name: &str) -> Result<Vec<CacheKey>, CacheError> {
        let containers = self.containers.read().map_err(|_| CacheError::Poisoned)?;
        let mut keys: Vec<CacheKey> = containers
            .get(name)
            .map(|c| c.entries.values().map(|e| e.key.clone()).collect())
            .unwrap_or_default();
        keys.sort_by_key(|k| k.encoded());
        Ok(keys)
    }
}
