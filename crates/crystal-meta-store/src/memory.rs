//! In-memory metadata store
//!
//! Mirrors the list/hash semantics of the Redis store. Used in tests and for
//! single-process deployments seeded at start-up.

use crate::client::{FieldMap, MetadataClient};
use crate::error::{MetaStoreError, MetaStoreResult};
use crate::keys;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory list and hash store
pub struct MemoryMetadataStore {
    /// Lists indexed by key, head first
    lists: RwLock<HashMap<String, Vec<String>>>,
    /// Hashes indexed by key
    hashes: RwLock<HashMap<String, FieldMap>>,
    /// When false every lookup fails as if the store were unreachable
    available: AtomicBool,
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMetadataStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            lists: RwLock::new(HashMap::new()),
            hashes: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    // =========== List Operations ===========

    /// Push a value at the head of a list
    pub fn lpush(&self, key: &str, value: impl Into<String>) {
        self.lists
            .write()
            .entry(key.to_string())
            .or_default()
            .insert(0, value.into());
    }

    /// Push a value at the tail of a list
    pub fn rpush(&self, key: &str, value: impl Into<String>) {
        self.lists
            .write()
            .entry(key.to_string())
            .or_default()
            .push(value.into());
    }

    /// Register a filter chain for `target`, given in execution order.
    ///
    /// Filters are pushed head-first, as the controller does.
    pub fn register_pipeline(&self, target: &str, filters: &[&str]) {
        let key = keys::pipeline(target);
        for filter in filters {
            self.lpush(&key, *filter);
        }
    }

    // =========== Hash Operations ===========

    /// Set one field of a hash
    pub fn hset(&self, key: &str, field: impl Into<String>, value: impl Into<String>) {
        self.hashes
            .write()
            .entry(key.to_string())
            .or_default()
            .insert(field.into(), value.into());
    }

    /// Set several fields of a hash
    pub fn hset_all<I, F, V>(&self, key: &str, fields: I)
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<String>,
    {
        let mut hashes = self.hashes.write();
        let entry = hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            entry.insert(field.into(), value.into());
        }
    }

    /// Remove a key of any type
    pub fn delete(&self, key: &str) {
        self.lists.write().remove(key);
        self.hashes.write().remove(key);
    }

    /// Simulate the store becoming (un)reachable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> MetaStoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MetaStoreError::Unavailable("memory store offline".to_string()))
        }
    }
}

#[async_trait]
impl MetadataClient for MemoryMetadataStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self, key: &str) -> MetaStoreResult<Option<Vec<String>>> {
        self.check_available()?;
        Ok(self
            .lists
            .read()
            .get(key)
            .filter(|values| !values.is_empty())
            .cloned())
    }

    async fn hash(&self, key: &str) -> MetaStoreResult<FieldMap> {
        self.check_available()?;
        Ok(self.hashes.read().get(key).cloned().unwrap_or_default())
    }
}
