use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::query_cache::QueryCache;
use postgres_unit_of_work::{TransactionAware, TransactionResult};

/// A transaction-aware wrapper around QueryCache that stages invalidations
/// and applies them only on commit.
///
/// Admin writes register one of these with their unit of work so cached listings are
/// dropped only once the write is durable.
pub struct TransactionAwareQueryCache {
    shared_cache: Arc<QueryCache>,
    local_keys: RwLock<HashSet<String>>,
    local_prefixes: RwLock<HashSet<String>>,
}

impl TransactionAwareQueryCache {
    /// Creates a new transaction-aware cache wrapper
    pub fn new(shared_cache: Arc<QueryCache>) -> Self {
        Self {
            shared_cache,
            local_keys: RwLock::new(HashSet::new()),
            local_prefixes: RwLock::new(HashSet::new()),
        }
    }

    /// Stages a single key for invalidation
    pub fn invalidate(&self, key: impl Into<String>) {
        self.local_keys.write().insert(key.into());
    }

    /// Stages every key with the given prefix for invalidation
    pub fn invalidate_prefix(&self, prefix: impl Into<String>) {
        self.local_prefixes.write().insert(prefix.into());
    }

    /// Gets cached rows, treating staged invalidations as already applied
    pub fn get(&self, key: &str) -> Option<Vec<Value>> {
        if self.is_staged(key) {
            return None;
        }
        self.shared_cache.get(key)
    }

    /// Checks if a key would be dropped on commit
    pub fn is_staged(&self, key: &str) -> bool {
        if self.local_keys.read().contains(key) {
            return true;
        }
        self.local_prefixes
            .read()
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
    }

    pub fn staged_count(&self) -> usize {
        self.local_keys.read().len() + self.local_prefixes.read().len()
    }

    fn clear_staged(&self) {
        self.local_keys.write().clear();
        self.local_prefixes.write().clear();
    }
}

#[async_trait]
impl TransactionAware for TransactionAwareQueryCache {
    async fn on_commit(&self) -> TransactionResult<()> {
        for key in self.local_keys.read().iter() {
            self.shared_cache.invalidate(key);
        }
        for prefix in self.local_prefixes.read().iter() {
            self.shared_cache.invalidate_prefix(prefix);
        }
        debug!("Applied {} staged cache invalidations on commit", self.staged_count());
        self.clear_staged();
        Ok(())
    }

    async fn on_rollback(&self) -> TransactionResult<()> {
        debug!("Discarding {} staged cache invalidations on rollback", self.staged_count());
        self.clear_staged();
        Ok(())
    }
}
