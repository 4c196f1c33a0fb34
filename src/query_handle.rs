use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use crate::query_cache::QueryCache;
use crate::source::{decode_rows, TableSource};

/// Post-processing applied to decoded rows, on cache hits and fresh fetches alike
pub type Transform<T> = Arc<dyn Fn(Vec<T>) -> Vec<T> + Send + Sync>;

/// Called with the error of a failed fetch
pub type ErrorCallback = Arc<dyn Fn(&StoreError) + Send + Sync>;

/// What a [`QueryHandle`] fetches and how its results are cached
pub struct QueryOptions<T> {
    pub query: Query,
    pub cache_key: Option<String>,
    /// Overrides the cache's configured TTL for this key
    pub ttl: Option<Duration>,
    pub transform: Option<Transform<T>>,
    pub on_error: Option<ErrorCallback>,
}

impl<T> QueryOptions<T> {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            cache_key: None,
            ttl: None,
            transform: None,
            on_error: None,
        }
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn transform(
        mut self,
        transform: impl Fn(Vec<T>) -> Vec<T> + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&StoreError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl<T> Clone for QueryOptions<T> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            cache_key: self.cache_key.clone(),
            ttl: self.ttl,
            transform: self.transform.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<T> fmt::Debug for QueryOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("query", &self.query)
            .field("cache_key", &self.cache_key)
            .field("ttl", &self.ttl)
            .field("transform", &self.transform.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Snapshot of what a [`QueryHandle`] last produced
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub data: Vec<T>,
    pub loading: bool,
    pub error: Option<StoreError>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            loading: false,
            error: None,
        }
    }
}

/// A typed, optionally cached query with loading/error/refetch state.
///
/// Each fetch takes a generation number. Only the most recently started fetch may write to
/// the state; an older one that completes late still returns its rows to its own caller.
pub struct QueryHandle<T> {
    source: Arc<dyn TableSource>,
    cache: Arc<QueryCache>,
    options: RwLock<QueryOptions<T>>,
    state: RwLock<QueryState<T>>,
    generation: AtomicU64,
}

impl<T> QueryHandle<T>
where
    T: DeserializeOwned + Clone + Send + Sync,
{
    pub fn new(
        source: Arc<dyn TableSource>,
        cache: Arc<QueryCache>,
        options: QueryOptions<T>,
    ) -> Self {
        Self {
            source,
            cache,
            options: RwLock::new(options),
            state: RwLock::new(QueryState::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the cached rows without touching the source, if the key is set and fresh
    pub fn try_cached(&self) -> Option<StoreResult<Vec<T>>> {
        let options = self.options.read().clone();
        self.cached_rows(&options)
    }

    /// Fetches the rows, serving them from the cache when the entry is still fresh
    pub async fn fetch(&self) -> StoreResult<Vec<T>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let options = self.options.read().clone();
        self.state.write().loading = true;

        let result = match self.cached_rows(&options) {
            Some(result) => result,
            None => self.load(generation, &options).await,
        };

        let committed = self.commit(generation, &result);
        if let Err(err) = &result {
            warn!("Query on '{}' failed: {}", options.query.table, err);
            if committed {
                if let Some(callback) = &options.on_error {
                    callback(err);
                }
            }
        }
        result
    }

    /// Drops the cache entry for this query's key and fetches again
    pub async fn refetch(&self) -> StoreResult<Vec<T>> {
        let cache_key = self.options.read().cache_key.clone();
        if let Some(key) = cache_key {
            self.cache.invalidate(&key);
        }
        self.fetch().await
    }

    /// Replaces the query and cache key, then fetches with the new dependencies
    pub async fn set_query(&self, query: Query, cache_key: Option<String>) -> StoreResult<Vec<T>> {
        {
            let mut options = self.options.write();
            options.query = query;
            options.cache_key = cache_key;
        }
        self.fetch().await
    }

    pub fn state(&self) -> QueryState<T> {
        self.state.read().clone()
    }

    pub fn options(&self) -> QueryOptions<T> {
        self.options.read().clone()
    }

    fn cached_rows(&self, options: &QueryOptions<T>) -> Option<StoreResult<Vec<T>>> {
        let key = options.cache_key.as_deref()?;
        let rows = match options.ttl {
            Some(ttl) => self.cache.get_with_ttl(key, ttl),
            None => self.cache.get(key),
        }?;
        debug!("Serving '{}' from cache", key);
        Some(decode_rows(&options.query.table, rows).map(|data| apply(options, data)))
    }

    async fn load(&self, generation: u64, options: &QueryOptions<T>) -> StoreResult<Vec<T>> {
        let rows = self.source.select(&options.query).await?;
        if let Some(key) = &options.cache_key {
            // Same lock as `commit`: a superseded fetch never re-caches replaced rows.
            let _state = self.state.write();
            if self.generation.load(Ordering::SeqCst) == generation {
                self.cache.insert(key.clone(), rows.clone());
            } else {
                debug!("Not caching rows of superseded fetch #{}", generation);
            }
        }
        let data = decode_rows(&options.query.table, rows)?;
        Ok(apply(options, data))
    }

    fn commit(&self, generation: u64, result: &StoreResult<Vec<T>>) -> bool {
        let mut state = self.state.write();
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Discarding result of superseded fetch #{}", generation);
            return false;
        }
        match result {
            Ok(data) => {
                state.data = data.clone();
                state.error = None;
            }
            Err(err) => state.error = Some(err.clone()),
        }
        state.loading = false;
        true
    }
}

fn apply<T>(options: &QueryOptions<T>, data: Vec<T>) -> Vec<T> {
    match &options.transform {
        Some(transform) => transform(data),
        None => data,
    }
}
