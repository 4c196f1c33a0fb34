use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::query_cache::QueryCache;

/// Channel `notify_cache_change()` publishes on
pub const DEFAULT_CACHE_CHANNEL: &str = "cache_invalidation";

/// Pause before reconnecting after the notification connection drops
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Row change reported by the trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
    #[serde(other)]
    Other,
}

/// Payload of one `notify_cache_change()` notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheNotification {
    pub table: String,
    pub action: ChangeAction,
    /// Primary key of the changed row, as text
    pub id: String,
    /// The new row for inserts and updates, the old one for deletes.
    /// Dropped by the trigger when the payload would not fit a NOTIFY.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CacheNotification {
    /// A column of the changed row rendered as text, if the payload carries it
    pub fn column(&self, column: &str) -> Option<String> {
        match self.data.as_ref()?.get(column)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

#[async_trait]
pub trait CacheNotificationHandler: Send + Sync {
    async fn handle_notification(&self, notification: CacheNotification);

    /// Table whose notifications are routed here
    fn table_name(&self) -> &str;
}

/// Drops the cached queries that read one table whenever that table changes.
///
/// Cache keys are grouped by prefix: `products:` covers `products:featured` and
/// `products:category:oils`. A change to `appointments` can also drop `slots:` keys
/// through [`also_invalidate`](Self::also_invalidate), and [`scoped_by`](Self::scoped_by)
/// narrows that to the keys of the changed row's expert:
///
/// ```rust
/// use std::sync::Arc;
/// use silk_spark_core::{CacheConfig, QueryCache, QueryCacheHandler};
///
/// let cache = Arc::new(QueryCache::new(CacheConfig::new()));
/// // An appointment for expert E drops `appointments:E:*` and `slots:E:*` only.
/// let handler = QueryCacheHandler::new("appointments", cache)
///     .also_invalidate("slots:")
///     .scoped_by("expert_id");
/// ```
pub struct QueryCacheHandler {
    table_name: String,
    key_prefixes: Vec<String>,
    scope_column: Option<String>,
    cache: Arc<QueryCache>,
}

impl QueryCacheHandler {
    /// Handler using `"<table>:"` as its key prefix
    pub fn new(table_name: impl Into<String>, cache: Arc<QueryCache>) -> Self {
        let table_name = table_name.into();
        let key_prefix = format!("{table_name}:");
        Self::with_prefix(table_name, key_prefix, cache)
    }

    pub fn with_prefix(
        table_name: impl Into<String>,
        key_prefix: impl Into<String>,
        cache: Arc<QueryCache>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            key_prefixes: vec![key_prefix.into()],
            scope_column: None,
            cache,
        }
    }

    /// Also drops keys under `key_prefix` when the table changes
    pub fn also_invalidate(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefixes.push(key_prefix.into());
        self
    }

    /// Drops only `"<prefix><value>:"` keys, where `value` is the changed row's `column`.
    ///
    /// Updates always drop whole prefixes, since the old row may belong to another scope.
    pub fn scoped_by(mut self, column: impl Into<String>) -> Self {
        self.scope_column = Some(column.into());
        self
    }

    /// The key prefixes a notification invalidates
    pub fn prefixes_for(&self, notification: &CacheNotification) -> Vec<String> {
        let scope = match (notification.action, &self.scope_column) {
            (ChangeAction::Insert | ChangeAction::Delete, Some(column)) => {
                notification.column(column)
            }
            _ => None,
        };
        match scope {
            Some(value) => self
                .key_prefixes
                .iter()
                .map(|prefix| format!("{prefix}{value}:"))
                .collect(),
            None => self.key_prefixes.clone(),
        }
    }
}

#[async_trait]
impl CacheNotificationHandler for QueryCacheHandler {
    async fn handle_notification(&self, notification: CacheNotification) {
        if notification.action == ChangeAction::Other {
            warn!(
                "Ignoring unknown change on '{}' row {}",
                notification.table, notification.id
            );
            return;
        }

        for prefix in self.prefixes_for(&notification) {
            let removed = self.cache.invalidate_prefix(&prefix);
            debug!(
                "Dropped {} cached queries under '{}' after {:?} on '{}'",
                removed, prefix, notification.action, notification.table
            );
        }
    }

    fn table_name(&self) -> &str {
        &self.table_name
    }
}

/// Routes Postgres change notifications to the cache handler of the changed table
pub struct CacheNotificationListener {
    handlers: HashMap<String, Arc<dyn CacheNotificationHandler>>,
    channel: String,
    reconnect_delay: Duration,
}

impl CacheNotificationListener {
    pub fn new() -> Self {
        Self::with_channel(DEFAULT_CACHE_CHANNEL)
    }

    pub fn with_channel(channel: impl Into<String>) -> Self {
        Self {
            handlers: HashMap::new(),
            channel: channel.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Registers a handler, replacing any earlier one for the same table
    pub fn register_handler(&mut self, handler: Arc<dyn CacheNotificationHandler>) {
        let table_name = handler.table_name().to_string();
        debug!("Registering cache handler for table '{}'", table_name);
        self.handlers.insert(table_name, handler);
    }

    /// Shorthand for registering a [`QueryCacheHandler::new`] for `table`
    pub fn watch(&mut self, table: &str, cache: Arc<QueryCache>) {
        self.register_handler(Arc::new(QueryCacheHandler::new(table, cache)));
    }

    pub fn is_watching(&self, table: &str) -> bool {
        self.handlers.contains_key(table)
    }

    /// Dispatches one raw payload, e.g. from your own polling loop.
    /// Malformed payloads and unwatched tables are logged and skipped.
    pub async fn process_notification(&self, payload: &str) {
        let notification = match serde_json::from_str::<CacheNotification>(payload) {
            Ok(notification) => notification,
            Err(e) => {
                error!("Failed to parse cache notification: {}", e);
                debug!("Payload was: {}", payload);
                return;
            }
        };
        match self.handlers.get(&notification.table) {
            Some(handler) => handler.handle_notification(notification).await,
            None => debug!("No cache handler for table '{}'", notification.table),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    /// Listens on the channel and dispatches every notification.
    ///
    /// Waits [`reconnect_delay`](Self::reconnect_delay) and reconnects when the
    /// connection drops. Runs until re-subscribing fails, so spawn it.
    ///
    /// # Errors
    ///
    /// Returns an error if the first connection or `LISTEN` fails.
    #[cfg(feature = "postgres")]
    pub async fn listen(&self, pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
        let mut listener = self.subscribe(pool).await?;
        debug!("Listening for cache notifications on '{}'", self.channel);

        loop {
            match listener.recv().await {
                Ok(notification) => self.process_notification(notification.payload()).await,
                Err(e) => {
                    error!("Lost cache notification connection: {}", e);
                    tokio::time::sleep(self.reconnect_delay).await;

                    match sqlx::postgres::PgListener::connect_with(pool).await {
                        Ok(new_listener) => {
                            listener = new_listener;
                            if let Err(listen_err) = listener.listen(&self.channel).await {
                                error!(
                                    "Failed to re-listen on channel '{}': {}",
                                    self.channel, listen_err
                                );
                                return Err(listen_err);
                            }
                            debug!("Reconnected to cache channel '{}'", self.channel);
                        }
                        Err(connect_err) => {
                            warn!("Reconnect failed, retrying: {}", connect_err);
                        }
                    }
                }
            }
        }
    }

    #[cfg(feature = "postgres")]
    async fn subscribe(
        &self,
        pool: &sqlx::PgPool,
    ) -> Result<sqlx::postgres::PgListener, sqlx::Error> {
        let mut listener = sqlx::postgres::PgListener::connect_with(pool).await?;
        listener.listen(&self.channel).await?;
        Ok(listener)
    }
}

impl Default for CacheNotificationListener {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_cache::CacheConfig;
    use serde_json::json;

    fn notification(table: &str, action: ChangeAction, data: Option<Value>) -> CacheNotification {
        CacheNotification {
            table: table.to_string(),
            action,
            id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
            data,
        }
    }

    #[test]
    fn test_payload_parsing() {
        let parsed: CacheNotification =
            serde_json::from_str(r#"{"table":"products","action":"delete","id":"7"}"#).unwrap();
        assert_eq!(parsed.action, ChangeAction::Delete);
        assert!(parsed.data.is_none());

        let truncate: CacheNotification =
            serde_json::from_str(r#"{"table":"products","action":"truncate","id":"7"}"#).unwrap();
        assert_eq!(truncate.action, ChangeAction::Other);

        let json = serde_json::to_string(&parsed).unwrap();
        assert!(!json.contains("data"));
    }

    #[test]
    fn test_scoped_prefixes() {
        let cache = Arc::new(QueryCache::new(CacheConfig::new()));
        let handler = QueryCacheHandler::new("appointments", cache)
            .also_invalidate("slots:")
            .scoped_by("expert_id");
        let row = json!({"expert_id": "e1", "booked_at": "2025-06-02T11:00:00"});

        let insert = notification("appointments", ChangeAction::Insert, Some(row.clone()));
        assert_eq!(
            handler.prefixes_for(&insert),
            vec!["appointments:e1:".to_string(), "slots:e1:".to_string()]
        );

        let update = notification("appointments", ChangeAction::Update, Some(row));
        assert_eq!(
            handler.prefixes_for(&update),
            vec!["appointments:".to_string(), "slots:".to_string()]
        );

        // Trigger dropped the row data
        let bare = notification("appointments", ChangeAction::Delete, None);
        assert_eq!(handler.prefixes_for(&bare).len(), 2);
        assert_eq!(handler.prefixes_for(&bare)[1], "slots:");
    }

    #[tokio::test]
    async fn test_unknown_action_keeps_entries() {
        let cache = Arc::new(QueryCache::new(CacheConfig::new()));
        cache.insert("products:featured", vec![]);
        let handler = QueryCacheHandler::new("products", cache.clone());

        handler
            .handle_notification(notification("products", ChangeAction::Other, None))
            .await;

        assert!(cache.contains("products:featured"));
    }

    #[test]
    fn test_listener_configuration() {
        let cache = Arc::new(QueryCache::new(CacheConfig::new()));
        let mut listener = CacheNotificationListener::with_channel("storefront_changes")
            .with_reconnect_delay(Duration::from_millis(250));
        listener.watch("experts", cache);

        assert_eq!(listener.channel(), "storefront_changes");
        assert_eq!(listener.reconnect_delay(), Duration::from_millis(250));
        assert!(listener.is_watching("experts"));
        assert!(!listener.is_watching("products"));
        assert_eq!(CacheNotificationListener::new().reconnect_delay(), DEFAULT_RECONNECT_DELAY);
    }
}
