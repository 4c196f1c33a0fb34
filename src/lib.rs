//! # Silk & Spark Core
//!
//! Data-access core behind the Silk & Spark storefront and admin console: typed queries
//! over a tabular backend with an explicit TTL cache, booking slot availability for
//! experts, and a best-effort audit trail for admin actions.
//!
//! ## Key Components
//!
//! - `QueryCache`: Shared keyed cache of raw row sets with TTL, key and prefix invalidation
//! - `QueryHandle`: Typed query with loading/error state, cache-first fetch and `refetch`
//! - `TransactionAwareQueryCache`: Stages invalidations until a unit of work commits
//! - `SlotCalculator`: Free hourly slots per expert and day, plus booking
//! - `AuditLogger`: Records admin actions without ever failing the action itself
//! - `TableSource`: The backend seam, with in-memory and Postgres implementations

mod audit;
mod availability;
mod error;
mod listener;
mod query;
mod query_cache;
mod query_handle;
mod source;
mod transaction_aware_cache;

#[cfg(feature = "postgres")]
mod db_init;
#[cfg(feature = "postgres")]
mod pg_source;

pub use error::{StoreError, StoreResult};
pub use query::{validate_identifier, Filter, FilterOp, FilterValue, Order, Query};
pub use query_cache::{CacheConfig, CacheStatistics, QueryCache, DEFAULT_TTL};
pub use query_handle::{ErrorCallback, QueryHandle, QueryOptions, QueryState, Transform};
pub use source::{decode_rows, MemoryTableSource, TableSource};
pub use transaction_aware_cache::TransactionAwareQueryCache;

pub use availability::{
    free_slots, hour_label, parse_hour, weekday_index, Appointment, AvailabilityRule,
    SlotCalculator, TimeSlot, APPOINTMENTS_TABLE, AVAILABILITY_TABLE,
};
pub use audit::{
    ActorContext, ActorProvider, AuditAction, AuditEvent, AuditLogEntry, AuditLogger,
    AuditOutcome, NewAuditLogEntry, StaticActor, AUDIT_TABLE,
};

// Re-export listener components
pub use listener::{
    CacheNotification,
    CacheNotificationHandler,
    CacheNotificationListener,
    ChangeAction,
    QueryCacheHandler,
    DEFAULT_CACHE_CHANNEL,
    DEFAULT_RECONNECT_DELAY,
};

#[cfg(feature = "postgres")]
pub use db_init::{
    cleanup_cache_triggers, init_cache_triggers, trigger_name, unwatch_table, watch_table,
};
#[cfg(feature = "postgres")]
pub use pg_source::{build_select, PgTableSource};

// Re-export TransactionAware from postgres-unit-of-work for convenience
pub use postgres_unit_of_work::TransactionAware;
