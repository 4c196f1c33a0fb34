//! Installs the `notify_cache_change()` trigger function and attaches it to the tables
//! whose cached queries a [`CacheNotificationListener`](crate::CacheNotificationListener)
//! should drop.

use sqlx::PgPool;

use crate::error::StoreResult;
use crate::query::validate_identifier;

/// Creates or replaces `notify_cache_change()`. Safe to run on every start.
///
/// # Example
///
/// ```rust,no_run
/// use sqlx::PgPool;
/// use silk_spark_core::{init_cache_triggers, watch_table};
///
/// # async fn example(pool: &PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// init_cache_triggers(pool).await?;
/// for table in ["products", "experts", "appointments"] {
///     watch_table(pool, table).await?;
/// }
/// # Ok(())
/// # }
/// ```
pub async fn init_cache_triggers(pool: &PgPool) -> Result<(), sqlx::Error> {
    const SQL: &str = include_str!("../sql/cache_notification_triggers.sql");
    sqlx::raw_sql(SQL).execute(pool).await?;
    Ok(())
}

/// Drops the trigger function together with every table trigger using it
pub async fn cleanup_cache_triggers(pool: &PgPool) -> Result<(), sqlx::Error> {
    const SQL: &str = include_str!("../cleanup/cleanup_cache_notification_triggers.sql");
    sqlx::raw_sql(SQL).execute(pool).await?;
    Ok(())
}

/// Name of the row trigger [`watch_table`] attaches to `table`
pub fn trigger_name(table: &str) -> String {
    format!("{table}_cache_notify")
}

/// Makes every row change on `table` publish a cache notification.
/// Requires [`init_cache_triggers`] to have run.
pub async fn watch_table(pool: &PgPool, table: &str) -> StoreResult<()> {
    validate_identifier(table)?;
    let sql = format!(
        "CREATE OR REPLACE TRIGGER \"{}\" AFTER INSERT OR UPDATE OR DELETE ON \"{}\" \
         FOR EACH ROW EXECUTE FUNCTION notify_cache_change()",
        trigger_name(table),
        table
    );
    sqlx::raw_sql(&sql).execute(pool).await?;
    tracing::debug!("Watching '{}' for cache invalidation", table);
    Ok(())
}

pub async fn unwatch_table(pool: &PgPool, table: &str) -> StoreResult<()> {
    validate_identifier(table)?;
    let sql = format!("DROP TRIGGER IF EXISTS \"{}\" ON \"{}\"", trigger_name(table), table);
    sqlx::raw_sql(&sql).execute(pool).await?;
    Ok(())
}
