//! PostgreSQL-backed table source
//!
//! Rows are selected as `to_jsonb(t)` so the typed schemas in this crate decode them the
//! same way they decode rows from any other [`TableSource`].

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::query::{validate_identifier, FilterValue, Query};
use crate::source::TableSource;

/// A [`TableSource`] reading from and writing to a Postgres pool
#[derive(Debug, Clone)]
pub struct PgTableSource {
    pool: PgPool,
}

impl PgTableSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Builds the select for a query. Every value goes through a bind parameter.
pub fn build_select(query: &Query) -> StoreResult<QueryBuilder<'static, Postgres>> {
    query.validate()?;

    let mut builder = QueryBuilder::new("SELECT to_jsonb(t) AS row FROM ");
    builder.push(format!("\"{}\" t", query.table));

    for (i, filter) in query.filters.iter().enumerate() {
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        builder.push(format!("t.\"{}\" {} ", filter.column, filter.op.as_sql()));
        push_value(&mut builder, filter.value.clone());
    }

    if let Some(order) = &query.order {
        builder.push(format!(
            " ORDER BY t.\"{}\" {}",
            order.column,
            if order.ascending { "ASC" } else { "DESC" }
        ));
    }

    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(i64::from(limit));
    }

    Ok(builder)
}

fn push_value(builder: &mut QueryBuilder<'static, Postgres>, value: FilterValue) {
    match value {
        FilterValue::Text(text) => builder.push_bind(text),
        FilterValue::Int(int) => builder.push_bind(int),
        FilterValue::Bool(flag) => builder.push_bind(flag),
        FilterValue::Uuid(id) => builder.push_bind(id),
        FilterValue::Timestamp(ts) => builder.push_bind(ts),
    };
}

#[async_trait]
impl TableSource for PgTableSource {
    async fn select(&self, query: &Query) -> StoreResult<Vec<Value>> {
        let mut builder = build_select(query)?;
        let rows = builder.build().fetch_all(&self.pool).await?;
        debug!("Postgres select on '{}' returned {} rows", query.table, rows.len());

        rows.iter()
            .map(|row| row.try_get::<Value, _>("row").map_err(StoreError::from))
            .collect()
    }

    async fn insert(&self, table: &str, row: Value) -> StoreResult<Value> {
        validate_identifier(table)?;
        let columns: Vec<String> = match &row {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => {
                return Err(StoreError::Remote(format!(
                    "Insert into '{table}' expects a JSON object"
                )))
            }
        };
        for column in &columns {
            validate_identifier(column)?;
        }

        let column_list = columns
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");

        // Absent columns keep their database defaults.
        let mut builder: QueryBuilder<'static, Postgres> = QueryBuilder::new(format!(
            "INSERT INTO \"{table}\" AS t ({column_list}) \
             SELECT {column_list} FROM jsonb_populate_record(NULL::\"{table}\", "
        ));
        builder.push_bind(row);
        builder.push(") RETURNING to_jsonb(t) AS row");

        let stored = builder.build().fetch_one(&self.pool).await?;
        Ok(stored.try_get::<Value, _>("row")?)
    }
}
