use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::query::{Filter, FilterOp, FilterValue, Query};

/// A remote tabular data source rows are selected from and inserted into
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Runs a select and returns the raw rows as JSON objects
    async fn select(&self, query: &Query) -> StoreResult<Vec<Value>>;

    /// Inserts one row and returns it as stored
    async fn insert(&self, table: &str, row: Value) -> StoreResult<Value>;
}

/// Decodes raw rows into a typed schema, failing on the first row that does not match.
pub fn decode_rows<T: DeserializeOwned>(table: &str, rows: Vec<Value>) -> StoreResult<Vec<T>> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|e| StoreError::Decode {
                table: table.to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}

/// In-process table source holding JSON rows per table
#[derive(Debug, Default)]
pub struct MemoryTableSource {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    unique: RwLock<HashMap<String, Vec<Vec<String>>>>,
    select_calls: AtomicU64,
    failure: RwLock<Option<String>>,
}

impl MemoryTableSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the rows of a table
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.tables.write().insert(table.to_string(), rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Rejects inserts whose values in `columns` match an existing row of `table`
    pub fn unique(&self, table: &str, columns: &[&str]) {
        self.unique
            .write()
            .entry(table.to_string())
            .or_default()
            .push(columns.iter().map(|c| c.to_string()).collect());
    }

    /// Number of selects served so far
    pub fn select_calls(&self) -> u64 {
        self.select_calls.load(Ordering::Relaxed)
    }

    /// Makes every following request fail with the given message
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    pub fn recover(&self) {
        *self.failure.write() = None;
    }

    fn check_failure(&self) -> StoreResult<()> {
        match self.failure.read().as_ref() {
            Some(message) => Err(StoreError::Remote(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TableSource for MemoryTableSource {
    async fn select(&self, query: &Query) -> StoreResult<Vec<Value>> {
        self.select_calls.fetch_add(1, Ordering::Relaxed);
        query.validate()?;
        self.check_failure()?;

        let mut rows: Vec<Value> = self
            .tables
            .read()
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| matches_filter(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = compare_json(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit as usize);
        }

        debug!("Memory select on '{}' returned {} rows", query.table, rows.len());
        Ok(rows)
    }

    async fn insert(&self, table: &str, mut row: Value) -> StoreResult<Value> {
        crate::query::validate_identifier(table)?;
        self.check_failure()?;

        if let Value::Object(map) = &mut row {
            map.entry("id")
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        }

        let mut tables = self.tables.write();
        let rows = tables.entry(table.to_string()).or_default();
        if let Some(constraints) = self.unique.read().get(table) {
            for columns in constraints {
                if rows.iter().any(|existing| same_key(existing, &row, columns)) {
                    return Err(StoreError::Conflict(format!(
                        "duplicate ({}) in '{}'",
                        columns.join(", "),
                        table
                    )));
                }
            }
        }
        rows.push(row.clone());
        Ok(row)
    }
}

// Nulls never collide, as in SQL.
fn same_key(a: &Value, b: &Value, columns: &[String]) -> bool {
    columns.iter().all(|column| match (a.get(column), b.get(column)) {
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (parse_wall_clock(x), parse_wall_clock(y)) {
                (Some(tx), Some(ty)) => tx == ty,
                _ => x == y,
            }
        }
        (Some(x), Some(y)) => !x.is_null() && x == y,
        _ => false,
    })
}

fn matches_filter(row: &Value, filter: &Filter) -> bool {
    let Some(cell) = row.get(&filter.column) else {
        return false;
    };
    match compare_cell(cell, &filter.value) {
        Some(ordering) => match filter.op {
            FilterOp::Eq => ordering == CmpOrdering::Equal,
            FilterOp::Gte => ordering != CmpOrdering::Less,
            FilterOp::Lt => ordering == CmpOrdering::Less,
        },
        None => false,
    }
}

fn compare_cell(cell: &Value, value: &FilterValue) -> Option<CmpOrdering> {
    match value {
        FilterValue::Text(text) => cell.as_str().map(|s| s.cmp(text.as_str())),
        FilterValue::Int(int) => cell.as_i64().map(|i| i.cmp(int)),
        FilterValue::Bool(flag) => cell.as_bool().map(|b| b.cmp(flag)),
        FilterValue::Uuid(id) => cell
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(|u| u.cmp(id)),
        FilterValue::Timestamp(ts) => cell.as_str().and_then(parse_wall_clock).map(|t| t.cmp(ts)),
    }
}

/// Reads a timestamp as wall-clock time, dropping any offset without converting.
pub(crate) fn parse_wall_clock(raw: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_local())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

// Nulls and missing values sort last.
fn compare_json(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => CmpOrdering::Equal,
        (None | Some(Value::Null), _) => CmpOrdering::Greater,
        (_, None | Some(Value::Null)) => CmpOrdering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (parse_wall_clock(x), parse_wall_clock(y)) {
                (Some(tx), Some(ty)) => tx.cmp(&ty),
                _ => x.cmp(y),
            }
        }
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => CmpOrdering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde::Deserialize;
    use serde_json::json;

    fn products() -> Vec<Value> {
        vec![
            json!({"id": "a", "name": "Rose Quartz", "price": 25, "is_active": true}),
            json!({"id": "b", "name": "Amethyst", "price": 40, "is_active": true}),
            json!({"id": "c", "name": "Tarot Deck", "price": 18, "is_active": false}),
        ]
    }

    #[tokio::test]
    async fn test_select_filters_orders_and_limits() {
        let source = MemoryTableSource::new();
        source.seed("products", products());

        let query = Query::table("products")
            .eq("is_active", true)
            .order_by("price", false)
            .limit(1);
        let rows = source.select(&query).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Amethyst");
        assert_eq!(source.select_calls(), 1);
    }

    #[tokio::test]
    async fn test_timestamp_range_filter() {
        let source = MemoryTableSource::new();
        source.seed(
            "appointments",
            vec![
                json!({"id": "1", "booked_at": "2025-06-02T11:00:00+00:00"}),
                json!({"id": "2", "booked_at": "2025-06-03T09:00:00+00:00"}),
            ],
        );
        let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let query = Query::table("appointments")
            .gte("booked_at", day.and_hms_opt(0, 0, 0).unwrap())
            .lt("booked_at", day.succ_opt().unwrap().and_hms_opt(0, 0, 0).unwrap());

        let rows = source.select(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "1");
    }

    #[tokio::test]
    async fn test_failure_mode_and_recovery() {
        let source = MemoryTableSource::new();
        source.fail_with("connection reset");

        let err = source.select(&Query::table("products")).await.unwrap_err();
        assert_eq!(err, StoreError::Remote("connection reset".to_string()));

        source.recover();
        assert!(source.select(&Query::table("products")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_assigns_id() {
        let source = MemoryTableSource::new();
        let stored = source
            .insert("tags", json!({"name": "crystals"}))
            .await
            .unwrap();
        assert!(stored["id"].is_string());
        assert_eq!(source.rows("tags").len(), 1);
    }

    #[tokio::test]
    async fn test_unique_columns_reject_duplicates() {
        let source = MemoryTableSource::new();
        source.unique("appointments", &["expert_id", "booked_at"]);

        source
            .insert("appointments", json!({"expert_id": "e1", "booked_at": "2025-06-02T11:00:00"}))
            .await
            .unwrap();
        let err = source
            .insert(
                "appointments",
                json!({"expert_id": "e1", "booked_at": "2025-06-02T11:00:00+00:00"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        source
            .insert("appointments", json!({"expert_id": "e2", "booked_at": "2025-06-02T11:00:00"}))
            .await
            .unwrap();
        assert_eq!(source.rows("appointments").len(), 2);
    }

    #[test]
    fn test_decode_rows_reports_table() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Product {
            id: String,
            price: i64,
        }

        let err = decode_rows::<Product>("products", vec![json!({"id": "a", "price": "free"})])
            .unwrap_err();
        assert!(matches!(err, StoreError::Decode { ref table, .. } if table == "products"));

        let ok = decode_rows::<Product>("products", vec![json!({"id": "a", "price": 3})]).unwrap();
        assert_eq!(ok[0].price, 3);
    }
}
