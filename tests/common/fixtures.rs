use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde_json::{json, Value};
use silk_spark_core::{
    ActorContext, ActorProvider, MemoryTableSource, Query, StoreError, StoreResult, TableSource,
};
use tokio::sync::{oneshot, Notify};
use uuid::Uuid;

/// 2025-06-02 is a Monday
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
}

#[allow(dead_code)]
pub fn availability_row(expert_id: Uuid, day_of_week: i32, start: &str, end: &str) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "expert_id": expert_id,
        "day_of_week": day_of_week,
        "start_time": start,
        "end_time": end,
        "is_available": true
    })
}

#[allow(dead_code)]
pub fn appointment_row(expert_id: Uuid, booked_at: &str) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "user_id": Uuid::new_v4(),
        "expert_id": expert_id,
        "booked_at": booked_at,
        "status": "confirmed"
    })
}

/// Holds the first select open until the returned sender fires.
///
/// The rows of that first select are read before it blocks, so it returns whatever the
/// table held at the time it started.
#[allow(dead_code)]
pub struct GatedSource {
    pub inner: MemoryTableSource,
    pub entered: Notify,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

#[allow(dead_code)]
impl GatedSource {
    pub fn new() -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let source = Self {
            inner: MemoryTableSource::new(),
            entered: Notify::new(),
            gate: Mutex::new(Some(rx)),
        };
        (source, tx)
    }
}

#[async_trait]
impl TableSource for GatedSource {
    async fn select(&self, query: &Query) -> StoreResult<Vec<Value>> {
        let rows = self.inner.select(query).await?;
        let gate = self.gate.lock().take();
        if let Some(rx) = gate {
            self.entered.notify_one();
            let _ = rx.await;
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> StoreResult<Value> {
        self.inner.insert(table, row).await
    }
}

/// Serves selects from a snapshot while inserts land in a separately populated table set,
/// like a reader that has not yet seen a concurrent writer's row.
#[allow(dead_code)]
pub struct SplitSource {
    pub reads: MemoryTableSource,
    pub writes: MemoryTableSource,
}

#[async_trait]
impl TableSource for SplitSource {
    async fn select(&self, query: &Query) -> StoreResult<Vec<Value>> {
        self.reads.select(query).await
    }

    async fn insert(&self, table: &str, row: Value) -> StoreResult<Value> {
        self.writes.insert(table, row).await
    }
}

/// Session lookup that always errors
#[allow(dead_code)]
pub struct FailingActor;

#[async_trait]
impl ActorProvider for FailingActor {
    async fn current_actor(&self) -> StoreResult<Option<ActorContext>> {
        Err(StoreError::Remote("session lookup failed".to_string()))
    }
}
