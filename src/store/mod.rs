pub mod local;
pub mod remote;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(String),
    #[error("store returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("could not decode store response: {0}")]
    Decode(String),
    #[error("database error: {0}")]
    Db(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Transport(e.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Db(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}

/// Equality filter on one column. The store surface only ever needs
/// `eq`; range scans stay server-side.
#[derive(Debug, Clone)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Loose match against a row, tolerating sqlite's integer booleans.
    pub fn matches(&self, row: &Value) -> bool {
        let Some(cell) = row.get(&self.column) else {
            return false;
        };
        if cell == &self.value {
            return true;
        }
        match (&self.value, cell) {
            (Value::Bool(b), Value::Number(n)) => n.as_i64() == Some(i64::from(*b)),
            (Value::Number(n), Value::Bool(b)) => n.as_i64() == Some(i64::from(*b)),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Order {
            column: column.into(),
            ascending: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One realtime notification: a row changed in a watched table.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: String,
    pub op: ChangeOp,
    pub row: Value,
}

impl ChangeEvent {
    pub fn row_id(&self) -> Option<&str> {
        self.row.get("id").and_then(|v| v.as_str())
    }
}

/// Live change feed for one table (optionally one filter). Dropping the
/// handle tears the feed down; a leaked handle would keep its pump task
/// alive, so holders must drop it on reselect.
pub struct Subscription {
    rx: mpsc::Receiver<ChangeEvent>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<ChangeEvent>, task: JoinHandle<()>) -> Self {
        Subscription { rx, task }
    }

    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Remote relational store surface. Exactly the operations the portal
/// consumes: filtered/ordered reads, count-only reads, insert returning
/// the stored row, update by identifier, and table-change subscription.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        order: Option<&Order>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>, StoreError>;

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError>;

    /// Insert one row and return the stored representation (with the
    /// generated identifier).
    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError>;

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<(), StoreError>;

    fn subscribe(&self, table: &str, filter: Option<Filter>) -> Subscription;
}

/// Decode rows into typed models, skipping (and logging) rows the
/// schema does not recognize rather than failing the whole read.
pub fn decode_rows<T: DeserializeOwned>(table: &str, rows: Vec<Value>) -> Vec<T> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_value::<T>(row) {
            Ok(v) => out.push(v),
            Err(e) => warn!(table, error = %e, "dropping undecodable row"),
        }
    }
    out
}
