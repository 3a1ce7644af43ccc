use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::{Filter, Gateway};

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub students: u64,
    pub marks_entered: u64,
    pub discipline_cases: u64,
}

/// Overview counters for the dashboard view. Three independent count
/// reads; a failing read keeps that statistic at its last known value
/// while the other two still refresh. Re-counts whenever the store
/// reports a change to students or marks.
pub struct DashboardAggregator {
    store: Arc<dyn Gateway>,
    stats: Arc<Mutex<DashboardStats>>,
    pumps: Vec<JoinHandle<()>>,
}

impl DashboardAggregator {
    pub fn new(store: Arc<dyn Gateway>) -> Self {
        DashboardAggregator {
            store,
            stats: Arc::new(Mutex::new(DashboardStats::default())),
            pumps: Vec::new(),
        }
    }

    /// Initial count plus change-feed watchers on students and marks.
    pub async fn start(&mut self) {
        self.refresh().await;
        for table in ["students", "marks"] {
            let mut subscription = self.store.subscribe(table, None);
            let store = Arc::clone(&self.store);
            let stats = Arc::clone(&self.stats);
            self.pumps.push(tokio::spawn(async move {
                while let Some(ev) = subscription.next().await {
                    debug!(table = %ev.table, "dashboard refresh on change");
                    refresh_into(&store, &stats).await;
                }
            }));
        }
    }

    pub async fn refresh(&self) {
        refresh_into(&self.store, &self.stats).await;
    }

    pub async fn stats(&self) -> DashboardStats {
        *self.stats.lock().await
    }
}

impl Drop for DashboardAggregator {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

async fn refresh_into(store: &Arc<dyn Gateway>, stats: &Arc<Mutex<DashboardStats>>) {
    let students = store
        .count("students", &[Filter::eq("is_active", true)])
        .await;
    let marks = store.count("marks", &[]).await;
    let cases = store.count("discipline_cases", &[]).await;

    let mut stats = stats.lock().await;
    match students {
        Ok(n) => stats.students = n,
        Err(e) => warn!(error = %e, "student count failed"),
    }
    match marks {
        Ok(n) => stats.marks_entered = n,
        Err(e) => warn!(error = %e, "marks count failed"),
    }
    match cases {
        Ok(n) => stats.discipline_cases = n,
        Err(e) => warn!(error = %e, "discipline count failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChangeEvent, ChangeOp, Order, StoreError, Subscription};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::{broadcast, mpsc};

    /// Count-only store with per-table failure injection.
    struct CountingGateway {
        counts: StdMutex<HashMap<&'static str, u64>>,
        failing: StdMutex<Vec<&'static str>>,
        changes: broadcast::Sender<ChangeEvent>,
    }

    impl CountingGateway {
        fn new() -> Arc<Self> {
            let (changes, _) = broadcast::channel(16);
            Arc::new(CountingGateway {
                counts: StdMutex::new(HashMap::new()),
                failing: StdMutex::new(Vec::new()),
                changes,
            })
        }

        fn set(&self, table: &'static str, n: u64) {
            self.counts.lock().unwrap().insert(table, n);
        }
    }

    #[async_trait::async_trait]
    impl Gateway for CountingGateway {
        async fn select(
            &self,
            _table: &str,
            _filters: &[Filter],
            _order: Option<&Order>,
            _limit: Option<u32>,
        ) -> Result<Vec<Value>, StoreError> {
            Ok(Vec::new())
        }

        async fn count(&self, table: &str, _filters: &[Filter]) -> Result<u64, StoreError> {
            if self.failing.lock().unwrap().iter().any(|t| *t == table) {
                return Err(StoreError::Transport("injected count failure".into()));
            }
            Ok(*self.counts.lock().unwrap().get(table).unwrap_or(&0))
        }

        async fn insert(&self, _table: &str, _row: Value) -> Result<Value, StoreError> {
            Ok(json!({}))
        }

        async fn update(&self, _table: &str, _id: &str, _patch: Value) -> Result<(), StoreError> {
            Ok(())
        }

        fn subscribe(&self, table: &str, _filter: Option<Filter>) -> Subscription {
            let mut bus = self.changes.subscribe();
            let (tx, rx) = mpsc::channel(16);
            let table = table.to_string();
            let task = tokio::spawn(async move {
                while let Ok(ev) = bus.recv().await {
                    if ev.table == table && tx.send(ev).await.is_err() {
                        break;
                    }
                }
            });
            Subscription::new(rx, task)
        }
    }

    #[tokio::test]
    async fn count_failures_stay_isolated_per_statistic() {
        let store = CountingGateway::new();
        store.set("students", 1240);
        store.set("marks", 310);
        store.set("discipline_cases", 8);

        let mut dash = DashboardAggregator::new(Arc::clone(&store) as Arc<dyn Gateway>);
        dash.start().await;
        let stats = dash.stats().await;
        assert_eq!(
            (stats.students, stats.marks_entered, stats.discipline_cases),
            (1240, 310, 8)
        );

        // One counter breaking must not zero the others, nor itself.
        store.failing.lock().unwrap().push("marks");
        store.set("students", 1252);
        dash.refresh().await;
        let stats = dash.stats().await;
        assert_eq!(stats.students, 1252);
        assert_eq!(stats.marks_entered, 310);
        assert_eq!(stats.discipline_cases, 8);
    }

    #[tokio::test]
    async fn change_notifications_trigger_recount() {
        let store = CountingGateway::new();
        store.set("students", 10);
        let mut dash = DashboardAggregator::new(Arc::clone(&store) as Arc<dyn Gateway>);
        dash.start().await;
        assert_eq!(dash.stats().await.students, 10);

        store.set("students", 11);
        let _ = store.changes.send(ChangeEvent {
            table: "students".into(),
            op: ChangeOp::Insert,
            row: json!({ "id": "stu-new" }),
        });

        for _ in 0..200 {
            if dash.stats().await.students == 11 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("dashboard never recounted after change notification");
    }
}
