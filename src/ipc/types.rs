use serde::Deserialize;
use tokio::sync::Mutex;

use crate::allocations::AllocationSelector;
use crate::dashboard::DashboardAggregator;
use crate::engine::MarksEngine;
use crate::shell::ViewRouter;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub store_mode: &'static str,
    pub teacher_id: String,
    pub engine: MarksEngine,
    pub allocations: Mutex<AllocationSelector>,
    pub dashboard: DashboardAggregator,
    pub views: Mutex<ViewRouter>,
}
