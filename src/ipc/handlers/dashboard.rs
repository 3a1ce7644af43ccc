use serde_json::json;

use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};

async fn handle_stats(state: &AppState, req: &Request) -> serde_json::Value {
    let stats = state.dashboard.stats().await;
    ok(
        &req.id,
        serde_json::to_value(stats).unwrap_or_else(|_| json!({})),
    )
}

/// Pull-to-refresh for the overview cards; the change feed usually gets
/// there first.
async fn handle_refresh(state: &AppState, req: &Request) -> serde_json::Value {
    state.dashboard.refresh().await;
    handle_stats(state, req).await
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.stats" => Some(handle_stats(state, req).await),
        "dashboard.refresh" => Some(handle_refresh(state, req).await),
        _ => None,
    }
}
