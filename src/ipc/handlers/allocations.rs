use std::time::Duration;

use serde_json::json;

use super::marks::snapshot_json;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::models::TeacherAllocation;

/// The local store answers in microseconds; the hosted one within a
/// couple of round trips. Past this we report the in-flight snapshot.
pub const WAIT_READY: Duration = Duration::from_secs(5);

fn allocation_json(a: &TeacherAllocation) -> serde_json::Value {
    json!({
        "id": a.id,
        "teacherId": a.teacher_id,
        "subjectId": a.subject_id,
        "streamId": a.stream_id,
        "academicYearId": a.academic_year_id,
        "subjectName": a.subject_name,
        "streamName": a.stream_name,
        "className": a.class_name,
        "yearName": a.year_name,
    })
}

async fn handle_list(state: &AppState, req: &Request) -> serde_json::Value {
    let teacher_id = req
        .params
        .get("teacherId")
        .and_then(|v| v.as_str())
        .unwrap_or(&state.teacher_id)
        .to_string();

    let (allocations, selected) = {
        let mut selector = state.allocations.lock().await;
        selector.load(&teacher_id).await;
        let allocations: Vec<serde_json::Value> =
            selector.list().iter().map(allocation_json).collect();
        (allocations, selector.selected().cloned())
    };

    // First allocation is the default selection; point the engine at it
    // so the grid is ready when the chrome asks for the roster.
    if let Some(alloc) = &selected {
        state.engine.select_allocation(alloc.clone()).await;
        state.engine.wait_ready(WAIT_READY).await;
    }

    ok(
        &req.id,
        json!({
            "allocations": allocations,
            "selectedId": selected.map(|a| a.id),
        }),
    )
}

async fn handle_select(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(allocation_id) = req.params.get("allocationId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing allocationId", None);
    };

    let picked = {
        let mut selector = state.allocations.lock().await;
        selector.select(allocation_id)
    };
    let Some(allocation) = picked else {
        return err(
            &req.id,
            "not_found",
            "no such allocation",
            Some(json!({ "allocationId": allocation_id })),
        );
    };

    state.engine.select_allocation(allocation).await;
    state.engine.wait_ready(WAIT_READY).await;
    let snapshot = state.engine.snapshot().await;

    ok(
        &req.id,
        json!({
            "selectedId": allocation_id,
            "roster": snapshot_json(&snapshot),
        }),
    )
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "allocations.list" => Some(handle_list(state, req).await),
        "allocations.select" => Some(handle_select(state, req).await),
        _ => None,
    }
}
