use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::shell::ActiveView;

async fn handle_nav(state: &AppState, req: &Request) -> serde_json::Value {
    let current = state.views.lock().await.current();
    let items: Vec<serde_json::Value> = ActiveView::all()
        .iter()
        .map(|v| {
            json!({
                "id": v,
                "label": v.label(),
                "built": v.is_built(),
            })
        })
        .collect();
    ok(&req.id, json!({ "items": items, "current": current }))
}

async fn handle_view_get(state: &AppState, req: &Request) -> serde_json::Value {
    let current = state.views.lock().await.current();
    ok(&req.id, json!({ "view": current }))
}

async fn handle_view_set(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(view) = req.params.get("view") else {
        return err(&req.id, "bad_params", "missing view", None);
    };
    let view: ActiveView = match serde_json::from_value(view.clone()) {
        Ok(v) => v,
        Err(_) => {
            return err(
                &req.id,
                "bad_params",
                "unknown view",
                Some(json!({ "view": view })),
            )
        }
    };
    state.views.lock().await.set(view);
    ok(&req.id, json!({ "view": view, "built": view.is_built() }))
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "ui.nav" => Some(handle_nav(state, req).await),
        "ui.view.get" => Some(handle_view_get(state, req).await),
        "ui.view.set" => Some(handle_view_set(state, req).await),
        _ => None,
    }
}
