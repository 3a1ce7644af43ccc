use serde_json::json;

use crate::engine::{CommentOutcome, EngineError, RosterSnapshot};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

pub fn snapshot_json(snapshot: &RosterSnapshot) -> serde_json::Value {
    serde_json::to_value(snapshot).unwrap_or_else(|_| json!({}))
}

fn engine_err(id: &str, e: EngineError) -> serde_json::Value {
    match e {
        EngineError::ScoreOutOfRange(score) => err(
            id,
            "bad_params",
            "score must be between 0 and 100",
            Some(json!({ "score": score })),
        ),
        EngineError::UnknownStudent(student_id) => err(
            id,
            "not_found",
            "student is not on the current roster",
            Some(json!({ "studentId": student_id })),
        ),
        EngineError::NoAllocation => err(id, "no_allocation", "select a class first", None),
    }
}

async fn handle_roster(state: &AppState, req: &Request) -> serde_json::Value {
    let snapshot = state.engine.snapshot().await;
    ok(&req.id, snapshot_json(&snapshot))
}

async fn handle_enter(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(score) = req.params.get("score").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing/invalid score", None);
    };

    match state.engine.enter_score(student_id, score).await {
        Ok(()) => ok(
            &req.id,
            json!({
                "studentId": student_id,
                "grade": crate::grades::grade_label(Some(score)),
            }),
        ),
        Err(e) => engine_err(&req.id, e),
    }
}

async fn handle_save(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    match state.engine.save_student(student_id).await {
        Ok(Some(outcome)) => {
            let outcome = serde_json::to_value(&outcome).unwrap_or_else(|_| json!({}));
            ok(&req.id, json!({ "outcome": outcome }))
        }
        // Nothing entered yet; blur on an empty cell is a no-op.
        Ok(None) => ok(&req.id, json!({ "outcome": serde_json::Value::Null })),
        Err(e) => engine_err(&req.id, e),
    }
}

async fn handle_save_all(state: &AppState, req: &Request) -> serde_json::Value {
    match state.engine.save_all().await {
        Ok(outcomes) => {
            let saved = outcomes.iter().filter(|o| o.ok).count();
            let failed = outcomes.len() - saved;
            let outcomes = serde_json::to_value(&outcomes).unwrap_or_else(|_| json!([]));
            ok(
                &req.id,
                json!({
                    "saved": saved,
                    "failed": failed,
                    "outcomes": outcomes,
                }),
            )
        }
        Err(e) => engine_err(&req.id, e),
    }
}

async fn handle_comment(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    match state.engine.request_comment(student_id).await {
        Ok(CommentOutcome::Suggestion(text)) => ok(
            &req.id,
            json!({ "comment": text, "superseded": false }),
        ),
        Ok(CommentOutcome::Superseded) => ok(
            &req.id,
            json!({ "comment": serde_json::Value::Null, "superseded": true }),
        ),
        Err(e) => engine_err(&req.id, e),
    }
}

async fn handle_comment_dismiss(state: &AppState, req: &Request) -> serde_json::Value {
    state.engine.dismiss_comment().await;
    ok(&req.id, json!({ "dismissed": true }))
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.roster" => Some(handle_roster(state, req).await),
        "marks.enter" => Some(handle_enter(state, req).await),
        "marks.save" => Some(handle_save(state, req).await),
        "marks.saveAll" => Some(handle_save_all(state, req).await),
        "marks.comment" => Some(handle_comment(state, req).await),
        "marks.commentDismiss" => Some(handle_comment_dismiss(state, req).await),
        _ => None,
    }
}
