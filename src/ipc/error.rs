use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_carries_optional_details() {
        let bare = err("7", "bad_params", "missing score", None);
        assert_eq!(bare["ok"], json!(false));
        assert!(bare["error"].get("details").is_none());

        let detailed = err("7", "bad_params", "missing score", Some(json!({ "score": 250 })));
        assert_eq!(detailed["error"]["details"]["score"], json!(250));
    }

    #[test]
    fn ok_envelope_echoes_request_id() {
        let resp = ok("42", json!({ "fine": true }));
        assert_eq!(resp["id"], json!("42"));
        assert_eq!(resp["result"]["fine"], json!(true));
    }
}
