use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ChangeEvent, ChangeOp, Filter, Gateway, Order, StoreError, Subscription};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// HTTP gateway to the hosted relational store: PostgREST-style row
/// operations plus an SSE change feed for realtime notifications.
pub struct RemoteGateway {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RemoteGateway {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(RemoteGateway {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.api_key) {
            headers.insert("apikey", v);
        }
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            headers.insert(AUTHORIZATION, v);
        }
        headers
    }

    fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
        filters
            .iter()
            .map(|f| (f.column.clone(), format!("eq.{}", scalar_str(&f.value))))
            .collect()
    }

    async fn error_for(resp: reqwest::Response) -> StoreError {
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        StoreError::Status { status, message }
    }
}

fn scalar_str(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait::async_trait]
impl Gateway for RemoteGateway {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        order: Option<&Order>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut query = Self::filter_params(filters);
        if let Some(o) = order {
            query.push((
                "order".into(),
                format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }),
            ));
        }
        if let Some(n) = limit {
            query.push(("limit".into(), n.to_string()));
        }

        let resp = self
            .http
            .get(self.rest_url(table))
            .headers(self.auth_headers())
            .query(&query)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }
        let rows: Vec<Value> = resp.json().await?;
        Ok(rows)
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let mut query = Self::filter_params(filters);
        query.push(("limit".into(), "1".into()));

        let resp = self
            .http
            .get(self.rest_url(table))
            .headers(self.auth_headers())
            .header("Prefer", "count=exact")
            .query(&query)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }

        // Content-Range: 0-0/42 (or */0 when empty).
        let range = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        range
            .rsplit('/')
            .next()
            .and_then(|total| total.parse::<u64>().ok())
            .ok_or_else(|| StoreError::Decode(format!("bad content-range {range:?}")))
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError> {
        let resp = self
            .http
            .post(self.rest_url(table))
            .headers(self.auth_headers())
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }
        let mut rows: Vec<Value> = resp.json().await?;
        if rows.is_empty() {
            return Err(StoreError::Decode("insert returned no representation".into()));
        }
        Ok(rows.remove(0))
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        let resp = self
            .http
            .patch(self.rest_url(table))
            .headers(self.auth_headers())
            .query(&[("id", format!("eq.{id}"))])
            .json(&patch)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }
        Ok(())
    }

    fn subscribe(&self, table: &str, filter: Option<Filter>) -> Subscription {
        let (tx, rx) = mpsc::channel(64);
        let http = self.http.clone();
        let url = format!("{}/realtime/v1/changes", self.base_url);
        let headers = self.auth_headers();
        let table = table.to_string();

        let task = tokio::spawn(async move {
            let mut query = vec![("table".to_string(), table.clone())];
            if let Some(f) = &filter {
                query.push((f.column.clone(), format!("eq.{}", scalar_str(&f.value))));
            }

            // The feed drops on idle timeouts and deploys; reconnect
            // until the subscription handle is dropped.
            loop {
                let resp = http
                    .get(&url)
                    .headers(headers.clone())
                    .header(ACCEPT, "text/event-stream")
                    .query(&query)
                    .send()
                    .await;
                match resp {
                    Ok(resp) if resp.status().is_success() => {
                        debug!(table, "change feed connected");
                        let mut body = resp.bytes_stream();
                        let mut buf = String::new();
                        while let Some(chunk) = body.next().await {
                            let Ok(chunk) = chunk else { break };
                            buf.push_str(&String::from_utf8_lossy(&chunk));
                            while let Some(end) = buf.find("\n\n") {
                                let event: String = buf.drain(..end + 2).collect();
                                if let Some(ev) = parse_sse_event(&event) {
                                    if ev.table == table && tx.send(ev).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                        warn!(table, "change feed ended, reconnecting");
                    }
                    Ok(resp) => {
                        warn!(table, status = %resp.status(), "change feed rejected");
                    }
                    Err(e) => {
                        warn!(table, error = %e, "change feed connect failed");
                    }
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });
        Subscription::new(rx, task)
    }
}

/// Decode one SSE frame into a change event. Frames carry
/// `data: {"table": ..., "type": "INSERT|UPDATE|DELETE", "record": {...}}`.
fn parse_sse_event(event: &str) -> Option<ChangeEvent> {
    let data: String = event
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(|l| l.trim_start())
        .collect::<Vec<_>>()
        .join("\n");
    if data.is_empty() {
        return None;
    }
    let payload: Value = serde_json::from_str(&data).ok()?;
    let table = payload.get("table")?.as_str()?.to_string();
    let op = match payload.get("type")?.as_str()? {
        t if t.eq_ignore_ascii_case("insert") => ChangeOp::Insert,
        t if t.eq_ignore_ascii_case("update") => ChangeOp::Update,
        t if t.eq_ignore_ascii_case("delete") => ChangeOp::Delete,
        _ => return None,
    };
    let row = payload.get("record").cloned().unwrap_or(Value::Null);
    Some(ChangeEvent { table, op, row })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_frame_decodes_to_change_event() {
        let frame = "event: change\ndata: {\"table\":\"marks\",\"type\":\"UPDATE\",\"record\":{\"id\":\"m1\"}}\n\n";
        let ev = parse_sse_event(frame).expect("event");
        assert_eq!(ev.table, "marks");
        assert_eq!(ev.op, ChangeOp::Update);
        assert_eq!(ev.row_id(), Some("m1"));
    }

    #[test]
    fn heartbeat_frames_are_ignored() {
        assert!(parse_sse_event(": keep-alive\n\n").is_none());
        assert!(parse_sse_event("data: not-json\n\n").is_none());
    }
}
