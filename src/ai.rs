use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

/// Shown when no credential is configured; the portal still renders a
/// comment box.
pub const PLACEHOLDER_COMMENT: &str =
    "Excellent performance. Keep up the good work. (Auto-generated placeholder)";
/// Shown when the gateway call fails.
pub const UNAVAILABLE_COMMENT: &str = "Unable to generate AI comment at this time.";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone)]
pub struct CommentRequest {
    pub student_name: String,
    pub average_score: f64,
    pub best_subject: String,
    pub weakest_subject: String,
    pub trend: String,
}

/// Report-card comment suggestions. Implementations must fail closed:
/// the grid never sees an error, only fallback text.
#[async_trait]
pub trait CommentGenerator: Send + Sync {
    async fn generate(&self, req: &CommentRequest) -> String;
}

pub struct GeminiGenerator {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl GeminiGenerator {
    pub fn new(api_key: Option<String>, model: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        GeminiGenerator {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        )
    }

    fn prompt(req: &CommentRequest) -> String {
        format!(
            "You are a senior teacher at St. Joseph's Naggalama, a prestigious secondary school.\n\
             Write a 2-sentence formal, encouraging, but honest report card comment for a student.\n\n\
             Student Name: {}\n\
             Average Score: {}%\n\
             Best Subject: {}\n\
             Weakest Subject: {}\n\
             Performance Trend: {}\n\n\
             Tone: Professional, Constructive, Ugandan Educational Context.",
            req.student_name, req.average_score, req.best_subject, req.weakest_subject, req.trend
        )
    }

    async fn call(&self, key: &str, req: &CommentRequest) -> anyhow::Result<String> {
        let body = json!({
            "contents": [{ "parts": [{ "text": Self::prompt(req) }] }]
        });
        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            anyhow::bail!("gemini returned {status}: {message}");
        }
        let parsed: GenerateResponse = resp.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| anyhow::anyhow!("gemini response had no candidates"))?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl CommentGenerator for GeminiGenerator {
    async fn generate(&self, req: &CommentRequest) -> String {
        let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) else {
            warn!("comment generation credential missing, using placeholder");
            return PLACEHOLDER_COMMENT.to_string();
        };
        match self.call(key, req).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "comment generation failed");
                UNAVAILABLE_COMMENT.to_string()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: String,
}
