use std::path::PathBuf;

/// Runtime configuration, environment-driven. The daemon runs against
/// the hosted store when `SCHOOL_STORE_URL`/`SCHOOL_STORE_KEY` are set
/// and falls back to the local store otherwise, so a checkout works
/// with no setup at all.
#[derive(Debug, Clone)]
pub struct Config {
    pub store_url: Option<String>,
    pub store_key: Option<String>,
    pub data_dir: PathBuf,
    pub demo_seed: bool,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("SCHOOL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("naggalamad"));
        Config {
            store_url: non_empty(std::env::var("SCHOOL_STORE_URL").ok()),
            store_key: non_empty(std::env::var("SCHOOL_STORE_KEY").ok()),
            data_dir,
            demo_seed: std::env::var("SCHOOL_DEMO_SEED").map(|v| v == "1").unwrap_or(false),
            gemini_api_key: non_empty(std::env::var("GEMINI_API_KEY").ok()),
            gemini_model: non_empty(std::env::var("GEMINI_MODEL").ok()),
        }
    }

    pub fn wants_remote(&self) -> bool {
        self.store_url.is_some() && self.store_key.is_some()
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}
