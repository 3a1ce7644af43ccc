mod ai;
mod allocations;
mod config;
mod dashboard;
mod engine;
mod grades;
mod ipc;
mod models;
mod shell;
mod store;

use std::io::Write;
use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::ai::GeminiGenerator;
use crate::allocations::AllocationSelector;
use crate::config::Config;
use crate::dashboard::DashboardAggregator;
use crate::engine::MarksEngine;
use crate::ipc::AppState;
use crate::shell::ViewRouter;
use crate::store::local::LocalGateway;
use crate::store::remote::RemoteGateway;
use crate::store::Gateway;

const DEFAULT_TEACHER: &str = "teacher-okello";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout is the IPC channel; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();
    info!("Starting naggalamad v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    let (store, store_mode): (Arc<dyn Gateway>, &'static str) = if config.wants_remote() {
        let url = config.store_url.as_deref().unwrap_or_default();
        let key = config.store_key.as_deref().unwrap_or_default();
        info!(url, "using hosted store");
        (Arc::new(RemoteGateway::new(url, key)?), "remote")
    } else {
        info!(dir = %config.data_dir.display(), "no hosted store configured, using local store");
        let local = LocalGateway::open(&config.data_dir)?;
        if config.demo_seed {
            local.seed_demo()?;
            info!("seeded demo roster");
        }
        (Arc::new(local), "local")
    };

    let generator = Arc::new(GeminiGenerator::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    ));
    let engine = MarksEngine::new(Arc::clone(&store), generator);
    let mut dashboard = DashboardAggregator::new(Arc::clone(&store));
    dashboard.start().await;

    let teacher_id = std::env::var("SCHOOL_TEACHER_ID").unwrap_or_else(|_| DEFAULT_TEACHER.into());
    let state = AppState {
        store_mode,
        teacher_id,
        engine,
        allocations: Mutex::new(AllocationSelector::new(Arc::clone(&store))),
        dashboard,
        views: Mutex::new(ViewRouter::default()),
    };

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply with an id we never parsed.
                let reply = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{}", reply);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&state, req).await;
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    Ok(())
}
