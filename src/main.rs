use std::path::PathBuf;

use pagedinfer::backend::EchoBackend;
use pagedinfer::{EngineConfig, Result, SharedEngine};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    println!("pagedinfer {}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("PAGEDINFER_CONFIG")
        .ok()
        .map(PathBuf::from);
    let config = EngineConfig::load(config_path.as_deref())?;
    tracing::info!(?config, "engine configuration loaded");

    let engine = SharedEngine::new(config, Box::new(EchoBackend))?;
    engine.register_lane("default", 1.0);

    engine.submit_request("default", "demo-0", (0..64).collect())?;
    engine.submit_request("default", "demo-1", (0..16).collect())?;

    while let Some(outcome) = engine.run_once().await? {
        tracing::info!(
            request = %outcome.request_id,
            tokens = outcome.tokens_processed,
            finished = outcome.finished,
            "tick"
        );
        if outcome.finished {
            engine.retire(&outcome.request_id);
        }
    }

    let stats = engine.stats();
    tracing::info!(?stats, "engine drained");
    Ok(())
}
