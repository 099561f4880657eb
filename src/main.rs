//! `gather`: run one pass against a JSON file of sources.
//!
//! Environment:
//!   GATHER_SOURCES_PATH  JSON array of sources (default `sources.json`)
//!   GATHER_MODE          run | recurring | activate | retrieve (default `run`)
//!   GATHER_METRICS=1     print Prometheus exposition after the pass
//!
//! Engine settings come from `config::load_config_default`.

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gather_engine::config::load_config_default;
use gather_engine::telemetry;
use gather_engine::{Engine, MemoryConnector, RunOptions};

const ENV_SOURCES_PATH: &str = "GATHER_SOURCES_PATH";
const ENV_MODE: &str = "GATHER_MODE";
const ENV_METRICS: &str = "GATHER_METRICS";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gather_engine=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn read_sources(path: &str) -> Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading sources from {path}"))?;
    let v: Value = serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;
    match v {
        Value::Array(items) => Ok(items),
        _ => anyhow::bail!("{path} must hold a JSON array of sources"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; missing file is fine.
    let _ = dotenvy::dotenv();
    init_tracing();

    let prometheus = match std::env::var(ENV_METRICS).ok().as_deref() {
        Some("1") => Some(telemetry::install_prometheus()?),
        _ => None,
    };

    let cfg = load_config_default()?;
    let sources_path = std::env::var(ENV_SOURCES_PATH).unwrap_or_else(|_| "sources.json".to_string());
    let connector = Arc::new(MemoryConnector::with_sources(read_sources(&sources_path)?));
    let engine = Engine::builder(cfg).connector(connector).build()?;

    let mode = std::env::var(ENV_MODE).unwrap_or_else(|_| "run".to_string());
    let options = RunOptions::default();
    let outcome = match mode.trim() {
        "run" => engine.run(&options).await?,
        "recurring" => engine.run_recurring(&options).await?,
        "activate" => engine.activate_recurring(&options).await?,
        "retrieve" => {
            // A fresh process has nothing pending: submit first, then poll.
            engine.run(&options).await?;
            engine.retrieve(&options).await?
        }
        other => anyhow::bail!("unknown {ENV_MODE} {other:?} (expected run, recurring, activate or retrieve)"),
    };

    for e in &outcome.errors {
        tracing::warn!(target: "engine", error = %e, "recovered error");
    }
    if mode.trim() == "activate" {
        println!("{}", serde_json::to_string_pretty(&outcome.sources)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&outcome.results)?);
    }

    if let Some(handle) = prometheus {
        println!("{}", handle.render());
    }
    Ok(())
}
