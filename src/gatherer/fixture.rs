//! Canned-response gatherer.
//!
//! Reads its answer from the source itself, so passes can be exercised
//! without any network:
//!
//! ```json
//! { "id": "home", "gatherer": "fixture",
//!   "fixture": { "run": { "status": "SUBMITTED",
//!                         "metadata": { "retrieve": { "status": "RETRIEVED", "data": {"lcp": 1200} } } } } }
//! ```
//!
//! `run` returns `fixture.run` (or fails with `fixture.fail`). `retrieve` returns
//! the response stored under `metadata.retrieve` of the earlier run response.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::engine::RunOptions;
use crate::gatherer::Gatherer;
use crate::types::{GatherResult, GathererResponse, Source};

pub const FIXTURE: &str = "fixture";

pub struct FixtureGatherer {
    key: String,
}

impl FixtureGatherer {
    /// `key` is both the registered name and the source property holding the canned data.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for FixtureGatherer {
    fn default() -> Self {
        Self::new(FIXTURE)
    }
}

#[async_trait]
impl Gatherer for FixtureGatherer {
    async fn run(&self, source: &Source, _options: &RunOptions) -> Result<GathererResponse> {
        let cfg = source
            .gatherer_config(&self.key)
            .ok_or_else(|| anyhow!("source `{}` has no `{}` settings", source.id, self.key))?;

        if let Some(fail) = cfg.get("fail").and_then(Value::as_str) {
            anyhow::bail!("{fail}");
        }

        let run = cfg
            .get("run")
            .cloned()
            .ok_or_else(|| anyhow!("source `{}` has no `{}.run` response", source.id, self.key))?;
        serde_json::from_value(run).context("parsing fixture run response")
    }

    async fn retrieve(&self, result: &GatherResult, _options: &RunOptions) -> Result<GathererResponse> {
        let pending = result
            .responses
            .get(&self.key)
            .ok_or_else(|| anyhow!("result `{}` has no `{}` response", result.id, self.key))?;

        match pending.metadata.as_ref().and_then(|m| m.get("retrieve")) {
            Some(next) => serde_json::from_value(next.clone()).context("parsing fixture retrieve response"),
            // Nothing scheduled yet: still pending.
            None => Ok(pending.clone()),
        }
    }
}
