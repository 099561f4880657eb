// src/gatherer/mod.rs
pub mod fixture;

use anyhow::Result;
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::RunOptions;
use crate::status::Status;
use crate::telemetry::{GATHERER_ERRORS_TOTAL, INVOKE_MS};
use crate::types::{GatherResult, GathererResponse, Source};

/// A pluggable data gatherer.
///
/// `run` is called once per source per pass. Polling-style gatherers return
/// `SUBMITTED` from `run` and complete later through `retrieve`/`retrieve_batch`,
/// which only the retrieval pass calls.
#[async_trait::async_trait]
pub trait Gatherer: Send + Sync {
    async fn run(&self, source: &Source, options: &RunOptions) -> Result<GathererResponse>;

    async fn retrieve(
        &self,
        _result: &GatherResult,
        _options: &RunOptions,
    ) -> Result<GathererResponse> {
        anyhow::bail!("retrieve is not supported by this gatherer")
    }

    /// Poll a whole group at once. The default polls item by item; backends
    /// with rate limits should override it with a single request.
    async fn retrieve_batch(
        &self,
        results: &[GatherResult],
        options: &RunOptions,
    ) -> Result<Vec<GathererResponse>> {
        let mut out = Vec::with_capacity(results.len());
        for r in results {
            out.push(match self.retrieve(r, options).await {
                Ok(resp) => resp,
                Err(e) => GathererResponse::error(format!("{e:#}")),
            });
        }
        Ok(out)
    }
}

/// Gatherer instances resolved at engine construction, keyed by name.
pub type GathererSet = HashMap<String, Arc<dyn Gatherer>>;

/// Call one gatherer for one source. Never fails: a missing gatherer or an
/// error from `run` becomes an `ERROR` response.
pub async fn invoke(
    gatherers: &GathererSet,
    source: &Source,
    name: &str,
    options: &RunOptions,
) -> GathererResponse {
    let t0 = std::time::Instant::now();
    let resp = match gatherers.get(name) {
        None => {
            tracing::warn!(target: "engine", gatherer = name, source = %source.id, "gatherer not configured");
            GathererResponse::error(format!("gatherer `{name}` is not configured"))
        }
        Some(g) => match g.run(source, options).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(target: "engine", error = ?e, gatherer = name, source = %source.id, "gatherer error");
                GathererResponse::error(format!("{e:#}"))
            }
        },
    };

    histogram!(INVOKE_MS).record(t0.elapsed().as_secs_f64() * 1_000.0);
    if resp.status == Status::Error {
        counter!(GATHERER_ERRORS_TOTAL).increment(1);
    }
    resp
}

/// Poll one gatherer for a group of pending results. The returned vector is
/// always as long as `results`; a failed batch marks every item as `ERROR`.
///
/// Callers must check the gatherer exists first; an unknown name yields `None`.
pub async fn invoke_retrieve_batch(
    gatherers: &GathererSet,
    name: &str,
    results: &[GatherResult],
    options: &RunOptions,
) -> Option<Vec<GathererResponse>> {
    let g = gatherers.get(name)?;
    let out = match g.retrieve_batch(results, options).await {
        Ok(mut v) => {
            if v.len() != results.len() {
                tracing::warn!(
                    target: "retrieve",
                    gatherer = name,
                    expected = results.len(),
                    got = v.len(),
                    "retrieve_batch returned a mismatched number of responses"
                );
                v.resize_with(results.len(), || {
                    GathererResponse::error("no response returned for this result")
                });
            }
            v
        }
        Err(e) => {
            tracing::warn!(target: "retrieve", error = ?e, gatherer = name, "retrieve_batch error");
            let msg = format!("{e:#}");
            results
                .iter()
                .map(|_| GathererResponse::error(msg.clone()))
                .collect()
        }
    };
    let failed = out.iter().filter(|r| r.status == Status::Error).count();
    counter!(GATHERER_ERRORS_TOTAL).increment(failed as u64);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Boom;

    #[async_trait::async_trait]
    impl Gatherer for Boom {
        async fn run(&self, _source: &Source, _options: &RunOptions) -> Result<GathererResponse> {
            anyhow::bail!("boom")
        }
    }

    struct Ok1;

    #[async_trait::async_trait]
    impl Gatherer for Ok1 {
        async fn run(&self, source: &Source, _options: &RunOptions) -> Result<GathererResponse> {
            Ok(GathererResponse::retrieved(json!({ "id": source.id })))
        }
    }

    fn set() -> GathererSet {
        let mut s: GathererSet = HashMap::new();
        s.insert("boom".into(), Arc::new(Boom));
        s.insert("ok".into(), Arc::new(Ok1));
        s
    }

    #[tokio::test]
    async fn failure_becomes_error_response() {
        let src = Source::new("s1", "boom");
        let resp = invoke(&set(), &src, "boom", &RunOptions::default()).await;
        assert_eq!(resp.status, Status::Error);
        assert_eq!(resp.status_text.as_deref(), Some("boom"));
        assert_eq!(resp.errors, vec!["boom".to_string()]);
    }

    #[tokio::test]
    async fn unknown_name_becomes_error_response() {
        let src = Source::new("s1", "nope");
        let resp = invoke(&set(), &src, "nope", &RunOptions::default()).await;
        assert_eq!(resp.status, Status::Error);
        assert!(resp.errors[0].contains("not configured"));
    }

    #[tokio::test]
    async fn success_passes_through() {
        let src = Source::new("s1", "ok");
        let resp = invoke(&set(), &src, "ok", &RunOptions::default()).await;
        assert_eq!(resp.status, Status::Retrieved);
        assert_eq!(resp.data, Some(json!({"id": "s1"})));
    }

    #[tokio::test]
    async fn default_retrieve_batch_reports_unsupported_per_item() {
        let now = chrono::Utc::now();
        let src = Source::new("s1", "ok");
        let r = crate::result::create_empty(&src, Default::default(), now, 0);
        let out = invoke_retrieve_batch(&set(), "ok", &[r.clone(), r], &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.status == Status::Error));
        assert!(invoke_retrieve_batch(&set(), "nope", &[], &RunOptions::default())
            .await
            .is_none());
    }
}
