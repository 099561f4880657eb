//! # Retrieval Pass
//! Second phase for polling-style gatherers. Pending results are grouped by
//! every gatherer still `SUBMITTED` for them, each group is polled with a
//! single `retrieve_batch` call, and only results whose responses actually
//! changed are written back.

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};

use crate::connector::{self, RESULTS};
use crate::engine::{Engine, PassOutcome, RunOptions};
use crate::extension::{run_pass_hooks, run_source_hooks, PassHook, SourceHook};
use crate::gatherer;
use crate::result;
use crate::status::Status;
use crate::telemetry::{self, LAST_PASS_TS, RETRIEVE_UPDATES_TOTAL};
use crate::types::{GatherResult, PassContext, Source, SourceContext};

/// Gatherer name → indices of the results it still owes a response for,
/// in first-seen order.
pub fn pending_groups(results: &[GatherResult]) -> Vec<(String, Vec<usize>)> {
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (i, r) in results.iter().enumerate() {
        for (name, resp) in &r.responses {
            if resp.status != Status::Submitted {
                continue;
            }
            match groups.iter_mut().find(|(n, _)| n == name) {
                Some((_, idx)) => idx.push(i),
                None => groups.push((name.clone(), vec![i])),
            }
        }
    }
    groups
}

/// Sources backing `results`, in result order. Results whose source is gone
/// get a stand-in carrying only the id and gatherer selection.
fn sources_for(all: Vec<Source>, results: &[GatherResult]) -> Vec<Source> {
    let mut out: Vec<Source> = Vec::new();
    for r in results {
        if out.iter().any(|s| s.id == r.source_id) {
            continue;
        }
        let s = all
            .iter()
            .find(|s| s.id == r.source_id)
            .cloned()
            .unwrap_or_else(|| Source::new(r.source_id.clone(), r.gatherer.clone()));
        out.push(s);
    }
    out
}

impl Engine {
    /// Poll every pending result matching `options.filters`.
    pub async fn retrieve(&self, options: &RunOptions) -> Result<PassOutcome> {
        self.retrieve_at(Utc::now(), options).await
    }

    /// Retrieval pass stamping `now` as the modification time.
    pub async fn retrieve_at(&self, now: DateTime<Utc>, options: &RunOptions) -> Result<PassOutcome> {
        telemetry::ensure_metrics_described();
        let options = self.prepare(options);
        let ext_names = self.extension_names(&options);

        let fetched = connector::fetch_results(self.connector(), RESULTS, &options.filters).await?;
        let mut errors: Vec<String> = fetched.errors;
        let mut results: Vec<GatherResult> = fetched
            .records
            .into_iter()
            .filter(|r| r.status == Status::Submitted)
            .collect();
        let all_sources = if results.is_empty() {
            Vec::new()
        } else {
            let fetched = connector::fetch_sources(self.connector(), &[]).await?;
            errors.extend(fetched.errors);
            fetched.records
        };
        let mut sources = sources_for(all_sources, &results);
        let before: Vec<_> = results.iter().map(|r| r.responses.clone()).collect();

        {
            let mut ctx = PassContext {
                sources: &mut sources,
                results: &mut results,
            };
            errors.extend(run_pass_hooks(self.extensions(), &ext_names, PassHook::BeforeAllRetrieves, &mut ctx, &options));
        }
        errors.extend(self.source_hooks(SourceHook::BeforeRetrieve, &mut sources, &mut results, &ext_names, &options));

        for (name, idx) in pending_groups(&results) {
            let batch: Vec<GatherResult> = idx.iter().map(|&i| results[i].clone()).collect();
            let Some(responses) = gatherer::invoke_retrieve_batch(self.gatherers(), &name, &batch, &options).await else {
                tracing::warn!(target: "retrieve", gatherer = %name, pending = idx.len(), "gatherer not configured");
                errors.push(format!("[{name}] not configured; results left pending"));
                continue;
            };
            for (&i, resp) in idx.iter().zip(responses) {
                if results[i].responses.get(&name) == Some(&resp) {
                    continue;
                }
                errors.extend(result::apply_retrieved(&mut results[i], &name, resp, now));
            }
        }

        errors.extend(self.source_hooks(SourceHook::AfterRetrieve, &mut sources, &mut results, &ext_names, &options));
        {
            let mut ctx = PassContext {
                sources: &mut sources,
                results: &mut results,
            };
            errors.extend(run_pass_hooks(self.extensions(), &ext_names, PassHook::AfterAllRetrieves, &mut ctx, &options));
        }

        let changed: Vec<&GatherResult> = results
            .iter()
            .zip(&before)
            .filter(|(r, b)| r.responses != **b)
            .map(|(r, _)| r)
            .collect();
        let written = changed.len();
        if written > 0 {
            connector::update_records(self.connector(), RESULTS, &changed).await?;
            counter!(RETRIEVE_UPDATES_TOTAL).increment(written as u64);
        }

        gauge!(LAST_PASS_TS).set(Utc::now().timestamp() as f64);
        if !self.config().quiet {
            tracing::info!(
                target: "retrieve",
                pending = results.len(),
                updated = written,
                errors = errors.len(),
                "retrieval pass finished"
            );
        }

        Ok(PassOutcome {
            sources,
            results,
            errors,
            written,
        })
    }

    fn source_hooks(
        &self,
        hook: SourceHook,
        sources: &mut [Source],
        results: &mut [GatherResult],
        ext_names: &[String],
        options: &RunOptions,
    ) -> Vec<String> {
        let mut errors = Vec::new();
        for r in results.iter_mut() {
            let Some(source) = sources.iter_mut().find(|s| s.id == r.source_id) else {
                continue;
            };
            let mut ctx = SourceContext {
                source,
                result: Some(&mut *r),
            };
            let hook_errors = run_source_hooks(self.extensions(), ext_names, hook, &mut ctx, options);
            r.errors.extend(hook_errors.iter().cloned());
            errors.extend(hook_errors);
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GathererResponse, ResultKind};

    fn pending(id: &str, names: &[(&str, Status)]) -> GatherResult {
        let src = Source::new(id, names.iter().map(|(n, _)| *n).collect::<Vec<_>>());
        let mut r = result::create_empty(&src, ResultKind::Single, Utc::now(), 0);
        for (n, st) in names {
            r.responses.insert(n.to_string(), GathererResponse::new(*st));
        }
        r
    }

    #[test]
    fn groups_only_submitted_sub_results() {
        let results = vec![
            pending("a", &[("x", Status::Submitted), ("y", Status::Retrieved)]),
            pending("b", &[("x", Status::Submitted), ("y", Status::Submitted)]),
            pending("c", &[("y", Status::Error)]),
        ];
        let groups = pending_groups(&results);
        assert_eq!(groups, vec![("x".to_string(), vec![0, 1]), ("y".to_string(), vec![1])]);
    }

    #[test]
    fn missing_sources_get_a_stand_in() {
        let results = vec![pending("a", &[("x", Status::Submitted)]), pending("a", &[])];
        let mut known = Source::new("z", "x");
        known.label = Some("unrelated".into());
        let out = sources_for(vec![known], &results);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "a");
        assert_eq!(out[0].label, None);
    }
}
