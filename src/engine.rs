//! # Execution Engine
//! The pass shared by every mode: fan each source out to its gatherers, build
//! the result, run lifecycle hooks and flush results to the destination in
//! bounded batches.
//!
//! Sources are processed strictly in input order, so flush boundaries and the
//! order of written results are deterministic. Gatherer and extension failures
//! are collected, never fatal; only storage failures abort a pass.

use anyhow::Result;
use chrono::Utc;
use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::connector::{self, Connector, RESULTS};
use crate::error::ConfigError;
use crate::extension::{run_pass_hooks, run_source_hooks, ExtensionSet, PassHook, SourceHook};
use crate::gatherer::{self, GathererSet};
use crate::registry::{EnvVars, Registry};
use crate::result;
use crate::telemetry::{self, FLUSH_TOTAL, LAST_PASS_TS, RESULTS_TOTAL, SOURCES_TOTAL};
use crate::types::{GatherResult, PassContext, ResultKind, Source, SourceContext};

/// Per-pass options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Connector filters selecting the sources (or results) to process.
    pub filters: Vec<String>,
    /// Gatherer names invoked for every source on top of its own selection.
    pub gatherer: Vec<String>,
    /// Restrict hooks to these extensions; `None` runs every configured one.
    pub extensions: Option<Vec<String>>,
    /// Overrides `batchUpdateBuffer` for this pass.
    pub batch_size: Option<usize>,
    /// Type stamped on created results.
    pub kind: ResultKind,
    /// Recurring mode only: advance schedules without running gatherers.
    pub activate_only: bool,
    pub verbose: bool,
    pub debug: bool,
    /// Connector environment; filled from the engine when not set.
    pub env: EnvVars,
}

impl RunOptions {
    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = filters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n);
        self
    }
}

/// What a pass hands back. A non-empty `errors` list does not mean the pass
/// failed: every listed problem was recovered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassOutcome {
    pub sources: Vec<Source>,
    pub results: Vec<GatherResult>,
    pub errors: Vec<String>,
    /// Records written (appended or updated) by this pass.
    pub written: usize,
}

pub struct EngineBuilder {
    config: EngineConfig,
    connector: Option<Arc<dyn Connector>>,
    registry: Registry,
}

impl EngineBuilder {
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the default registry (built-ins only).
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Resolve every configured gatherer and extension. Fails on missing
    /// connector, unknown names or failing factories.
    pub fn build(self) -> Result<Engine, ConfigError> {
        let connector = self.connector.ok_or(ConfigError::Missing("connector"))?;
        let env = connector.get_env_vars().map_err(|source| ConfigError::Factory {
            kind: "connector",
            name: "env vars".to_string(),
            source: source.into(),
        })?;
        let gatherers = self.registry.resolve_gatherers(&self.config.gatherers, &env)?;
        let extensions = self.registry.resolve_extensions(&self.config.extensions, &env)?;

        tracing::debug!(
            target: "engine",
            gatherers = ?self.config.gatherers,
            extensions = ?self.config.extensions,
            batch = self.config.batch_update_buffer,
            "engine built"
        );

        Ok(Engine {
            connector,
            gatherers,
            extensions,
            config: self.config,
            env,
        })
    }
}

pub struct Engine {
    connector: Arc<dyn Connector>,
    gatherers: GathererSet,
    extensions: ExtensionSet,
    config: EngineConfig,
    env: EnvVars,
}

/// Distinct gatherer names for `source`: its own selection, then `extra`.
pub fn gatherer_names(source: &Source, extra: &[String]) -> Vec<String> {
    let mut out: Vec<String> = source.gatherer.names().into_iter().map(str::to_string).collect();
    for n in extra {
        let n = n.trim();
        if !n.is_empty() && !out.iter().any(|o| o == n) {
            out.push(n.to_string());
        }
    }
    out
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            connector: None,
            registry: Registry::with_builtins(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub(crate) fn gatherers(&self) -> &GathererSet {
        &self.gatherers
    }

    pub(crate) fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }

    /// Options with engine-wide flags and environment folded in.
    pub(crate) fn prepare(&self, options: &RunOptions) -> RunOptions {
        let mut o = options.clone();
        o.debug |= self.config.debug;
        o.verbose |= self.config.verbose;
        for (k, v) in &self.env {
            o.env.entry(k.clone()).or_insert_with(|| v.clone());
        }
        o
    }

    /// Extension names whose hooks run for this pass.
    pub(crate) fn extension_names(&self, options: &RunOptions) -> Vec<String> {
        match &options.extensions {
            Some(names) => names.clone(),
            None => self.extensions.names(),
        }
    }

    fn batch_size(&self, options: &RunOptions) -> usize {
        options.batch_size.unwrap_or(self.config.batch_update_buffer)
    }

    /// Single pass: every source matching `options.filters`, results typed `single`.
    pub async fn run(&self, options: &RunOptions) -> Result<PassOutcome> {
        let fetched = connector::fetch_sources(self.connector(), &options.filters).await?;
        let mut o = options.clone();
        o.kind = ResultKind::Single;
        let mut outcome = self.execute(RESULTS, fetched.records, &o).await?;
        outcome.errors.splice(0..0, fetched.errors);
        Ok(outcome)
    }

    /// Run `sources` through their gatherers and append the results to
    /// `destination`.
    pub async fn execute(&self, destination: &str, sources: Vec<Source>, options: &RunOptions) -> Result<PassOutcome> {
        telemetry::ensure_metrics_described();
        let options = self.prepare(options);
        let ext_names = self.extension_names(&options);
        let batch_size = self.batch_size(&options);

        let mut sources = sources;
        let mut results: Vec<GatherResult> = Vec::with_capacity(sources.len());
        let mut errors: Vec<String> = Vec::new();

        {
            let mut ctx = PassContext {
                sources: &mut sources,
                results: &mut results,
            };
            errors.extend(run_pass_hooks(&self.extensions, &ext_names, PassHook::BeforeAllRuns, &mut ctx, &options));
        }

        for source in sources.iter_mut() {
            let mut ctx = SourceContext { source, result: None };
            let hook_errors = run_source_hooks(&self.extensions, &ext_names, SourceHook::BeforeRun, &mut ctx, &options);
            ctx.source.errors.extend(hook_errors.iter().cloned());
            errors.extend(hook_errors);
        }

        let mut buffer: Vec<GatherResult> = Vec::new();
        let mut flushes = 0usize;
        let mut written = 0usize;

        for (seq, source) in sources.iter_mut().enumerate() {
            let names = gatherer_names(source, &options.gatherer);
            if names.is_empty() {
                let msg = format!("[engine] source `{}` has no gatherer configured", source.id);
                tracing::warn!(target: "engine", source = %source.id, "source skipped: no gatherer configured");
                errors.push(msg);
                continue;
            }
            counter!(SOURCES_TOTAL).increment(1);

            let mut res = result::create_empty(source, options.kind, Utc::now(), seq);
            let mut statuses = Vec::with_capacity(names.len());
            for name in &names {
                let resp = gatherer::invoke(&self.gatherers, source, name, &options).await;
                result::merge(&mut res, name, resp, &mut statuses);
            }
            errors.extend(result::finalize(&mut res, &statuses, &names));

            {
                let mut ctx = SourceContext {
                    source,
                    result: Some(&mut res),
                };
                let hook_errors = run_source_hooks(&self.extensions, &ext_names, SourceHook::AfterRun, &mut ctx, &options);
                res.errors.extend(hook_errors.iter().cloned());
                errors.extend(hook_errors);
            }

            counter!(RESULTS_TOTAL, "status" => res.status.as_str()).increment(1);
            if options.verbose {
                tracing::info!(target: "engine", source = %res.source_id, status = %res.status, errors = res.errors.len(), "source processed");
            } else {
                tracing::debug!(target: "engine", source = %res.source_id, status = %res.status, "source processed");
            }

            buffer.push(res.clone());
            results.push(res);

            if batch_size > 0 && buffer.len() >= batch_size {
                written += self.flush(destination, &mut buffer).await?;
                flushes += 1;
            }
        }

        // The destination always sees at least one call per pass.
        if !buffer.is_empty() || flushes == 0 {
            written += self.flush(destination, &mut buffer).await?;
        }

        {
            let mut ctx = PassContext {
                sources: &mut sources,
                results: &mut results,
            };
            errors.extend(run_pass_hooks(&self.extensions, &ext_names, PassHook::AfterAllRuns, &mut ctx, &options));
        }

        gauge!(LAST_PASS_TS).set(Utc::now().timestamp() as f64);
        if !self.config.quiet {
            tracing::info!(
                target: "engine",
                kind = options.kind.as_str(),
                sources = sources.len(),
                results = results.len(),
                errors = errors.len(),
                "pass finished"
            );
        }

        Ok(PassOutcome {
            sources,
            results,
            errors,
            written,
        })
    }

    async fn flush(&self, destination: &str, buffer: &mut Vec<GatherResult>) -> Result<usize> {
        connector::append_records(self.connector(), destination, buffer.as_slice()).await?;
        counter!(FLUSH_TOTAL).increment(1);
        let n = buffer.len();
        buffer.clear();
        Ok(n)
    }
}
