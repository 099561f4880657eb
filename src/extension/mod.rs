// src/extension/mod.rs
//! Lifecycle hooks around passes.
//!
//! Extensions implement only the hooks they need; the rest are no-ops. Hooks
//! work by mutating the records in their context. A failing hook is isolated:
//! its error is tagged with the extension name and collected, and the remaining
//! extensions still run.

pub mod defaults;

use anyhow::Result;
use metrics::counter;
use std::fmt;
use std::sync::Arc;

use crate::engine::RunOptions;
use crate::telemetry::EXTENSION_ERRORS_TOTAL;
use crate::types::{PassContext, SourceContext};

#[allow(unused_variables)]
pub trait Extension: Send + Sync {
    fn before_all_runs(&self, ctx: &mut PassContext<'_>, options: &RunOptions) -> Result<()> {
        Ok(())
    }
    fn before_run(&self, ctx: &mut SourceContext<'_>, options: &RunOptions) -> Result<()> {
        Ok(())
    }
    fn after_run(&self, ctx: &mut SourceContext<'_>, options: &RunOptions) -> Result<()> {
        Ok(())
    }
    fn after_all_runs(&self, ctx: &mut PassContext<'_>, options: &RunOptions) -> Result<()> {
        Ok(())
    }
    fn before_all_retrieves(&self, ctx: &mut PassContext<'_>, options: &RunOptions) -> Result<()> {
        Ok(())
    }
    fn before_retrieve(&self, ctx: &mut SourceContext<'_>, options: &RunOptions) -> Result<()> {
        Ok(())
    }
    fn after_retrieve(&self, ctx: &mut SourceContext<'_>, options: &RunOptions) -> Result<()> {
        Ok(())
    }
    fn after_all_retrieves(&self, ctx: &mut PassContext<'_>, options: &RunOptions) -> Result<()> {
        Ok(())
    }
}

/// Hooks that see the whole pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassHook {
    BeforeAllRuns,
    AfterAllRuns,
    BeforeAllRetrieves,
    AfterAllRetrieves,
}

/// Hooks that see one source (and its result, once there is one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceHook {
    BeforeRun,
    AfterRun,
    BeforeRetrieve,
    AfterRetrieve,
}

impl fmt::Display for PassHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PassHook::BeforeAllRuns => "beforeAllRuns",
            PassHook::AfterAllRuns => "afterAllRuns",
            PassHook::BeforeAllRetrieves => "beforeAllRetrieves",
            PassHook::AfterAllRetrieves => "afterAllRetrieves",
        })
    }
}

impl fmt::Display for SourceHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceHook::BeforeRun => "beforeRun",
            SourceHook::AfterRun => "afterRun",
            SourceHook::BeforeRetrieve => "beforeRetrieve",
            SourceHook::AfterRetrieve => "afterRetrieve",
        })
    }
}

/// Extension instances resolved at engine construction, in run order.
#[derive(Clone, Default)]
pub struct ExtensionSet {
    entries: Vec<(String, Arc<dyn Extension>)>,
}

impl ExtensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, ext: Arc<dyn Extension>) {
        self.entries.push((name.into(), ext));
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered extensions among `names`, in the order of `names`.
    /// Unregistered names are skipped.
    fn selected<'a>(&'a self, names: &'a [String]) -> impl Iterator<Item = (&'a str, &'a dyn Extension)> + 'a {
        names.iter().filter_map(move |n| {
            self.entries
                .iter()
                .find(|(name, _)| name == n)
                .map(|(name, ext)| (name.as_str(), ext.as_ref()))
        })
    }
}

/// Run a pass-level hook on every selected extension; returns collected errors.
pub fn run_pass_hooks(
    extensions: &ExtensionSet,
    names: &[String],
    hook: PassHook,
    ctx: &mut PassContext<'_>,
    options: &RunOptions,
) -> Vec<String> {
    let mut errors = Vec::new();
    for (name, ext) in extensions.selected(names) {
        let res = match hook {
            PassHook::BeforeAllRuns => ext.before_all_runs(ctx, options),
            PassHook::AfterAllRuns => ext.after_all_runs(ctx, options),
            PassHook::BeforeAllRetrieves => ext.before_all_retrieves(ctx, options),
            PassHook::AfterAllRetrieves => ext.after_all_retrieves(ctx, options),
        };
        if let Err(e) = res {
            errors.push(hook_failure(name, &hook.to_string(), &e, options.debug));
        }
    }
    errors
}

/// Run a per-source hook on every selected extension; returns collected errors.
pub fn run_source_hooks(
    extensions: &ExtensionSet,
    names: &[String],
    hook: SourceHook,
    ctx: &mut SourceContext<'_>,
    options: &RunOptions,
) -> Vec<String> {
    let mut errors = Vec::new();
    for (name, ext) in extensions.selected(names) {
        let res = match hook {
            SourceHook::BeforeRun => ext.before_run(ctx, options),
            SourceHook::AfterRun => ext.after_run(ctx, options),
            SourceHook::BeforeRetrieve => ext.before_retrieve(ctx, options),
            SourceHook::AfterRetrieve => ext.after_retrieve(ctx, options),
        };
        if let Err(e) = res {
            errors.push(hook_failure(name, &hook.to_string(), &e, options.debug));
        }
    }
    errors
}

fn hook_failure(name: &str, hook: &str, e: &anyhow::Error, debug: bool) -> String {
    counter!(EXTENSION_ERRORS_TOTAL).increment(1);
    if debug {
        tracing::warn!(target: "engine", extension = name, hook, error = ?e, "extension hook failed");
    }
    format!("[{name}] {hook}: {e:#}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Source;
    use std::sync::Mutex;

    struct Failing;
    impl Extension for Failing {
        fn before_run(&self, _ctx: &mut SourceContext<'_>, _o: &RunOptions) -> Result<()> {
            anyhow::bail!("nope")
        }
    }

    struct Recorder(Mutex<Vec<String>>);
    impl Extension for Recorder {
        fn before_run(&self, ctx: &mut SourceContext<'_>, _o: &RunOptions) -> Result<()> {
            self.0.lock().unwrap().push(ctx.source.id.clone());
            ctx.source.label = Some("touched".into());
            Ok(())
        }
    }

    #[test]
    fn failure_is_isolated_and_tagged() {
        let rec = Arc::new(Recorder(Mutex::new(vec![])));
        let mut set = ExtensionSet::new();
        set.push("failing", Arc::new(Failing));
        set.push("rec", rec.clone());

        let mut src = Source::new("s1", "a");
        let mut ctx = SourceContext { source: &mut src, result: None };
        let names = set.names();
        let errs = run_source_hooks(&set, &names, SourceHook::BeforeRun, &mut ctx, &RunOptions::default());

        assert_eq!(errs, vec!["[failing] beforeRun: nope".to_string()]);
        assert_eq!(*rec.0.lock().unwrap(), vec!["s1".to_string()]);
        assert_eq!(src.label.as_deref(), Some("touched"));
    }

    #[test]
    fn only_named_extensions_run_in_given_order() {
        let rec = Arc::new(Recorder(Mutex::new(vec![])));
        let mut set = ExtensionSet::new();
        set.push("failing", Arc::new(Failing));
        set.push("rec", rec.clone());

        let mut src = Source::new("s1", "a");
        let mut ctx = SourceContext { source: &mut src, result: None };
        let names = vec!["rec".to_string(), "unknown".to_string()];
        let errs = run_source_hooks(&set, &names, SourceHook::BeforeRun, &mut ctx, &RunOptions::default());
        assert!(errs.is_empty());
        assert_eq!(rec.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn default_hooks_are_no_ops() {
        let mut set = ExtensionSet::new();
        set.push("failing", Arc::new(Failing));
        let mut sources = vec![Source::new("s1", "a")];
        let mut results = vec![];
        let mut ctx = PassContext { sources: &mut sources, results: &mut results };
        let names = set.names();
        let errs = run_pass_hooks(&set, &names, PassHook::AfterAllRuns, &mut ctx, &RunOptions::default());
        assert!(errs.is_empty());
    }
}
