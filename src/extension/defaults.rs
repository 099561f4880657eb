//! `defaults` extension: fills result fields a connector expects to be present.

use anyhow::Result;
use serde_json::Value;

use crate::engine::RunOptions;
use crate::extension::Extension;
use crate::types::{GatherResult, Source, SourceContext};

pub const DEFAULTS: &str = "defaults";

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultsExtension;

impl DefaultsExtension {
    fn fill(source: &Source, result: &mut GatherResult) {
        if result.label.as_deref().map_or(true, str::is_empty) {
            result.label = Some(source.label.clone().unwrap_or_else(|| source.id.clone()));
        }
        let n = result.errors.len();
        result.metadata.insert("errorCount".into(), Value::from(n));
    }
}

impl Extension for DefaultsExtension {
    fn after_run(&self, ctx: &mut SourceContext<'_>, _options: &RunOptions) -> Result<()> {
        if let Some(result) = ctx.result.as_deref_mut() {
            Self::fill(ctx.source, result);
        }
        Ok(())
    }

    fn after_retrieve(&self, ctx: &mut SourceContext<'_>, _options: &RunOptions) -> Result<()> {
        if let Some(result) = ctx.result.as_deref_mut() {
            Self::fill(ctx.source, result);
        }
        Ok(())
    }
}
