//! Name → factory lookup for gatherers and extensions.
//!
//! Factories run once, when the engine is built; the instances are cached on
//! the engine for every later pass.

use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::extension::defaults::{DefaultsExtension, DEFAULTS};
use crate::extension::{Extension, ExtensionSet};
use crate::gatherer::fixture::{FixtureGatherer, FIXTURE};
use crate::gatherer::{Gatherer, GathererSet};

/// Connector-provided environment handed to factories.
pub type EnvVars = Map<String, Value>;

pub type GathererFactory = Arc<dyn Fn(&EnvVars) -> Result<Arc<dyn Gatherer>> + Send + Sync>;
pub type ExtensionFactory = Arc<dyn Fn(&EnvVars) -> Result<Arc<dyn Extension>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Registry {
    gatherers: HashMap<String, GathererFactory>,
    extensions: HashMap<String, ExtensionFactory>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut g: Vec<&String> = self.gatherers.keys().collect();
        let mut e: Vec<&String> = self.extensions.keys().collect();
        g.sort();
        e.sort();
        f.debug_struct("Registry")
            .field("gatherers", &g)
            .field("extensions", &e)
            .finish()
    }
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `fixture` gatherer and `defaults` extension.
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register_gatherer(FIXTURE, |_env| Ok(Arc::new(FixtureGatherer::new(FIXTURE)) as Arc<dyn Gatherer>));
        r.register_extension(DEFAULTS, |_env| Ok(Arc::new(DefaultsExtension) as Arc<dyn Extension>));
        r
    }

    pub fn register_gatherer<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&EnvVars) -> Result<Arc<dyn Gatherer>> + Send + Sync + 'static,
    {
        self.gatherers.insert(name.to_string(), Arc::new(factory));
        self
    }

    /// Register an already-built gatherer under `name`.
    pub fn register_gatherer_instance(&mut self, name: &str, gatherer: Arc<dyn Gatherer>) -> &mut Self {
        self.register_gatherer(name, move |_env| Ok(gatherer.clone()))
    }

    pub fn register_extension<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&EnvVars) -> Result<Arc<dyn Extension>> + Send + Sync + 'static,
    {
        self.extensions.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn register_extension_instance(&mut self, name: &str, extension: Arc<dyn Extension>) -> &mut Self {
        self.register_extension(name, move |_env| Ok(extension.clone()))
    }

    /// Build every named gatherer. Unknown names and failing factories are
    /// configuration errors.
    pub fn resolve_gatherers(&self, names: &[String], env: &EnvVars) -> Result<GathererSet, ConfigError> {
        let mut out = GathererSet::new();
        for name in names {
            let factory = self
                .gatherers
                .get(name)
                .ok_or_else(|| ConfigError::UnknownGatherer(name.clone()))?;
            let g = factory(env).map_err(|source| ConfigError::Factory {
                kind: "gatherer",
                name: name.clone(),
                source: source.into(),
            })?;
            out.insert(name.clone(), g);
        }
        Ok(out)
    }

    /// Build every named extension, keeping the configured order.
    pub fn resolve_extensions(&self, names: &[String], env: &EnvVars) -> Result<ExtensionSet, ConfigError> {
        let mut out = ExtensionSet::new();
        for name in names {
            let factory = self
                .extensions
                .get(name)
                .ok_or_else(|| ConfigError::UnknownExtension(name.clone()))?;
            let e = factory(env).map_err(|source| ConfigError::Factory {
                kind: "extension",
                name: name.clone(),
                source: source.into(),
            })?;
            out.push(name.clone(), e);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve() {
        let r = Registry::with_builtins();
        let env = EnvVars::new();
        let g = r.resolve_gatherers(&["fixture".into()], &env).unwrap();
        assert!(g.contains_key("fixture"));
        let e = r.resolve_extensions(&["defaults".into()], &env).unwrap();
        assert_eq!(e.names(), vec!["defaults".to_string()]);
    }

    #[test]
    fn unknown_names_fail_fast() {
        let r = Registry::with_builtins();
        let env = EnvVars::new();
        assert!(matches!(
            r.resolve_gatherers(&["psi".into()], &env),
            Err(ConfigError::UnknownGatherer(n)) if n == "psi"
        ));
        assert!(matches!(
            r.resolve_extensions(&["budgets".into()], &env),
            Err(ConfigError::UnknownExtension(_))
        ));
    }

    #[test]
    fn factory_failure_is_a_config_error() {
        let mut r = Registry::new();
        r.register_gatherer("needs-key", |env| {
            env.get("API_KEY")
                .ok_or_else(|| anyhow::anyhow!("API_KEY missing"))?;
            Ok(Arc::new(FixtureGatherer::default()) as Arc<dyn Gatherer>)
        });
        let err = r
            .resolve_gatherers(&["needs-key".into()], &EnvVars::new())
            .err()
            .expect("factory should fail");
        assert!(err.to_string().contains("API_KEY missing"));
    }
}
