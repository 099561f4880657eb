// src/config.rs
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const ENV_CONFIG_PATH: &str = "GATHER_CONFIG_PATH";
pub const ENV_BATCH_SIZE: &str = "GATHER_BATCH_SIZE";
pub const ENV_VERBOSE: &str = "GATHER_VERBOSE";
pub const ENV_DEBUG: &str = "GATHER_DEBUG";
pub const ENV_QUIET: &str = "GATHER_QUIET";

pub const DEFAULT_BATCH_UPDATE_BUFFER: usize = 10;

fn default_gatherers() -> Vec<String> {
    vec!["fixture".to_string()]
}
fn default_batch_update_buffer() -> usize {
    DEFAULT_BATCH_UPDATE_BUFFER
}

/// Engine construction parameters (the connector is handed to the builder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Gatherer names resolved at construction.
    #[serde(default = "default_gatherers")]
    pub gatherers: Vec<String>,
    /// Extension names, run in this order.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Results buffered before each append; 0 flushes once at the end.
    #[serde(default = "default_batch_update_buffer")]
    pub batch_update_buffer: usize,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub quiet: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gatherers: default_gatherers(),
            extensions: Vec::new(),
            batch_update_buffer: DEFAULT_BATCH_UPDATE_BUFFER,
            verbose: false,
            debug: false,
            quiet: false,
        }
    }
}

/// Load config from an explicit path. Supports TOML or JSON.
pub fn load_config_from(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str()).map_err(|message| ConfigError::Invalid {
        path: path.display().to_string(),
        message,
    })
}

/// Load config using env var + fallbacks, then apply env overrides:
/// 1) $GATHER_CONFIG_PATH
/// 2) config/gather.toml
/// 3) config/gather.json
/// 4) built-in defaults
pub fn load_config_default() -> Result<EngineConfig, ConfigError> {
    let cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(&p);
        if !pb.exists() {
            return Err(ConfigError::Invalid {
                path: p,
                message: format!("{ENV_CONFIG_PATH} points to non-existent path"),
            });
        }
        load_config_from(&pb)?
    } else {
        let toml_p = PathBuf::from("config/gather.toml");
        let json_p = PathBuf::from("config/gather.json");
        if toml_p.exists() {
            load_config_from(&toml_p)?
        } else if json_p.exists() {
            load_config_from(&json_p)?
        } else {
            EngineConfig::default()
        }
    };
    Ok(apply_env_overrides(cfg))
}

/// `GATHER_BATCH_SIZE`, `GATHER_VERBOSE`, `GATHER_DEBUG`, `GATHER_QUIET`
/// win over file values when set and parseable.
pub fn apply_env_overrides(mut cfg: EngineConfig) -> EngineConfig {
    if let Some(n) = std::env::var(ENV_BATCH_SIZE)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        cfg.batch_update_buffer = n;
    }
    if let Some(b) = env_flag(ENV_VERBOSE) {
        cfg.verbose = b;
    }
    if let Some(b) = env_flag(ENV_DEBUG) {
        cfg.debug = b;
    }
    if let Some(b) = env_flag(ENV_QUIET) {
        cfg.quiet = b;
    }
    cfg
}

fn env_flag(name: &str) -> Option<bool> {
    let v = std::env::var(name).ok()?;
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<EngineConfig, String> {
    if hint_ext == "json" {
        return parse_json(s).or_else(|e| parse_toml(s).map_err(|_| e));
    }
    parse_toml(s).or_else(|e| parse_json(s).map_err(|_| e))
}

fn parse_toml(s: &str) -> Result<EngineConfig, String> {
    toml::from_str::<EngineConfig>(s)
        .map(clean)
        .map_err(|e| e.to_string())
}

fn parse_json(s: &str) -> Result<EngineConfig, String> {
    serde_json::from_str::<EngineConfig>(s)
        .map(clean)
        .map_err(|e| e.to_string())
}

// Trim names, drop blanks and repeats; order matters for extensions.
fn clean(mut cfg: EngineConfig) -> EngineConfig {
    cfg.gatherers = clean_list(cfg.gatherers);
    cfg.extensions = clean_list(cfg.extensions);
    cfg
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn toml_and_json_formats_work() {
        let toml = r#"
gatherers = [" fixture ", "", "psi", "psi"]
extensions = ["defaults"]
batchUpdateBuffer = 5
verbose = true
"#;
        let cfg = parse_config(toml, "toml").unwrap();
        assert_eq!(cfg.gatherers, vec!["fixture".to_string(), "psi".to_string()]);
        assert_eq!(cfg.extensions, vec!["defaults".to_string()]);
        assert_eq!(cfg.batch_update_buffer, 5);
        assert!(cfg.verbose);

        let json = r#"{"gatherers": ["a"], "batchUpdateBuffer": 0}"#;
        let cfg = parse_config(json, "json").unwrap();
        assert_eq!(cfg.gatherers, vec!["a".to_string()]);
        assert_eq!(cfg.batch_update_buffer, 0);
        assert!(cfg.extensions.is_empty());
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg = parse_config("", "toml").unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_config("{{ nope", "json").is_err());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);
        env::remove_var(ENV_BATCH_SIZE);

        let v = load_config_default().unwrap();
        assert_eq!(v, EngineConfig::default());

        let cfg_dir = tmp.path().join("config");
        fs::create_dir_all(&cfg_dir).unwrap();
        fs::write(cfg_dir.join("gather.toml"), "batchUpdateBuffer = 3").unwrap();
        assert_eq!(load_config_default().unwrap().batch_update_buffer, 3);

        let p_env = tmp.path().join("other.json");
        fs::write(&p_env, r#"{"batchUpdateBuffer": 7}"#).unwrap();
        env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
        assert_eq!(load_config_default().unwrap().batch_update_buffer, 7);

        env::set_var(ENV_BATCH_SIZE, "2");
        assert_eq!(load_config_default().unwrap().batch_update_buffer, 2);

        env::remove_var(ENV_BATCH_SIZE);
        env::remove_var(ENV_CONFIG_PATH);
        env::set_current_dir(&old).unwrap();
    }
}
