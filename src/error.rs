//! Configuration errors.
//!
//! Only construction-time problems get a typed error; everything that can go
//! wrong during a pass is either recovered into the pass error list or
//! propagated as `anyhow::Error` (storage failures).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// A mandatory builder parameter was never supplied.
    #[error("missing mandatory configuration: {0}")]
    Missing(&'static str),

    #[error("unknown gatherer: {0}")]
    UnknownGatherer(String),

    #[error("unknown extension: {0}")]
    UnknownExtension(String),

    /// A registered factory refused to build its instance.
    #[error("failed to construct {kind} `{name}`: {source}")]
    Factory {
        kind: &'static str,
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid config file {path}: {message}")]
    Invalid { path: String, message: String },

    #[error("config file I/O: {0}")]
    Io(#[from] std::io::Error),
}
