// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod extension;
pub mod gatherer;
pub mod registry;
pub mod result;
pub mod retrieve;
pub mod scheduler;
pub mod status;
pub mod telemetry;
pub mod types;

// ---- Re-exports for stable public API ----
pub use crate::config::{load_config_default, load_config_from, EngineConfig};
pub use crate::connector::memory::MemoryConnector;
pub use crate::connector::Connector;
pub use crate::engine::{Engine, EngineBuilder, PassOutcome, RunOptions};
pub use crate::error::ConfigError;
pub use crate::extension::Extension;
pub use crate::gatherer::Gatherer;
pub use crate::registry::Registry;
pub use crate::scheduler::Frequency;
pub use crate::status::Status;
pub use crate::types::{GatherResult, GathererResponse, ResultKind, Source};
