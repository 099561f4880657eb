// src/connector/mod.rs
//! Storage backend contract.
//!
//! Connectors store JSON records in named datasets. The engine only uses the
//! `Sources` and `Results` datasets; typed helpers below convert records to and
//! from [`Source`] and [`GatherResult`].

pub mod filter;
pub mod memory;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::{GatherResult, Source};

pub const SOURCES: &str = "Sources";
pub const RESULTS: &str = "Results";

/// Per-call options forwarded to the connector.
#[derive(Debug, Clone, Default)]
pub struct DataOptions {
    /// Boolean expressions over dot-addressed record properties, ANDed.
    pub filters: Vec<String>,
    pub verbose: bool,
}

impl DataOptions {
    pub fn filtered(filters: &[String]) -> Self {
        Self {
            filters: filters.to_vec(),
            verbose: false,
        }
    }
}

#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn get_data_list(&self, dataset: &str, options: &DataOptions) -> Result<Vec<Value>>;

    async fn append_data_list(&self, dataset: &str, items: Vec<Value>, options: &DataOptions) -> Result<()>;

    /// Replace existing records, matched by their `id` property.
    async fn update_data_list(&self, dataset: &str, items: Vec<Value>, options: &DataOptions) -> Result<()>;

    async fn clear_data_list(&self, dataset: &str) -> Result<()>;

    /// Environment handed to gatherer and extension factories.
    fn get_env_vars(&self) -> Result<Map<String, Value>>;

    async fn get_system_var(&self, key: &str) -> Result<Option<String>>;

    async fn set_system_var(&self, key: &str, value: &str) -> Result<()>;
}

/// Records decoded from one dataset read. Rows that do not decode are skipped
/// and reported in `errors` as `"[engine] <dataset> row N: <reason>"`.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub records: Vec<T>,
    pub errors: Vec<String>,
}

async fn fetch<T: DeserializeOwned>(conn: &dyn Connector, dataset: &str, filters: &[String]) -> Result<Fetched<T>> {
    let rows = conn
        .get_data_list(dataset, &DataOptions::filtered(filters))
        .await
        .with_context(|| format!("reading {dataset}"))?;
    let mut records = Vec::with_capacity(rows.len());
    let mut errors = Vec::new();
    for (i, row) in rows.into_iter().enumerate() {
        match serde_json::from_value::<T>(row) {
            Ok(r) => records.push(r),
            Err(e) => {
                tracing::warn!(target: "engine", dataset, row = i, error = %e, "skipping undecodable row");
                errors.push(format!("[engine] {dataset} row {i}: {e}"));
            }
        }
    }
    Ok(Fetched { records, errors })
}

fn encode<T: Serialize>(items: &[T]) -> Result<Vec<Value>> {
    items
        .iter()
        .map(|it| serde_json::to_value(it).context("encoding record"))
        .collect()
}

pub async fn fetch_sources(conn: &dyn Connector, filters: &[String]) -> Result<Fetched<Source>> {
    fetch(conn, SOURCES, filters).await
}

pub async fn fetch_results(conn: &dyn Connector, dataset: &str, filters: &[String]) -> Result<Fetched<GatherResult>> {
    fetch(conn, dataset, filters).await
}

pub async fn append_records<T: Serialize>(conn: &dyn Connector, dataset: &str, items: &[T]) -> Result<()> {
    let rows = encode(items)?;
    conn.append_data_list(dataset, rows, &DataOptions::default())
        .await
        .with_context(|| format!("appending {} record(s) to {dataset}", items.len()))
}

pub async fn update_records<T: Serialize>(conn: &dyn Connector, dataset: &str, items: &[T]) -> Result<()> {
    let rows = encode(items)?;
    conn.update_data_list(dataset, rows, &DataOptions::default())
        .await
        .with_context(|| format!("updating {} record(s) in {dataset}", items.len()))
}
