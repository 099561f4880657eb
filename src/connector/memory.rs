// src/connector/memory.rs
//! In-process connector. Keeps datasets as JSON rows and records every
//! mutating call so passes can be inspected afterwards.

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::filter::{matches_all, parse_all};
use super::{Connector, DataOptions, SOURCES};

/// A mutating call observed by the connector.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Append { dataset: String, items: Vec<Value> },
    Update { dataset: String, items: Vec<Value> },
    Clear { dataset: String },
}

#[derive(Debug, Default)]
pub struct MemoryConnector {
    datasets: Mutex<HashMap<String, Vec<Value>>>,
    system: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<Call>>,
    env: Map<String, Value>,
    fail_appends: AtomicBool,
    fail_updates: AtomicBool,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose `Sources` dataset holds `sources`.
    pub fn with_sources(sources: Vec<Value>) -> Self {
        let c = Self::new();
        c.insert(SOURCES, sources);
        c
    }

    pub fn with_env(mut self, env: Map<String, Value>) -> Self {
        self.env = env;
        self
    }

    /// Seed rows directly (not recorded as a call).
    pub fn insert(&self, dataset: &str, rows: Vec<Value>) {
        let mut d = self.datasets.lock().expect("memory connector mutex poisoned");
        d.entry(dataset.to_string()).or_default().extend(rows);
    }

    /// Make every following append fail, to simulate a storage outage.
    pub fn fail_appends(&self, on: bool) {
        self.fail_appends.store(on, Ordering::SeqCst);
    }

    /// Make every following update fail.
    pub fn fail_updates(&self, on: bool) {
        self.fail_updates.store(on, Ordering::SeqCst);
    }

    pub fn rows(&self, dataset: &str) -> Vec<Value> {
        let d = self.datasets.lock().expect("memory connector mutex poisoned");
        d.get(dataset).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("memory connector mutex poisoned").clone()
    }

    /// Sizes of the append calls made to `dataset`, in order.
    pub fn append_sizes(&self, dataset: &str) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Append { dataset: d, items } if d == dataset => Some(items.len()),
                _ => None,
            })
            .collect()
    }

    /// Number of update calls made to `dataset`.
    pub fn update_count(&self, dataset: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Update { dataset: d, .. } if d == dataset))
            .count()
    }

    fn record(&self, call: Call) -> Result<()> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("memory connector mutex poisoned"))?
            .push(call);
        Ok(())
    }
}

fn record_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn get_data_list(&self, dataset: &str, options: &DataOptions) -> Result<Vec<Value>> {
        let filters = parse_all(&options.filters)?;
        let d = self
            .datasets
            .lock()
            .map_err(|_| anyhow!("memory connector mutex poisoned"))?;
        Ok(d.get(dataset)
            .map(|rows| {
                rows.iter()
                    .filter(|r| matches_all(r, &filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_data_list(&self, dataset: &str, items: Vec<Value>, _options: &DataOptions) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            anyhow::bail!("append to {dataset} rejected");
        }
        self.record(Call::Append {
            dataset: dataset.to_string(),
            items: items.clone(),
        })?;
        let mut d = self
            .datasets
            .lock()
            .map_err(|_| anyhow!("memory connector mutex poisoned"))?;
        d.entry(dataset.to_string()).or_default().extend(items);
        Ok(())
    }

    async fn update_data_list(&self, dataset: &str, items: Vec<Value>, _options: &DataOptions) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            anyhow::bail!("update of {dataset} rejected");
        }
        {
            let mut d = self
                .datasets
                .lock()
                .map_err(|_| anyhow!("memory connector mutex poisoned"))?;
            let rows = d.entry(dataset.to_string()).or_default();
            // Resolve every target first so a bad item leaves the dataset untouched.
            let mut slots = Vec::with_capacity(items.len());
            for item in &items {
                let id = record_id(item).ok_or_else(|| anyhow!("update item in {dataset} has no id"))?;
                let pos = rows
                    .iter()
                    .position(|r| record_id(r) == Some(id))
                    .ok_or_else(|| anyhow!("no record with id {id:?} in {dataset}"))?;
                slots.push(pos);
            }
            for (pos, item) in slots.into_iter().zip(&items) {
                rows[pos] = item.clone();
            }
        }
        self.record(Call::Update {
            dataset: dataset.to_string(),
            items,
        })
    }

    async fn clear_data_list(&self, dataset: &str) -> Result<()> {
        {
            let mut d = self
                .datasets
                .lock()
                .map_err(|_| anyhow!("memory connector mutex poisoned"))?;
            d.remove(dataset);
        }
        self.record(Call::Clear {
            dataset: dataset.to_string(),
        })
    }

    fn get_env_vars(&self) -> Result<Map<String, Value>> {
        Ok(self.env.clone())
    }

    async fn get_system_var(&self, key: &str) -> Result<Option<String>> {
        let s = self
            .system
            .lock()
            .map_err(|_| anyhow!("memory connector mutex poisoned"))?;
        Ok(s.get(key).cloned())
    }

    async fn set_system_var(&self, key: &str, value: &str) -> Result<()> {
        let mut s = self
            .system
            .lock()
            .map_err(|_| anyhow!("memory connector mutex poisoned"))?;
        s.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
