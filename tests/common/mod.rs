// tests/common/mod.rs
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use gather_engine::types::{GatherResult, GathererResponse, PassContext, Source, SourceContext};
use gather_engine::{Engine, EngineConfig, Extension, Gatherer, MemoryConnector, Registry, RunOptions};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn fixture_source(id: &str, status: &str) -> Value {
    json!({"id": id, "gatherer": "fixture", "fixture": {"run": {"status": status}}})
}

pub fn fixture_sources(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| fixture_source(&format!("s{i:02}"), "RETRIEVED"))
        .collect()
}

pub fn config(gatherers: &[&str], extensions: &[&str]) -> EngineConfig {
    EngineConfig {
        gatherers: gatherers.iter().map(|s| s.to_string()).collect(),
        extensions: extensions.iter().map(|s| s.to_string()).collect(),
        quiet: true,
        ..EngineConfig::default()
    }
}

pub fn engine(conn: Arc<MemoryConnector>, cfg: EngineConfig, registry: Registry) -> Engine {
    Engine::builder(cfg)
        .connector(conn)
        .registry(registry)
        .build()
        .expect("engine should build")
}

/// Ids of every item appended to `dataset`, in call order.
pub fn appended_ids(conn: &MemoryConnector, dataset: &str) -> Vec<String> {
    conn.calls()
        .into_iter()
        .filter_map(|c| match c {
            gather_engine::connector::memory::Call::Append { dataset: d, items } if d == dataset => Some(items),
            _ => None,
        })
        .flatten()
        .filter_map(|v| v["id"].as_str().map(str::to_string))
        .collect()
}

/// Gatherer returning a fixed response, or failing with a fixed message.
pub struct Canned(pub std::result::Result<GathererResponse, String>);

impl Canned {
    pub fn ok(resp: GathererResponse) -> Arc<dyn Gatherer> {
        Arc::new(Canned(Ok(resp)))
    }
    pub fn err(msg: &str) -> Arc<dyn Gatherer> {
        Arc::new(Canned(Err(msg.to_string())))
    }
}

#[async_trait]
impl Gatherer for Canned {
    async fn run(&self, _source: &Source, _options: &RunOptions) -> Result<GathererResponse> {
        match &self.0 {
            Ok(r) => Ok(r.clone()),
            Err(m) => anyhow::bail!("{m}"),
        }
    }
}

/// Polling gatherer: `run` submits, `retrieve_batch` completes once `ready`.
#[derive(Default)]
pub struct Poller {
    pub ready: AtomicBool,
    pub batch_calls: AtomicUsize,
    pub batch_sizes: Mutex<Vec<usize>>,
}

#[async_trait]
impl Gatherer for Poller {
    async fn run(&self, _source: &Source, _options: &RunOptions) -> Result<GathererResponse> {
        Ok(GathererResponse::submitted())
    }

    async fn retrieve_batch(&self, results: &[GatherResult], _options: &RunOptions) -> Result<Vec<GathererResponse>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(results.len());
        let ready = self.ready.load(Ordering::SeqCst);
        Ok(results
            .iter()
            .map(|r| {
                if ready {
                    GathererResponse::retrieved(json!({ "source": r.source_id }))
                } else {
                    GathererResponse::submitted()
                }
            })
            .collect())
    }
}

/// Records every hook invocation as `hook` or `hook:source`.
#[derive(Default)]
pub struct Recorder(pub Mutex<Vec<String>>);

impl Recorder {
    fn log(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Extension for Recorder {
    fn before_all_runs(&self, _ctx: &mut PassContext<'_>, _o: &RunOptions) -> Result<()> {
        self.log("beforeAllRuns".into());
        Ok(())
    }
    fn before_run(&self, ctx: &mut SourceContext<'_>, _o: &RunOptions) -> Result<()> {
        self.log(format!("beforeRun:{}", ctx.source.id));
        Ok(())
    }
    fn after_run(&self, ctx: &mut SourceContext<'_>, _o: &RunOptions) -> Result<()> {
        self.log(format!("afterRun:{}", ctx.source.id));
        Ok(())
    }
    fn after_all_runs(&self, ctx: &mut PassContext<'_>, _o: &RunOptions) -> Result<()> {
        self.log(format!("afterAllRuns:{}", ctx.results.len()));
        Ok(())
    }
    fn before_all_retrieves(&self, _ctx: &mut PassContext<'_>, _o: &RunOptions) -> Result<()> {
        self.log("beforeAllRetrieves".into());
        Ok(())
    }
    fn before_retrieve(&self, ctx: &mut SourceContext<'_>, _o: &RunOptions) -> Result<()> {
        self.log(format!("beforeRetrieve:{}", ctx.source.id));
        Ok(())
    }
    fn after_retrieve(&self, ctx: &mut SourceContext<'_>, _o: &RunOptions) -> Result<()> {
        self.log(format!("afterRetrieve:{}", ctx.source.id));
        Ok(())
    }
    fn after_all_retrieves(&self, _ctx: &mut PassContext<'_>, _o: &RunOptions) -> Result<()> {
        self.log("afterAllRetrieves".into());
        Ok(())
    }
}

/// Fails `before_run` and `after_run` for every source.
pub struct Faulty;

impl Extension for Faulty {
    fn before_run(&self, _ctx: &mut SourceContext<'_>, _o: &RunOptions) -> Result<()> {
        anyhow::bail!("nope")
    }
    fn after_run(&self, _ctx: &mut SourceContext<'_>, _o: &RunOptions) -> Result<()> {
        anyhow::bail!("still nope")
    }
}
