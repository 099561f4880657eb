//! Counters and timings for passes, described once per process.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const SOURCES_TOTAL: &str = "gather_sources_total";
pub const RESULTS_TOTAL: &str = "gather_results_total";
pub const GATHERER_ERRORS_TOTAL: &str = "gather_gatherer_errors_total";
pub const EXTENSION_ERRORS_TOTAL: &str = "gather_extension_errors_total";
pub const FLUSH_TOTAL: &str = "gather_flush_total";
pub const RETRIEVE_UPDATES_TOTAL: &str = "gather_retrieve_updates_total";
pub const INVOKE_MS: &str = "gather_invoke_ms";
pub const LAST_PASS_TS: &str = "gather_last_pass_ts";

/// One-time metrics registration (so series show up on scrape).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(SOURCES_TOTAL, "Sources processed by execution passes.");
        describe_counter!(RESULTS_TOTAL, "Results produced, labelled by overall status.");
        describe_counter!(
            GATHERER_ERRORS_TOTAL,
            "Gatherer invocations that ended in ERROR."
        );
        describe_counter!(
            EXTENSION_ERRORS_TOTAL,
            "Extension hook failures isolated by the hook runner."
        );
        describe_counter!(FLUSH_TOTAL, "Append calls issued to the destination.");
        describe_counter!(
            RETRIEVE_UPDATES_TOTAL,
            "Results rewritten by the retrieval pass."
        );
        describe_histogram!(INVOKE_MS, "Gatherer invocation time in milliseconds.");
        describe_gauge!(LAST_PASS_TS, "Unix ts when the last pass finished.");
    });
}

/// Install the Prometheus recorder for this process and return a handle
/// whose `render()` yields the exposition text.
pub fn install_prometheus() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    ensure_metrics_described();
    Ok(handle)
}
