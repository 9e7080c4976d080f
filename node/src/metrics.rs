//! # Prometheus Metrics
//!
//! Operational metrics for the indexer, scraped at `/metrics` on the
//! metrics port. Everything lives in a dedicated [`prometheus::Registry`]
//! under the `chainreg` prefix.
//!
//! [`IndexerMetrics`] is handed to the [`LookupManager`] as its
//! [`SyncObserver`], so every pass is recorded, whether it comes from the
//! background loop or from an RPC call.
//!
//! [`LookupManager`]: chainreg_protocol::lookup::LookupManager

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use chainreg_protocol::lookup::{PassReport, SyncError, SyncObserver};

/// All metric handles for the node.
#[derive(Clone)]
pub struct IndexerMetrics {
    registry: Registry,
    /// Height of the last indexed block.
    pub indexed_height: IntGauge,
    /// Number of live registry entries.
    pub registry_entries: IntGauge,
    /// Completed update and rebuild passes.
    pub sync_passes_total: IntCounter,
    /// Passes that ended in an error, excluding "already indexing".
    pub sync_errors_total: IntCounter,
    /// Blocks applied to the table.
    pub blocks_indexed_total: IntCounter,
    /// Wall-clock duration of completed passes.
    pub sync_duration_seconds: Histogram,
}

impl IndexerMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("chainreg".into()), None)
            .expect("failed to create prometheus registry");

        let indexed_height = IntGauge::new("indexed_height", "Height of the last indexed block")
            .expect("metric creation");
        registry
            .register(Box::new(indexed_height.clone()))
            .expect("metric registration");

        let registry_entries =
            IntGauge::new("registry_entries", "Number of live registry entries")
                .expect("metric creation");
        registry
            .register(Box::new(registry_entries.clone()))
            .expect("metric registration");

        let sync_passes_total = IntCounter::new(
            "sync_passes_total",
            "Total number of completed sync and rebuild passes",
        )
        .expect("metric creation");
        registry
            .register(Box::new(sync_passes_total.clone()))
            .expect("metric registration");

        let sync_errors_total =
            IntCounter::new("sync_errors_total", "Total number of failed sync passes")
                .expect("metric creation");
        registry
            .register(Box::new(sync_errors_total.clone()))
            .expect("metric registration");

        let blocks_indexed_total = IntCounter::new(
            "blocks_indexed_total",
            "Total number of blocks applied to the registry",
        )
        .expect("metric creation");
        registry
            .register(Box::new(blocks_indexed_total.clone()))
            .expect("metric registration");

        let sync_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "sync_duration_seconds",
                "Duration of completed sync passes in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(sync_duration_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            indexed_height,
            registry_entries,
            sync_passes_total,
            sync_errors_total,
            blocks_indexed_total,
            sync_duration_seconds,
        }
    }

    /// Encodes all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for IndexerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexerMetrics {
    /// Records where the index stands after a pass, failed or not.
    fn record_progress(&self, report: &PassReport) {
        self.blocks_indexed_total.inc_by(report.blocks_applied);
        self.indexed_height.set(report.height as i64);
        self.registry_entries.set(report.entries as i64);
    }
}

impl SyncObserver for IndexerMetrics {
    fn pass_completed(&self, report: &PassReport) {
        self.sync_passes_total.inc();
        self.record_progress(report);
        self.sync_duration_seconds
            .observe(report.duration.as_secs_f64());
    }

    fn pass_failed(&self, report: &PassReport, error: &SyncError) {
        self.record_progress(report);
        if !matches!(error, SyncError::AlreadyIndexing) {
            self.sync_errors_total.inc();
        }
    }
}

pub type SharedMetrics = Arc<IndexerMetrics>;

/// Renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

/// Router for the metrics port.
pub fn metrics_router(metrics: SharedMetrics) -> axum::Router {
    axum::Router::new()
        .route("/metrics", axum::routing::get(metrics_handler))
        .with_state(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainreg_protocol::codec::EntryValue;
    use chainreg_protocol::config::{CoinParams, Network};
    use chainreg_protocol::daemon::MemoryDaemon;
    use chainreg_protocol::lookup::LookupManager;
    use chainreg_protocol::operation::{Operation, OperationKind};
    use std::time::Duration;

    fn report(blocks: u64, height: u64, entries: usize) -> PassReport {
        PassReport {
            rebuild: false,
            blocks_applied: blocks,
            operations_applied: 0,
            height,
            entries,
            duration: Duration::from_millis(20),
        }
    }

    #[test]
    fn completed_passes_update_gauges_and_counters() {
        let metrics = IndexerMetrics::new();
        metrics.pass_completed(&report(4, 104, 3));
        metrics.pass_completed(&report(2, 106, 5));

        assert_eq!(metrics.sync_passes_total.get(), 2);
        assert_eq!(metrics.blocks_indexed_total.get(), 6);
        assert_eq!(metrics.indexed_height.get(), 106);
        assert_eq!(metrics.registry_entries.get(), 5);
        assert_eq!(metrics.sync_duration_seconds.get_sample_count(), 2);
    }

    #[test]
    fn contention_is_not_counted_as_failure() {
        let metrics = IndexerMetrics::new();
        metrics.pass_failed(&report(0, 0, 0), &SyncError::AlreadyIndexing);
        assert_eq!(metrics.sync_errors_total.get(), 0);

        metrics.pass_failed(&report(0, 0, 0), &SyncError::ShuttingDown);
        assert_eq!(metrics.sync_errors_total.get(), 1);
    }

    #[tokio::test]
    async fn aborted_pass_still_records_applied_blocks() {
        let daemon = Arc::new(MemoryDaemon::new());
        let op = Operation::new(
            b"early".to_vec(),
            "alice",
            0,
            100,
            OperationKind::Create {
                value: EntryValue::Ipv4([1, 1, 1, 1]),
            },
        );
        let tx = daemon
            .metadata_transaction("alice", &op.to_metadata().unwrap(), 100, None)
            .unwrap();
        daemon.push_block(vec![tx]);
        daemon.mine_empty(7);
        daemon.fail_at(Some(4));

        let metrics = Arc::new(IndexerMetrics::new());
        let params = CoinParams {
            maturity_depth: 2,
            ..Network::Regtest.params()
        };
        let manager = LookupManager::new(daemon.clone(), params).with_observer(metrics.clone());

        assert!(manager.update_lookup().await.is_err());
        assert_eq!(manager.height().await, 3);
        assert_eq!(metrics.indexed_height.get(), 3);
        assert_eq!(metrics.registry_entries.get(), 1);
        assert_eq!(metrics.blocks_indexed_total.get(), 3);
        assert_eq!(metrics.sync_errors_total.get(), 1);
        assert_eq!(metrics.sync_passes_total.get(), 0);

        daemon.fail_at(None);
        assert!(manager.update_lookup().await.unwrap());
        assert_eq!(metrics.indexed_height.get(), 6);
        assert_eq!(metrics.blocks_indexed_total.get(), 6);
    }

    #[test]
    fn encoded_output_uses_prefix() {
        let metrics = IndexerMetrics::new();
        metrics.pass_completed(&report(1, 1, 1));
        let text = metrics.encode().unwrap();

        assert!(text.contains("chainreg_indexed_height 1"));
        assert!(text.contains("chainreg_sync_passes_total 1"));
        assert!(text.contains("chainreg_sync_duration_seconds_bucket"));
    }
}
