//! Prometheus export of pipeline statistics.
//!
//! The processor itself keeps its own atomic counters; this module only mirrors
//! a [`StatsSnapshot`] into the `metrics` facade as gauges so an installed
//! exporter can serve them.

use std::net::SocketAddr;

use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::error::{ProcessorError, Result};
use crate::pipeline::FramePoolStats;
use crate::stats::StatsSnapshot;

/// Install a Prometheus exporter serving `/metrics` on `addr`.
///
/// Must be called from inside a Tokio runtime.
pub fn install_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ProcessorError::Configuration(format!("metrics exporter on {}: {}", addr, e)))?;

    register_metrics();
    info!("Prometheus exporter listening on {}", addr);
    Ok(())
}

/// Register all metrics with their descriptions.
fn register_metrics() {
    describe_gauge!("dna_bytes_received", "Bytes read from all channels");
    describe_gauge!("dna_bytes_processed", "Nucleotides encoded");
    describe_gauge!("dna_sequences_processed", "Sequences handed to storage");
    describe_gauge!("dna_validation_errors", "Payloads rejected by the validator");
    describe_gauge!("dna_parsing_errors", "Malformed containers");
    describe_gauge!("dna_storage_errors", "Failed storage writes");
    describe_gauge!("dna_dropped_frames", "Frames dropped on a full queue");
    describe_gauge!("dna_read_errors", "Failed channel reads");
    describe_gauge!("dna_throughput_kbps", "Processed KiB per second since start");
    describe_gauge!("dna_avg_latency_ms", "Mean ingest-to-store latency");
    describe_gauge!("dna_cpu_utilization_percent", "Worker busy time over all cores");
    describe_gauge!("dna_temperature_celsius", "Last sampled SoC temperature");
    describe_gauge!("dna_throttled", "1 while the thermal threshold is exceeded");
    describe_gauge!("dna_frame_pool_available", "Idle frames in the pool");
    describe_gauge!("dna_frame_pool_created", "Frames allocated since start");
}

/// Mirror a snapshot into gauges.
pub fn record_snapshot(snapshot: &StatsSnapshot) {
    gauge!("dna_bytes_received").set(snapshot.bytes_received as f64);
    gauge!("dna_bytes_processed").set(snapshot.bytes_processed as f64);
    gauge!("dna_sequences_processed").set(snapshot.sequences_processed as f64);
    gauge!("dna_validation_errors").set(snapshot.validation_errors as f64);
    gauge!("dna_parsing_errors").set(snapshot.parsing_errors as f64);
    gauge!("dna_storage_errors").set(snapshot.storage_errors as f64);
    gauge!("dna_dropped_frames").set(snapshot.dropped_frames as f64);
    gauge!("dna_read_errors").set(snapshot.read_errors as f64);
    gauge!("dna_throughput_kbps").set(snapshot.throughput_kbps);
    gauge!("dna_avg_latency_ms").set(snapshot.avg_latency_ms);
    gauge!("dna_cpu_utilization_percent").set(snapshot.cpu_utilization);
}

/// Record thermal state.
pub fn record_thermal(temperature: Option<f32>, throttled: bool) {
    if let Some(t) = temperature {
        gauge!("dna_temperature_celsius").set(t as f64);
    }
    gauge!("dna_throttled").set(if throttled { 1.0 } else { 0.0 });
}

/// Record frame pool statistics.
pub fn record_pool_stats(stats: &FramePoolStats) {
    gauge!("dna_frame_pool_available").set(stats.available as f64);
    gauge!("dna_frame_pool_created").set(stats.total_created as f64);
}
