//! Pipeline-wide counters.
//!
//! Every counter is a cache-padded `AtomicU64` updated with relaxed ordering by
//! the stage that owns it. Readers take a [`StatsSnapshot`] without
//! coordinating with the workers, so figures from different counters may be a
//! few items apart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use serde::{Deserialize, Serialize};

type Counter = CachePadded<AtomicU64>;

fn counter() -> Counter {
    CachePadded::new(AtomicU64::new(0))
}

/// Live counters shared by all stages.
pub struct PipelineStats {
    started: Instant,
    bytes_received: Counter,
    bytes_processed: Counter,
    sequences_processed: Counter,
    validation_errors: Counter,
    parsing_errors: Counter,
    storage_errors: Counter,
    dropped_frames: Counter,
    read_errors: Counter,
    frames_parsed: Counter,
    frames_encoded: Counter,
    frames_stored: Counter,
    latency_ns_total: Counter,
    latency_samples: Counter,
    busy_ns: Counter,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStats {
    /// Zeroed counters with the clock starting now.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            bytes_received: counter(),
            bytes_processed: counter(),
            sequences_processed: counter(),
            validation_errors: counter(),
            parsing_errors: counter(),
            storage_errors: counter(),
            dropped_frames: counter(),
            read_errors: counter(),
            frames_parsed: counter(),
            frames_encoded: counter(),
            frames_stored: counter(),
            latency_ns_total: counter(),
            latency_samples: counter(),
            busy_ns: counter(),
        }
    }

    #[inline]
    fn bump(counter: &Counter, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Ingest read `n` bytes from a channel.
    pub fn record_received(&self, n: usize) {
        Self::bump(&self.bytes_received, n as u64);
    }

    /// A frame was dropped because the next queue was full.
    pub fn record_drop(&self) {
        Self::bump(&self.dropped_frames, 1);
    }

    /// A channel read failed.
    pub fn record_read_error(&self) {
        Self::bump(&self.read_errors, 1);
    }

    /// Payload failed alphabet validation.
    pub fn record_validation_error(&self) {
        Self::bump(&self.validation_errors, 1);
    }

    /// Container was structurally malformed.
    pub fn record_parsing_error(&self) {
        Self::bump(&self.parsing_errors, 1);
    }

    /// A storage write or flush failed.
    pub fn record_storage_error(&self) {
        Self::bump(&self.storage_errors, 1);
    }

    /// Parse forwarded a validated payload.
    pub fn record_parsed(&self) {
        Self::bump(&self.frames_parsed, 1);
    }

    /// Encode packed a payload of `n` nucleotides.
    pub fn record_encoded(&self, n: usize) {
        Self::bump(&self.frames_encoded, 1);
        Self::bump(&self.bytes_processed, n as u64);
    }

    /// Store accepted a sequence; `arrival` is the Ingest timestamp.
    pub fn record_stored(&self, arrival: Option<Instant>) {
        Self::bump(&self.frames_stored, 1);
        Self::bump(&self.sequences_processed, 1);
        if let Some(arrival) = arrival {
            Self::bump(&self.latency_ns_total, arrival.elapsed().as_nanos() as u64);
            Self::bump(&self.latency_samples, 1);
        }
    }

    /// A worker spent `elapsed` handling one item.
    pub fn record_busy(&self, elapsed: Duration) {
        Self::bump(&self.busy_ns, elapsed.as_nanos() as u64);
    }

    /// Sequences fully stored so far.
    pub fn sequences_processed(&self) -> u64 {
        self.sequences_processed.load(Ordering::Relaxed)
    }

    /// Time since the counters were created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Copy of all counters plus derived rates.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &Counter| c.load(Ordering::Relaxed);
        let elapsed = self.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();

        let bytes_processed = load(&self.bytes_processed);
        let latency_ns_total = load(&self.latency_ns_total);
        let latency_samples = load(&self.latency_samples);
        let busy_ns = load(&self.busy_ns);

        let throughput_kbps = if elapsed_secs > 0.0 {
            bytes_processed as f64 / 1024.0 / elapsed_secs
        } else {
            0.0
        };
        let avg_latency_ms = if latency_samples > 0 {
            latency_ns_total as f64 / latency_samples as f64 / 1_000_000.0
        } else {
            0.0
        };
        let capacity_ns = elapsed.as_nanos() as f64 * num_cpus::get().max(1) as f64;
        let cpu_utilization = if capacity_ns > 0.0 {
            (busy_ns as f64 / capacity_ns * 100.0).min(100.0)
        } else {
            0.0
        };

        StatsSnapshot {
            bytes_received: load(&self.bytes_received),
            bytes_processed,
            sequences_processed: load(&self.sequences_processed),
            validation_errors: load(&self.validation_errors),
            parsing_errors: load(&self.parsing_errors),
            storage_errors: load(&self.storage_errors),
            dropped_frames: load(&self.dropped_frames),
            read_errors: load(&self.read_errors),
            frames_parsed: load(&self.frames_parsed),
            frames_encoded: load(&self.frames_encoded),
            frames_stored: load(&self.frames_stored),
            latency_ns_total,
            latency_samples,
            busy_ns,
            elapsed_secs,
            throughput_kbps,
            avg_latency_ms,
            cpu_utilization,
        }
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub bytes_received: u64,
    pub bytes_processed: u64,
    pub sequences_processed: u64,
    pub validation_errors: u64,
    pub parsing_errors: u64,
    pub storage_errors: u64,
    pub dropped_frames: u64,
    pub read_errors: u64,
    pub frames_parsed: u64,
    pub frames_encoded: u64,
    pub frames_stored: u64,
    pub latency_ns_total: u64,
    pub latency_samples: u64,
    pub busy_ns: u64,
    /// Seconds since the counters started.
    pub elapsed_secs: f64,
    /// Bytes processed / elapsed seconds, in KiB/s.
    pub throughput_kbps: f64,
    /// Mean Ingest-to-Store latency.
    pub avg_latency_ms: f64,
    /// Worker busy time as a share of all cores over the elapsed time.
    pub cpu_utilization: f64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={}B processed={}B sequences={} throughput={:.2}KB/s latency={:.3}ms cpu={:.1}% \
             validation_errors={} parsing_errors={} storage_errors={} dropped={} read_errors={}",
            self.bytes_received,
            self.bytes_processed,
            self.sequences_processed,
            self.throughput_kbps,
            self.avg_latency_ms,
            self.cpu_utilization,
            self.validation_errors,
            self.parsing_errors,
            self.storage_errors,
            self.dropped_frames,
            self.read_errors
        )
    }
}
