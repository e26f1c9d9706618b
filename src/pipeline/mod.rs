//! The processing pipeline and its lifecycle.
//!
//! Frames flow Ingest → Parse → Encode → Store through single-producer
//! single-consumer queues arranged in lanes. Channel `c` feeds parse queue
//! `c`; parse worker `w` drains every parse queue with `c % lanes == w` and is
//! the only producer of encode queue `w`, which feeds encode worker `w` and
//! store queue `w`. Frames of one channel therefore never change lane and keep
//! their order.

mod encode;
pub mod frame;
pub mod ingest;
mod parse;
pub mod queue;
mod store;
pub mod worker;

pub use frame::{FramePool, FramePoolStats, PooledFrame, RawFrame};
pub use ingest::{ChannelContext, ChannelSnapshot};
pub use queue::{PipelineQueue, QueueConsumer, QueueProducer};
pub use worker::WorkerPool;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use self::encode::EncodeWorker;
use self::ingest::IngestWorker;
use self::parse::ParseWorker;
use self::store::StoreWorker;
use self::worker::StageContext;
use crate::channel::{BoxedChannel, ChannelSource, DeviceChannelSource};
use crate::config::ProcessorConfig;
use crate::constants::layout::MIN_POOL_FRAMES;
use crate::constants::thermal::PERFORMANCE_GOVERNOR;
use crate::error::{ProcessorError, Result};
use crate::platform::{
    AffinityManager, CpuGovernor, Placement, StageKind, SysfsThermalSensor, ThermalSampler,
    ThermalSensor, ThermalState,
};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::storage::StorageManager;

/// Lifecycle state of a [`Processor`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessorState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl ProcessorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ProcessorState::Starting,
            2 => ProcessorState::Running,
            3 => ProcessorState::Stopping,
            _ => ProcessorState::Stopped,
        }
    }
}

/// Cloneable handle for asking a running processor to wind down.
///
/// Setting the flag makes every worker leave its loop after the current item;
/// the owner still calls [`Processor::stop`] to join them and flush storage.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            info!("Shutdown requested");
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Resources that only exist while the processor runs.
struct ActiveRun {
    stop: Arc<AtomicBool>,
    workers: WorkerPool,
    storage: Arc<StorageManager>,
    governor: Option<CpuGovernor>,
}

/// Owns the configuration, the channels and one pipeline run at a time.
pub struct Processor {
    config: ProcessorConfig,
    source: Arc<dyn ChannelSource>,
    sensor: Arc<dyn ThermalSensor>,
    state: AtomicU8,
    stats: Arc<PipelineStats>,
    thermal: Arc<ThermalState>,
    channels: Vec<Arc<ChannelContext>>,
    pool: Option<Arc<FramePool>>,
    storage: Option<Arc<StorageManager>>,
    run: Option<ActiveRun>,
}

impl Processor {
    /// Processor reading real devices and the sysfs temperature sensor.
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        Self::with_source(config, Arc::new(DeviceChannelSource))
    }

    /// Processor reading its channels from `source`.
    pub fn with_source(config: ProcessorConfig, source: Arc<dyn ChannelSource>) -> Result<Self> {
        config.validate()?;
        let sensor: Arc<dyn ThermalSensor> =
            Arc::new(SysfsThermalSensor::new(config.thermal.sensor_path.clone()));
        let channels = config
            .channels
            .iter()
            .enumerate()
            .map(|(index, channel)| Arc::new(ChannelContext::new(index, channel.clone())))
            .collect();

        Ok(Self {
            config,
            source,
            sensor,
            state: AtomicU8::new(ProcessorState::Stopped as u8),
            stats: Arc::new(PipelineStats::new()),
            thermal: Arc::new(ThermalState::default()),
            channels,
            pool: None,
            storage: None,
            run: None,
        })
    }

    /// Replace the temperature sensor.
    pub fn with_sensor(mut self, sensor: Arc<dyn ThermalSensor>) -> Self {
        self.sensor = sensor;
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ProcessorState) {
        debug!("Processor state -> {:?}", state);
        self.state.store(state as u8, Ordering::Release);
    }

    /// Open every channel and the storage, then launch the workers.
    ///
    /// Returns `Ok(None)` without touching anything when the processor is not
    /// stopped. Any failure leaves nothing running and the state `Stopped`.
    pub fn start(&mut self) -> Result<Option<ShutdownHandle>> {
        if self.state() != ProcessorState::Stopped {
            warn!("Start requested while {:?}, ignoring", self.state());
            return Ok(None);
        }
        self.set_state(ProcessorState::Starting);
        info!(
            "Starting processor: {} channels, {} lanes, queue capacity {}",
            self.channels.len(),
            self.config.pipeline.lanes,
            self.config.pipeline.queue_capacity
        );

        match self.launch() {
            Ok(run) => {
                let handle = ShutdownHandle {
                    stop: Arc::clone(&run.stop),
                };
                self.run = Some(run);
                self.set_state(ProcessorState::Running);
                info!("Processor running");
                Ok(Some(handle))
            }
            Err(e) => {
                self.set_state(ProcessorState::Stopped);
                error!("Processor failed to start: {}", e);
                Err(e)
            }
        }
    }

    fn launch(&mut self) -> Result<ActiveRun> {
        // Nothing is spawned until every channel has opened
        let mut readers = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let reader = self
                .source
                .open(&channel.config)
                .map_err(|source| ProcessorError::ChannelOpen {
                    device: channel.config.device.clone(),
                    source,
                })?;
            readers.push(reader);
        }

        let stats = Arc::new(PipelineStats::new());
        let storage = StorageManager::open(self.config.storage.clone(), Arc::clone(&stats))?;
        let pool = FramePool::with_budget(self.config.memory_pool_size, MIN_POOL_FRAMES);

        self.stats = Arc::clone(&stats);
        self.thermal.clear();
        for channel in &self.channels {
            channel.reset();
        }
        self.pool = Some(Arc::clone(&pool));
        self.storage = Some(Arc::clone(&storage));

        let governor = if self.config.enable_performance_mode {
            let governor = CpuGovernor::new(self.config.thermal.cpu_sysfs_root.clone());
            match governor.switch_to(PERFORMANCE_GOVERNOR) {
                Ok(_) => Some(governor),
                Err(e) => {
                    warn!(
                        "Performance mode unavailable at {}: {}",
                        governor.root().display(),
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        let affinity = if self.config.pipeline.enable_affinity {
            Arc::new(AffinityManager::new())
        } else {
            Arc::new(AffinityManager::disabled())
        };
        if affinity.is_affinity_supported() {
            let parse_cores = affinity.recommended_thread_count(StageKind::Parse);
            if self.config.pipeline.lanes > parse_cores {
                warn!(
                    "{} lanes share {} parse cores out of {}",
                    self.config.pipeline.lanes,
                    parse_cores,
                    affinity.core_count()
                );
            }
        }
        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = WorkerPool::new(affinity);

        let spawned = self.spawn_workers(&mut workers, readers, &stop, &stats, &storage, &pool);
        if let Err(e) = spawned {
            stop.store(true, Ordering::Release);
            storage.wake();
            workers.join_all();
            storage.flush();
            if let Some(governor) = &governor {
                governor.restore();
            }
            return Err(e);
        }
        info!("Launched {} workers", workers.len());

        Ok(ActiveRun {
            stop,
            workers,
            storage,
            governor,
        })
    }

    fn spawn_workers(
        &self,
        workers: &mut WorkerPool,
        readers: Vec<BoxedChannel>,
        stop: &Arc<AtomicBool>,
        stats: &Arc<PipelineStats>,
        storage: &Arc<StorageManager>,
        pool: &Arc<FramePool>,
    ) -> Result<()> {
        let pipeline = &self.config.pipeline;
        let lanes = pipeline.lanes;
        let capacity = pipeline.queue_capacity;

        let ctx = Arc::new(StageContext {
            stop: Arc::clone(stop),
            stats: Arc::clone(stats),
            thermal: Arc::clone(&self.thermal),
            throttle_stages: self.config.thermal.throttle_stages,
            idle_wait: pipeline.idle_wait,
            output_retry_attempts: pipeline.output_retry_attempts,
        });

        let mut lane_inputs: Vec<Vec<QueueConsumer<PooledFrame>>> =
            (0..lanes).map(|_| Vec::new()).collect();
        let mut ingest_outputs = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let (tx, rx) = PipelineQueue::with_capacity(capacity)?;
            ingest_outputs.push(tx);
            lane_inputs[channel.index % lanes].push(rx);
        }

        let devices: Arc<[String]> = self
            .channels
            .iter()
            .map(|c| c.config.device.clone())
            .collect();
        // Continue numbering after whatever earlier runs left on disk
        let sequence_counter = Arc::new(AtomicU64::new(storage.last_sequence()));

        // Downstream first so nothing backs up while upstream starts
        for (lane, inputs) in lane_inputs.into_iter().enumerate() {
            let (encode_tx, encode_rx) = PipelineQueue::with_capacity(capacity)?;
            let (store_tx, store_rx) = PipelineQueue::with_capacity(capacity)?;

            let store = StoreWorker {
                lane,
                input: store_rx,
                ctx: Arc::clone(&ctx),
                storage: Arc::clone(storage),
                devices: Arc::clone(&devices),
            };
            workers.spawn(
                format!("dna-store-{}", lane),
                Placement::Stage(StageKind::Store),
                move || store.run(),
            )?;

            let encode = EncodeWorker {
                lane,
                input: encode_rx,
                output: store_tx,
                ctx: Arc::clone(&ctx),
                sequence_counter: Arc::clone(&sequence_counter),
                compute_digest: pipeline.compute_digest,
            };
            workers.spawn(
                format!("dna-encode-{}", lane),
                Placement::Stage(StageKind::Encode),
                move || encode.run(),
            )?;

            let parse = ParseWorker {
                lane,
                inputs,
                output: encode_tx,
                ctx: Arc::clone(&ctx),
                keep_original: self.config.storage.store_original,
            };
            workers.spawn(
                format!("dna-parse-{}", lane),
                Placement::Stage(StageKind::Parse),
                move || parse.run(),
            )?;
        }

        for ((channel, reader), output) in self.channels.iter().zip(readers).zip(ingest_outputs) {
            let placement = channel
                .config
                .core_affinity
                .map_or(Placement::Stage(StageKind::Ingest), Placement::Core);
            let ingest = IngestWorker {
                channel: Arc::clone(channel),
                reader,
                output,
                pool: Arc::clone(pool),
                ctx: Arc::clone(&ctx),
                read_retry_delay: pipeline.read_retry_delay,
            };
            workers.spawn(
                format!("dna-ingest-{}", channel.index),
                placement,
                move || ingest.run(),
            )?;
        }

        let flush_storage = Arc::clone(storage);
        let flush_stop = Arc::clone(stop);
        workers.spawn(
            "dna-flush",
            Placement::Stage(StageKind::Background),
            move || flush_storage.run_flush_loop(&flush_stop),
        )?;

        if self.config.enable_thermal_monitoring {
            let sampler = ThermalSampler::new(
                Arc::clone(&self.sensor),
                Arc::clone(&self.thermal),
                Arc::clone(stats),
                self.config.thermal.threshold_celsius,
                self.config.thermal.sample_interval,
            );
            let sampler_stop = Arc::clone(stop);
            workers.spawn(
                "dna-thermal",
                Placement::Stage(StageKind::Background),
                move || sampler.run(&sampler_stop),
            )?;
        }

        Ok(())
    }

    /// Stop all workers, flush storage and return to `Stopped`.
    ///
    /// Frames still queued are released to the pool unprocessed. Returns false
    /// when the processor was not running.
    pub fn stop(&mut self) -> bool {
        if self.state() != ProcessorState::Running {
            return false;
        }
        let Some(mut run) = self.run.take() else {
            self.set_state(ProcessorState::Stopped);
            return false;
        };
        self.set_state(ProcessorState::Stopping);
        info!("Stopping processor");

        run.stop.store(true, Ordering::Release);
        run.storage.wake();
        let joined = run.workers.join_all();
        let flushed = run.storage.flush();
        if let Some(governor) = run.governor.take() {
            governor.restore();
        }

        self.set_state(ProcessorState::Stopped);
        info!(
            "Processor stopped: {} workers joined, {} writes in final flush",
            joined, flushed
        );
        info!("{}", self.stats.snapshot());
        true
    }

    /// Statistics of the current or most recent run.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Per-channel counters in configuration order.
    pub fn channel_stats(&self) -> Vec<ChannelSnapshot> {
        self.channels.iter().map(|c| c.snapshot()).collect()
    }

    /// Last sampled temperature in °C.
    pub fn current_temperature(&self) -> Option<f32> {
        self.thermal.temperature()
    }

    pub fn is_throttled(&self) -> bool {
        self.thermal.is_throttled()
    }

    /// Storage of the current or most recent run.
    pub fn storage(&self) -> Option<Arc<StorageManager>> {
        self.storage.clone()
    }

    /// Frame pool statistics of the current or most recent run.
    pub fn pool_stats(&self) -> Option<FramePoolStats> {
        self.pool.as_ref().map(|pool| pool.stats())
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel;
    use crate::channel::MemoryChannelSource;
    use crate::config::{ChannelConfig, StorageConfig};
    use crate::platform::FixedSensor;
    use crate::types::SourceFormat;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir, devices: &[&str], lanes: usize) -> ProcessorConfig {
        let mut config = ProcessorConfig::default();
        config.channels = devices.iter().map(|d| ChannelConfig::new(*d)).collect();
        config.memory_pool_size = 1 << 20;
        config.enable_performance_mode = false;
        config.enable_thermal_monitoring = false;
        config.storage = StorageConfig {
            base_path: dir.path().join("out"),
            flush_interval: Duration::from_millis(20),
            ..StorageConfig::default()
        };
        config.pipeline.lanes = lanes;
        config.pipeline.idle_wait = Duration::from_micros(50);
        config.pipeline.enable_affinity = false;
        config
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn test_fasta_end_to_end() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemoryChannelSource::new());
        source.push("mem0", b">seq1\nATCGATCG\n".to_vec());

        let mut processor =
            Processor::with_source(test_config(&dir, &["mem0"], 1), source.clone()).unwrap();
        assert!(processor.start().unwrap().is_some());
        assert!(wait_until(|| processor.stats().sequences_processed == 1));
        assert!(processor.stop());

        let stats = processor.stats();
        assert_eq!(stats.validation_errors, 0);
        assert_eq!(stats.parsing_errors, 0);
        assert_eq!(stats.bytes_received, 15);
        assert_eq!(stats.bytes_processed, 8);

        let storage = processor.storage().unwrap();
        let record = storage.retrieve_encoded(1).unwrap();
        assert_eq!(record.payload, vec![0x1E, 0x1E]);
        assert_eq!(record.header.id, "seq1");
        assert_eq!(record.header.client, "mem0");
        assert_eq!(record.header.format, SourceFormat::Fasta);
        assert_eq!(record.header.length, 8);
        assert_eq!(record.header.checksum, accel::checksum(b"ATCGATCG"));
        assert_eq!(storage.retrieve_decoded(1).unwrap(), b"ATCGATCG");

        let index = storage.read_index().unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].metadata.encoded_length, 2);
    }

    #[test]
    fn test_restart_keeps_earlier_sequences() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemoryChannelSource::new());
        source.push("mem0", b">first\nACGT\n".to_vec());

        let mut processor =
            Processor::with_source(test_config(&dir, &["mem0"], 1), source.clone()).unwrap();
        processor.start().unwrap();
        assert!(wait_until(|| processor.stats().sequences_processed == 1));
        assert!(processor.stop());

        source.push("mem0", b">second\nTTTT\n".to_vec());
        processor.start().unwrap();
        assert!(wait_until(|| processor.stats().sequences_processed == 1));
        assert!(processor.stop());
        assert_eq!(processor.stats().storage_errors, 0);

        let storage = processor.storage().unwrap();
        assert_eq!(storage.last_sequence(), 1);
        assert_eq!(storage.retrieve_encoded(1).unwrap().header.id, "first");
        assert_eq!(storage.retrieve_encoded(2).unwrap().header.id, "second");
        assert_eq!(storage.retrieve_decoded(1).unwrap(), b"ACGT");
        assert_eq!(storage.retrieve_decoded(2).unwrap(), b"TTTT");
        assert_eq!(storage.retrieve_original(2).unwrap(), b">second\nTTTT\n");

        let index = storage.read_index().unwrap();
        let files: Vec<(&str, &str)> = index
            .iter()
            .map(|e| (e.metadata.sequence_id.as_str(), e.file.as_str()))
            .collect();
        assert_eq!(
            files,
            vec![
                ("first", "encoded/0000000001.ich"),
                ("second", "encoded/0000000002.ich")
            ]
        );

        // A fresh processor over the same directory continues the numbering
        source.push("mem0", b">third\nGGGG\n".to_vec());
        let mut next =
            Processor::with_source(test_config(&dir, &["mem0"], 1), source.clone()).unwrap();
        next.start().unwrap();
        assert!(wait_until(|| next.stats().sequences_processed == 1));
        next.stop();
        let storage = next.storage().unwrap();
        assert_eq!(storage.retrieve_encoded(3).unwrap().header.id, "third");
        assert_eq!(storage.read_index().unwrap().len(), 3);
    }

    #[test]
    fn test_read_error_is_counted_and_retried() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemoryChannelSource::new());
        source.push_error("mem0", std::io::ErrorKind::BrokenPipe);
        source.push("mem0", b">after\nACGT\n".to_vec());

        let mut config = test_config(&dir, &["mem0"], 1);
        config.pipeline.read_retry_delay = Duration::from_millis(5);
        let mut processor = Processor::with_source(config, source.clone()).unwrap();
        processor.start().unwrap();
        assert!(wait_until(|| processor.stats().sequences_processed == 1));
        processor.stop();

        let stats = processor.stats();
        assert_eq!(stats.read_errors, 1);
        assert_eq!(stats.dropped_frames, 0);

        let channel = &processor.channel_stats()[0];
        assert_eq!(channel.read_errors, 1);
        assert_eq!(channel.frames, 1);

        let record = processor.storage().unwrap().retrieve_encoded(1).unwrap();
        assert_eq!(record.header.id, "after");
        assert_eq!(record.payload, vec![0x39]);
    }

    #[test]
    fn test_invalid_payload_counts_validation_error() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemoryChannelSource::new());
        source.push("mem0", b">seq1\nATXGATCG\n".to_vec());

        let mut processor =
            Processor::with_source(test_config(&dir, &["mem0"], 1), source.clone()).unwrap();
        processor.start().unwrap();
        assert!(wait_until(|| processor.stats().validation_errors == 1));
        processor.stop();

        let stats = processor.stats();
        assert_eq!(stats.validation_errors, 1);
        assert_eq!(stats.frames_encoded, 0);
        assert_eq!(stats.sequences_processed, 0);
    }

    #[test]
    fn test_double_start_and_stop() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemoryChannelSource::new());
        source.add_device("mem0");

        let mut processor =
            Processor::with_source(test_config(&dir, &["mem0"], 1), source).unwrap();
        assert!(!processor.stop());
        assert_eq!(processor.state(), ProcessorState::Stopped);

        assert!(processor.start().unwrap().is_some());
        assert!(processor.start().unwrap().is_none());
        assert_eq!(processor.state(), ProcessorState::Running);

        assert!(processor.stop());
        assert!(!processor.stop());
        assert_eq!(processor.state(), ProcessorState::Stopped);

        // A stopped processor can run again
        assert!(processor.start().unwrap().is_some());
        assert!(processor.stop());
    }

    #[test]
    fn test_open_failure_leaves_processor_stopped() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemoryChannelSource::new());
        source.add_device("mem0");

        let mut processor =
            Processor::with_source(test_config(&dir, &["mem0", "mem1"], 1), source.clone())
                .unwrap();
        match processor.start() {
            Err(ProcessorError::ChannelOpen { device, .. }) => assert_eq!(device, "mem1"),
            other => panic!("expected ChannelOpen, got {:?}", other.map(|h| h.is_some())),
        }
        assert_eq!(processor.state(), ProcessorState::Stopped);
        assert!(processor.storage().is_none());

        source.add_device("mem1");
        assert!(processor.start().unwrap().is_some());
    }

    #[test]
    fn test_lanes_preserve_every_channel() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemoryChannelSource::new());
        let devices = ["mem0", "mem1", "mem2"];
        for device in devices {
            source.push(device, format!(">{}\nACGTACGT\n", device).into_bytes());
            source.push(device, b"TTTTGGGG\n".to_vec());
        }

        let mut processor =
            Processor::with_source(test_config(&dir, &devices, 2), source.clone()).unwrap();
        processor.start().unwrap();
        assert!(wait_until(|| processor.stats().sequences_processed == 6));
        processor.stop();

        for snapshot in processor.channel_stats() {
            assert_eq!(snapshot.frames, 2, "{}", snapshot.device);
            assert_eq!(snapshot.dropped, 0);
        }

        let index = processor.storage().unwrap().read_index().unwrap();
        assert_eq!(index.len(), 6);
        let mut numbers: Vec<u64> = index.iter().map(|e| e.metadata.sequence_number).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);

        // Per channel, the FASTA record precedes the bare line
        for device in devices {
            let of_channel: Vec<_> = index.iter().filter(|e| e.client == device).collect();
            assert_eq!(of_channel.len(), 2);
            let fasta = of_channel
                .iter()
                .find(|e| e.metadata.source_format == SourceFormat::Fasta)
                .unwrap();
            let bare = of_channel
                .iter()
                .find(|e| e.metadata.source_format != SourceFormat::Fasta)
                .unwrap();
            assert!(fasta.metadata.sequence_number < bare.metadata.sequence_number);
        }
    }

    #[test]
    fn test_shutdown_handle_stops_workers() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemoryChannelSource::new());
        source.add_device("mem0");

        let mut processor =
            Processor::with_source(test_config(&dir, &["mem0"], 1), source.clone()).unwrap();
        let handle = processor.start().unwrap().unwrap();
        handle.request_stop();
        assert!(handle.is_stop_requested());

        // Workers have exited; data pushed now is never read
        std::thread::sleep(Duration::from_millis(50));
        source.push("mem0", b"ACGT".to_vec());
        std::thread::sleep(Duration::from_millis(20));
        assert!(processor.stop());
        assert_eq!(source.pending("mem0"), 1);
        assert_eq!(processor.stats().sequences_processed, 0);
    }

    #[test]
    fn test_thermal_sampling() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemoryChannelSource::new());
        source.add_device("mem0");

        let mut config = test_config(&dir, &["mem0"], 1);
        config.enable_thermal_monitoring = true;
        config.thermal.sample_interval = Duration::from_millis(10);
        config.thermal.threshold_celsius = 80.0;

        let sensor = Arc::new(FixedSensor::new(91.5));
        let mut processor = Processor::with_source(config, source)
            .unwrap()
            .with_sensor(sensor.clone());
        processor.start().unwrap();
        assert!(wait_until(|| processor.is_throttled()));
        assert_eq!(processor.current_temperature(), Some(91.5));

        sensor.set(60.0);
        assert!(wait_until(|| !processor.is_throttled()));
        processor.stop();
    }

    #[test]
    fn test_frames_return_to_pool_after_stop() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemoryChannelSource::new());
        for _ in 0..20 {
            source.push("mem0", b"ACGTACGTACGT".to_vec());
        }

        let mut processor =
            Processor::with_source(test_config(&dir, &["mem0"], 1), source.clone()).unwrap();
        processor.start().unwrap();
        assert!(wait_until(|| processor.stats().sequences_processed == 20));
        processor.stop();

        let pool = processor.pool_stats().unwrap();
        assert_eq!(pool.available, pool.total_created.min(pool.max_size));
    }
}
