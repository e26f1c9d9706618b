//! Ingest stage: one worker per channel, reading raw bytes into pooled frames.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::frame::{FramePool, PooledFrame};
use super::queue::QueueProducer;
use super::worker::{IdleBackoff, StageContext};
use crate::channel::{is_idle_error, BoxedChannel};
use crate::config::ChannelConfig;

/// Per-channel record kept for the lifetime of the processor.
#[derive(Debug)]
pub struct ChannelContext {
    pub index: usize,
    pub config: ChannelConfig,
    bytes_received: AtomicU64,
    frames: AtomicU64,
    read_errors: AtomicU64,
    dropped: AtomicU64,
}

/// Counters of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    pub device: String,
    pub bytes_received: u64,
    pub frames: u64,
    pub read_errors: u64,
    pub dropped: u64,
}

impl ChannelContext {
    pub fn new(index: usize, config: ChannelConfig) -> Self {
        Self {
            index,
            config,
            bytes_received: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn device(&self) -> &str {
        &self.config.device
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            device: self.config.device.clone(),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        self.bytes_received.store(0, Ordering::Relaxed);
        self.frames.store(0, Ordering::Relaxed);
        self.read_errors.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
    }
}

pub(crate) struct IngestWorker {
    pub channel: Arc<ChannelContext>,
    pub reader: BoxedChannel,
    pub output: QueueProducer<PooledFrame>,
    pub pool: Arc<FramePool>,
    pub ctx: Arc<StageContext>,
    pub read_retry_delay: Duration,
}

impl IngestWorker {
    pub fn run(mut self) {
        info!("Ingest worker started for {}", self.channel.device());
        let mut backoff = IdleBackoff::new(self.ctx.idle_wait);
        // Reused across idle reads so an idle channel does not churn the pool
        let mut spare: Option<PooledFrame> = None;

        while !self.ctx.should_stop() {
            let mut frame = spare.take().unwrap_or_else(|| self.pool.acquire());

            match self.reader.read(&mut frame.buffer_mut()[..]) {
                Ok(0) => {
                    spare = Some(frame);
                    backoff.idle();
                }
                Ok(n) => {
                    backoff.reset();
                    let started = Instant::now();
                    frame.set_len(n);
                    frame.arrival = Some(started);
                    frame.channel = self.channel.index;
                    self.ctx.stats.record_received(n);
                    self.channel.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                    self.channel.frames.fetch_add(1, Ordering::Relaxed);

                    if self.output.try_push(frame).is_err() {
                        // The rejected frame goes straight back to the pool
                        self.ctx.stats.record_drop();
                        self.channel.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("Parse queue full, dropped frame from {}", self.channel.device());
                    }
                    self.ctx.stats.record_busy(started.elapsed());
                }
                Err(e) if is_idle_error(&e) => {
                    spare = Some(frame);
                    backoff.idle();
                }
                Err(e) => {
                    spare = Some(frame);
                    self.ctx.stats.record_read_error();
                    self.channel.read_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Read error on {}: {}", self.channel.device(), e);
                    thread::sleep(self.read_retry_delay);
                }
            }
        }
        debug!("Ingest worker for {} stopped", self.channel.device());
    }
}
