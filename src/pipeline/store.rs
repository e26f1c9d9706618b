//! Store stage: hands encoded frames to the storage manager.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::frame::PooledFrame;
use super::queue::QueueConsumer;
use super::worker::{IdleBackoff, StageContext};
use crate::storage::{StorageManager, StoreRequest};

pub(crate) struct StoreWorker {
    pub lane: usize,
    pub input: QueueConsumer<PooledFrame>,
    pub ctx: Arc<StageContext>,
    pub storage: Arc<StorageManager>,
    /// Device id per channel index.
    pub devices: Arc<[String]>,
}

impl StoreWorker {
    pub fn run(mut self) {
        info!("Store worker {} started", self.lane);
        let mut backoff = IdleBackoff::new(self.ctx.idle_wait);

        while !self.ctx.should_stop() {
            let Some(frame) = self.input.try_pop() else {
                backoff.idle();
                continue;
            };
            backoff.reset();

            let started = Instant::now();
            self.store_frame(&frame);
            self.ctx.stats.record_busy(started.elapsed());
            self.ctx.throttle_pause();
        }
        debug!("Store worker {} stopped", self.lane);
    }

    fn store_frame(&self, frame: &PooledFrame) {
        let Some(metadata) = frame.metadata.as_deref() else {
            self.ctx.stats.record_storage_error();
            warn!("Frame reached Store without metadata");
            return;
        };
        let client = self
            .devices
            .get(frame.channel)
            .map(String::as_str)
            .unwrap_or("unknown");

        let request = StoreRequest {
            metadata,
            client,
            packed: frame.bytes(),
            original: frame.original.as_deref(),
        };
        match self.storage.enqueue(request) {
            Ok(()) => self.ctx.stats.record_stored(frame.arrival),
            Err(e) => {
                self.ctx.stats.record_storage_error();
                warn!("Failed to store sequence {}: {}", metadata.sequence_number, e);
            }
        }
    }
}
