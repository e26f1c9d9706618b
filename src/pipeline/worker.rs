//! Worker threads and the helpers every stage loop shares.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use super::queue::QueueProducer;
use crate::constants::timeouts::IDLE_SPINS;
use crate::error::Result;
use crate::platform::{AffinityManager, Placement, ThermalState};
use crate::stats::PipelineStats;

/// Named OS threads owned by one pipeline run.
pub struct WorkerPool {
    affinity: Arc<AffinityManager>,
    workers: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    pub fn new(affinity: Arc<AffinityManager>) -> Self {
        Self {
            affinity,
            workers: Vec::new(),
        }
    }

    /// Start `f` on a new thread placed according to `placement`.
    pub fn spawn<F>(&mut self, name: impl Into<String>, placement: Placement, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let handle = self.affinity.spawn_with_affinity(name.clone(), placement, f)?;
        debug!("Spawned worker {}", name);
        self.workers.push((name, handle));
        Ok(())
    }

    /// Pin the calling thread to `core_id`; false if unsupported or refused.
    pub fn pin(&self, core_id: usize) -> bool {
        self.affinity.pin(core_id)
    }

    /// Wait for every worker and return how many exited cleanly.
    pub fn join_all(&mut self) -> usize {
        let mut clean = 0;
        for (name, handle) in self.workers.drain(..) {
            match handle.join() {
                Ok(()) => clean += 1,
                Err(_) => error!("Worker {} panicked", name),
            }
        }
        clean
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

/// State shared by all stage workers of one run.
pub struct StageContext {
    /// Cooperative cancellation flag checked at the top of every loop.
    pub stop: Arc<AtomicBool>,
    pub stats: Arc<PipelineStats>,
    pub thermal: Arc<ThermalState>,
    /// Add one idle wait per item while throttled.
    pub throttle_stages: bool,
    pub idle_wait: Duration,
    pub output_retry_attempts: u32,
}

impl StageContext {
    #[inline]
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Slow the calling stage down while the board is over temperature.
    #[inline]
    pub fn throttle_pause(&self) {
        if self.throttle_stages && self.thermal.is_throttled() {
            thread::sleep(self.idle_wait);
        }
    }

    /// Push `item`, retrying a bounded number of times while the queue is full.
    ///
    /// Returns false when the item was dropped; the drop is counted.
    pub fn push_with_retry<T>(&self, output: &mut QueueProducer<T>, item: T) -> bool {
        let mut item = item;
        let mut attempts = 0;
        loop {
            match output.try_push(item) {
                Ok(()) => return true,
                Err(back) => {
                    attempts += 1;
                    if attempts > self.output_retry_attempts || self.should_stop() {
                        self.stats.record_drop();
                        return false;
                    }
                    item = back;
                    thread::sleep(self.idle_wait);
                }
            }
        }
    }
}

/// Spin briefly, then sleep, while a worker has nothing to do.
pub struct IdleBackoff {
    spins: u32,
    idle_wait: Duration,
}

impl IdleBackoff {
    pub fn new(idle_wait: Duration) -> Self {
        Self { spins: 0, idle_wait }
    }

    #[inline]
    pub fn idle(&mut self) {
        if self.spins < IDLE_SPINS {
            self.spins += 1;
            std::hint::spin_loop();
        } else {
            thread::sleep(self.idle_wait);
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.spins = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::queue::PipelineQueue;
    use std::sync::atomic::AtomicUsize;

    fn context(retries: u32) -> StageContext {
        StageContext {
            stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(PipelineStats::new()),
            thermal: Arc::new(ThermalState::default()),
            throttle_stages: false,
            idle_wait: Duration::from_micros(10),
            output_retry_attempts: retries,
        }
    }

    #[test]
    fn test_push_with_retry_drops_when_full() {
        let ctx = context(3);
        let (mut tx, mut rx) = PipelineQueue::with_capacity::<u32>(2).unwrap();
        assert!(ctx.push_with_retry(&mut tx, 1));
        assert!(!ctx.push_with_retry(&mut tx, 2));
        assert_eq!(ctx.stats.snapshot().dropped_frames, 1);
        assert_eq!(rx.try_pop(), Some(1));
        assert!(ctx.push_with_retry(&mut tx, 3));
    }

    #[test]
    fn test_push_with_retry_succeeds_after_drain() {
        let ctx = context(10_000);
        let (mut tx, mut rx) = PipelineQueue::with_capacity::<u32>(2).unwrap();
        tx.try_push(1).unwrap();

        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            rx.try_pop()
        });
        assert!(ctx.push_with_retry(&mut tx, 2));
        assert_eq!(consumer.join().unwrap(), Some(1));
        assert_eq!(ctx.stats.snapshot().dropped_frames, 0);
    }

    #[test]
    fn test_pool_runs_and_joins() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(Arc::new(AffinityManager::disabled()));
        for i in 0..3 {
            let counter = Arc::clone(&counter);
            pool.spawn(format!("w-{}", i), Placement::Unpinned, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.join_all(), 3);
        assert!(pool.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!pool.pin(0));
    }

    #[test]
    fn test_throttle_pause_only_when_enabled() {
        let mut ctx = context(0);
        ctx.thermal.record(95.0, 80.0);
        ctx.throttle_pause();
        ctx.throttle_stages = true;
        ctx.idle_wait = Duration::from_millis(2);
        let start = std::time::Instant::now();
        ctx.throttle_pause();
        assert!(start.elapsed() >= Duration::from_millis(2));
    }
}
