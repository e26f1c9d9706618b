//! Fixed-size frame buffers and the lock-free pool that recycles them.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::queue::SegQueue;
use tracing::debug;

use crate::constants::layout::FRAME_CAPACITY;
use crate::types::{SequenceHeader, SequenceMetadata, SourceFormat};

/// One unit of work travelling down the pipeline.
///
/// The byte area is one page minus a cache line; the bookkeeping fields after
/// it spill into one more cache line, so a frame spans 4160 bytes on 64-bit
/// targets. Header and metadata are boxed to keep that tail small. Ingest
/// fills the byte area, Parse compacts the payload to the front and sets the
/// checksum, Encode replaces it with the packed form and attaches metadata.
#[repr(C, align(64))]
pub struct RawFrame {
    data: [u8; FRAME_CAPACITY],
    len: usize,
    /// CRC-32 of the payload, set by Parse.
    pub checksum: Option<u32>,
    /// When Ingest finished reading the bytes.
    pub arrival: Option<Instant>,
    /// Index of the source channel.
    pub channel: usize,
    /// Detected container format.
    pub format: SourceFormat,
    /// Header lifted from the container, if any.
    pub header: Option<Box<SequenceHeader>>,
    /// Container text as received, kept when storage wants it.
    pub original: Option<Vec<u8>>,
    /// Set by Encode.
    pub metadata: Option<Box<SequenceMetadata>>,
}

impl RawFrame {
    fn boxed() -> Box<Self> {
        Box::new(Self {
            data: [0; FRAME_CAPACITY],
            len: 0,
            checksum: None,
            arrival: None,
            channel: 0,
            format: SourceFormat::Unknown,
            header: None,
            original: None,
            metadata: None,
        })
    }

    /// Bytes the frame can hold.
    pub const fn capacity() -> usize {
        FRAME_CAPACITY
    }

    /// Valid bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the frame holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whole backing buffer, for reads and in-place rewrites.
    pub fn buffer_mut(&mut self) -> &mut [u8; FRAME_CAPACITY] {
        &mut self.data
    }

    /// Set the number of valid bytes, clamped to capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(FRAME_CAPACITY);
    }

    /// Copy `bytes` in, truncating at capacity, and return the copied length.
    pub fn fill_from(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(FRAME_CAPACITY);
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.len = n;
        n
    }

    fn reset(&mut self) {
        self.len = 0;
        self.checksum = None;
        self.arrival = None;
        self.channel = 0;
        self.format = SourceFormat::Unknown;
        self.header = None;
        self.original = None;
        self.metadata = None;
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePoolStats {
    /// Frames idle in the pool.
    pub available: usize,
    /// Maximum frames kept idle.
    pub max_size: usize,
    /// Frames allocated over the pool's lifetime.
    pub total_created: usize,
    /// Frames handed back for reuse.
    pub total_returned: usize,
}

/// Lock-free pool of boxed frames.
///
/// Acquiring never blocks or fails: an empty pool allocates. Frames returned
/// beyond `max_size` are freed.
pub struct FramePool {
    pool: SegQueue<Box<RawFrame>>,
    max_size: usize,
    current_size: AtomicUsize,
    total_created: AtomicUsize,
    total_returned: AtomicUsize,
}

impl FramePool {
    /// Pool that keeps up to `max_size` frames and preallocates `initial_size`.
    pub fn new(max_size: usize, initial_size: usize) -> Arc<Self> {
        let initial_size = initial_size.min(max_size);
        let pool = SegQueue::new();
        for _ in 0..initial_size {
            pool.push(RawFrame::boxed());
        }

        Arc::new(Self {
            pool,
            max_size,
            current_size: AtomicUsize::new(initial_size),
            total_created: AtomicUsize::new(initial_size),
            total_returned: AtomicUsize::new(0),
        })
    }

    /// Pool sized from a memory budget in bytes, with a floor of `min_frames`.
    pub fn with_budget(budget_bytes: usize, min_frames: usize) -> Arc<Self> {
        let frames = (budget_bytes / std::mem::size_of::<RawFrame>()).max(min_frames);
        debug!(
            "Frame pool: {} frames of {} bytes",
            frames,
            std::mem::size_of::<RawFrame>()
        );
        Self::new(frames, frames)
    }

    /// Take a cleared frame.
    pub fn acquire(self: &Arc<Self>) -> PooledFrame {
        let frame = match self.pool.pop() {
            Some(frame) => {
                self.current_size.fetch_sub(1, Ordering::Relaxed);
                frame
            }
            None => {
                self.total_created.fetch_add(1, Ordering::Relaxed);
                RawFrame::boxed()
            }
        };

        PooledFrame {
            frame: Some(frame),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut frame: Box<RawFrame>) {
        let prev = self.current_size.fetch_add(1, Ordering::Relaxed);
        if prev < self.max_size {
            frame.reset();
            self.pool.push(frame);
            self.total_returned.fetch_add(1, Ordering::Relaxed);
        } else {
            self.current_size.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Current statistics.
    pub fn stats(&self) -> FramePoolStats {
        FramePoolStats {
            available: self.current_size.load(Ordering::Relaxed),
            max_size: self.max_size,
            total_created: self.total_created.load(Ordering::Relaxed),
            total_returned: self.total_returned.load(Ordering::Relaxed),
        }
    }
}

/// A frame on loan from a [`FramePool`]; goes back to the pool on drop.
pub struct PooledFrame {
    frame: Option<Box<RawFrame>>,
    pool: Arc<FramePool>,
}

impl Deref for PooledFrame {
    type Target = RawFrame;

    fn deref(&self) -> &RawFrame {
        // Only `Drop` takes the box out
        self.frame.as_deref().unwrap_or_else(|| unreachable!("frame taken before drop"))
    }
}

impl DerefMut for PooledFrame {
    fn deref_mut(&mut self) -> &mut RawFrame {
        self.frame
            .as_deref_mut()
            .unwrap_or_else(|| unreachable!("frame taken before drop"))
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.pool.release(frame);
        }
    }
}
