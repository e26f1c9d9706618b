//! Bounded single-producer single-consumer ring between two pipeline stages.
//!
//! The ring is split into a [`QueueProducer`] and a [`QueueConsumer`] at
//! construction. Neither handle is `Clone`, and both operations take `&mut self`,
//! so a second producer or consumer cannot exist for the same ring.
//!
//! One slot is kept empty to tell a full ring from an empty one, so a queue
//! built with capacity `N` holds at most `N - 1` items.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;

use crate::error::{ProcessorError, Result};

struct Ring<T> {
    /// Next slot the producer writes. Only the producer stores to it.
    write_pos: CachePadded<AtomicUsize>,
    /// Next slot the consumer reads. Only the consumer stores to it.
    read_pos: CachePadded<AtomicUsize>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

// SAFETY: a slot is only touched by the producer while it is outside
// [read_pos, write_pos) and only by the consumer while it is inside. The
// release store of a position publishes the slot write to the other side.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    #[inline]
    fn len(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read) & self.mask
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Both handles are gone; release whatever is still queued
        let mut read = *self.read_pos.get_mut();
        let write = *self.write_pos.get_mut();
        while read != write {
            // SAFETY: slots in [read, write) hold initialized values.
            unsafe { self.slots[read].get_mut().assume_init_drop() };
            read = (read + 1) & self.mask;
        }
    }
}

/// Constructor namespace for SPSC rings.
pub struct PipelineQueue;

impl PipelineQueue {
    /// Create a ring with `capacity` slots and split it into its two ends.
    ///
    /// `capacity` must be a power of two and at least 2.
    pub fn with_capacity<T>(capacity: usize) -> Result<(QueueProducer<T>, QueueConsumer<T>)> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(ProcessorError::Configuration(format!(
                "queue capacity must be a power of two >= 2, got {}",
                capacity
            )));
        }

        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let ring = Arc::new(Ring {
            write_pos: CachePadded::new(AtomicUsize::new(0)),
            read_pos: CachePadded::new(AtomicUsize::new(0)),
            slots,
            mask: capacity - 1,
        });

        Ok((
            QueueProducer { ring: Arc::clone(&ring) },
            QueueConsumer { ring },
        ))
    }
}

/// Writing end of a [`PipelineQueue`].
pub struct QueueProducer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> QueueProducer<T> {
    /// Enqueue `item`, or hand it back when the ring is full.
    #[inline]
    pub fn try_push(&mut self, item: T) -> std::result::Result<(), T> {
        let ring = &*self.ring;
        let write = ring.write_pos.load(Ordering::Relaxed);
        let next = (write + 1) & ring.mask;
        if next == ring.read_pos.load(Ordering::Acquire) {
            return Err(item);
        }

        // SAFETY: `write` is outside the consumer's readable range until the
        // release store below.
        unsafe { (*ring.slots[write].get()).write(item) };
        ring.write_pos.store(next, Ordering::Release);
        Ok(())
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots, one more than the usable capacity.
    pub fn capacity(&self) -> usize {
        self.ring.mask + 1
    }
}

/// Reading end of a [`PipelineQueue`].
pub struct QueueConsumer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> QueueConsumer<T> {
    /// Dequeue the oldest item, if any.
    #[inline]
    pub fn try_pop(&mut self) -> Option<T> {
        let ring = &*self.ring;
        let read = ring.read_pos.load(Ordering::Relaxed);
        if read == ring.write_pos.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: the acquire load above makes the producer's write to `read`
        // visible, and the producer will not reuse the slot until the store below.
        let item = unsafe { (*ring.slots[read].get()).assume_init_read() };
        ring.read_pos.store((read + 1) & ring.mask, Ordering::Release);
        Some(item)
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots, one more than the usable capacity.
    pub fn capacity(&self) -> usize {
        self.ring.mask + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = PipelineQueue::with_capacity::<u32>(8).unwrap();
        for i in 0..7 {
            tx.try_push(i).unwrap();
        }
        assert_eq!(rx.len(), 7);
        for i in 0..7 {
            assert_eq!(rx.try_pop(), Some(i));
        }
        assert!(rx.try_pop().is_none());
        assert!(rx.is_empty());
    }

    #[test]
    fn test_capacity_minus_one() {
        let (mut tx, mut rx) = PipelineQueue::with_capacity::<u32>(4).unwrap();
        assert!(tx.try_push(1).is_ok());
        assert!(tx.try_push(2).is_ok());
        assert!(tx.try_push(3).is_ok());
        assert_eq!(tx.try_push(4), Err(4));
        assert_eq!(tx.len(), 3);

        assert_eq!(rx.try_pop(), Some(1));
        assert!(tx.try_push(4).is_ok());
        assert_eq!(rx.len(), 3);
    }

    #[test]
    fn test_wraparound() {
        let (mut tx, mut rx) = PipelineQueue::with_capacity::<usize>(4).unwrap();
        for i in 0..100 {
            tx.try_push(i).unwrap();
            tx.try_push(i + 1000).unwrap();
            assert_eq!(rx.try_pop(), Some(i));
            assert_eq!(rx.try_pop(), Some(i + 1000));
        }
        assert!(rx.is_empty());
    }

    #[test]
    fn test_rejects_bad_capacity() {
        assert!(PipelineQueue::with_capacity::<u8>(0).is_err());
        assert!(PipelineQueue::with_capacity::<u8>(1).is_err());
        assert!(PipelineQueue::with_capacity::<u8>(12).is_err());
        assert!(PipelineQueue::with_capacity::<u8>(2).is_ok());
    }

    #[test]
    fn test_cross_thread_transfer() {
        const COUNT: u64 = 100_000;
        let (mut tx, mut rx) = PipelineQueue::with_capacity::<u64>(64).unwrap();

        let producer = thread::spawn(move || {
            for i in 0..COUNT {
                let mut item = i;
                loop {
                    match tx.try_push(item) {
                        Ok(()) => break,
                        Err(back) => {
                            item = back;
                            thread::yield_now();
                        }
                    }
                }
            }
        });

        let mut expected = 0;
        while expected < COUNT {
            match rx.try_pop() {
                Some(v) => {
                    assert_eq!(v, expected);
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert!(rx.try_pop().is_none());
    }

    #[test]
    fn test_queued_items_dropped_with_ring() {
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let (mut tx, rx) = PipelineQueue::with_capacity::<Tracked>(8).unwrap();
        for _ in 0..5 {
            assert!(tx.try_push(Tracked(Arc::clone(&drops))).is_ok());
        }
        drop(tx);
        drop(rx);
        assert_eq!(drops.load(Ordering::SeqCst), 5);
    }
}
