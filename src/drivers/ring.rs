//! Bounded single-producer/single-consumer ring of [`Sample`]s.
//!
//! Cursors count every push and pop since creation and are masked into the
//! slot array, so `write - read` is the number of unread samples and all
//! `capacity` slots carry data. The producer never waits: when the ring is
//! full, [`SpscRing::push_overwrite`] claims the oldest unread sample by
//! bumping the read cursor before it reuses that slot.
//!
//! Each slot is a tiny seqlock. The producer marks the slot as being written,
//! stores the payload, then publishes the stamp for the cursor it wrote with
//! `Release`. The consumer checks the stamp with `Acquire` before and after
//! copying the payload and only keeps the copy if its compare-exchange on the
//! read cursor succeeds, which is how an eviction racing with a pop is
//! detected. Payload fields are atomics, so a racing copy is discarded rather
//! than torn.
use std::sync::atomic::{fence, AtomicI16, AtomicU64, AtomicUsize, Ordering};

use crate::types::Sample;

/// Keeps each cursor on its own cache line.
#[repr(align(64))]
struct CachePadded<T>(T);

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

#[derive(Default)]
struct Slot {
    stamp: AtomicUsize,
    timestamp_us: AtomicU64,
    raw: AtomicI16,
    value_bits: AtomicU64,
}

// Stamp for a slot while cursor `pos` is being written, and once it is readable.
fn writing_stamp(pos: usize) -> usize {
    pos.wrapping_mul(2).wrapping_add(1)
}

fn ready_stamp(pos: usize) -> usize {
    pos.wrapping_mul(2).wrapping_add(2)
}

pub struct SpscRing {
    slots: Box<[Slot]>,
    mask: usize,
    write: CachePadded<AtomicUsize>,
    read: CachePadded<AtomicUsize>,
}

impl SpscRing {
    /// # Panics
    /// If `capacity` is not a non-zero power of two. Validated settings
    /// always satisfy this.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "ring capacity must be a power of two, got {capacity}"
        );
        let slots = (0..capacity).map(|_| Slot::default()).collect();
        Self {
            slots,
            mask: capacity - 1,
            write: CachePadded(AtomicUsize::new(0)),
            read: CachePadded(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Pushes unless the ring is full. Producer side only.
    pub fn try_push(&self, sample: Sample) -> bool {
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);
        if write.wrapping_sub(read) >= self.capacity() {
            return false;
        }
        self.publish(write, sample);
        true
    }

    /// Pushes, evicting the oldest unread sample when full. Returns `false`
    /// if a sample was evicted. Producer side only.
    pub fn push_overwrite(&self, sample: Sample) -> bool {
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);
        let mut kept_all = true;
        if write.wrapping_sub(read) >= self.capacity() {
            // A failed exchange means the consumer freed that slot itself.
            kept_all = self
                .read
                .compare_exchange(
                    read,
                    read.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err();
        }
        self.publish(write, sample);
        kept_all
    }

    fn publish(&self, write: usize, sample: Sample) {
        let slot = &self.slots[write & self.mask];
        slot.stamp.store(writing_stamp(write), Ordering::Relaxed);
        fence(Ordering::Release);
        slot.timestamp_us.store(sample.timestamp_us, Ordering::Relaxed);
        slot.raw.store(sample.raw, Ordering::Relaxed);
        slot.value_bits.store(sample.value.to_bits(), Ordering::Relaxed);
        slot.stamp.store(ready_stamp(write), Ordering::Release);
        self.write.store(write.wrapping_add(1), Ordering::Release);
    }

    /// Consumer side only.
    pub fn try_pop(&self) -> Option<Sample> {
        loop {
            let read = self.read.load(Ordering::Acquire);
            let write = self.write.load(Ordering::Acquire);
            if read == write {
                return None;
            }
            let slot = &self.slots[read & self.mask];
            let before = slot.stamp.load(Ordering::Acquire);
            if before != ready_stamp(read) {
                // Overwritten since we loaded the cursor; it has moved on.
                continue;
            }
            let sample = Sample {
                timestamp_us: slot.timestamp_us.load(Ordering::Relaxed),
                raw: slot.raw.load(Ordering::Relaxed),
                value: f64::from_bits(slot.value_bits.load(Ordering::Relaxed)),
            };
            fence(Ordering::Acquire);
            if slot.stamp.load(Ordering::Relaxed) != before {
                continue;
            }
            if self
                .read
                .compare_exchange(
                    read,
                    read.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return Some(sample);
            }
        }
    }

    /// Appends up to `max` samples to `out` and returns how many were taken.
    /// Consumer side only.
    pub fn pop_into(&self, out: &mut Vec<Sample>, max: usize) -> usize {
        let mut taken = 0;
        while taken < max {
            match self.try_pop() {
                Some(sample) => {
                    out.push(sample);
                    taken += 1;
                }
                None => break,
            }
        }
        taken
    }

    /// Consumer side only. May be empty.
    pub fn pop_batch(&self, max: usize) -> Vec<Sample> {
        let mut out = Vec::with_capacity(max.min(self.approx_len()));
        self.pop_into(&mut out, max);
        out
    }

    /// Snapshot of the unread count; exact only when neither side is active.
    pub fn approx_len(&self) -> usize {
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Acquire);
        write.wrapping_sub(read).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.approx_len() == 0
    }
}
