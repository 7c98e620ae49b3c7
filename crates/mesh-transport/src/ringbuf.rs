//! Lock-free SPSC ring buffer feeding the real-time UDP sender.
//!
//! Adapted from the hot-path MIDI ring buffer pattern: pre-allocated
//! fixed-size slots, head/tail on separate cache lines, one producer and
//! one consumer. Unlike the general-purpose version, `write` never
//! rejects a message: on overflow it drops the oldest record instead,
//! matching the real-time path's "never block the writer" priority.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub const CAPACITY: usize = 2048;
const MAX_MIDI_LEN: usize = 4;
const CACHE_LINE: usize = 64;

/// One real-time ring buffer record: up to 4 raw MIDI bytes plus the
/// routing metadata needed to build an [`mesh_protocol::rt_frame::RtFrame`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtRecord {
    pub data: [u8; MAX_MIDI_LEN],
    pub len: u8,
    pub device_id: u16,
    pub timestamp_micros: u32,
}

impl RtRecord {
    pub fn new(midi: &[u8], device_id: u16, timestamp_micros: u32) -> Self {
        let len = midi.len().min(MAX_MIDI_LEN);
        let mut data = [0u8; MAX_MIDI_LEN];
        data[..len].copy_from_slice(&midi[..len]);
        Self { data, len: len as u8, device_id, timestamp_micros }
    }

    pub fn midi(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

#[repr(C)]
struct Slot {
    record: UnsafeCell<RtRecord>,
}

impl Default for Slot {
    fn default() -> Self {
        Self { record: UnsafeCell::new(RtRecord::default()) }
    }
}

#[repr(C)]
pub struct RingBuffer {
    head: AtomicUsize,
    _pad_head: [u8; CACHE_LINE - std::mem::size_of::<AtomicUsize>()],
    tail: AtomicUsize,
    _pad_tail: [u8; CACHE_LINE - std::mem::size_of::<AtomicUsize>()],
    slots: Box<[Slot]>,
    capacity: usize,
    dropped: AtomicU64,
}

// SAFETY: SPSC contract — head only advances from the producer side, tail
// only from the consumer side; atomics provide the needed ordering.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity.is_power_of_two(), "capacity must be a power of two");
        let slots = (0..capacity).map(|_| Slot::default()).collect::<Vec<_>>().into_boxed_slice();
        Self {
            head: AtomicUsize::new(0),
            _pad_head: [0u8; CACHE_LINE - std::mem::size_of::<AtomicUsize>()],
            tail: AtomicUsize::new(0),
            _pad_tail: [0u8; CACHE_LINE - std::mem::size_of::<AtomicUsize>()],
            slots,
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Write a record. If full, drops the oldest record (advances the
    /// reader by one) before writing, so this always succeeds.
    ///
    /// SAFETY: must only be called from the single producer.
    pub fn write(&self, record: RtRecord) {
        let mut head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= self.capacity {
            self.tail.store(tail.wrapping_add(1), Ordering::Release);
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }

        let idx = head & (self.capacity - 1);
        // SAFETY: only the producer writes `head`'s slot, and the consumer
        // never reads ahead of `tail`, which we've just made room behind.
        unsafe {
            *self.slots[idx].record.get() = record;
        }
        head = head.wrapping_add(1);
        self.head.store(head, Ordering::Release);
    }

    /// Read up to `max` records contiguously into `out`, returning how many
    /// were read.
    ///
    /// SAFETY: must only be called from the single consumer.
    pub fn read_batch(&self, out: &mut [RtRecord], max: usize) -> usize {
        let mut tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let available = head.wrapping_sub(tail).min(max).min(out.len());

        for slot in out.iter_mut().take(available) {
            let idx = tail & (self.capacity - 1);
            // SAFETY: the consumer only reads slots already published by the
            // producer (before `head`), and the producer never reuses a slot
            // before `tail` catches up to it.
            *slot = unsafe { *self.slots[idx].record.get() };
            tail = tail.wrapping_add(1);
        }
        self.tail.store(tail, Ordering::Release);
        available
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
