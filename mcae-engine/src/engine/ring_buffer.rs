//! Byte ring buffer between a stream's producer and the render thread
//!
//! Single producer (decoder thread calling `Stream::add_data`), single
//! consumer (render callback). Capacity is fixed at construction and nothing
//! is allocated afterwards.
//!
//! - `write` is all-or-nothing: it never overwrites unread data and never
//!   writes a partial block.
//! - `read` never blocks: a contended consumer half reads nothing.
//! - Occupancy is mirrored in an atomic so `read_size`/`write_size` can be
//!   queried from either thread without touching the halves. The producer
//!   counts bytes before publishing them and the consumer uncounts them after
//!   popping, so the mirror never drops below what is really buffered.

use parking_lot::Mutex;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Overrun/underrun events between log lines
const LOG_EVERY: u64 = 1000;

pub struct RingBuffer {
    prod: Mutex<HeapProd<u8>>,
    cons: Mutex<HeapCons<u8>>,
    capacity: usize,
    /// Bytes buffered; raised before each push, lowered after each pop
    fill: AtomicUsize,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    overruns: AtomicU64,
    underruns: AtomicU64,
}

/// Snapshot of ring buffer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingBufferStats {
    pub capacity: usize,
    pub occupied: usize,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub overruns: u64,
    pub underruns: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!("Creating ring buffer with capacity {} bytes", capacity);

        let (prod, cons) = HeapRb::<u8>::new(capacity).split();
        Self {
            prod: Mutex::new(prod),
            cons: Mutex::new(cons),
            capacity,
            fill: AtomicUsize::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes that can be written without overflow
    pub fn write_size(&self) -> usize {
        self.capacity - self.fill.load(Ordering::Acquire).min(self.capacity)
    }

    /// Bytes available to read
    pub fn read_size(&self) -> usize {
        self.fill.load(Ordering::Acquire)
    }

    /// Append `data` entirely, or not at all
    ///
    /// Returns false (and counts an overrun) when `data` does not fit.
    pub fn write(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }

        let mut prod = self.prod.lock();
        let free = self.write_size();
        if data.len() > free {
            let n = self.overruns.fetch_add(1, Ordering::Relaxed) + 1;
            if n % LOG_EVERY == 1 {
                debug!(
                    "Ring buffer overrun #{}: {} bytes offered, {} free",
                    n,
                    data.len(),
                    free
                );
            }
            return false;
        }

        self.fill.fetch_add(data.len(), Ordering::AcqRel);
        let pushed = prod.push_slice(data);
        if pushed < data.len() {
            self.fill.fetch_sub(data.len() - pushed, Ordering::AcqRel);
        }
        self.bytes_written.fetch_add(pushed as u64, Ordering::Relaxed);
        pushed == data.len()
    }

    /// Read up to `buf.len()` bytes without blocking
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let Some(mut cons) = self.cons.try_lock() else {
            return 0;
        };

        let popped = cons.pop_slice(buf);
        if popped > 0 {
            self.fill.fetch_sub(popped, Ordering::AcqRel);
            self.bytes_read.fetch_add(popped as u64, Ordering::Relaxed);
        }
        if popped < buf.len() {
            let n = self.underruns.fetch_add(1, Ordering::Relaxed) + 1;
            if n % LOG_EVERY == 1 {
                trace!("Ring buffer underrun #{}: wanted {}, got {}", n, buf.len(), popped);
            }
        }
        popped
    }

    /// Discard everything buffered
    pub fn reset(&self) {
        let mut cons = self.cons.lock();
        let cleared = cons.clear();
        self.fill.fetch_sub(cleared, Ordering::AcqRel);
    }

    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            capacity: self.capacity,
            occupied: self.read_size(),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("fill", &self.read_size())
            .finish()
    }
}
