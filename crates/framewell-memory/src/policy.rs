//! Dump policies: when does an unlocked buffer get spilled to the spool?
//!
//! A policy never acts on its own. The owning [`BufferObject`] consults it
//! under the residency mutex whenever the pin count drops to zero (or when
//! an explicit dump is requested), so a policy sees a consistent
//! [`BufferStatus`] snapshot and cannot race a concurrent `lock()`.
//!
//! [`BufferObject`]: crate::BufferObject

use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot of a buffer's state, passed to policy callbacks.
#[derive(Debug, Clone, Copy)]
pub struct BufferStatus {
    /// Logical size of the block in bytes.
    pub size: usize,
    /// Current pin count. Zero whenever `should_swap` is consulted.
    pub lock_count: u64,
    /// Whether the block is currently in RAM.
    pub resident: bool,
}

/// Strategy deciding when an unlocked buffer's memory is spilled to disk.
///
/// `on_resident` / `on_dumped` are residency-transition hooks; policies that
/// track aggregate usage (see [`BarrierDump`]) rely on them, stateless
/// policies ignore them.
pub trait DumpPolicy: Send + Sync {
    /// Whether this buffer should be swapped out now. Only called when
    /// `status.lock_count == 0`.
    fn should_swap(&self, status: &BufferStatus) -> bool;

    /// Called when a buffer's pin count reaches zero, before `should_swap`.
    fn on_lock_count_zero(&self, _status: &BufferStatus) {}

    /// A block of `bytes` became resident (allocation or reload).
    fn on_resident(&self, _bytes: usize) {}

    /// A block of `bytes` left RAM (swap-out or destroy).
    fn on_dumped(&self, _bytes: usize) {}
}

/// Never swaps anything. The default policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverDump;

impl DumpPolicy for NeverDump {
    fn should_swap(&self, _status: &BufferStatus) -> bool {
        false
    }
}

/// Swaps every buffer as soon as its pin count reaches zero.
///
/// Maximizes free RAM at the cost of a reload on every lock. Mostly useful
/// for tests and for very large, rarely-touched data.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysDump;

impl DumpPolicy for AlwaysDump {
    fn should_swap(&self, _status: &BufferStatus) -> bool {
        true
    }
}

/// Keeps total resident bytes under a barrier.
///
/// Buffers sharing one `Arc<BarrierDump>` are accounted together; an
/// unlocked buffer is swapped out only while the running total exceeds the
/// barrier. Buffers below `min_dump_size` are never worth a spool file and
/// stay resident.
#[derive(Debug)]
pub struct BarrierDump {
    barrier: usize,
    min_dump_size: usize,
    resident_bytes: AtomicUsize,
}

impl BarrierDump {
    /// Policy keeping at most `barrier` bytes resident across its buffers.
    pub fn new(barrier: usize) -> Self {
        Self {
            barrier,
            min_dump_size: 0,
            resident_bytes: AtomicUsize::new(0),
        }
    }

    /// Ignore buffers smaller than `bytes` when swapping.
    pub fn with_min_dump_size(mut self, bytes: usize) -> Self {
        self.min_dump_size = bytes;
        self
    }

    /// Bytes currently resident across all buffers using this policy.
    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes.load(Ordering::SeqCst)
    }
}

impl DumpPolicy for BarrierDump {
    fn should_swap(&self, status: &BufferStatus) -> bool {
        status.size >= self.min_dump_size && self.resident_bytes() > self.barrier
    }

    fn on_resident(&self, bytes: usize) {
        self.resident_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn on_dumped(&self, bytes: usize) {
        self.resident_bytes.fetch_sub(bytes, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(size: usize) -> BufferStatus {
        BufferStatus {
            size,
            lock_count: 0,
            resident: true,
        }
    }

    #[test]
    fn test_never_and_always() {
        assert!(!NeverDump.should_swap(&status(1 << 20)));
        assert!(AlwaysDump.should_swap(&status(0)));
    }

    #[test]
    fn test_barrier_accounting() {
        let policy = BarrierDump::new(1000);
        policy.on_resident(600);
        assert!(!policy.should_swap(&status(600)));

        policy.on_resident(600);
        assert_eq!(policy.resident_bytes(), 1200);
        assert!(policy.should_swap(&status(600)));

        policy.on_dumped(600);
        assert!(!policy.should_swap(&status(600)));
    }

    #[test]
    fn test_barrier_min_dump_size() {
        let policy = BarrierDump::new(0).with_min_dump_size(4096);
        policy.on_resident(8192);
        assert!(!policy.should_swap(&status(128)));
        assert!(policy.should_swap(&status(8192)));
    }
}
