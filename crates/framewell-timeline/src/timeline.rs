//! The ordered, time-indexed frame store.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::frame::{Frame, Timestamp};
use crate::{Result, TimelineError};

/// Search direction for [`Timeline::closest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Greatest entry with `timestamp <= t`.
    Past,
    /// Least entry with `timestamp >= t`.
    Future,
    /// Nearest entry in either direction; at equal distance the older
    /// entry wins.
    Both,
}

/// Construction parameters for a [`Timeline`].
#[derive(Debug, Clone, Default)]
pub struct TimelineConfig {
    max_element_count: Option<usize>,
    retention_ms: Option<f64>,
    overwrite: bool,
}

impl TimelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the timeline to `count` entries; pushing past the bound evicts
    /// the oldest entry synchronously.
    pub fn with_capacity(mut self, count: usize) -> Self {
        self.max_element_count = Some(count);
        self
    }

    /// Maximum age (relative to the `now` passed to cleanup) of entries the
    /// timeline keeps during [`Timeline::cleanup`].
    pub fn with_retention_ms(mut self, retention_ms: f64) -> Self {
        self.retention_ms = Some(retention_ms);
        self
    }

    /// Allow a push to replace an entry with the same timestamp instead of
    /// failing with [`TimelineError::DuplicateTimestamp`].
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_element_count == Some(0) {
            return Err(TimelineError::InvalidConfiguration(
                "capacity must be at least 1".into(),
            ));
        }
        if let Some(retention) = self.retention_ms {
            if !retention.is_finite() || retention <= 0.0 {
                return Err(TimelineError::InvalidConfiguration(format!(
                    "retention must be a positive duration, got {retention}"
                )));
            }
        }
        Ok(())
    }
}

/// Total-order key over `f64` timestamps. Non-finite values are rejected at
/// push, so `total_cmp` only ever tie-breaks identical finite values.
#[derive(Debug, Clone, Copy)]
struct Stamp(Timestamp);

impl PartialEq for Stamp {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0).is_eq()
    }
}

impl Eq for Stamp {}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

type PushObserver = Arc<dyn Fn(&Arc<Frame>) + Send + Sync>;

/// Ordered, time-indexed container of immutable frames.
///
/// Multiple producers and consumers may share one timeline; see the crate
/// docs for the locking discipline.
pub struct Timeline {
    config: TimelineConfig,
    index: RwLock<BTreeMap<Stamp, Arc<Frame>>>,
    observers: Mutex<Vec<PushObserver>>,
}

impl Timeline {
    /// Timeline with the given bounds. Fails on a zero capacity or a
    /// non-positive retention.
    pub fn new(config: TimelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            index: RwLock::new(BTreeMap::new()),
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Timeline with no capacity bound and no retention.
    pub fn unbounded() -> Self {
        Self {
            config: TimelineConfig::default(),
            index: RwLock::new(BTreeMap::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Insert a frame keyed by its timestamp and return the shared handle.
    ///
    /// Fails with [`TimelineError::DuplicateTimestamp`] when the timestamp
    /// is already present and overwrite is not configured. If the capacity
    /// bound is exceeded the oldest entry is evicted before returning —
    /// a push past capacity never fails.
    pub fn push(&self, frame: Frame) -> Result<Arc<Frame>> {
        let timestamp = frame.timestamp();
        if !timestamp.is_finite() {
            return Err(TimelineError::NonFiniteTimestamp { timestamp });
        }
        let frame = Arc::new(frame);

        let evicted = {
            let mut index = self.index.write();
            if !self.config.overwrite && index.contains_key(&Stamp(timestamp)) {
                return Err(TimelineError::DuplicateTimestamp { timestamp });
            }
            index.insert(Stamp(timestamp), frame.clone());

            let mut evicted = 0usize;
            if let Some(capacity) = self.config.max_element_count {
                while index.len() > capacity {
                    index.pop_first();
                    evicted += 1;
                }
            }
            evicted
        };
        if evicted > 0 {
            tracing::trace!(timestamp, evicted, "capacity eviction");
        }

        // Observers run outside both the index lock and the observer list
        // lock: a slow callback cannot stall readers, and a callback is
        // free to push again or register further observers.
        let observers: Vec<PushObserver> = self.observers.lock().clone();
        for observer in &observers {
            observer(&frame);
        }
        Ok(frame)
    }

    /// Convenience for `push(Frame::new(timestamp, data))`.
    pub fn push_bytes(&self, timestamp: Timestamp, data: Vec<u8>) -> Result<Arc<Frame>> {
        self.push(Frame::new(timestamp, data))
    }

    /// Register a callback fired after every successful push, in
    /// registration order.
    pub fn on_push(&self, observer: impl Fn(&Arc<Frame>) + Send + Sync + 'static) {
        self.observers.lock().push(Arc::new(observer));
    }

    /// Exact-timestamp lookup.
    pub fn at(&self, timestamp: Timestamp) -> Option<Arc<Frame>> {
        self.index.read().get(&Stamp(timestamp)).cloned()
    }

    /// Entry closest to `timestamp` in the given direction, `None` when the
    /// timeline is empty or no entry satisfies the direction.
    pub fn closest(&self, timestamp: Timestamp, direction: Direction) -> Option<Arc<Frame>> {
        if !timestamp.is_finite() {
            return None;
        }
        let index = self.index.read();
        let key = Stamp(timestamp);
        match direction {
            Direction::Past => index.range(..=key).next_back().map(|(_, f)| f.clone()),
            Direction::Future => index.range(key..).next().map(|(_, f)| f.clone()),
            Direction::Both => {
                let past = index.range(..=key).next_back();
                let future = index.range(key..).next();
                match (past, future) {
                    (Some((past_key, past_frame)), Some((future_key, future_frame))) => {
                        let past_distance = timestamp - past_key.0;
                        let future_distance = future_key.0 - timestamp;
                        if future_distance < past_distance {
                            Some(future_frame.clone())
                        } else {
                            Some(past_frame.clone())
                        }
                    }
                    (Some((_, frame)), None) | (None, Some((_, frame))) => Some(frame.clone()),
                    (None, None) => None,
                }
            }
        }
    }

    /// Most recent entry.
    pub fn newest(&self) -> Option<Arc<Frame>> {
        self.index.read().last_key_value().map(|(_, f)| f.clone())
    }

    /// Oldest entry.
    pub fn oldest(&self) -> Option<Arc<Frame>> {
        self.index.read().first_key_value().map(|(_, f)| f.clone())
    }

    /// Remove and return the entry at exactly `timestamp`.
    pub fn pop(&self, timestamp: Timestamp) -> Option<Arc<Frame>> {
        self.index.write().remove(&Stamp(timestamp))
    }

    /// Remove every entry older than `now` minus the configured retention
    /// and return the count removed. No-op without a retention bound.
    ///
    /// Caller-driven by design; the timeline never prunes on its own.
    #[tracing::instrument(skip(self), name = "timeline.cleanup")]
    pub fn cleanup(&self, now: Timestamp) -> usize {
        let Some(retention) = self.config.retention_ms else {
            return 0;
        };
        // A NaN or infinite clock would produce a cutoff that wipes the
        // whole index; refuse it like push and closest do.
        if !now.is_finite() {
            return 0;
        }
        let cutoff = now - retention;
        let removed = {
            let mut index = self.index.write();
            let keep = index.split_off(&Stamp(cutoff));
            std::mem::replace(&mut *index, keep).len()
        };
        if removed > 0 {
            tracing::debug!(removed, cutoff, "pruned expired frames");
        }
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.index.write().clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Whether the timeline holds no entries.
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// All entries in ascending timestamp order, as a point-in-time
    /// snapshot.
    pub fn snapshot(&self) -> Vec<Arc<Frame>> {
        self.index.read().values().cloned().collect()
    }

    /// Forward-only iteration over a snapshot of the current entries;
    /// concurrent pushes are not reflected.
    pub fn iter(&self) -> impl Iterator<Item = Arc<Frame>> {
        self.snapshot().into_iter()
    }
}
