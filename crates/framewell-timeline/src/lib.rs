//! Time-indexed store of immutable sensor/video frames.
//!
//! Producers (frame grabbers, trackers) push timestamped payloads into a
//! [`Timeline`]; consumers ask for the newest frame or the one closest to a
//! presentation time and receive cheap shared handles (`Arc<Frame>`). The
//! timeline owns nothing but bytes and timestamps — rendering, codecs, and
//! transport live elsewhere.
//!
//! # Concurrency Model
//!
//! - The index is a `BTreeMap` behind a `parking_lot::RwLock`: queries and
//!   iteration take shared access, push/pop/cleanup take exclusive access.
//! - Frames are immutable once pushed; handles stay valid after eviction.
//! - Push observers fire outside the write lock, in registration order.
//!
//! Retention pruning ([`Timeline::cleanup`]) is caller-driven — the core
//! never spawns background threads; scheduling belongs to the surrounding
//! service layer.

mod error;
mod frame;
mod timeline;

pub use error::TimelineError;
pub use frame::{Frame, Timestamp};
pub use timeline::{Direction, Timeline, TimelineConfig};

/// Result type for timeline operations.
pub type Result<T> = std::result::Result<T, TimelineError>;
