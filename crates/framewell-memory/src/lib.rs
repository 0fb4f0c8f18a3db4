//! Lock-counted buffer residency layer for framewell.
//!
//! Frame payloads and image storage can be large enough that keeping every
//! block resident is not an option. This crate decouples "the buffer exists"
//! from "the buffer is in RAM": a [`BufferObject`] owns a raw block that a
//! [`DumpPolicy`] may spill to a swap file whenever nobody holds a lock on
//! it, and reloads transparently the next time someone does.
//!
//! # Concurrency Model
//!
//! - Residency transitions are guarded by a per-object `parking_lot::Mutex`,
//!   never a global one — unrelated buffers do not contend.
//! - The pin count is an `AtomicU64`; the decrement-to-zero check and the
//!   policy's eviction decision happen under the same residency mutex as the
//!   increment in [`BufferObject::lock`], so a buffer being locked can never
//!   be swapped out from under the new holder.
//! - Byte access goes through an inner `RwLock`: concurrent readers, one
//!   writer.
//!
//! Long-lived consumers (a displayed image, a rendering adaptor) pin whole
//! objects for their lifetime through the [`LockManager`], which walks
//! anything implementing [`BufferHolder`] and keeps one [`DumpLock`] per
//! underlying buffer until the hold is dropped.

mod buffer_object;
mod error;
mod hold;
mod policy;
mod spool;

pub use buffer_object::{BufferObject, DumpLock};
pub use error::MemoryError;
pub use hold::{BufferHolder, Hold, ImageBlock, LockManager};
pub use policy::{AlwaysDump, BarrierDump, BufferStatus, DumpPolicy, NeverDump};
pub use spool::Spool;

/// Result type for memory-layer operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
