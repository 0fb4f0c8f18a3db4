//! Lifetime holds: pin every buffer of a data object while it is in use.
//!
//! A displayed image must not be spilled between render passes, however
//! short each individual read lock is. The [`LockManager`] takes one
//! [`DumpLock`] per buffer of anything implementing [`BufferHolder`] and
//! keeps them until the returned [`Hold`] is dropped — attach on service
//! start, release on stop, with drop covering every exit path.
//!
//! The manager is an explicit instance owned by the enclosing application,
//! not a process-wide singleton.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::buffer_object::{BufferObject, DumpLock};
use crate::policy::DumpPolicy;
use crate::spool::Spool;
use crate::Result;

/// Capability of owning buffer objects, implemented by the leaf data types
/// that actually hold storage (images, frames, arrays).
pub trait BufferHolder {
    /// Visit every buffer object owned transitively by this object.
    fn for_each_buffer_object(&self, visit: &mut dyn FnMut(&Arc<BufferObject>));
}

/// Minimal image-like owner of a single pixel block.
pub struct ImageBlock {
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    storage: Arc<BufferObject>,
}

impl ImageBlock {
    /// Allocate storage for a `width` x `height` image.
    pub fn new(
        spool: Arc<Spool>,
        policy: Arc<dyn DumpPolicy>,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    ) -> Result<Self> {
        let size = width as usize * height as usize * bytes_per_pixel as usize;
        let storage = Arc::new(BufferObject::with_size(spool, policy, size)?);
        Ok(Self {
            width,
            height,
            bytes_per_pixel,
            storage,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    /// The underlying pixel storage.
    pub fn storage(&self) -> &Arc<BufferObject> {
        &self.storage
    }
}

impl BufferHolder for ImageBlock {
    fn for_each_buffer_object(&self, visit: &mut dyn FnMut(&Arc<BufferObject>)) {
        visit(&self.storage);
    }
}

/// Registry of long-lived buffer pins.
#[derive(Default)]
pub struct LockManager {
    /// hold id -> number of buffers pinned by that hold.
    holds: DashMap<u64, usize>,
    next_id: AtomicU64,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin every buffer of `holder` for the lifetime of the returned hold.
    ///
    /// Locks already taken are released again if any buffer fails to lock
    /// (nothing is left half-pinned).
    pub fn attach(&self, holder: &dyn BufferHolder) -> Result<Hold<'_>> {
        let mut locks = Vec::new();
        let mut failure = None;
        holder.for_each_buffer_object(&mut |object| {
            if failure.is_none() {
                match object.lock() {
                    Ok(lock) => locks.push(lock),
                    Err(e) => failure = Some(e),
                }
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.holds.insert(id, locks.len());
        tracing::debug!(hold = id, buffers = locks.len(), "attached hold");
        Ok(Hold {
            manager: self,
            id,
            locks,
        })
    }

    /// Explicit release; equivalent to dropping the hold.
    pub fn detach(&self, hold: Hold<'_>) {
        drop(hold);
    }

    /// Number of currently attached holds.
    pub fn active_holds(&self) -> usize {
        self.holds.len()
    }

    /// Total number of buffers pinned across all holds.
    pub fn pinned_buffers(&self) -> usize {
        self.holds.iter().map(|entry| *entry.value()).sum()
    }
}

/// RAII hold over every buffer of one data object.
///
/// Dropping the hold releases all locks and unregisters it from the
/// manager.
pub struct Hold<'m> {
    manager: &'m LockManager,
    id: u64,
    locks: Vec<DumpLock>,
}

impl Hold<'_> {
    /// Number of buffers pinned by this hold.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for Hold<'_> {
    fn drop(&mut self) {
        self.manager.holds.remove(&self.id);
        tracing::debug!(hold = self.id, "released hold");
    }
}
