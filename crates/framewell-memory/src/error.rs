//! Error types for the memory layer.

use thiserror::Error;

/// Errors that can occur while allocating, locking, or spilling buffers.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The platform allocator could not satisfy the request.
    #[error("failed to allocate {requested} bytes")]
    Allocation {
        /// Number of bytes that was requested.
        requested: usize,
    },

    /// Lock or reallocate called on an object with no backing block.
    #[error("buffer object has no allocated block")]
    NotAllocated,

    /// Swap file write-out or read-back failed.
    ///
    /// Surfaced from [`BufferObject::lock`](crate::BufferObject::lock) when
    /// reloading dumped content, and from explicit dump requests.
    #[error("swap spool I/O error: {0}")]
    Io(#[from] std::io::Error),
}
