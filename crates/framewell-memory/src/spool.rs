//! Swap-file arena for dumped buffers.
//!
//! One spool serves many buffer objects; each swap-out gets a fresh
//! `bo-{id}.raw` file under the spool root, removed again on reload or
//! destroy. Contents are raw bytes, no header — the owning object tracks
//! the size.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Directory-backed arena handing out unique swap-file paths.
pub struct Spool {
    root: PathBuf,
    next_id: AtomicU64,
}

impl Spool {
    /// Open a spool rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            next_id: AtomicU64::new(0),
        })
    }

    /// Spool under the platform temp directory, in a `framewell-spool`
    /// subdirectory keyed by process id so concurrent processes do not
    /// collide.
    pub fn in_temp_dir() -> io::Result<Self> {
        let root = std::env::temp_dir().join(format!("framewell-spool-{}", std::process::id()));
        Self::new(root)
    }

    /// Root directory of this spool.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a unique path for a swap-out. The file is not created yet.
    pub(crate) fn allocate_path(&self) -> PathBuf {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!("bo-{id}.raw"))
    }

    /// Write a block out to `path`.
    pub(crate) fn write_out(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        fs::write(path, bytes)?;
        tracing::trace!(path = %path.display(), bytes = bytes.len(), "spooled buffer out");
        Ok(())
    }

    /// Read a dumped block back and delete its swap file.
    pub(crate) fn read_back(&self, path: &Path) -> io::Result<Vec<u8>> {
        let bytes = fs::read(path)?;
        // Reload consumes the file; a failed remove only leaks disk space.
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), "failed to remove swap file: {e}");
        }
        tracing::trace!(path = %path.display(), bytes = bytes.len(), "reloaded buffer");
        Ok(bytes)
    }

    /// Delete a swap file without reading it (destroy path).
    pub(crate) fn discard(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), "failed to discard swap file: {e}");
        }
    }
}
