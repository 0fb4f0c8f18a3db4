//! One immutable timestamped payload.

use std::fmt;

/// Milliseconds since an arbitrary epoch. Monotonically comparable; the
/// timeline's ordering and search key.
pub type Timestamp = f64;

/// An immutable frame: one fixed-size payload tagged with its acquisition
/// time.
///
/// A frame never changes after construction; the timeline shares it with
/// consumers as `Arc<Frame>`, and dropping the last handle frees the
/// payload.
pub struct Frame {
    timestamp: Timestamp,
    data: Box<[u8]>,
}

impl Frame {
    /// Take ownership of `data` as the frame payload.
    pub fn new(timestamp: Timestamp, data: Vec<u8>) -> Self {
        Self {
            timestamp,
            data: data.into_boxed_slice(),
        }
    }

    /// Copy `data` into a new frame payload.
    pub fn copy_from(timestamp: Timestamp, data: &[u8]) -> Self {
        Self::new(timestamp, data.to_vec())
    }

    /// Acquisition time in milliseconds.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Read-only view of the payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("timestamp", &self.timestamp)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_takes_ownership() {
        let frame = Frame::new(100.0, vec![0xAA, 0xBB]);
        assert_eq!(frame.timestamp(), 100.0);
        assert_eq!(frame.data(), &[0xAA, 0xBB]);
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn test_copy_from_is_independent() {
        let mut source = vec![1u8, 2, 3];
        let frame = Frame::copy_from(5.0, &source);
        source[0] = 9;
        assert_eq!(frame.data(), &[1, 2, 3]);
    }

    #[test]
    fn test_empty_payload() {
        let frame = Frame::new(0.0, Vec::new());
        assert!(frame.is_empty());
        assert_eq!(frame.len(), 0);
    }
}
