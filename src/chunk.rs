//! A block of raw audio bytes with its position in the session.

use std::sync::Arc;

/// One read's worth of raw audio, as distributed to sinks.
///
/// The bytes are stored in an `Arc<[u8]>` so a single read can be queued for
/// every sink without copying.
///
/// # Example
///
/// ```
/// use broadcast_audio::AudioChunk;
///
/// let chunk = AudioChunk::new(vec![0u8; 4096], 0, 0);
/// assert_eq!(chunk.len(), 4096);
///
/// let shared = chunk.clone(); // Cheap clone - shares the bytes
/// assert_eq!(shared.as_bytes().as_ptr(), chunk.as_bytes().as_ptr());
/// ```
#[derive(Debug, Clone)]
pub struct AudioChunk {
    data: Arc<[u8]>,

    /// Byte offset of this chunk from the start of the transfer.
    pub offset: u64,

    /// Zero-based index of the read that produced this chunk.
    pub sequence: u64,
}

impl AudioChunk {
    /// Creates a chunk from owned bytes.
    pub fn new(data: Vec<u8>, offset: u64, sequence: u64) -> Self {
        Self {
            data: data.into(),
            offset,
            sequence,
        }
    }

    /// Creates a chunk by copying a slice.
    pub fn from_slice(data: &[u8], offset: u64, sequence: u64) -> Self {
        Self {
            data: Arc::from(data),
            offset,
            sequence,
        }
    }

    /// The chunk's bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of bytes in the chunk.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the chunk holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Byte offset just past the end of this chunk.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_from_slice() {
        let chunk = AudioChunk::from_slice(&[1, 2, 3], 4096, 1);
        assert_eq!(chunk.as_bytes(), &[1, 2, 3]);
        assert_eq!(chunk.offset, 4096);
        assert_eq!(chunk.end_offset(), 4099);
        assert_eq!(chunk.sequence, 1);
    }

    #[test]
    fn test_empty_chunk() {
        let chunk = AudioChunk::new(vec![], 0, 0);
        assert!(chunk.is_empty());
        assert_eq!(chunk.end_offset(), 0);
    }
}
