//! Icon payload chunking
//!
//! After the device signals readiness the payload is written as raw bytes in fixed-size
//! chunks, each followed by a flush. The announce line carries the CRC-32 of the whole
//! payload so the device can verify what it assembled.

use crc32fast::Hasher;
use std::slice::Chunks;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Default size of one raw write
pub const DEFAULT_CHUNK_SIZE: usize = 512;

// ----------------------------------------------------------------------------
// Chunk Plan
// ----------------------------------------------------------------------------

/// CRC-32 (IEEE) of a complete payload
pub fn payload_crc(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// How a payload is split for transfer
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlan<'a> {
    payload: &'a [u8],
    chunk_size: usize,
}

impl<'a> ChunkPlan<'a> {
    /// Plan a transfer; a chunk size of 0 is treated as 1
    pub fn new(payload: &'a [u8], chunk_size: usize) -> Self {
        Self {
            payload,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn total_len(&self) -> usize {
        self.payload.len()
    }

    /// `ceil(len / chunk_size)`; an empty payload has no chunks
    pub fn chunk_count(&self) -> usize {
        self.payload.len().div_ceil(self.chunk_size)
    }

    /// Chunks in transfer order; all but the last are exactly `chunk_size` long
    pub fn chunks(&self) -> Chunks<'a, u8> {
        self.payload.chunks(self.chunk_size)
    }

    pub fn crc(&self) -> u32 {
        payload_crc(self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_boundaries() {
        let payload = vec![7u8; 1025];
        let plan = ChunkPlan::new(&payload, DEFAULT_CHUNK_SIZE);
        assert_eq!(plan.chunk_count(), 3);
        let sizes: Vec<usize> = plan.chunks().map(<[u8]>::len).collect();
        assert_eq!(sizes, vec![512, 512, 1]);
    }

    #[test]
    fn test_exact_multiple_and_empty() {
        let payload = vec![1u8; 1024];
        assert_eq!(ChunkPlan::new(&payload, 512).chunk_count(), 2);
        assert_eq!(ChunkPlan::new(&[], 512).chunk_count(), 0);
        assert_eq!(ChunkPlan::new(&[], 512).chunks().count(), 0);
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        let plan = ChunkPlan::new(b"abc", 0);
        assert_eq!(plan.chunk_size(), 1);
        assert_eq!(plan.chunk_count(), 3);
    }

    #[test]
    fn test_crc_matches_reference_value() {
        // CRC-32/ISO-HDLC check value
        assert_eq!(payload_crc(b"123456789"), 0xCBF4_3926);
    }
}
