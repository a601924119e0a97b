//! Reference-addressed byte stores
//!
//! Backing storage for terms and feature blobs: append-only chunked
//! arenas addressed by 32-bit references. A reference packs a chunk id
//! and a 4-byte-unit offset, so the low bits of byte addresses stay free
//! for tagging and reference 0 can serve as the reserved NULL.

pub mod document_words;
pub mod feature_store;
pub mod word_store;

pub use document_words::DocumentWordsStore;
pub use feature_store::{FeatureStore, DECODE_SAFETY};
pub use word_store::WordStore;

use parking_lot::RwLock;
use std::sync::Arc;

use crate::types::MemoryUsage;

const OFFSET_BITS: u32 = 20;
const OFFSET_MASK: u32 = (1 << OFFSET_BITS) - 1;
const MAX_CHUNKS: usize = 1 << (32 - OFFSET_BITS);

/// Normal chunk capacity. A single oversized entry may grow its chunk
/// beyond this; the chunk is sealed right after.
const CHUNK_CAPACITY: usize = 256 * 1024;

/// 32-bit reference into a chunked store: `chunk_id << 20 | offset / 4`.
/// Offset unit 0 of every chunk is reserved, so the all-zero reference is
/// never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryRef(u32);

pub type TermRef = EntryRef;
pub type FeatureRef = EntryRef;

impl EntryRef {
    pub const NULL: EntryRef = EntryRef(0);

    fn new(chunk: u32, unit: u32) -> Self {
        debug_assert!(unit <= OFFSET_MASK);
        EntryRef((chunk << OFFSET_BITS) | unit)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn chunk(&self) -> u32 {
        self.0 >> OFFSET_BITS
    }

    pub fn byte_offset(&self) -> usize {
        ((self.0 & OFFSET_MASK) as usize) << 2
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> Self {
        EntryRef(raw)
    }
}

/// Append-only chunk directory shared between one writer and any number
/// of readers. Chunks are copy-on-write: a reader's view keeps the bytes
/// it resolved even while the writer keeps appending.
pub(crate) struct ChunkDirectory {
    chunks: RwLock<Vec<Arc<Vec<u8>>>>,
}

impl ChunkDirectory {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(vec![Arc::new(vec![0u8; 4])]),
        }
    }

    /// Append `bytes` followed by `tail_zeros` zero bytes, padded to a
    /// 4-byte boundary. Returns the reference to the first byte.
    pub fn append(&self, bytes: &[u8], tail_zeros: usize) -> EntryRef {
        let needed = bytes.len() + tail_zeros;
        let mut chunks = self.chunks.write();
        let start_new = {
            let active = chunks.last().expect("chunk directory is never empty");
            active.len() + needed > CHUNK_CAPACITY && active.len() > 4
        };
        if start_new {
            assert!(chunks.len() < MAX_CHUNKS, "chunk directory exhausted");
            chunks.push(Arc::new(vec![0u8; 4]));
        }
        let chunk_id = (chunks.len() - 1) as u32;
        let active = Arc::make_mut(chunks.last_mut().unwrap());
        let offset = active.len();
        debug_assert_eq!(offset & 3, 0);
        active.extend_from_slice(bytes);
        active.resize(offset + needed, 0);
        let pad = (4 - (active.len() & 3)) & 3;
        active.resize(active.len() + pad, 0);
        EntryRef::new(chunk_id, (offset >> 2) as u32)
    }

    /// Append `n` zero bytes with no reference (guard padding).
    pub fn append_zeros(&self, n: usize) {
        self.append(&[], n);
    }

    /// Force the next append to open a fresh chunk.
    pub fn seal_active(&self) {
        let mut chunks = self.chunks.write();
        if chunks.last().map(|c| c.len() > 4).unwrap_or(false) {
            assert!(chunks.len() < MAX_CHUNKS, "chunk directory exhausted");
            chunks.push(Arc::new(vec![0u8; 4]));
        }
    }

    /// Ids of every chunk currently holding data.
    pub fn chunk_ids(&self) -> Vec<u32> {
        let chunks = self.chunks.read();
        (0..chunks.len() as u32)
            .filter(|id| chunks[*id as usize].len() > 4)
            .collect()
    }

    pub fn chunk_len(&self, chunk_id: u32) -> usize {
        self.chunks.read()[chunk_id as usize].len()
    }

    /// Release the writer-side reference to a retired chunk. Readers that
    /// resolved the chunk into a view keep their copy alive.
    pub fn release_chunk(&self, chunk_id: u32) -> usize {
        let mut chunks = self.chunks.write();
        let slot = &mut chunks[chunk_id as usize];
        let freed = slot.len();
        *slot = Arc::new(Vec::new());
        freed
    }

    pub fn view(&self) -> ChunkView {
        ChunkView {
            chunks: self.chunks.read().clone(),
        }
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let chunks = self.chunks.read();
        let allocated: usize = chunks.iter().map(|c| c.capacity()).sum();
        let used: usize = chunks.iter().map(|c| c.len()).sum();
        MemoryUsage::new(allocated, used, 0, 0)
    }
}

/// Immutable snapshot of a chunk directory.
#[derive(Clone)]
pub struct ChunkView {
    chunks: Vec<Arc<Vec<u8>>>,
}

impl ChunkView {
    /// Bytes from the referenced offset to the end of its chunk. `None`
    /// when the view predates the chunk (the caller refreshes its view).
    pub fn slice(&self, r: EntryRef) -> Option<&[u8]> {
        let chunk = self.chunks.get(r.chunk() as usize)?;
        chunk.get(r.byte_offset()..)
    }
}
