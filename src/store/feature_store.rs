//! Feature store
//!
//! Bit-packed, append-only storage of per-`(term, document)` feature
//! blobs: element ids, weights, element lengths and word positions.
//! Coding parameters are derived once from the schema and never mutated.
//!
//! The decoder may read up to [`DECODE_SAFETY`] bytes past the logical
//! end of a blob; matching guard bytes are appended before posting-list
//! publication, and the bit reader additionally clamps reads to its
//! chunk, so the over-read never leaves owned memory.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ChunkDirectory, ChunkView, FeatureRef};
use crate::generation::{Generation, HoldList};
use crate::schema::{CollectionType, Schema};
use crate::types::{DocIdAndFeatures, FieldId, MemoryUsage};

/// Maximum decoder over-read past the logical end of a blob, in bytes.
pub const DECODE_SAFETY: usize = 16;

/// Encoder scratch buffer is rebased once it grows past this.
const ENCODER_REBASE_BYTES: usize = 2048;

/// Per-field coding parameters, derived from the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldParams {
    has_elements: bool,
    has_weights: bool,
}

impl FieldParams {
    fn from_collection(collection: CollectionType) -> Self {
        Self {
            has_elements: collection != CollectionType::Single,
            has_weights: collection == CollectionType::WeightedSet,
        }
    }
}

pub struct FeatureStore {
    dir: ChunkDirectory,
    encoder: Mutex<BitWriter>,
    params: Vec<FieldParams>,
    hold: Mutex<HoldList<u32>>,
    hold_bytes: AtomicUsize,
}

impl FeatureStore {
    pub fn new(schema: &Schema) -> Self {
        let params = schema
            .fields()
            .iter()
            .map(|f| FieldParams::from_collection(f.collection))
            .collect();
        Self {
            dir: ChunkDirectory::new(),
            encoder: Mutex::new(BitWriter::new()),
            params,
            hold: Mutex::new(HoldList::default()),
            hold_bytes: AtomicUsize::new(0),
        }
    }

    /// Encode `features` and append the blob. Returns the reference and
    /// the logical bit length.
    pub fn encode_and_store(&self, field_id: FieldId, features: &DocIdAndFeatures) -> (FeatureRef, u64) {
        let params = self.params[field_id as usize];
        let mut encoder = self.encoder.lock();
        if encoder.byte_len() > ENCODER_REBASE_BYTES {
            encoder.rebase();
        }
        let begin = encoder.bit_len();
        write_features(&mut encoder, params, features);
        let bit_len = encoder.bit_len() - begin;
        encoder.align_byte();
        let bytes = encoder.bytes_from((begin / 8) as usize);
        let r = self.dir.append(bytes, 0);
        (r, bit_len)
    }

    /// Decode the blob at `r` into `features`. The document id is not part
    /// of the blob; the caller owns it.
    pub fn decode(&self, field_id: FieldId, r: FeatureRef, features: &mut DocIdAndFeatures) {
        self.decode_with_view(&self.dir.view(), field_id, r, features);
    }

    /// Decode through a previously captured view, refreshing internally
    /// when the reference is newer than the view.
    pub fn decode_with_view(
        &self,
        view: &ChunkView,
        field_id: FieldId,
        r: FeatureRef,
        features: &mut DocIdAndFeatures,
    ) {
        let params = self.params[field_id as usize];
        match view.slice(r) {
            Some(slice) => read_features(&mut BitReader::new(slice), params, features),
            None => {
                let fresh = self.dir.view();
                let slice = fresh
                    .slice(r)
                    .expect("feature reference resolved after reclamation");
                read_features(&mut BitReader::new(slice), params, features);
            }
        }
    }

    /// Skip over one blob to compute its size in bits.
    pub fn bit_size(&self, field_id: FieldId, r: FeatureRef) -> u64 {
        let params = self.params[field_id as usize];
        let view = self.dir.view();
        let slice = view
            .slice(r)
            .expect("feature reference resolved after reclamation");
        let mut reader = BitReader::new(slice);
        let mut scratch = DocIdAndFeatures::default();
        read_features(&mut reader, params, &mut scratch);
        reader.bits_consumed()
    }

    /// Copy the blob to a fresh location and return the new reference.
    /// The caller publishes the new reference with release ordering
    /// before the old bytes become eligible for reclamation.
    pub fn relocate(&self, _field_id: FieldId, r: FeatureRef, bit_len: u64) -> FeatureRef {
        let byte_len = ((bit_len + 7) / 8) as usize;
        let view = self.dir.view();
        let slice = view
            .slice(r)
            .expect("feature reference resolved after reclamation");
        self.dir.append(&slice[..byte_len.min(slice.len())], 0)
    }

    /// Append guard padding tolerating the decoder's safe over-read.
    /// Called before any dictionary mutation that publishes new blobs.
    pub fn write_guard_bytes(&self) {
        self.dir.append_zeros(DECODE_SAFETY);
    }

    /// Snapshot for the read path.
    pub fn view(&self) -> ChunkView {
        self.dir.view()
    }

    /// Begin a compaction pass: seal the chunks currently holding data
    /// and return their ids. Subsequent relocations land in fresh chunks.
    pub fn start_compact(&self) -> Vec<u32> {
        self.dir.seal_active();
        self.dir.chunk_ids()
    }

    /// Retire the chunks captured by [`start_compact`] at `gen`. Their
    /// bytes stay resolvable until reclaimed.
    pub fn finish_compact(&self, to_hold: Vec<u32>, gen: Generation) {
        let mut hold = self.hold.lock();
        let mut held_bytes = 0usize;
        for chunk_id in to_hold {
            held_bytes += self.dir.chunk_len(chunk_id);
            hold.hold(gen, chunk_id);
        }
        self.hold_bytes.fetch_add(held_bytes, Ordering::Relaxed);
    }

    /// Release every chunk retired strictly before `oldest_used`.
    pub fn reclaim_memory(&self, oldest_used: Generation) {
        let freed = self.hold.lock().reclaim(oldest_used);
        let mut bytes = 0usize;
        for chunk_id in freed {
            bytes += self.dir.release_chunk(chunk_id);
        }
        if bytes > 0 {
            self.hold_bytes.fetch_sub(bytes, Ordering::Relaxed);
        }
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = self.dir.memory_usage();
        usage.on_hold = self.hold_bytes.load(Ordering::Relaxed);
        usage
    }
}

fn zigzag(v: i32) -> u64 {
    (((v << 1) ^ (v >> 31)) as u32) as u64
}

fn unzigzag(v: u64) -> i32 {
    let v = v as u32;
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

fn write_features(w: &mut BitWriter, params: FieldParams, features: &DocIdAndFeatures) {
    debug_assert!(!features.elements.is_empty());
    if params.has_elements {
        w.put_gamma(features.elements.len() as u64);
    }
    let mut prev_element_id = 0u32;
    for (idx, element) in features.elements.iter().enumerate() {
        if params.has_elements {
            let delta = if idx == 0 {
                element.element_id as u64 + 1
            } else {
                (element.element_id - prev_element_id) as u64
            };
            w.put_gamma(delta);
            prev_element_id = element.element_id;
        }
        if params.has_weights {
            w.put_gamma(zigzag(element.weight) + 1);
        }
        w.put_gamma(element.element_len as u64 + 1);
        let positions: Vec<u32> = features
            .word_positions
            .iter()
            .filter(|p| p.element_index as usize == idx)
            .map(|p| p.word_pos)
            .collect();
        debug_assert!(!positions.is_empty());
        w.put_gamma(positions.len() as u64);
        let mut prev = 0u32;
        for (i, pos) in positions.iter().enumerate() {
            let delta = if i == 0 {
                *pos as u64 + 1
            } else {
                (*pos - prev) as u64
            };
            w.put_gamma(delta);
            prev = *pos;
        }
    }
}

fn read_features(r: &mut BitReader, params: FieldParams, features: &mut DocIdAndFeatures) {
    let doc_id = features.doc_id;
    features.clear(doc_id);
    let num_elements = if params.has_elements { r.get_gamma() } else { 1 };
    let mut element_id = 0u32;
    let mut field_length = 0u32;
    for idx in 0..num_elements {
        if params.has_elements {
            let delta = r.get_gamma() as u32;
            element_id = if idx == 0 { delta - 1 } else { element_id + delta };
        }
        let weight = if params.has_weights {
            unzigzag(r.get_gamma() - 1)
        } else {
            1
        };
        let element_len = (r.get_gamma() - 1) as u32;
        field_length = field_length.saturating_add(element_len);
        let num_occs = r.get_gamma();
        let mut pos = 0u32;
        for i in 0..num_occs {
            let delta = r.get_gamma() as u32;
            pos = if i == 0 { delta - 1 } else { pos + delta };
            features.add_occurrence(element_id, pos, weight, element_len);
        }
    }
    features.set_num_occs(features.word_positions.len() as u32);
    features.set_field_length(field_length);
}

/// Bitstream writer. Bits are written most-significant first within each
/// byte so Elias gamma codes read back in natural order.
struct BitWriter {
    buf: Vec<u8>,
    bit_len: u64,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            bit_len: 0,
        }
    }

    fn put_bit(&mut self, bit: bool) {
        let byte = (self.bit_len / 8) as usize;
        if byte == self.buf.len() {
            self.buf.push(0);
        }
        if bit {
            self.buf[byte] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    fn put_bits(&mut self, value: u64, n: u32) {
        for i in (0..n).rev() {
            self.put_bit((value >> i) & 1 == 1);
        }
    }

    /// Elias gamma code for `v >= 1`.
    fn put_gamma(&mut self, v: u64) {
        debug_assert!(v >= 1);
        let n = 64 - v.leading_zeros();
        for _ in 0..n - 1 {
            self.put_bit(false);
        }
        self.put_bits(v, n);
    }

    fn align_byte(&mut self) {
        self.bit_len = (self.bit_len + 7) & !7;
    }

    fn bit_len(&self) -> u64 {
        self.bit_len
    }

    fn byte_len(&self) -> usize {
        self.buf.len()
    }

    fn bytes_from(&self, byte_offset: usize) -> &[u8] {
        &self.buf[byte_offset..]
    }

    fn rebase(&mut self) {
        self.buf.clear();
        self.bit_len = 0;
    }
}

/// Bitstream reader over one chunk slice. Reads past the end of the
/// slice yield zero bits, which combined with the guard-byte protocol
/// keeps the over-read harmless.
struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: u64,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    fn get_bit(&mut self) -> bool {
        let byte = (self.bit_pos / 8) as usize;
        let bit = self
            .data
            .get(byte)
            .map(|b| (b >> (7 - (self.bit_pos % 8))) & 1 == 1)
            .unwrap_or(false);
        self.bit_pos += 1;
        bit
    }

    fn get_bits(&mut self, n: u32) -> u64 {
        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | self.get_bit() as u64;
        }
        value
    }

    fn get_gamma(&mut self) -> u64 {
        let mut zeros = 0u32;
        while !self.get_bit() {
            zeros += 1;
            debug_assert!(zeros < 64, "corrupt gamma code");
        }
        (1 << zeros) | self.get_bits(zeros)
    }

    fn bits_consumed(&self) -> u64 {
        self.bit_pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn schema_with_all_collections() -> Schema {
        let mut schema = Schema::new();
        schema.add_text_field("single", CollectionType::Single, false);
        schema.add_text_field("array", CollectionType::Array, true);
        schema.add_text_field("wset", CollectionType::WeightedSet, true);
        schema
    }

    fn sample_features(doc_id: u32) -> DocIdAndFeatures {
        let mut f = DocIdAndFeatures::default();
        f.clear(doc_id);
        f.add_occurrence(0, 0, 1, 3);
        f.add_occurrence(0, 2, 1, 3);
        f.add_occurrence(2, 1, -4, 2);
        f.set_num_occs(3);
        f.set_field_length(5);
        f
    }

    #[test]
    fn test_gamma_round_trip() {
        let mut w = BitWriter::new();
        for v in [1u64, 2, 3, 7, 8, 255, 1000, 1 << 20] {
            w.put_gamma(v);
        }
        let mut r = BitReader::new(w.bytes_from(0));
        for v in [1u64, 2, 3, 7, 8, 255, 1000, 1 << 20] {
            assert_eq!(r.get_gamma(), v);
        }
    }

    #[test]
    fn test_zigzag_round_trip() {
        for v in [0i32, 1, -1, 100, -100, i32::MAX, i32::MIN] {
            assert_eq!(unzigzag(zigzag(v)), v);
        }
    }

    #[test]
    fn test_encode_decode_weighted_set() {
        let schema = schema_with_all_collections();
        let store = FeatureStore::new(&schema);
        let features = sample_features(42);
        let (r, bits) = store.encode_and_store(2, &features);
        assert!(bits > 0);

        let mut decoded = DocIdAndFeatures::default();
        decoded.clear(42);
        store.decode(2, r, &mut decoded);
        assert_eq!(decoded.elements, features.elements);
        assert_eq!(decoded.word_positions, features.word_positions);
        assert_eq!(decoded.num_occs(), 3);
        assert_eq!(decoded.field_length(), 5);
    }

    #[test]
    fn test_encode_decode_single_field_drops_structure() {
        let schema = schema_with_all_collections();
        let store = FeatureStore::new(&schema);
        let mut f = DocIdAndFeatures::default();
        f.clear(1);
        f.add_occurrence(0, 0, 1, 1);
        f.set_num_occs(1);
        f.set_field_length(1);

        let (r, _) = store.encode_and_store(0, &f);
        let mut decoded = DocIdAndFeatures::default();
        decoded.clear(1);
        store.decode(0, r, &mut decoded);
        assert_eq!(decoded.elements.len(), 1);
        assert_eq!(decoded.elements[0].weight, 1);
        assert_eq!(decoded.word_positions.len(), 1);
    }

    #[test]
    fn test_bit_size_matches_encoded_length() {
        let schema = schema_with_all_collections();
        let store = FeatureStore::new(&schema);
        let features = sample_features(7);
        let (r, bits) = store.encode_and_store(1, &features);
        assert_eq!(store.bit_size(1, r), bits);
    }

    #[test]
    fn test_relocate_preserves_content() {
        let schema = schema_with_all_collections();
        let store = FeatureStore::new(&schema);
        let features = sample_features(9);
        let (r, bits) = store.encode_and_store(2, &features);
        let moved = store.relocate(2, r, bits);
        assert_ne!(moved, r);

        let mut decoded = DocIdAndFeatures::default();
        decoded.clear(9);
        store.decode(2, moved, &mut decoded);
        assert_eq!(decoded.elements, features.elements);
        assert_eq!(decoded.word_positions, features.word_positions);
    }

    #[test]
    fn test_compaction_hold_and_reclaim() {
        let schema = schema_with_all_collections();
        let store = FeatureStore::new(&schema);
        let features = sample_features(3);
        let (r, bits) = store.encode_and_store(1, &features);
        store.write_guard_bytes();

        let to_hold = store.start_compact();
        let moved = store.relocate(1, r, bits);
        store.finish_compact(to_hold, 5);

        // Not yet reclaimable: generation 5 may still be guarded.
        store.reclaim_memory(5);
        let mut decoded = DocIdAndFeatures::default();
        decoded.clear(3);
        store.decode(1, r, &mut decoded);
        assert_eq!(decoded.word_positions.len(), 3);

        // Past the watermark the old chunk is released.
        store.reclaim_memory(6);
        decoded.clear(3);
        store.decode(1, moved, &mut decoded);
        assert_eq!(decoded.word_positions.len(), 3);
    }
}
