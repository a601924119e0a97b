//! Posting lists
//!
//! Per-term, per-field ordered sequences of `(doc_id, entry)` keyed by
//! strictly increasing doc id. Small lists are inline sorted arrays;
//! past [`INLINE_MAX`] entries they are promoted to ordered trees. The
//! store is a slot arena shared by all terms of a field: every mutation
//! produces a fresh slot and the previous one is retired through the
//! generation hold list, so readers resolving an old reference keep an
//! unchanged list.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::generation::{Generation, HoldList};
use crate::store::FeatureRef;
use crate::types::{DocId, MemoryUsage};

/// Inline-array cluster threshold; larger lists become trees.
pub const INLINE_MAX: usize = 8;

/// Reference to a posting list in a [`PostingStore`]; 0 is NULL.
pub type PostingRef = u32;

pub const NULL_POSTING: PostingRef = 0;

/// Selects the posting entry shape for a field: plain entries carry only
/// the feature reference, interleaved entries add the two saturating
/// counters.
pub trait PostingVariant: Send + Sync + 'static {
    const INTERLEAVED: bool;
    type Counters: Copy + Default + Send + Sync;

    fn make_counters(num_occs: u32, field_length: u32) -> Self::Counters;
    fn num_occs(counters: &Self::Counters) -> u16;
    fn field_length(counters: &Self::Counters) -> u16;
}

pub struct PlainPosting;

impl PostingVariant for PlainPosting {
    const INTERLEAVED: bool = false;
    type Counters = ();

    fn make_counters(_num_occs: u32, _field_length: u32) {}

    fn num_occs(_: &()) -> u16 {
        0
    }

    fn field_length(_: &()) -> u16 {
        1
    }
}

pub struct InterleavedPosting;

fn cap_u16(val: u32) -> u16 {
    val.min(u16::MAX as u32) as u16
}

impl PostingVariant for InterleavedPosting {
    const INTERLEAVED: bool = true;
    type Counters = (u16, u16);

    fn make_counters(num_occs: u32, field_length: u32) -> (u16, u16) {
        (cap_u16(num_occs), cap_u16(field_length))
    }

    fn num_occs(counters: &(u16, u16)) -> u16 {
        counters.0
    }

    fn field_length(counters: &(u16, u16)) -> u16 {
        counters.1
    }
}

/// Entry per document in a posting list. The feature reference is atomic
/// so compaction can republish a relocated blob in place; the relocated
/// bytes are identical, which keeps shared lists observably unchanged.
pub struct PostingEntry<P: PostingVariant> {
    features: AtomicU32,
    counters: P::Counters,
}

impl<P: PostingVariant> PostingEntry<P> {
    pub fn new(features: FeatureRef, num_occs: u32, field_length: u32) -> Self {
        Self {
            features: AtomicU32::new(features.raw()),
            counters: P::make_counters(num_occs, field_length),
        }
    }

    pub fn features(&self) -> FeatureRef {
        FeatureRef::from_raw(self.features.load(Ordering::Acquire))
    }

    /// Reference relocated features. The moved blob must have the same
    /// content as the original.
    pub fn update_features(&self, features: FeatureRef) {
        self.features.store(features.raw(), Ordering::Release);
    }

    pub fn num_occs(&self) -> u16 {
        P::num_occs(&self.counters)
    }

    pub fn field_length(&self) -> u16 {
        P::field_length(&self.counters)
    }
}

impl<P: PostingVariant> Clone for PostingEntry<P> {
    fn clone(&self) -> Self {
        Self {
            features: AtomicU32::new(self.features.load(Ordering::Acquire)),
            counters: self.counters,
        }
    }
}

enum Repr<P: PostingVariant> {
    Array(Vec<(DocId, PostingEntry<P>)>),
    Tree(BTreeMap<DocId, PostingEntry<P>>),
}

/// One term's posting list.
pub struct PostingList<P: PostingVariant> {
    repr: Repr<P>,
}

impl<P: PostingVariant> PostingList<P> {
    fn new() -> Self {
        Self {
            repr: Repr::Array(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Array(v) => v.len(),
            Repr::Tree(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_tree(&self) -> bool {
        matches!(self.repr, Repr::Tree(_))
    }

    pub fn get(&self, doc_id: DocId) -> Option<&PostingEntry<P>> {
        match &self.repr {
            Repr::Array(v) => v
                .binary_search_by_key(&doc_id, |(d, _)| *d)
                .ok()
                .map(|i| &v[i].1),
            Repr::Tree(t) => t.get(&doc_id),
        }
    }

    /// First entry with doc id >= `doc_id`.
    pub fn lower_bound(&self, doc_id: DocId) -> Option<(DocId, &PostingEntry<P>)> {
        match &self.repr {
            Repr::Array(v) => {
                let idx = v.partition_point(|(d, _)| *d < doc_id);
                v.get(idx).map(|(d, e)| (*d, e))
            }
            Repr::Tree(t) => t.range(doc_id..).next().map(|(d, e)| (*d, e)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DocId, &PostingEntry<P>)> {
        let (array, tree) = match &self.repr {
            Repr::Array(v) => (Some(v.iter()), None),
            Repr::Tree(t) => (None, Some(t.iter())),
        };
        array
            .into_iter()
            .flatten()
            .map(|(d, e)| (*d, e))
            .chain(tree.into_iter().flatten().map(|(d, e)| (*d, e)))
    }

    fn clone_contents(&self) -> Self {
        let repr = match &self.repr {
            Repr::Array(v) => Repr::Array(v.clone()),
            Repr::Tree(t) => Repr::Tree(t.clone()),
        };
        Self { repr }
    }

    fn merge(&mut self, adds: Vec<(DocId, PostingEntry<P>)>, removes: &[DocId]) {
        match &mut self.repr {
            Repr::Array(v) => {
                for doc in removes {
                    if let Ok(i) = v.binary_search_by_key(doc, |(d, _)| *d) {
                        v.remove(i);
                    }
                }
                for (doc, entry) in adds {
                    match v.binary_search_by_key(&doc, |(d, _)| *d) {
                        Ok(i) => v[i] = (doc, entry),
                        Err(i) => v.insert(i, (doc, entry)),
                    }
                }
                if v.len() > INLINE_MAX {
                    let tree: BTreeMap<DocId, PostingEntry<P>> = std::mem::take(v)
                        .into_iter()
                        .collect();
                    self.repr = Repr::Tree(tree);
                }
            }
            Repr::Tree(t) => {
                for doc in removes {
                    t.remove(doc);
                }
                for (doc, entry) in adds {
                    t.insert(doc, entry);
                }
            }
        }
    }

    fn memory_bytes(&self) -> usize {
        let entry = std::mem::size_of::<(DocId, PostingEntry<P>)>();
        match &self.repr {
            Repr::Array(v) => v.capacity() * entry,
            Repr::Tree(t) => t.len() * (entry + 16),
        }
    }
}

/// Shared arena of posting lists for one field.
pub struct PostingStore<P: PostingVariant> {
    slots: RwLock<Vec<Option<Arc<PostingList<P>>>>>,
    free: Mutex<Vec<u32>>,
    hold: Mutex<HoldList<u32>>,
}

impl<P: PostingVariant> Default for PostingStore<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PostingVariant> PostingStore<P> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            free: Mutex::new(Vec::new()),
            hold: Mutex::new(HoldList::default()),
        }
    }

    /// Merge sorted `adds` and `removes` into the list at `ref_in` and
    /// return the new reference. Both slices must be strictly increasing
    /// by doc id; a remove of an absent doc is a no-op; an add for a
    /// present doc replaces its entry. The input list, if any, is retired
    /// at `gen`.
    pub fn apply(
        &self,
        ref_in: PostingRef,
        adds: Vec<(DocId, PostingEntry<P>)>,
        removes: &[DocId],
        gen: Generation,
    ) -> PostingRef {
        debug_assert!(adds.windows(2).all(|w| w[0].0 < w[1].0));
        debug_assert!(removes.windows(2).all(|w| w[0] < w[1]));

        let mut list = if ref_in == NULL_POSTING {
            PostingList::new()
        } else {
            self.resolve(ref_in)
                .expect("posting reference resolved after reclamation")
                .clone_contents()
        };
        list.merge(adds, removes);

        if ref_in != NULL_POSTING {
            self.retire(ref_in, gen);
        }
        if list.is_empty() {
            return NULL_POSTING;
        }
        self.alloc(Arc::new(list))
    }

    /// Resolve a reference to its list.
    pub fn resolve(&self, r: PostingRef) -> Option<Arc<PostingList<P>>> {
        if r == NULL_POSTING {
            return None;
        }
        self.slots.read()[(r - 1) as usize].clone()
    }

    fn alloc(&self, list: Arc<PostingList<P>>) -> PostingRef {
        let mut free = self.free.lock();
        let mut slots = self.slots.write();
        if let Some(slot) = free.pop() {
            slots[slot as usize] = Some(list);
            return slot + 1;
        }
        slots.push(Some(list));
        slots.len() as PostingRef
    }

    fn retire(&self, r: PostingRef, gen: Generation) {
        self.hold.lock().hold(gen, r - 1);
    }

    /// Release slots retired strictly before `oldest_used` for reuse.
    pub fn reclaim_memory(&self, oldest_used: Generation) {
        let freed = self.hold.lock().reclaim(oldest_used);
        if freed.is_empty() {
            return;
        }
        let mut free = self.free.lock();
        let mut slots = self.slots.write();
        for slot in freed {
            slots[slot as usize] = None;
            free.push(slot);
        }
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let slots = self.slots.read();
        let mut used = 0usize;
        for slot in slots.iter().flatten() {
            used += slot.memory_bytes();
        }
        let hold = self.hold.lock();
        let mut on_hold = 0usize;
        for (_, slot) in hold.iter() {
            if let Some(list) = slots[*slot as usize].as_ref() {
                on_hold += list.memory_bytes();
            }
        }
        let allocated = used + slots.capacity() * std::mem::size_of::<usize>();
        MemoryUsage::new(allocated, used, 0, on_hold)
    }
}
