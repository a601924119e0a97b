//! Generation-based memory reclamation
//!
//! Writers retire memory tagged with the generation that made it
//! unreachable; readers pin the current generation with a guard. Retired
//! memory is released or reused only once every guard taken at or before
//! the retirement generation is gone.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

pub type Generation = u64;

/// Guards are tracked in a ring of per-generation counters. The writer
/// advances at most one generation per commit, so the window between the
/// oldest guarded generation and the current one stays far below this.
const GUARD_RING: usize = 1024;

struct GenInner {
    current: AtomicU64,
    oldest_used: AtomicU64,
    counts: Vec<AtomicU32>,
}

/// Per-field generation counter with guard tracking.
#[derive(Clone)]
pub struct GenerationHandler {
    inner: Arc<GenInner>,
}

impl Default for GenerationHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationHandler {
    pub fn new() -> Self {
        let counts = (0..GUARD_RING).map(|_| AtomicU32::new(0)).collect();
        Self {
            inner: Arc::new(GenInner {
                current: AtomicU64::new(0),
                oldest_used: AtomicU64::new(0),
                counts,
            }),
        }
    }

    pub fn current_generation(&self) -> Generation {
        self.inner.current.load(Ordering::Acquire)
    }

    /// Pin the current generation. The fast path is one load and one
    /// counter increment; the re-read only loops when a writer advanced
    /// the generation in between.
    pub fn take_guard(&self) -> GenerationGuard {
        loop {
            let gen = self.inner.current.load(Ordering::Acquire);
            self.inner.counts[(gen as usize) % GUARD_RING].fetch_add(1, Ordering::AcqRel);
            if self.inner.current.load(Ordering::Acquire) == gen {
                return GenerationGuard {
                    inner: Arc::clone(&self.inner),
                    gen,
                };
            }
            self.inner.counts[(gen as usize) % GUARD_RING].fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Advance the generation. Called by the writer at commit.
    pub fn inc_generation(&self) {
        let prev = self.inner.current.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev - self.inner.oldest_used.load(Ordering::Acquire) < GUARD_RING as u64 - 1);
        self.update_oldest_used();
    }

    /// Oldest generation that may still be pinned by a guard.
    pub fn oldest_used_generation(&self) -> Generation {
        self.update_oldest_used();
        self.inner.oldest_used.load(Ordering::Acquire)
    }

    fn update_oldest_used(&self) {
        let current = self.inner.current.load(Ordering::Acquire);
        let mut oldest = self.inner.oldest_used.load(Ordering::Acquire);
        while oldest < current {
            if self.inner.counts[(oldest as usize) % GUARD_RING].load(Ordering::Acquire) != 0 {
                break;
            }
            oldest += 1;
        }
        self.inner.oldest_used.store(oldest, Ordering::Release);
    }
}

/// Reader-held token pinning a generation.
pub struct GenerationGuard {
    inner: Arc<GenInner>,
    gen: Generation,
}

impl GenerationGuard {
    pub fn generation(&self) -> Generation {
        self.gen
    }
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        self.inner.counts[(self.gen as usize) % GUARD_RING].fetch_sub(1, Ordering::AcqRel);
    }
}

/// Items retired by the writer, keyed by the generation that retired them.
/// Drained once the oldest used generation has moved past.
#[derive(Debug)]
pub struct HoldList<T> {
    items: Vec<(Generation, T)>,
}

impl<T> Default for HoldList<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> HoldList<T> {
    pub fn hold(&mut self, gen: Generation, item: T) {
        self.items.push((gen, item));
    }

    /// Remove and return every item retired strictly before `oldest_used`.
    pub fn reclaim(&mut self, oldest_used: Generation) -> Vec<T> {
        let mut kept = Vec::new();
        let mut freed = Vec::new();
        for (gen, item) in self.items.drain(..) {
            if gen < oldest_used {
                freed.push(item);
            } else {
                kept.push((gen, item));
            }
        }
        self.items = kept;
        freed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Generation, T)> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_pins_generation() {
        let handler = GenerationHandler::new();
        assert_eq!(handler.current_generation(), 0);

        let guard = handler.take_guard();
        handler.inc_generation();
        handler.inc_generation();
        assert_eq!(handler.current_generation(), 2);
        assert_eq!(handler.oldest_used_generation(), 0);

        drop(guard);
        assert_eq!(handler.oldest_used_generation(), 2);
    }

    #[test]
    fn test_hold_list_reclaims_by_watermark() {
        let mut hold: HoldList<&'static str> = HoldList::default();
        hold.hold(0, "a");
        hold.hold(1, "b");
        hold.hold(2, "c");

        let freed = hold.reclaim(2);
        assert_eq!(freed, vec!["a", "b"]);
        assert_eq!(hold.len(), 1);

        let freed = hold.reclaim(2);
        assert!(freed.is_empty());
        let freed = hold.reclaim(3);
        assert_eq!(freed, vec!["c"]);
        assert!(hold.is_empty());
    }

    #[test]
    fn test_multiple_guards() {
        let handler = GenerationHandler::new();
        let g0 = handler.take_guard();
        handler.inc_generation();
        let g1 = handler.take_guard();
        assert_eq!(g0.generation(), 0);
        assert_eq!(g1.generation(), 1);

        drop(g0);
        assert_eq!(handler.oldest_used_generation(), 1);
        drop(g1);
        assert_eq!(handler.oldest_used_generation(), 1);
        handler.inc_generation();
        assert_eq!(handler.oldest_used_generation(), 2);
    }
}
