use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::vault::{NotesSnapshot, VaultStructure};

/// A single-slot TTL cache. Entries are replaced atomically, never mutated
/// in place. The lock guards only the slot itself; callers must not hold it
/// across I/O - the pattern is read-check, release, fetch-if-miss, install.
pub struct TtlSlot<T> {
    ttl: Duration,
    entry: Mutex<Option<CachedEntry<T>>>,
}

struct CachedEntry<T> {
    value: T,
    inserted_at: Instant,
}

impl<T: Clone> TtlSlot<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// The cached value iff present and within TTL.
    pub fn get_fresh(&self) -> Option<T> {
        let guard = self.entry.lock().expect("cache lock poisoned");
        guard
            .as_ref()
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    pub fn put(&self, value: T) {
        let mut guard = self.entry.lock().expect("cache lock poisoned");
        *guard = Some(CachedEntry {
            value,
            inserted_at: Instant::now(),
        });
    }

    pub fn invalidate(&self) {
        let mut guard = self.entry.lock().expect("cache lock poisoned");
        *guard = None;
    }
}

/// The gateway's two caches. Both are cleared together on every mutating
/// vault operation; there is no cross-process coordination (single-writer
/// deployment).
pub struct VaultCaches {
    pub structure: TtlSlot<VaultStructure>,
    pub notes: TtlSlot<NotesSnapshot>,
}

impl VaultCaches {
    pub fn new(structure_ttl: Duration, notes_ttl: Duration) -> Self {
        Self {
            structure: TtlSlot::new(structure_ttl),
            notes: TtlSlot::new(notes_ttl),
        }
    }

    /// Clears both caches unconditionally. Monotonic: subsequent reads miss
    /// until the next put.
    pub fn invalidate(&self) {
        self.structure.invalidate();
        self.notes.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_hit_and_invalidate() {
        let slot = TtlSlot::new(Duration::from_secs(60));
        assert_eq!(slot.get_fresh(), None);
        slot.put(7u32);
        assert_eq!(slot.get_fresh(), Some(7));
        slot.invalidate();
        assert_eq!(slot.get_fresh(), None);
    }

    #[test]
    fn zero_ttl_is_always_stale() {
        let slot = TtlSlot::new(Duration::ZERO);
        slot.put("x");
        assert_eq!(slot.get_fresh(), None);
    }

    #[test]
    fn put_replaces_whole_entry() {
        let slot = TtlSlot::new(Duration::from_secs(60));
        slot.put(vec![1, 2]);
        slot.put(vec![3]);
        assert_eq!(slot.get_fresh(), Some(vec![3]));
    }

    #[test]
    fn invalidate_clears_both_caches() {
        let caches = VaultCaches::new(Duration::from_secs(300), Duration::from_secs(180));
        caches.notes.put(NotesSnapshot {
            notes: Vec::new(),
            has_headers: false,
        });
        caches.structure.put(VaultStructure::default());
        caches.invalidate();
        assert!(caches.notes.get_fresh().is_none());
        assert!(caches.structure.get_fresh().is_none());
    }
}
