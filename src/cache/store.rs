//! Keyed slot arena with an intrusive recency order, shared by all three
//! cache tiers.
//!
//! Entries live in fixed slots addressed by index; a hash index maps keys to
//! slots and a doubly-linked list threaded through the slots keeps the
//! most-recently-used order. Each slot carries a reference count (a slot with
//! live references is never evicted) and a generation counter bumped on
//! reuse, so a stale handle can be told apart from the slot's next occupant.
//!
//! Byte accounting is limit-bounded: when an insertion would exceed the
//! limit, least-recently-used unreferenced entries are evicted first. The
//! first victim's storage is kept as the reuse candidate (buffers are
//! recycled, never shrunk); further victims are freed outright, so at most
//! one spare is ever in flight. When everything left is referenced the limit
//! grows to the current usage instead of violating liveness, and it is never
//! shrunk back automatically.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

struct Slot<K, T> {
    key: Option<K>,
    payload: Option<T>,
    refs: u32,
    bytes: usize,
    generation: u64,
    /// Toward the most-recently-used end.
    prev: Option<usize>,
    /// Toward the least-recently-used end.
    next: Option<usize>,
}

impl<K, T> Slot<K, T> {
    fn vacant() -> Self {
        Self {
            key: None,
            payload: None,
            refs: 0,
            bytes: 0,
            generation: 0,
            prev: None,
            next: None,
        }
    }
}

/// A slot reserved for a new occupant, plus whatever the eviction scan
/// displaced.
pub(crate) struct Reserved<T> {
    pub slot: usize,
    /// Storage of the reuse candidate. Its bytes stay counted until the new
    /// occupant is inserted; the caller refurbishes the buffers in place.
    pub reused: Option<T>,
    /// Fully evicted payloads, bytes already released. The caller must drop
    /// any cross-tier references they hold.
    pub freed: Vec<T>,
}

pub(crate) struct Store<K, T> {
    /// Tier name for log messages.
    name: &'static str,
    index: HashMap<K, usize>,
    slots: Vec<Slot<K, T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    bytes: usize,
    limit: usize,
    pub gets: u64,
    pub hits: u64,
    pub evictions: u64,
}

impl<K: Eq + Hash + Clone, T> Store<K, T> {
    pub fn new(name: &'static str, limit: usize) -> Self {
        Self {
            name,
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            bytes: 0,
            limit,
            gets: 0,
            hits: 0,
            evictions: 0,
        }
    }

    /// Looks up a key, counting the access and moving any hit to the
    /// most-recently-used end.
    pub fn lookup<Q>(&mut self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.gets += 1;
        let slot = *self.index.get(key)?;
        self.hits += 1;
        self.unlink(slot);
        self.push_front(slot);
        Some(slot)
    }

    /// Registers a hit on an already-resolved slot: counts it and refreshes
    /// its recency, as if it had been looked up by key.
    pub fn touch(&mut self, slot: usize) {
        self.gets += 1;
        self.hits += 1;
        self.unlink(slot);
        self.push_front(slot);
    }

    /// Reserves a slot for a new entry expected to occupy `incoming` bytes,
    /// evicting unreferenced entries from the cold end as needed. The
    /// reserved slot is not linked into the recency order and has no key
    /// until [`Store::insert`] (or is returned by [`Store::discard`] on
    /// upstream failure).
    pub fn reserve(&mut self, incoming: usize) -> Reserved<T> {
        let mut reuse_slot = None;
        let mut reused = None;
        let mut freed = Vec::new();

        // The spare's buffers are recycled into the new occupant, so they are
        // not counted against the incoming size twice.
        let mut spare_bytes = 0;
        let mut cursor = self.tail;
        while self.bytes - spare_bytes + incoming.max(spare_bytes) > self.limit {
            let Some(slot) = cursor else { break };
            cursor = self.slots[slot].prev;
            if self.slots[slot].refs != 0 {
                // Referenced entries are skipped, never evicted.
                continue;
            }
            let payload = self.evict(slot);
            if reuse_slot.is_none() {
                reuse_slot = Some(slot);
                reused = Some(payload);
                spare_bytes = self.slots[slot].bytes;
            } else {
                self.bytes -= self.slots[slot].bytes;
                self.slots[slot].bytes = 0;
                self.free.push(slot);
                freed.push(payload);
            }
        }

        let slot = match reuse_slot {
            Some(slot) => slot,
            None => self.fresh_slot(),
        };
        self.slots[slot].generation += 1;

        Reserved {
            slot,
            reused,
            freed,
        }
    }

    /// Installs a new occupant into a reserved slot at the
    /// most-recently-used end.
    pub fn insert(&mut self, slot: usize, key: K, payload: T, bytes: usize) {
        debug_assert!(self.slots[slot].key.is_none());
        self.bytes = self.bytes + bytes - self.slots[slot].bytes;
        let s = &mut self.slots[slot];
        s.bytes = bytes;
        s.payload = Some(payload);
        s.key = Some(key.clone());
        self.index.insert(key, slot);
        self.push_front(slot);
    }

    /// Abandons a reserved slot after an upstream failure, releasing any
    /// retained spare storage. Bookkeeping stays consistent; the slot goes
    /// back on the free list.
    pub fn discard(&mut self, slot: usize) {
        debug_assert!(self.slots[slot].key.is_none());
        self.bytes -= self.slots[slot].bytes;
        let s = &mut self.slots[slot];
        s.bytes = 0;
        s.payload = None;
        self.free.push(slot);
    }

    /// Evicts unreferenced cold entries until usage fits the limit again,
    /// raising the limit when only referenced entries remain. `protect`
    /// shields the entry just inserted (relevant for tiers whose entries
    /// carry no reference counts). Returns the freed payloads for cross-tier
    /// cleanup.
    pub fn trim(&mut self, protect: Option<usize>) -> Vec<T> {
        let mut freed = Vec::new();
        let mut cursor = self.tail;
        while self.bytes > self.limit {
            let Some(slot) = cursor else {
                log::warn!(
                    "{} cache: only referenced entries left, raising limit {} -> {}",
                    self.name,
                    self.limit,
                    self.bytes
                );
                self.limit = self.bytes;
                break;
            };
            cursor = self.slots[slot].prev;
            if self.slots[slot].refs != 0 || Some(slot) == protect {
                continue;
            }
            freed.push(self.evict(slot));
            self.bytes -= self.slots[slot].bytes;
            self.slots[slot].bytes = 0;
            self.free.push(slot);
        }
        freed
    }

    /// Unlinks an occupied slot from the index and recency order.
    fn evict(&mut self, slot: usize) -> T {
        self.unlink(slot);
        let key = self.slots[slot].key.take().expect("evicting a keyed slot");
        self.index.remove(&key);
        self.evictions += 1;
        log::trace!(
            "{} cache: evicted entry of {} bytes",
            self.name,
            self.slots[slot].bytes
        );
        self.slots[slot]
            .payload
            .take()
            .expect("evicting an occupied slot")
    }

    fn fresh_slot(&mut self) -> usize {
        match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::vacant());
                self.slots.len() - 1
            }
        }
    }

    pub fn incref(&mut self, slot: usize) {
        self.slots[slot].refs += 1;
    }

    /// Drops one reference. Releasing an entry that has none is a usage
    /// error that would silently desynchronize the reference counts, so it
    /// is fatal.
    pub fn decref(&mut self, slot: usize) {
        let s = &mut self.slots[slot];
        if s.refs == 0 {
            log::error!("{} cache: release of an unreferenced entry", self.name);
            panic!("release of an unreferenced {} cache entry", self.name);
        }
        s.refs -= 1;
    }

    pub fn refs(&self, slot: usize) -> u32 {
        self.slots[slot].refs
    }

    pub fn generation(&self, slot: usize) -> u64 {
        self.slots[slot].generation
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        slot < self.slots.len() && self.slots[slot].payload.is_some()
    }

    pub fn payload(&self, slot: usize) -> &T {
        self.slots[slot].payload.as_ref().expect("occupied slot")
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[slot].prev = None;
        self.slots[slot].next = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].prev = None;
        self.slots[slot].next = self.head;
        if let Some(h) = self.head {
            self.slots[h].prev = Some(slot);
        } else {
            self.tail = Some(slot);
        }
        self.head = Some(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(limit: usize) -> Store<u32, Vec<u8>> {
        Store::new("test", limit)
    }

    fn put(s: &mut Store<u32, Vec<u8>>, key: u32, bytes: usize) -> usize {
        assert!(s.lookup(&key).is_none());
        let r = s.reserve(bytes);
        for _ in r.freed {}
        s.insert(r.slot, key, vec![0; bytes], bytes);
        r.slot
    }

    #[test]
    fn hit_moves_to_front_and_counts() {
        let mut s = store(1000);
        put(&mut s, 1, 10);
        put(&mut s, 2, 10);
        assert_eq!(s.gets, 2);
        assert_eq!(s.hits, 0);
        assert!(s.lookup(&1).is_some());
        assert_eq!(s.hits, 1);
        assert_eq!(s.head, s.index.get(&1).copied());
    }

    #[test]
    fn touch_counts_a_hit_and_refreshes_recency() {
        let mut s = store(1000);
        let a = put(&mut s, 1, 10);
        put(&mut s, 2, 10);
        let (gets, hits) = (s.gets, s.hits);
        s.touch(a);
        assert_eq!(s.gets, gets + 1);
        assert_eq!(s.hits, hits + 1);
        assert_eq!(s.head, Some(a));
    }

    #[test]
    fn evicts_least_recently_used_first() {
        let mut s = store(30);
        put(&mut s, 1, 10);
        put(&mut s, 2, 10);
        put(&mut s, 3, 10);
        // Touch 1 so 2 is the coldest.
        s.lookup(&1);
        put(&mut s, 4, 10);
        assert_eq!(s.evictions, 1);
        assert!(s.lookup(&2).is_none());
        assert!(s.lookup(&1).is_some());
        assert!(s.lookup(&3).is_some());
    }

    #[test]
    fn referenced_entries_are_never_evicted() {
        let mut s = store(20);
        let a = put(&mut s, 1, 10);
        s.incref(a);
        put(&mut s, 2, 10);
        // Inserting over budget must skip the referenced slot.
        put(&mut s, 3, 10);
        assert!(s.lookup(&1).is_some(), "referenced entry survived");
        assert!(s.lookup(&2).is_none(), "unreferenced entry was evicted");
    }

    #[test]
    fn limit_raises_when_everything_is_referenced() {
        let mut s = store(15);
        let a = put(&mut s, 1, 10);
        s.incref(a);
        let r = s.reserve(10);
        assert!(r.reused.is_none());
        s.insert(r.slot, 2, vec![0; 10], 10);
        s.incref(r.slot);
        let freed = s.trim(None);
        assert!(freed.is_empty());
        assert_eq!(s.limit(), 20, "limit raised to current usage");
        assert_eq!(s.bytes(), 20);
        assert_eq!(s.evictions, 0);
    }

    #[test]
    fn reserve_reuses_first_victim_and_frees_the_rest() {
        let mut s = store(30);
        put(&mut s, 1, 10);
        put(&mut s, 2, 10);
        put(&mut s, 3, 10);
        let r = s.reserve(15);
        // Two victims needed; one comes back for reuse, one is freed.
        assert!(r.reused.is_some());
        assert_eq!(r.freed.len(), 1);
        assert_eq!(s.evictions, 2);
    }

    #[test]
    fn generation_bumps_on_reuse() {
        let mut s = store(10);
        let a = put(&mut s, 1, 10);
        let gen_a = s.generation(a);
        let r = s.reserve(10);
        assert_eq!(r.slot, a, "slot storage reused");
        assert!(s.generation(a) > gen_a);
        s.insert(r.slot, 2, vec![0; 10], 10);
    }

    #[test]
    fn discard_after_upstream_failure_keeps_books_straight() {
        let mut s = store(20);
        put(&mut s, 1, 10);
        put(&mut s, 2, 10);
        let r = s.reserve(10);
        assert!(r.reused.is_some());
        s.discard(r.slot);
        assert_eq!(s.bytes(), 10, "spare storage released");
        assert_eq!(s.len(), 1);
        // The discarded slot is reusable.
        let r2 = s.reserve(5);
        s.insert(r2.slot, 3, vec![0; 5], 5);
        assert!(s.lookup(&3).is_some());
    }

    #[test]
    fn release_returns_refcount_to_zero() {
        let mut s = store(100);
        let a = put(&mut s, 1, 10);
        s.incref(a);
        s.incref(a);
        s.decref(a);
        s.decref(a);
        assert_eq!(s.refs(a), 0);
    }

    #[test]
    #[should_panic(expected = "unreferenced")]
    fn release_of_unreferenced_entry_is_fatal() {
        let mut s = store(100);
        let a = put(&mut s, 1, 10);
        s.decref(a);
    }

    #[test]
    fn trim_protects_the_fresh_entry() {
        let mut s = store(10);
        let r = s.reserve(20);
        s.insert(r.slot, 1, vec![0; 20], 20);
        let freed = s.trim(Some(r.slot));
        assert!(freed.is_empty());
        assert!(s.lookup(&1).is_some());
        assert_eq!(s.limit(), 20);
    }
}
