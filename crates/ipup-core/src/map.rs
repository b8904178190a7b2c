//! Chained hash map with inline head slots and arena-allocated overflow
//! nodes.
//!
//! Every keyed table in the daemon (server and interface sections, the
//! answer memo built during the startup sync, the engine's known-address
//! table, the netlink index/name table) lives in a [`Map`].
//!
//! Layout: a bucket array of head slots plus a [`SlotMap`] arena holding
//! the overflow chain nodes. Head entries are stored by value in the
//! array; only chain nodes occupy the arena, and chains are linked
//! through stable arena keys rather than pointers. An entry always sits
//! in the chain rooted at `hash % capacity` and carries its own 64-bit
//! hash, so growing the table never re-invokes the hasher.
//!
//! Growth: inserting once `(used + 1) / capacity` reaches 0.85 doubles
//! the bucket array first. During the rebuild, entries landing in a free
//! head slot move there by value; everything else re-enters the arena as
//! a fresh chain node.

use slotmap::{SlotMap, new_key_type};
use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash, Hasher};

const LOAD_FACTOR: f64 = 0.85;
const DEFAULT_CAPACITY: usize = 4;

new_key_type! {
    struct OverflowKey;
}

#[derive(Clone)]
struct Entry<K, V> {
    hash: u64,
    key: K,
    value: V,
    next: Option<OverflowKey>,
}

/// Hash map keyed by any `Eq + Hash` type, hashed with Murmur2-64A
/// unless another [`BuildHasher`] is plugged in.
#[derive(Clone)]
pub struct Map<K, V, S = MurmurBuildHasher> {
    heads: Vec<Option<Entry<K, V>>>,
    overflow: SlotMap<OverflowKey, Entry<K, V>>,
    used: usize,
    hasher: S,
}

impl<K: Eq + Hash, V> Map<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_hasher(capacity, MurmurBuildHasher)
    }
}

impl<K: Eq + Hash, V> Default for Map<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V, S: BuildHasher> Map<K, V, S> {
    pub fn with_hasher(capacity: usize, hasher: S) -> Self {
        let capacity = capacity.max(1);
        let mut heads = Vec::with_capacity(capacity);
        heads.resize_with(capacity, || None);

        Self {
            heads,
            overflow: SlotMap::with_key(),
            used: 0,
            hasher,
        }
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Current bucket-array length.
    pub fn capacity(&self) -> usize {
        self.heads.len()
    }

    fn bucket_index(&self, hash: u64) -> usize {
        (hash % self.heads.len() as u64) as usize
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hasher.hash_one(key);
        let mut entry = self.heads[self.bucket_index(hash)].as_ref()?;

        loop {
            if entry.hash == hash && entry.key.borrow() == key {
                return Some(&entry.value);
            }
            entry = self.overflow.get(entry.next?)?;
        }
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hasher.hash_one(key);
        let idx = self.bucket_index(hash);

        let head_matches = matches!(
            &self.heads[idx],
            Some(e) if e.hash == hash && e.key.borrow() == key
        );
        if head_matches {
            return self.heads[idx].as_mut().map(|e| &mut e.value);
        }

        let mut cursor = self.heads[idx].as_ref()?.next;
        while let Some(node_key) = cursor {
            let (matches, next) = {
                let node = self.overflow.get(node_key)?;
                (node.hash == hash && node.key.borrow() == key, node.next)
            };
            if matches {
                return self.overflow.get_mut(node_key).map(|n| &mut n.value);
            }
            cursor = next;
        }

        None
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get(key).is_some()
    }

    /// Inserts or overwrites. On overwrite the previous value is handed
    /// back to the caller instead of being dropped here.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        if (self.used + 1) as f64 / self.heads.len() as f64 >= LOAD_FACTOR {
            let doubled = self.heads.len() * 2;
            self.resize(doubled);
        }

        let hash = self.hasher.hash_one(&key);
        let idx = self.bucket_index(hash);

        if self.heads[idx].is_none() {
            self.heads[idx] = Some(Entry { hash, key, value, next: None });
            self.used += 1;
            return None;
        }

        let head_matches = matches!(
            &self.heads[idx],
            Some(e) if e.hash == hash && e.key == key
        );
        if head_matches {
            if let Some(head) = self.heads[idx].as_mut() {
                return Some(std::mem::replace(&mut head.value, value));
            }
        }

        let mut tail = None;
        let mut cursor = match &self.heads[idx] {
            Some(head) => head.next,
            None => None,
        };
        while let Some(node_key) = cursor {
            let (matches, next) = {
                let node = &self.overflow[node_key];
                (node.hash == hash && node.key == key, node.next)
            };
            if matches {
                return Some(std::mem::replace(&mut self.overflow[node_key].value, value));
            }
            tail = Some(node_key);
            cursor = next;
        }

        let inserted = self.overflow.insert(Entry { hash, key, value, next: None });
        match tail {
            Some(node_key) => self.overflow[node_key].next = Some(inserted),
            None => {
                if let Some(head) = self.heads[idx].as_mut() {
                    head.next = Some(inserted);
                }
            }
        }
        self.used += 1;
        None
    }

    /// Removes a key, returning its value when present. Removing a head
    /// entry with a live chain promotes the first chain node into the
    /// head slot; a mid-chain removal splices the predecessor link.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hasher.hash_one(key);
        let idx = self.bucket_index(hash);

        let head_matches = matches!(
            &self.heads[idx],
            Some(e) if e.hash == hash && e.key.borrow() == key
        );
        if head_matches {
            let head = self.heads[idx].take()?;
            if let Some(node_key) = head.next {
                let promoted = self.overflow.remove(node_key)?;
                self.heads[idx] = Some(promoted);
            }
            self.used -= 1;
            return Some(head.value);
        }

        let mut prev = None;
        let mut cursor = self.heads[idx].as_ref()?.next;
        while let Some(node_key) = cursor {
            let (matches, next) = {
                let node = self.overflow.get(node_key)?;
                (node.hash == hash && node.key.borrow() == key, node.next)
            };
            if matches {
                let node = self.overflow.remove(node_key)?;
                match prev {
                    Some(prev_key) => self.overflow[prev_key].next = node.next,
                    None => {
                        if let Some(head) = self.heads[idx].as_mut() {
                            head.next = node.next;
                        }
                    }
                }
                self.used -= 1;
                return Some(node.value);
            }
            prev = Some(node_key);
            cursor = next;
        }

        None
    }

    /// Looks a key up, inserting `default()` first when absent.
    pub fn get_or_insert_with(&mut self, key: K, default: impl FnOnce() -> V) -> &mut V
    where
        K: Clone,
    {
        if self.get(&key).is_none() {
            self.set(key.clone(), default());
        }
        match self.get_mut(&key) {
            Some(value) => value,
            None => unreachable!("entry inserted above"),
        }
    }

    /// Visits every entry in bucket-then-chain order. The visitor stops
    /// the walk by returning `false`, which becomes the call's result.
    pub fn for_each<F>(&self, mut f: F) -> bool
    where
        F: FnMut(&K, &V) -> bool,
    {
        for slot in &self.heads {
            let Some(head) = slot else { continue };
            if !f(&head.key, &head.value) {
                return false;
            }
            let mut cursor = head.next;
            while let Some(node_key) = cursor {
                let Some(node) = self.overflow.get(node_key) else { break };
                if !f(&node.key, &node.value) {
                    return false;
                }
                cursor = node.next;
            }
        }
        true
    }

    /// Mutable variant of [`Map::for_each`], same order and abort rule.
    pub fn for_each_mut<F>(&mut self, mut f: F) -> bool
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        for idx in 0..self.heads.len() {
            let mut cursor = match self.heads[idx].as_mut() {
                Some(head) => {
                    if !f(&head.key, &mut head.value) {
                        return false;
                    }
                    head.next
                }
                None => continue,
            };
            while let Some(node_key) = cursor {
                let Some(node) = self.overflow.get_mut(node_key) else { break };
                if !f(&node.key, &mut node.value) {
                    return false;
                }
                cursor = node.next;
            }
        }
        true
    }

    pub fn iter(&self) -> Iter<'_, K, V, S> {
        Iter {
            map: self,
            slot: 0,
            chain: None,
        }
    }

    fn resize(&mut self, new_capacity: usize) {
        let mut heads = Vec::with_capacity(new_capacity);
        heads.resize_with(new_capacity, || None);
        let old_heads = std::mem::replace(&mut self.heads, heads);

        for slot in old_heads {
            let Some(mut entry) = slot else { continue };
            let mut chain = entry.next.take();
            // Head entries move by value; chain nodes re-enter the arena
            // one at a time as they are unlinked.
            self.reattach(entry);
            while let Some(node_key) = chain {
                let Some(mut node) = self.overflow.remove(node_key) else { break };
                chain = node.next.take();
                self.reattach(node);
            }
        }
    }

    fn reattach(&mut self, entry: Entry<K, V>) {
        let idx = self.bucket_index(entry.hash);

        if self.heads[idx].is_none() {
            self.heads[idx] = Some(entry);
            return;
        }

        let mut tail = None;
        let mut cursor = match &self.heads[idx] {
            Some(head) => head.next,
            None => None,
        };
        while let Some(node_key) = cursor {
            tail = Some(node_key);
            cursor = self.overflow[node_key].next;
        }

        let inserted = self.overflow.insert(entry);
        match tail {
            Some(node_key) => self.overflow[node_key].next = Some(inserted),
            None => {
                if let Some(head) = self.heads[idx].as_mut() {
                    head.next = Some(inserted);
                }
            }
        }
    }
}

impl<K, V, S> std::fmt::Debug for Map<K, V, S>
where
    K: Eq + Hash + std::fmt::Debug,
    V: std::fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Shared iterator over a [`Map`], bucket-then-chain order.
pub struct Iter<'a, K, V, S> {
    map: &'a Map<K, V, S>,
    slot: usize,
    chain: Option<OverflowKey>,
}

impl<'a, K, V, S> Iterator for Iter<'a, K, V, S> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(node_key) = self.chain {
                let node = self.map.overflow.get(node_key)?;
                self.chain = node.next;
                return Some((&node.key, &node.value));
            }
            if self.slot >= self.map.heads.len() {
                return None;
            }
            let idx = self.slot;
            self.slot += 1;
            if let Some(head) = &self.map.heads[idx] {
                self.chain = head.next;
                return Some((&head.key, &head.value));
            }
        }
    }
}

/// Murmur2-64A over the bytes a key feeds to its `Hash` impl.
#[derive(Clone, Copy, Debug, Default)]
pub struct MurmurBuildHasher;

impl BuildHasher for MurmurBuildHasher {
    type Hasher = MurmurHasher;

    fn build_hasher(&self) -> MurmurHasher {
        MurmurHasher::default()
    }
}

/// Buffering [`Hasher`] front-end for [`murmur64a`]. Murmur mixes the
/// total length into its seed, so bytes are gathered until `finish`.
#[derive(Default)]
pub struct MurmurHasher {
    buf: Vec<u8>,
}

impl Hasher for MurmurHasher {
    fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn finish(&self) -> u64 {
        murmur64a(&self.buf, MURMUR_SEED)
    }
}

const MURMUR_SEED: u64 = 0x7352_7d6e_67f6_0a2c;

/// MurmurHash64A.
pub fn murmur64a(data: &[u8], seed: u64) -> u64 {
    const M: u64 = 0xc6a4_a793_5bd1_e995;
    const R: u32 = 47;

    let mut h = seed ^ (data.len() as u64).wrapping_mul(M);

    let (blocks, tail) = data.split_at(data.len() & !7);
    for chunk in blocks.chunks_exact(8) {
        let mut k = 0u64;
        for (i, &b) in chunk.iter().enumerate() {
            k |= u64::from(b) << (8 * i);
        }

        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h ^= k;
        h = h.wrapping_mul(M);
    }

    if !tail.is_empty() {
        let mut k = 0u64;
        for (i, &b) in tail.iter().enumerate() {
            k |= u64::from(b) << (8 * i);
        }
        h ^= k;
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;

    h
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pass-through hasher: a `u64` key is its own hash, so chain layout
    /// is fully determined by `key % capacity`.
    #[derive(Clone, Copy, Default)]
    struct IdentityBuildHasher;

    struct IdentityHasher(u64);

    impl BuildHasher for IdentityBuildHasher {
        type Hasher = IdentityHasher;

        fn build_hasher(&self) -> IdentityHasher {
            IdentityHasher(0)
        }
    }

    impl Hasher for IdentityHasher {
        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 = (self.0 << 8) | u64::from(b);
            }
        }

        fn write_u64(&mut self, value: u64) {
            self.0 = value;
        }

        fn finish(&self) -> u64 {
            self.0
        }
    }

    fn identity_map(capacity: usize) -> Map<u64, u64, IdentityBuildHasher> {
        Map::with_hasher(capacity, IdentityBuildHasher)
    }

    /// Every live entry must sit in the chain rooted at `hash % capacity`.
    fn assert_placement<K: Eq + Hash, V, S: BuildHasher>(map: &Map<K, V, S>) {
        let capacity = map.heads.len() as u64;
        for (idx, slot) in map.heads.iter().enumerate() {
            let Some(head) = slot else { continue };
            assert_eq!(idx as u64, head.hash % capacity);
            let mut cursor = head.next;
            while let Some(node_key) = cursor {
                let node = &map.overflow[node_key];
                assert_eq!(idx as u64, node.hash % capacity);
                cursor = node.next;
            }
        }
    }

    #[test]
    fn get_after_set_round_trips() {
        let mut map = Map::new();
        for i in 0..32 {
            map.set(format!("key-{i}"), i);
        }

        assert_eq!(map.len(), 32);
        for i in 0..32 {
            assert_eq!(map.get(format!("key-{i}").as_str()), Some(&i));
        }
        assert_eq!(map.get("absent"), None);
    }

    #[test]
    fn overwrite_returns_previous_value() {
        let mut map = Map::new();
        assert_eq!(map.set("a".to_owned(), 1), None);
        assert_eq!(map.set("a".to_owned(), 2), Some(1));
        assert_eq!(map.get("a"), Some(&2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn crossing_load_factor_doubles_once_and_keeps_entries() {
        let mut map: Map<String, usize> = Map::with_capacity(8);

        // 6/8 = 0.75 stays below the threshold.
        for i in 0..6 {
            map.set(format!("k{i}"), i);
        }
        assert_eq!(map.capacity(), 8);

        // (6 + 1) / 8 crosses 0.85: exactly one doubling.
        map.set("k6".to_owned(), 6);
        assert_eq!(map.capacity(), 16);

        for i in 0..7 {
            assert_eq!(map.get(format!("k{i}").as_str()), Some(&i));
        }
        assert_placement(&map);
    }

    #[test]
    fn resize_rehomes_colliding_chains() {
        let mut map = identity_map(4);

        // All in bucket 0 of a 4-wide table.
        for key in [0u64, 4, 8, 12, 16] {
            map.set(key, key * 10);
        }
        assert!(map.capacity() > 4);
        assert_placement(&map);

        for key in [0u64, 4, 8, 12, 16] {
            assert_eq!(map.get(&key), Some(&(key * 10)));
        }
    }

    #[test]
    fn removing_chained_head_promotes_successor() {
        let mut map = identity_map(16);
        map.set(1, 100);
        map.set(17, 1700);
        map.set(33, 3300);

        assert_eq!(map.remove(&1), Some(100));
        assert_eq!(map.get(&1), None);
        assert_eq!(map.get(&17), Some(&1700));
        assert_eq!(map.get(&33), Some(&3300));
        assert_eq!(map.len(), 2);
        assert_placement(&map);
    }

    #[test]
    fn removing_mid_chain_splices_links() {
        let mut map = identity_map(16);
        map.set(2, 1);
        map.set(18, 2);
        map.set(34, 3);

        assert_eq!(map.remove(&18), Some(2));
        assert_eq!(map.get(&2), Some(&1));
        assert_eq!(map.get(&34), Some(&3));

        assert_eq!(map.remove(&34), Some(3));
        assert_eq!(map.get(&2), Some(&1));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_misses_report_not_found() {
        let mut map: Map<String, u32> = Map::new();
        assert_eq!(map.remove("nope"), None);
        map.set("a".to_owned(), 1);
        assert_eq!(map.remove("b"), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn for_each_visits_all_and_can_abort() {
        let mut map = Map::new();
        for i in 0..10 {
            map.set(format!("k{i}"), i);
        }

        let mut seen = 0;
        assert!(map.for_each(|_, _| {
            seen += 1;
            true
        }));
        assert_eq!(seen, 10);

        let mut visited = 0;
        assert!(!map.for_each(|_, _| {
            visited += 1;
            visited < 3
        }));
        assert_eq!(visited, 3);
    }

    #[test]
    fn for_each_mut_updates_in_place() {
        let mut map = identity_map(8);
        map.set(1, 1);
        map.set(9, 9);

        map.for_each_mut(|_, v| {
            *v *= 2;
            true
        });
        assert_eq!(map.get(&1), Some(&2));
        assert_eq!(map.get(&9), Some(&18));
    }

    #[test]
    fn iter_yields_every_entry() {
        let mut map = Map::new();
        for i in 0..12 {
            map.set(format!("k{i}"), i);
        }

        let mut pairs: Vec<usize> = map.iter().map(|(_, v)| *v).collect();
        pairs.sort_unstable();
        assert_eq!(pairs, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn get_or_insert_with_is_lazy() {
        let mut map: Map<String, Vec<u32>> = Map::new();
        map.get_or_insert_with("a".to_owned(), Vec::new).push(1);
        map.get_or_insert_with("a".to_owned(), || panic!("must not run")).push(2);
        assert_eq!(map.get("a"), Some(&vec![1, 2]));
    }

    #[test]
    fn murmur_spreads_similar_keys() {
        let a = murmur64a(b"iface/eth0", 0);
        let b = murmur64a(b"iface/eth1", 0);
        let c = murmur64a(b"iface/eth0", 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, murmur64a(b"iface/eth0", 0));
    }
}
