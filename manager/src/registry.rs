//! Registry of synchronization pairs.
//!
//! Backed by [`ChainedMap`], a separate-chaining hash map whose bucket count walks an ascending
//! table of primes. The load factor is checked after every insertion and the table is rebuilt
//! as soon as it exceeds [`LOAD_FACTOR_THRESHOLD`], which keeps chains short and lookups
//! amortized O(1). Past the last tabulated prime the bucket count doubles instead.

use common::{Endpoint, PairKey};

/// Bucket counts used while growing, smallest first.
pub const PRIME_CAPACITIES: [usize; 26] = [
    53, 97, 193, 389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613, 393241,
    786433, 1572869, 3145739, 6291469, 12582917, 25165843, 50331653, 100663319, 201326611,
    402653189, 805306457, 1610612741,
];

pub const DEFAULT_CAPACITY: usize = 193;

pub const LOAD_FACTOR_THRESHOLD: f64 = 0.9;

/// Hash function used to pick a bucket.
pub trait KeyHash<K: ?Sized> {
    fn hash(key: &K) -> u64;
}

/// `hash = hash * 33 + byte`, seeded with 5381.
#[derive(Debug, Clone, Copy, Default)]
pub struct Djb2;

impl Djb2 {
    pub fn hash_bytes(bytes: &[u8]) -> u64 {
        bytes.iter().fold(5381u64, |hash, &byte| {
            hash.wrapping_mul(33).wrapping_add(u64::from(byte))
        })
    }
}

impl KeyHash<str> for Djb2 {
    fn hash(key: &str) -> u64 {
        Djb2::hash_bytes(key.as_bytes())
    }
}

impl KeyHash<PairKey> for Djb2 {
    fn hash(key: &PairKey) -> u64 {
        Djb2::hash_bytes(key.as_str().as_bytes())
    }
}

/// Bucket count that follows `current` when the table grows.
pub fn next_capacity(current: usize) -> usize {
    PRIME_CAPACITIES
        .iter()
        .copied()
        .find(|&prime| prime > current)
        .unwrap_or_else(|| current.saturating_mul(2))
}

#[derive(Debug, Clone)]
pub struct ChainedMap<K, V, H = Djb2> {
    buckets: Vec<Vec<(K, V)>>,
    size: usize,
    _hasher: std::marker::PhantomData<H>,
}

impl<K: Eq, V, H: KeyHash<K>> Default for ChainedMap<K, V, H> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl<K: Eq, V, H: KeyHash<K>> ChainedMap<K, V, H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a map with exactly `capacity` buckets (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: Self::empty_buckets(capacity.max(1)),
            size: 0,
            _hasher: std::marker::PhantomData,
        }
    }

    fn empty_buckets(capacity: usize) -> Vec<Vec<(K, V)>> {
        (0..capacity).map(|_| Vec::new()).collect()
    }

    fn bucket_index(key: &K, capacity: usize) -> usize {
        (H::hash(key) % capacity as u64) as usize
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Current number of buckets.
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    pub fn load_factor(&self) -> f64 {
        self.size as f64 / self.capacity() as f64
    }

    /// Inserts or overwrites; returns the previous value for `key`, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let index = Self::bucket_index(&key, self.capacity());
        let chain = &mut self.buckets[index];
        if let Some((_, existing)) = chain.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(existing, value));
        }
        chain.push((key, value));
        self.size += 1;
        if self.load_factor() > LOAD_FACTOR_THRESHOLD {
            self.rehash();
        }
        None
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let index = Self::bucket_index(key, self.capacity());
        self.buckets[index]
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let index = Self::bucket_index(key, self.capacity());
        self.buckets[index]
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let index = Self::bucket_index(key, self.capacity());
        let chain = &mut self.buckets[index];
        let position = chain.iter().position(|(k, _)| k == key)?;
        self.size -= 1;
        Some(chain.swap_remove(position).1)
    }

    /// Moves every entry into a table of [`next_capacity`] buckets.
    fn rehash(&mut self) {
        let capacity = next_capacity(self.capacity());
        let old = std::mem::replace(&mut self.buckets, Self::empty_buckets(capacity));
        for (key, value) in old.into_iter().flatten() {
            let index = Self::bucket_index(&key, capacity);
            self.buckets[index].push((key, value));
        }
        tracing::debug!("rehashed {} entries into {capacity} buckets", self.size);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets.iter().flatten().map(|(k, v)| (k, v))
    }
}

/// One source directory replicated into one target directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPair {
    pub key: PairKey,
    pub source: Endpoint,
    pub target: Endpoint,
    pub active: bool,
}

/// Every pair the manager has been asked to synchronize, keyed by encoded source spec.
///
/// Cancelled pairs stay in the registry as inactive entries.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    pairs: ChainedMap<PairKey, SyncPair>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_capacity(capacity: usize) -> Self {
        Self {
            pairs: ChainedMap::with_capacity(capacity),
        }
    }

    /// Records `source -> target` as an active pair, replacing any previous target.
    ///
    /// Fails without touching the registry if either spec does not decode.
    pub fn upsert(&mut self, source: &PairKey, target: &PairKey) -> common::Result<()> {
        let pair = SyncPair {
            key: source.clone(),
            source: source.decode()?,
            target: target.decode()?,
            active: true,
        };
        self.pairs.insert(source.clone(), pair);
        Ok(())
    }

    pub fn find(&self, source: &PairKey) -> Option<&SyncPair> {
        self.pairs.get(source)
    }

    pub fn remove(&mut self, source: &PairKey) -> Option<SyncPair> {
        self.pairs.remove(source)
    }

    /// Marks the pair inactive; returns whether it was active before.
    pub fn deactivate(&mut self, source: &PairKey) -> bool {
        match self.pairs.get_mut(source) {
            Some(pair) => std::mem::replace(&mut pair.active, false),
            None => false,
        }
    }

    pub fn is_active(&self, source: &PairKey) -> bool {
        self.find(source).is_some_and(|pair| pair.active)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn active_pairs(&self) -> impl Iterator<Item = &SyncPair> {
        self.pairs.iter().map(|(_, pair)| pair).filter(|pair| pair.active)
    }
}
