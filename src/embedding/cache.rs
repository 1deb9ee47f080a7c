//! Bounded LRU cache mapping text to embedding vectors.
//!
//! Avoids re-embedding identical query or candidate text within one
//! process lifetime. `get` promotes the key to most-recently-used;
//! `insert` evicts the least-recently-used key on overflow.

use std::collections::HashMap;

/// Default cache capacity in entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

/// Bounded LRU cache of text → embedding.
///
/// Recency is tracked with a monotonically increasing tick per access;
/// eviction removes the entry with the smallest tick. At the capacities
/// used here a linear eviction scan is cheaper than maintaining a linked
/// order.
#[derive(Debug)]
pub struct EmbeddingCache {
    capacity: usize,
    tick: u64,
    map: HashMap<String, (u64, Vec<f32>)>,
}

impl EmbeddingCache {
    /// Creates a cache bounded to `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            map: HashMap::new(),
        }
    }

    /// Returns the cached vector for `text`, promoting it to MRU.
    pub fn get(&mut self, text: &str) -> Option<Vec<f32>> {
        self.tick += 1;
        let tick = self.tick;
        self.map.get_mut(text).map(|slot| {
            slot.0 = tick;
            slot.1.clone()
        })
    }

    /// Inserts or updates a vector without growing past capacity.
    pub fn insert(&mut self, text: impl Into<String>, embedding: Vec<f32>) {
        self.tick += 1;
        let text = text.into();
        if !self.map.contains_key(&text) && self.map.len() >= self.capacity {
            if let Some(lru) = self
                .map
                .iter()
                .min_by_key(|(_, (tick, _))| *tick)
                .map(|(k, _)| k.clone())
            {
                self.map.remove(&lru);
            }
        }
        self.map.insert(text, (self.tick, embedding));
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
