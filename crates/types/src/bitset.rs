//! Fixed-capacity bitset for contribution tracking.
//!
//! Gossip-style aggregation represents "which contributions have I
//! verified" as a bit per participant. Capacity is fixed at construction
//! (bounded by the population size) and all operations stay within it.

use serde::{Deserialize, Serialize};

const WORD_BITS: usize = 64;

/// A fixed-capacity set of bits backed by `u64` words.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitSet {
    words: Vec<u64>,
    capacity: usize,
}

impl BitSet {
    /// Create an empty bitset able to hold `capacity` bits.
    pub fn new(capacity: usize) -> Self {
        let words = vec![0; capacity.div_ceil(WORD_BITS)];
        Self { words, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size in bytes of the snapshot on the wire.
    pub fn byte_len(&self) -> usize {
        self.capacity.div_ceil(8)
    }

    pub fn set(&mut self, index: usize) {
        assert!(index < self.capacity, "bit index out of range");
        self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
    }

    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.capacity, "bit index out of range");
        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    /// Number of set bits.
    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// `self |= other`.
    pub fn union_with(&mut self, other: &BitSet) {
        assert_eq!(self.capacity, other.capacity, "capacity mismatch");
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
    }

    /// `self &= other`.
    pub fn intersect_with(&mut self, other: &BitSet) {
        assert_eq!(self.capacity, other.capacity, "capacity mismatch");
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w &= o;
        }
    }

    /// `self &= !other`: clear every bit that is set in `other`.
    pub fn and_not(&mut self, other: &BitSet) {
        assert_eq!(self.capacity, other.capacity, "capacity mismatch");
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w &= !o;
        }
    }

    /// Flip every bit within the capacity.
    pub fn complement(&mut self) {
        for w in &mut self.words {
            *w = !*w;
        }
        // Mask off bits past the capacity in the last word.
        let tail = self.capacity % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1 << tail) - 1;
            }
        }
    }

    /// Iterate over the indices of set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity).filter(move |&i| self.get(i))
    }
}
