//! Binomial tree derivation over bit-reversed identifiers.
//!
//! Everything here is a pure function of `(rank, level, population)`; no
//! node ever holds a reference into another node's state to work out who
//! its tree peers are.
//!
//! With `n = 2^w` nodes, rank `r`'s tree identifier is the low `w` bits of
//! `r` reversed. Two nodes are valid swap partners at level `L` when their
//! identifiers agree on the first `L` bits (most significant first) and
//! differ at bit `L`; the peers valid at level `L` form the sibling subtree
//! of size `2^(w - L - 1)`.

use std::collections::HashMap;

use aggsim_types::NodeId;
use rand::seq::SliceRandom;
use rand::Rng;

/// Number of tree levels for a power-of-two population.
pub fn levels(node_count: u32) -> u32 {
    debug_assert!(node_count.is_power_of_two());
    node_count.trailing_zeros()
}

/// The low `width` bits of `rank`, reversed. Involution: applying it twice
/// returns the rank.
pub fn bit_reversed_id(rank: NodeId, width: u32) -> u32 {
    if width == 0 {
        return 0;
    }
    rank.reverse_bits() >> (32 - width)
}

/// The node's tree identifier rendered as a binary string, for logs.
pub fn binary_id(rank: NodeId, width: u32) -> String {
    format!(
        "{:0fill$b}",
        bit_reversed_id(rank, width),
        fill = width.max(1) as usize
    )
}

/// Whether `a` and `b` are valid swap partners at `level`: identifiers
/// share the first `level` bits and differ at bit `level`.
pub fn is_tree_valid(a: NodeId, b: NodeId, level: u32, width: u32) -> bool {
    if a == b || level >= width {
        return false;
    }
    let ra = bit_reversed_id(a, width);
    let rb = bit_reversed_id(b, width);
    let differing = ra ^ rb;
    // Highest differing bit, MSB-first index.
    let first_difference = width - 1 - (31 - differing.leading_zeros());
    first_difference == level
}

/// Every peer tree-valid for `rank` at `level`, in rank order.
pub fn candidate_set(rank: NodeId, level: u32, width: u32) -> Vec<NodeId> {
    if level >= width {
        return Vec::new();
    }
    let r = bit_reversed_id(rank, width);
    let suffix_bits = width - level - 1;
    let flip = 1u32 << suffix_bits;
    let base = (r ^ flip) & !(flip - 1);
    let mut peers: Vec<NodeId> = (0..flip)
        .map(|suffix| bit_reversed_id(base | suffix, width))
        .collect();
    peers.sort_unstable();
    peers
}

/// Per-node candidate picker: shuffles each level's candidate set once and
/// deals out untried candidates until the level is exhausted.
#[derive(Debug)]
pub struct CandidateSelector {
    rank: NodeId,
    width: u32,
    remaining: HashMap<u32, Vec<NodeId>>,
}

impl CandidateSelector {
    pub fn new(rank: NodeId, width: u32) -> Self {
        Self {
            rank,
            width,
            remaining: HashMap::new(),
        }
    }

    /// Deal up to `count` untried candidates for `level`. Returns fewer
    /// (possibly none) once the level's pool runs dry; retrying is bounded
    /// by the number of peers at that tree level.
    pub fn next_candidates<R: Rng>(
        &mut self,
        level: u32,
        count: usize,
        rng: &mut R,
    ) -> Vec<NodeId> {
        let rank = self.rank;
        let width = self.width;
        let pool = self.remaining.entry(level).or_insert_with(|| {
            let mut set = candidate_set(rank, level, width);
            set.shuffle(rng);
            set
        });
        let take = count.min(pool.len());
        pool.split_off(pool.len() - take)
    }

    /// Pure validity check; independent of what has been dealt so far.
    pub fn is_candidate(&self, peer: NodeId, level: u32) -> bool {
        is_tree_valid(self.rank, peer, level, self.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn bit_reversal_is_an_involution() {
        for width in 1..=10 {
            for rank in 0..(1u32 << width) {
                let rev = bit_reversed_id(rank, width);
                assert!(rev < (1 << width));
                assert_eq!(bit_reversed_id(rev, width), rank);
            }
        }
    }

    #[test]
    fn binary_id_has_fixed_width() {
        assert_eq!(binary_id(0, 5), "00000");
        assert_eq!(binary_id(1, 5), "10000");
        assert_eq!(binary_id(3, 5), "11000");
    }

    #[test]
    fn validity_is_symmetric() {
        let width = 5;
        for a in 0..32 {
            for b in 0..32 {
                for level in 0..width {
                    assert_eq!(
                        is_tree_valid(a, b, level, width),
                        is_tree_valid(b, a, level, width),
                    );
                }
            }
        }
    }

    #[test]
    fn each_peer_is_valid_at_exactly_one_level() {
        // The candidate sets across levels partition the rest of the tree.
        let width = 5;
        for a in 0..32u32 {
            for b in 0..32u32 {
                if a == b {
                    continue;
                }
                let valid_levels: Vec<u32> =
                    (0..width).filter(|&l| is_tree_valid(a, b, l, width)).collect();
                assert_eq!(valid_levels.len(), 1, "peers {a} and {b}");
            }
        }
    }

    #[test]
    fn candidate_set_sizes_halve_with_depth() {
        let width = 5;
        for level in 0..width {
            let set = candidate_set(7, level, width);
            assert_eq!(set.len(), 1 << (width - level - 1));
            for &peer in &set {
                assert!(is_tree_valid(7, peer, level, width));
            }
        }
    }

    #[test]
    fn deepest_level_is_a_one_to_one_mapping() {
        // At level w-1 each node has exactly one partner, and the pairing
        // is mutual.
        let width = 4;
        for rank in 0..16u32 {
            let set = candidate_set(rank, width - 1, width);
            assert_eq!(set.len(), 1);
            let partner = set[0];
            assert_eq!(candidate_set(partner, width - 1, width), vec![rank]);
        }
    }

    #[test]
    fn empty_set_outside_the_tree() {
        assert!(candidate_set(3, 5, 5).is_empty());
        assert!(candidate_set(0, 0, 0).is_empty());
    }

    #[test]
    fn selector_deals_without_repetition() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut selector = CandidateSelector::new(0, 5);

        let mut seen = Vec::new();
        loop {
            let batch = selector.next_candidates(0, 3, &mut rng);
            if batch.is_empty() {
                break;
            }
            for id in batch {
                assert!(!seen.contains(&id), "candidate {id} dealt twice");
                seen.push(id);
            }
        }
        // Level 0 holds the whole opposite half of a 32-node tree.
        assert_eq!(seen.len(), 16);
        // Exhausted for good.
        assert!(selector.next_candidates(0, 3, &mut rng).is_empty());
    }
}
