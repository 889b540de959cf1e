//! Binomial-tree signature aggregation ("San Fermin" style).
//!
//! Each node carries a bit-reversed binary identifier and aggregates with
//! peers along a binomial tree: at prefix length `L` it swaps running
//! aggregates with peers that share the first `L` bits of the reversed id
//! and differ in the next one, so every node contacts only `O(log n)` peers
//! to assemble the full result. Levels count down from `log2(n)` to 0.
//!
//! The protocol runs entirely on the engine's message/task primitives:
//! swap requests with timeouts, a simulated pairing delay before a received
//! aggregate is accepted, and a per-level cache that lets out-of-order
//! swaps unlock levels the node has not reached yet.

mod protocol;
mod tree;

pub use protocol::{
    NodeState, ProtocolConfigError, SanFermin, SanFerminConfig, Swap,
};
pub use tree::{
    bit_reversed_id, binary_id, candidate_set, is_tree_valid, levels, CandidateSelector,
};
