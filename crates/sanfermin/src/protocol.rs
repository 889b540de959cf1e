//! The per-node swap/aggregate state machine.

use std::collections::BTreeMap;

use aggsim_simulation::{Context, Message, Protocol};
use aggsim_types::{Millis, NodeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::tree::{is_tree_valid, levels, CandidateSelector};

/// Protocol parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanFerminConfig {
    /// Population size; must be a power of two.
    pub node_count: u32,
    /// Aggregate contribution count considered "good enough", independent
    /// of full completion.
    pub threshold: u64,
    /// Simulated cost of verifying/combining a contribution.
    pub pairing_time: Millis,
    /// Wire size of one (possibly aggregated) signature, accounting only.
    pub signature_size: usize,
    /// How long to wait for a swap reply before trying fresh candidates.
    pub timeout: Millis,
    /// How many candidates to contact at once per level.
    pub candidate_count: usize,
}

impl Default for SanFerminConfig {
    fn default() -> Self {
        Self {
            node_count: 32,
            threshold: 4,
            pairing_time: 4,
            signature_size: 48,
            timeout: 100,
            candidate_count: 3,
        }
    }
}

/// A protocol setup the tree derivation cannot support.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolConfigError {
    #[error("population size {got} is not a power of two")]
    NotPowerOfTwo { got: u32 },
}

/// A bidirectional exchange of running aggregate counts between two
/// tree-valid peers at the same level.
#[derive(Debug, Clone)]
pub struct Swap {
    /// Tree level this swap is for.
    pub level: u32,
    /// The sender's best aggregate count for `level + 1` and above.
    pub agg_value: u64,
    /// Whether the sender wants the receiver's count back.
    pub want_reply: bool,
    signature_size: usize,
}

impl Swap {
    pub fn new(level: u32, agg_value: u64, want_reply: bool, signature_size: usize) -> Self {
        Self {
            level,
            agg_value,
            want_reply,
            signature_size,
        }
    }
}

impl Message for Swap {
    fn size_bytes(&self) -> usize {
        // level as uint32 + the aggregated signature
        4 + self.signature_size
    }
}

/// One node's protocol state. Mutated only from that node's own deliveries
/// and scheduled tasks.
#[derive(Debug)]
pub struct NodeState {
    /// Current prefix length: starts at `log2(n)`, strictly decreases to 0.
    level: u32,
    /// Received aggregate counts per level, in arrival order.
    cache: BTreeMap<u32, Vec<u64>>,
    /// Swap accepted and verification delay in flight: no second aggregate
    /// may land on this level until the continuation clears it.
    swapping: bool,
    /// The node's own contribution to any aggregate.
    agg_value: u64,
    threshold_at: Option<Millis>,
    done_at: Option<Millis>,
    done: bool,
    selector: CandidateSelector,
}

impl NodeState {
    fn new(rank: NodeId, width: u32) -> Self {
        Self {
            level: width,
            cache: BTreeMap::new(),
            swapping: false,
            agg_value: 1,
            threshold_at: None,
            done_at: None,
            done: false,
            selector: CandidateSelector::new(rank, width),
        }
    }

    /// Current prefix length (tree level).
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// When the threshold was reached, if it was.
    pub fn threshold_at(&self) -> Option<Millis> {
        self.threshold_at
    }

    /// When full aggregation completed, if it did.
    pub fn done_at(&self) -> Option<Millis> {
        self.done_at
    }
}

/// The binomial-tree aggregation run: configuration, every node's state,
/// and the finished-node roster, all owned by this object.
#[derive(Debug)]
pub struct SanFermin {
    config: SanFerminConfig,
    width: u32,
    nodes: Vec<NodeState>,
    finished: Vec<NodeId>,
}

impl SanFermin {
    pub fn new(config: SanFerminConfig) -> Result<Self, ProtocolConfigError> {
        if !config.node_count.is_power_of_two() {
            return Err(ProtocolConfigError::NotPowerOfTwo {
                got: config.node_count,
            });
        }
        let width = levels(config.node_count);
        let nodes = (0..config.node_count)
            .map(|rank| NodeState::new(rank, width))
            .collect();
        Ok(Self {
            config,
            width,
            nodes,
            finished: Vec::new(),
        })
    }

    pub fn config(&self) -> &SanFerminConfig {
        &self.config
    }

    pub fn node_state(&self, id: NodeId) -> &NodeState {
        &self.nodes[id as usize]
    }

    /// Nodes that reached level 0, in completion order.
    pub fn finished(&self) -> &[NodeId] {
        &self.finished
    }

    /// Kick off the population: every node starts descending the tree.
    pub fn start(&mut self, ctx: &mut Context<'_, Self>) {
        for id in 0..self.config.node_count {
            ctx.register_task(1, id, move |p: &mut SanFermin, ctx| {
                p.advance_level(ctx, id);
            });
        }
    }

    /// The aggregate count usable at `boundary`: the best cached value from
    /// every level at or above it, plus the node's own contribution.
    /// Duplicate swaps at a level never double-count: only the best one
    /// matters, because aggregation absorbs duplicates.
    pub fn total_sigs(&self, id: NodeId, boundary: u32) -> u64 {
        let node = &self.nodes[id as usize];
        node.cache
            .iter()
            .filter(|(level, _)| **level >= boundary)
            .map(|(_, values)| values.iter().copied().max().unwrap_or(0))
            .sum::<u64>()
            + node.agg_value
    }

    /// The full aggregate count this node has assembled so far.
    pub fn total(&self, id: NodeId) -> u64 {
        self.total_sigs(id, 0)
    }

    /// Move to the next level: record threshold/terminal milestones, then
    /// either ride a cached value straight down (no network round trip) or
    /// request swaps from a fresh candidate batch.
    fn advance_level(&mut self, ctx: &mut Context<'_, Self>, id: NodeId) {
        let idx = id as usize;
        loop {
            if self.nodes[idx].done {
                return;
            }

            let level = self.nodes[idx].level;
            self.note_threshold(ctx, id, level);

            if level == 0 {
                let done_at = ctx.now() + 2 * self.config.pairing_time;
                let node = &mut self.nodes[idx];
                node.done = true;
                node.done_at = Some(done_at);
                self.finished.push(id);
                debug!(node = id, done_at, "full aggregation complete");
                return;
            }

            let node = &mut self.nodes[idx];
            node.level -= 1;
            node.swapping = false;

            if !node.cache.contains_key(&node.level) {
                break;
            }
            // A swap for this level arrived while we were still above it.
            trace!(node = id, level = node.level, "cached value covers new level");
        }

        let level = self.nodes[idx].level;
        let fanout = self.config.candidate_count;
        let candidates = self.nodes[idx]
            .selector
            .next_candidates(level, fanout, ctx.rng());
        self.try_next_candidates(ctx, id, candidates);
    }

    /// Send reply-wanted swaps to a candidate batch and arm the retry
    /// timeout. A node that runs out of candidates stalls at its level
    /// until a late swap unsticks it through the cache fast path.
    fn try_next_candidates(
        &mut self,
        ctx: &mut Context<'_, Self>,
        id: NodeId,
        candidates: Vec<NodeId>,
    ) {
        let idx = id as usize;
        let level = self.nodes[idx].level;

        if candidates.is_empty() {
            debug!(node = id, level, "no untried candidates left at this level");
            return;
        }

        for &candidate in &candidates {
            assert!(
                is_tree_valid(id, candidate, level, self.width),
                "candidate {candidate} is not tree-valid for node {id} at level {level}",
            );
        }

        trace!(
            node = id,
            level,
            count = candidates.len(),
            "sending swap requests"
        );
        let carry = self.total_sigs(id, level + 1);
        ctx.send(self.swap(level, carry, true), id, &candidates);

        let fanout = self.config.candidate_count;
        ctx.register_task(self.config.timeout, id, move |p: &mut SanFermin, ctx| {
            // Only retry if the node is still waiting at the level this
            // batch was sent for; otherwise the request already succeeded.
            let node = &p.nodes[id as usize];
            if !node.done && node.level == level {
                debug!(node = id, level, "swap request timed out");
                let next = p.nodes[id as usize]
                    .selector
                    .next_candidates(level, fanout, ctx.rng());
                p.try_next_candidates(ctx, id, next);
            }
        });
    }

    fn on_swap(&mut self, ctx: &mut Context<'_, Self>, from: NodeId, to: NodeId, swap: Swap) {
        let idx = to as usize;
        let current = self.nodes[idx].level;

        if self.nodes[idx].done || swap.level != current {
            if swap.want_reply && self.nodes[idx].cache.contains_key(&swap.level) {
                let best = self.best_cached(to, swap.level);
                trace!(
                    node = to,
                    peer = from,
                    level = swap.level,
                    "replying with cached value"
                );
                ctx.send(self.swap(swap.level, best, false), to, &[from]);
            } else if is_tree_valid(to, from, swap.level, self.width) {
                // A value for a level we have not reached yet: keep it, it
                // feeds the fast path once we get there.
                self.record_value(ctx, to, swap.level, swap.agg_value);
            } else {
                trace!(
                    node = to,
                    peer = from,
                    level = swap.level,
                    "dropping swap for a level we no longer serve"
                );
            }
            return;
        }

        if swap.want_reply {
            let total = self.total_sigs(to, current);
            ctx.send(self.swap(current, total, false), to, &[from]);
        }

        if !is_tree_valid(to, from, current, self.width) {
            debug!(
                node = to,
                peer = from,
                level = current,
                "dropping swap from non-candidate"
            );
            return;
        }
        if self.nodes[idx].swapping {
            // Another valid swap is already being verified at this level;
            // aggregating both would double-count.
            trace!(node = to, peer = from, level = current, "swap already in flight");
            return;
        }
        self.begin_swap(ctx, to, from, swap.agg_value);
    }

    /// Lock the level and schedule the verification delay; the continuation
    /// banks the value and advances.
    fn begin_swap(&mut self, ctx: &mut Context<'_, Self>, id: NodeId, peer: NodeId, value: u64) {
        let idx = id as usize;
        let level = self.nodes[idx].level;
        self.nodes[idx].swapping = true;
        trace!(node = id, peer, level, value, "valid swap received, verifying");

        ctx.register_task(self.config.pairing_time, id, move |p: &mut SanFermin, ctx| {
            p.record_value(ctx, id, level, value);
            p.advance_level(ctx, id);
        });
    }

    fn record_value(&mut self, ctx: &mut Context<'_, Self>, id: NodeId, level: u32, value: u64) {
        let idx = id as usize;
        self.nodes[idx].cache.entry(level).or_default().push(value);
        let current = self.nodes[idx].level;
        self.note_threshold(ctx, id, current);
    }

    fn note_threshold(&mut self, ctx: &mut Context<'_, Self>, id: NodeId, level: u32) {
        let idx = id as usize;
        if self.nodes[idx].threshold_at.is_none()
            && self.total_sigs(id, level) >= self.config.threshold
        {
            let at = ctx.now() + 2 * self.config.pairing_time;
            self.nodes[idx].threshold_at = Some(at);
            debug!(node = id, level, threshold_at = at, "threshold reached");
        }
    }

    fn best_cached(&self, id: NodeId, level: u32) -> u64 {
        self.nodes[id as usize]
            .cache
            .get(&level)
            .and_then(|values| values.iter().copied().max())
            .unwrap_or(0)
    }

    fn swap(&self, level: u32, agg_value: u64, want_reply: bool) -> Swap {
        Swap::new(level, agg_value, want_reply, self.config.signature_size)
    }
}

impl Protocol for SanFermin {
    type Message = Swap;

    fn deliver(&mut self, ctx: &mut Context<'_, Self>, from: NodeId, to: NodeId, msg: Swap) {
        self.on_swap(ctx, from, to, msg);
    }
}
