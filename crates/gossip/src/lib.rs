//! Gossip-based signature aggregation.
//!
//! The simple counterpart to the binomial tree: every node broadcasts its
//! verified-contribution snapshot to its direct peers whenever it grows,
//! periodically sends one peer the signatures that peer is missing, and
//! verifies received sets under a simulated pairing delay. State lives in
//! fixed-size bitsets keyed by node id.
//!
//! The protocol touches the engine only through `send`, the task
//! registrations, and the latency model: the same surface the tree
//! protocol uses.

use std::collections::BTreeMap;

use aggsim_simulation::{Context, Message, Protocol};
use aggsim_types::{BitSet, Millis, NodeId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Wire size of one individual signature in a transfer.
const SIGNATURE_SIZE: usize = 48;

/// Protocol parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    pub node_count: u32,
    /// Verified-contribution count at which a node is done.
    pub threshold: usize,
    /// Target number of direct peers per node (the symmetric graph may
    /// give some nodes a few more).
    pub connection_count: usize,
    /// Simulated cost of verifying a signature set.
    pub pairing_time: Millis,
    /// Period of the missing-signature send task.
    pub send_period: Millis,
    /// Aggregate everything pending before verification instead of
    /// verifying the single best set.
    pub double_aggregate: bool,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            node_count: 1000,
            threshold: 501,
            connection_count: 25,
            pairing_time: 3,
            send_period: 20,
            double_aggregate: true,
        }
    }
}

/// Messages exchanged between direct peers.
#[derive(Debug, Clone)]
pub enum GossipMessage {
    /// Snapshot of the sender's verified-contribution set.
    PeerState { sigs: BitSet },
    /// Contributions the receiver was missing when this was assembled.
    SignatureSet { sigs: BitSet },
}

impl Message for GossipMessage {
    fn size_bytes(&self) -> usize {
        match self {
            GossipMessage::PeerState { sigs } => sigs.byte_len(),
            GossipMessage::SignatureSet { sigs } => sigs.cardinality() * SIGNATURE_SIZE,
        }
    }
}

/// One node's reconciliation state.
#[derive(Debug)]
pub struct GossipNode {
    /// Contributions this node has verified; its own bit starts set.
    verified: BitSet,
    /// Received sets awaiting the verification task.
    to_verify: Vec<BitSet>,
    /// Best known under-threshold snapshot per peer. Entries are consumed
    /// when a missing-set transfer is sent to that peer.
    peer_states: BTreeMap<NodeId, BitSet>,
    done: bool,
    done_at: Option<Millis>,
}

impl GossipNode {
    fn new(id: NodeId, node_count: u32) -> Self {
        let mut verified = BitSet::new(node_count as usize);
        verified.set(id as usize);
        Self {
            verified,
            to_verify: Vec::new(),
            peer_states: BTreeMap::new(),
            done: false,
            done_at: None,
        }
    }

    pub fn verified(&self) -> &BitSet {
        &self.verified
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn done_at(&self) -> Option<Millis> {
        self.done_at
    }
}

/// The gossip aggregation run: configuration, per-node state, and the peer
/// graph, all owned here.
pub struct Gossip {
    config: GossipConfig,
    nodes: Vec<GossipNode>,
    peers: Vec<Vec<NodeId>>,
}

impl Gossip {
    pub fn new(config: GossipConfig) -> Self {
        let nodes = (0..config.node_count)
            .map(|id| GossipNode::new(id, config.node_count))
            .collect();
        let peers = vec![Vec::new(); config.node_count as usize];
        Self {
            config,
            nodes,
            peers,
        }
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    pub fn node_state(&self, id: NodeId) -> &GossipNode {
        &self.nodes[id as usize]
    }

    pub fn peers(&self, id: NodeId) -> &[NodeId] {
        &self.peers[id as usize]
    }

    /// Build the random symmetric peer graph and start every node's tasks.
    pub fn start(&mut self, ctx: &mut Context<'_, Self>) {
        let n = self.config.node_count;
        let target = self.config.connection_count.min(n.saturating_sub(1) as usize);
        for id in 0..n {
            let mut added = 0;
            while added < target && self.peers[id as usize].len() < n.saturating_sub(1) as usize {
                let peer = ctx.rng().gen_range(0..n);
                if peer == id || self.peers[id as usize].contains(&peer) {
                    continue;
                }
                self.peers[id as usize].push(peer);
                self.peers[peer as usize].push(id);
                added += 1;
            }
        }
        for list in &mut self.peers {
            list.sort_unstable();
            list.dedup();
        }

        let send_period = self.config.send_period;
        let pairing_time = self.config.pairing_time;
        for id in 0..n {
            ctx.register_task(1, id, move |p: &mut Gossip, ctx| {
                p.broadcast_state(ctx, id);
            });
            ctx.register_conditional_task(
                1,
                send_period,
                id,
                move |p: &mut Gossip, ctx| {
                    p.send_missing_once(ctx, id);
                },
                move |p: &Gossip| !p.nodes[id as usize].peer_states.is_empty(),
                move |p: &Gossip| p.nodes[id as usize].done,
            );
            ctx.register_conditional_task(
                1,
                pairing_time,
                id,
                move |p: &mut Gossip, ctx| {
                    p.verify_pending(ctx, id);
                },
                move |p: &Gossip| !p.nodes[id as usize].to_verify.is_empty(),
                move |p: &Gossip| p.nodes[id as usize].done,
            );
        }
    }

    fn broadcast_state(&mut self, ctx: &mut Context<'_, Self>, id: NodeId) {
        let snapshot = self.nodes[id as usize].verified.clone();
        let peers = self.peers[id as usize].clone();
        ctx.send_after(1, GossipMessage::PeerState { sigs: snapshot }, id, &peers);
    }

    /// Peer snapshots arrive out of order; keep only the best one per peer
    /// and only while the peer still needs help.
    fn on_peer_state(&mut self, from: NodeId, to: NodeId, sigs: BitSet) {
        let cardinality = sigs.cardinality();
        if cardinality >= self.config.threshold {
            return;
        }
        let states = &mut self.nodes[to as usize].peer_states;
        let better = states
            .get(&from)
            .map_or(true, |old| old.cardinality() < cardinality);
        if better {
            states.insert(from, sigs);
        }
    }

    /// Nothing to do on receipt but queue the set for verification.
    fn on_signature_set(&mut self, to: NodeId, sigs: BitSet) {
        let pending = &mut self.nodes[to as usize].to_verify;
        if !pending.contains(&sigs) {
            pending.push(sigs);
        }
    }

    /// Send one retained peer the contributions it is missing, consuming
    /// its snapshot. Returns false when no retained peer needs anything.
    fn send_missing_once(&mut self, ctx: &mut Context<'_, Self>, id: NodeId) -> bool {
        let node = &self.nodes[id as usize];
        let found = node.peer_states.iter().find_map(|(peer, state)| {
            let mut missing = state.clone();
            missing.complement();
            missing.intersect_with(&node.verified);
            (missing.cardinality() > 0).then(|| (*peer, missing))
        });

        let Some((peer, missing)) = found else {
            return false;
        };
        self.nodes[id as usize].peer_states.remove(&peer);

        // A small extra delay models serialization of the set.
        let serialize = 1 + (missing.cardinality() / 100) as Millis;
        trace!(
            node = id,
            peer,
            count = missing.cardinality(),
            "sending missing signatures"
        );
        ctx.send_after(
            serialize,
            GossipMessage::SignatureSet { sigs: missing },
            id,
            &[peer],
        );
        true
    }

    /// Verification task body: pick what to verify and schedule the
    /// pairing delay, after which the set merges into `verified`.
    fn verify_pending(&mut self, ctx: &mut Context<'_, Self>, id: NodeId) {
        let candidate = if self.config.double_aggregate {
            self.take_aggregated(id)
        } else {
            self.take_best(id)
        };
        let Some(set) = candidate else {
            return;
        };
        ctx.register_task(self.config.pairing_time, id, move |p: &mut Gossip, ctx| {
            p.update_verified(ctx, id, &set);
        });
    }

    /// Aggregate-everything strategy: one pairing covers the union.
    fn take_aggregated(&mut self, id: NodeId) -> Option<BitSet> {
        let node = &mut self.nodes[id as usize];
        let mut pending = std::mem::take(&mut node.to_verify);
        let mut union = pending.pop()?;
        for set in pending {
            union.union_with(&set);
        }

        let mut fresh = union.clone();
        fresh.and_not(&node.verified);
        (fresh.cardinality() > 0).then_some(union)
    }

    /// Best-single-set strategy: verify the set with the most new bits and
    /// drop sets that no longer add anything.
    fn take_best(&mut self, id: NodeId) -> Option<BitSet> {
        let node = &mut self.nodes[id as usize];
        let verified = node.verified.clone();
        node.to_verify.retain(|set| {
            let mut fresh = set.clone();
            fresh.and_not(&verified);
            fresh.cardinality() > 0
        });

        let best_index = node
            .to_verify
            .iter()
            .enumerate()
            .max_by_key(|(_, set)| {
                let mut fresh = (*set).clone();
                fresh.and_not(&verified);
                fresh.cardinality()
            })
            .map(|(index, _)| index)?;
        Some(node.to_verify.swap_remove(best_index))
    }

    /// Merge a verified set. Growth triggers a state broadcast; crossing
    /// the threshold finishes the node and flushes one missing-set
    /// transfer to every retained peer.
    fn update_verified(&mut self, ctx: &mut Context<'_, Self>, id: NodeId, sigs: &BitSet) {
        let node = &mut self.nodes[id as usize];
        let before = node.verified.cardinality();
        node.verified.union_with(sigs);
        let after = node.verified.cardinality();
        if after == before {
            return;
        }

        self.broadcast_state(ctx, id);

        let threshold = self.config.threshold;
        if !self.nodes[id as usize].done && after >= threshold {
            let node = &mut self.nodes[id as usize];
            node.done = true;
            node.done_at = Some(ctx.now());
            debug!(node = id, verified = after, done_at = ctx.now(), "threshold reached");
            // Every retained peer is below the threshold, so each still
            // misses something we now hold; the flush always drains.
            while self.send_missing_once(ctx, id) {}
        }
    }
}

impl Protocol for Gossip {
    type Message = GossipMessage;

    fn deliver(
        &mut self,
        _ctx: &mut Context<'_, Self>,
        from: NodeId,
        to: NodeId,
        msg: GossipMessage,
    ) {
        match msg {
            GossipMessage::PeerState { sigs } => self.on_peer_state(from, to, sigs),
            GossipMessage::SignatureSet { sigs } => self.on_signature_set(to, sigs),
        }
    }
}
