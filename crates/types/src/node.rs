//! Node identity and accounting.
//!
//! A [`Node`] carries an immutable identity plus message/byte counters that
//! only ever increase. The engine is the sole mutator of the counters: it
//! bumps the sender side when a message is handed to the network and the
//! receiver side when the delivery fires. Protocol code reads them for
//! reporting but never writes them.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::NodeId;

/// Width of the coordinate plane nodes are placed on.
pub const MAX_X: u32 = 1000;
/// Height of the coordinate plane nodes are placed on.
pub const MAX_Y: u32 = 1000;

/// A 2D position on the coordinate plane, used by distance-based latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

impl Position {
    /// Euclidean distance to another position.
    pub fn distance(&self, other: &Position) -> f64 {
        let dx = f64::from(self.x) - f64::from(other.x);
        let dy = f64::from(self.y) - f64::from(other.y);
        (dx * dx + dy * dy).sqrt()
    }

    /// Distance normalized by the plane diagonal, in `[0, 1]`.
    pub fn normalized_distance(&self, other: &Position) -> f64 {
        let diagonal = (f64::from(MAX_X) * f64::from(MAX_X)
            + f64::from(MAX_Y) * f64::from(MAX_Y))
        .sqrt();
        self.distance(other) / diagonal
    }
}

/// A simulated participant: immutable identity, mutable accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    position: Option<Position>,
    msg_sent: u64,
    msg_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
}

impl Node {
    fn new(id: NodeId, position: Option<Position>) -> Self {
        Self {
            id,
            position,
            msg_sent: 0,
            msg_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    /// Normalized distance to another node, in `[0, 1]`.
    ///
    /// Nodes without positions are treated as coincident.
    pub fn normalized_distance(&self, other: &Node) -> f64 {
        match (&self.position, &other.position) {
            (Some(a), Some(b)) => a.normalized_distance(b),
            _ => 0.0,
        }
    }

    pub fn msg_sent(&self) -> u64 {
        self.msg_sent
    }

    pub fn msg_received(&self) -> u64 {
        self.msg_received
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Record one outgoing message of `bytes` size. Engine use only.
    pub fn record_send(&mut self, bytes: usize) {
        self.msg_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Record one delivered message of `bytes` size. Engine use only.
    pub fn record_receive(&mut self, bytes: usize) {
        self.msg_received += 1;
        self.bytes_received += bytes as u64;
    }
}

/// Owns every [`Node`] for the lifetime of a run.
///
/// Ids are dense indices in insertion order, so `NodeId` doubles as an index
/// into protocol-side state vectors.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node without a position (distance latency treats it as
    /// coincident with everything).
    pub fn add_node(&mut self) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node::new(id, None));
        id
    }

    /// Add a node at a random position drawn from `rng`.
    pub fn add_node_at_random<R: Rng>(&mut self, rng: &mut R) -> NodeId {
        let id = self.nodes.len() as NodeId;
        let position = Position {
            x: rng.gen_range(0..MAX_X),
            y: rng.gen_range(0..MAX_Y),
        };
        self.nodes.push(Node::new(id, Some(position)));
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }
}
