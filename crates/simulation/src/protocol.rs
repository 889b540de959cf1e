//! The protocol-to-engine contract.
//!
//! A protocol is a state machine over the whole population: it owns every
//! node's protocol state and mutates a node's slice of it only from that
//! node's own deliveries and tasks. Handlers are synchronous, deterministic,
//! and perform no I/O: every effect goes back through the [`Context`]
//! handed into the callback, and every suspension is a scheduled
//! continuation.

use std::fmt;

use aggsim_types::NodeId;

use crate::runner::Context;

/// A protocol message carried between nodes.
///
/// `size_bytes` feeds the per-node accounting counters only; it never
/// influences delay computation.
pub trait Message: fmt::Debug {
    fn size_bytes(&self) -> usize;
}

/// A protocol plugged into the simulation engine.
pub trait Protocol: Sized + 'static {
    type Message: Message + Clone;

    /// Apply a delivered message at the receiving node.
    ///
    /// Called by the engine when a delivery envelope comes due; receiver
    /// accounting has already been recorded at that point.
    fn deliver(
        &mut self,
        ctx: &mut Context<'_, Self>,
        from: NodeId,
        to: NodeId,
        msg: Self::Message,
    );
}
