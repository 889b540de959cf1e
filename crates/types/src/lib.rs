//! Shared types for the aggsim discrete-event simulator.
//!
//! This crate provides the foundational types shared by the engine and the
//! protocol crates:
//!
//! - [`Node`] / [`NodeRegistry`]: participant identity and accounting
//! - [`Position`]: 2D coordinates used by distance-based latency
//! - [`BitSet`]: fixed-capacity bitset for contribution tracking
//! - [`Millis`] / [`NodeId`]: simulated time and dense node indices

mod bitset;
mod node;

pub use bitset::BitSet;
pub use node::{Node, NodeRegistry, Position, MAX_X, MAX_Y};

/// Simulated time in milliseconds since the start of the run.
pub type Millis = u64;

/// Dense node index assigned by the [`NodeRegistry`].
///
/// This is a simulation-only concept for routing between in-process nodes;
/// there is no separate wire-level identity.
pub type NodeId = u32;
