//! Deterministic discrete-event engine for aggregation protocol simulation.
//!
//! This crate provides the simulation core: a single logical clock, a
//! time-bucketed delivery queue, a task scheduler, and pluggable latency
//! models. Protocols plug in through the [`Protocol`] trait and drive
//! themselves forward entirely by scheduling further deliveries and tasks
//! from within their own callbacks. Given the same seed, a run produces
//! identical results every time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Simulation<P>                        │
//! │                                                          │
//! │  ┌─────────────────────────────────────────────────────┐ │
//! │  │  TimedQueue<Envelope<P>>                            │ │
//! │  │  slot ring over time, LIFO per exact millisecond    │ │
//! │  └──────────────────────────┬──────────────────────────┘ │
//! │                             │ run_for: now += 1 ms,      │
//! │                             ▼ drain everything due       │
//! │  ┌─────────────────────────────────────────────────────┐ │
//! │  │  deliveries → P::deliver()     tasks → closures     │ │
//! │  └──────────────────────────┬──────────────────────────┘ │
//! │                             │ Context: send / register   │
//! │                             ▼ further envelopes          │
//! │  ┌─────────────────────────────────────────────────────┐ │
//! │  │  LatencyModel + ChaCha8Rng → per-recipient delay    │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no parallelism: "concurrency" is interleaved callbacks at their
//! assigned timestamps, and every suspension is an explicitly scheduled
//! continuation. Each node's state is mutated only from its own callbacks,
//! so no locks are needed anywhere.

mod error;
mod latency;
mod protocol;
mod queue;
mod runner;
mod stats;

pub use error::ConfigError;
pub use latency::{DistanceLatency, EmpiricalLatency, LatencyConfig, LatencyModel, NoLatency};
pub use protocol::{Message, Protocol};
pub use queue::TimedQueue;
pub use runner::{Context, Simulation, SimulationConfig};
pub use stats::SimulationStats;
