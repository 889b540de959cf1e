//! Run-level statistics.

use serde::{Deserialize, Serialize};

/// Counters collected while the simulation runs.
///
/// Determinism tests compare two same-seed runs field by field.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStats {
    /// Envelopes (deliveries and tasks) popped from the queue.
    pub events_processed: u64,
    /// Delivery envelopes scheduled, one per recipient.
    pub messages_sent: u64,
    /// Delivery envelopes that reached their recipient.
    pub messages_delivered: u64,
    /// Tasks accepted by the scheduler.
    pub tasks_scheduled: u64,
    /// Task bodies actually executed.
    pub tasks_executed: u64,
    /// Conditional tasks whose run condition did not hold at fire time.
    pub tasks_skipped: u64,
    /// Periodic/conditional tasks dropped because their stop condition held.
    pub tasks_retired: u64,
}

impl SimulationStats {
    /// Deliveries still sitting in the queue.
    pub fn messages_in_flight(&self) -> u64 {
        self.messages_sent - self.messages_delivered
    }
}
