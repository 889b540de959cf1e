//! The simulation runner: clock, envelope dispatch, and task scheduling.

use std::time::Duration;

use aggsim_types::{Millis, Node, NodeId, NodeRegistry};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::ConfigError;
use crate::latency::{LatencyConfig, LatencyModel};
use crate::protocol::{Message, Protocol};
use crate::queue::TimedQueue;
use crate::stats::SimulationStats;

/// A task body: runs against the protocol with full engine access.
///
/// Closures capture node *ids*, never references into protocol state, so a
/// task scheduled long ago stays valid no matter what happened in between.
type TaskFn<P> = Box<dyn FnMut(&mut P, &mut Context<'_, P>)>;

/// A predicate over protocol state, evaluated at task fire time.
type TaskPredicate<P> = Box<dyn Fn(&P) -> bool>;

enum TaskKind<P: Protocol> {
    OneShot,
    Periodic {
        period: Millis,
        stop: TaskPredicate<P>,
    },
    Conditional {
        period: Millis,
        run_if: TaskPredicate<P>,
        stop: TaskPredicate<P>,
    },
}

struct ScheduledTask<P: Protocol> {
    /// The node this task belongs to; kept for tracing and so protocols can
    /// attribute work even though execution is global.
    node: NodeId,
    run: TaskFn<P>,
    kind: TaskKind<P>,
}

/// One pending queue entry: a timed delivery or a timed task.
enum Envelope<P: Protocol> {
    Delivery {
        msg: P::Message,
        from: NodeId,
        to: NodeId,
    },
    Task(ScheduledTask<P>),
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of participants to create.
    pub node_count: u32,
    /// Seed for all randomness in the run.
    pub seed: u64,
    /// Latency model selection.
    pub latency: LatencyConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            node_count: 4,
            seed: 0,
            latency: LatencyConfig::None,
        }
    }
}

/// Everything the engine owns besides the protocol itself.
///
/// Split out so a dispatched callback can hold `&mut P` and `&mut
/// EngineState` at the same time.
struct EngineState<P: Protocol> {
    now: Millis,
    queue: TimedQueue<Envelope<P>>,
    nodes: NodeRegistry,
    latency: Box<dyn LatencyModel>,
    rng: ChaCha8Rng,
    stats: SimulationStats,
}

impl<P: Protocol> EngineState<P> {
    /// Schedule one delivery per recipient at `base + latency`, drawing an
    /// independent jitter digit for each. Sender accounting happens here;
    /// receiver accounting happens when the delivery fires.
    fn enqueue_send(
        &mut self,
        base: Millis,
        msg: P::Message,
        from: NodeId,
        recipients: &[NodeId],
    ) {
        let size = msg.size_bytes();
        for &to in recipients {
            let digit = self.rng.gen_range(0..100u8);
            let delay = self
                .latency
                .delay_ms(self.nodes.get(from), self.nodes.get(to), digit)
                .max(1);
            self.nodes.get_mut(from).record_send(size);
            self.stats.messages_sent += 1;
            let at = base + delay;
            trace!(from, to, at, "scheduled delivery");
            self.queue.insert(
                at,
                Envelope::Delivery {
                    msg: msg.clone(),
                    from,
                    to,
                },
            );
        }
    }

    fn schedule_task(&mut self, delay: Millis, task: ScheduledTask<P>) {
        let at = self.now + delay.max(1);
        self.stats.tasks_scheduled += 1;
        trace!(node = task.node, at, "scheduled task");
        self.queue.insert(at, Envelope::Task(task));
    }
}

/// The engine surface visible inside protocol callbacks.
///
/// Everything a handler may do (read the clock, send, schedule more work,
/// draw randomness) goes through here, which keeps handler effects
/// serialized through the single time-ordered queue.
pub struct Context<'a, P: Protocol> {
    engine: &'a mut EngineState<P>,
}

impl<'a, P: Protocol> Context<'a, P> {
    /// Current simulated time in milliseconds.
    pub fn now(&self) -> Millis {
        self.engine.now
    }

    /// The run's seeded RNG. All protocol randomness must come from here to
    /// keep runs reproducible.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.engine.rng
    }

    /// Read a node's identity and accounting.
    pub fn node(&self, id: NodeId) -> &Node {
        self.engine.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.engine.nodes.len()
    }

    /// Send `msg` from `from` to every recipient, each with its own
    /// latency draw, delivered at `now + delay`.
    pub fn send(&mut self, msg: P::Message, from: NodeId, recipients: &[NodeId]) {
        self.engine.enqueue_send(self.engine.now, msg, from, recipients);
    }

    /// Like [`send`](Self::send) but with a fixed extra delay in front of
    /// the latency draw, for modeling serialization cost.
    pub fn send_after(
        &mut self,
        extra: Millis,
        msg: P::Message,
        from: NodeId,
        recipients: &[NodeId],
    ) {
        let base = self.engine.now + extra;
        self.engine.enqueue_send(base, msg, from, recipients);
    }

    /// Schedule a one-shot task for `node` after `delay` (clamped ≥ 1 ms).
    pub fn register_task<F>(&mut self, delay: Millis, node: NodeId, run: F)
    where
        F: FnMut(&mut P, &mut Context<'_, P>) + 'static,
    {
        self.engine.schedule_task(
            delay,
            ScheduledTask {
                node,
                run: Box::new(run),
                kind: TaskKind::OneShot,
            },
        );
    }

    /// Schedule a task that re-runs every `period` until `stop` holds at a
    /// fire time. The stop condition is checked before the body runs.
    pub fn register_periodic_task<F, S>(
        &mut self,
        start: Millis,
        period: Millis,
        node: NodeId,
        run: F,
        stop: S,
    ) where
        F: FnMut(&mut P, &mut Context<'_, P>) + 'static,
        S: Fn(&P) -> bool + 'static,
    {
        self.engine.schedule_task(
            start,
            ScheduledTask {
                node,
                run: Box::new(run),
                kind: TaskKind::Periodic {
                    period,
                    stop: Box::new(stop),
                },
            },
        );
    }

    /// Like [`register_periodic_task`](Self::register_periodic_task), but
    /// the body only executes when `run_if` holds at fire time; otherwise
    /// the task silently reschedules.
    pub fn register_conditional_task<F, R, S>(
        &mut self,
        start: Millis,
        period: Millis,
        node: NodeId,
        run: F,
        run_if: R,
        stop: S,
    ) where
        F: FnMut(&mut P, &mut Context<'_, P>) + 'static,
        R: Fn(&P) -> bool + 'static,
        S: Fn(&P) -> bool + 'static,
    {
        self.engine.schedule_task(
            start,
            ScheduledTask {
                node,
                run: Box::new(run),
                kind: TaskKind::Conditional {
                    period,
                    run_if: Box::new(run_if),
                    stop: Box::new(stop),
                },
            },
        );
    }
}

/// A full simulation run: clock, queue, population, latency, protocol.
pub struct Simulation<P: Protocol> {
    engine: EngineState<P>,
    protocol: P,
}

impl<P: Protocol> Simulation<P> {
    /// Build a run from configuration. The population is created with
    /// random positions; a malformed latency table fails here.
    pub fn new(protocol: P, config: SimulationConfig) -> Result<Self, ConfigError> {
        if config.node_count == 0 {
            return Err(ConfigError::EmptyPopulation);
        }
        let latency = config.latency.build()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut nodes = NodeRegistry::new();
        for _ in 0..config.node_count {
            nodes.add_node_at_random(&mut rng);
        }

        Ok(Self {
            engine: EngineState {
                now: 0,
                queue: TimedQueue::new(),
                nodes,
                latency,
                rng,
                stats: SimulationStats::default(),
            },
            protocol,
        })
    }

    /// Run a closure against the protocol and engine before time starts;
    /// the place to register each node's initial task.
    pub fn init<F>(&mut self, f: F)
    where
        F: FnOnce(&mut P, &mut Context<'_, P>),
    {
        let Self { engine, protocol } = self;
        let mut ctx = Context { engine };
        f(protocol, &mut ctx);
    }

    /// Advance the clock by `budget`, executing everything that comes due.
    pub fn run_for(&mut self, budget: Duration) {
        self.run_millis(budget.as_millis() as Millis);
    }

    /// Advance the clock by `budget` milliseconds in 1 ms increments,
    /// draining and executing every due envelope at each increment.
    ///
    /// Exhausting the budget with protocol work still pending is a valid,
    /// reportable end state, not an error.
    pub fn run_millis(&mut self, budget: Millis) {
        let end = self.engine.now + budget;
        while self.engine.now < end {
            self.engine.now += 1;
            self.engine.queue.advance(self.engine.now);
            while let Some(envelope) = self.engine.queue.pop(self.engine.now) {
                self.dispatch(envelope);
            }
        }
    }

    fn dispatch(&mut self, envelope: Envelope<P>) {
        let Self { engine, protocol } = self;
        engine.stats.events_processed += 1;

        match envelope {
            Envelope::Delivery { msg, from, to } => {
                engine.nodes.get_mut(to).record_receive(msg.size_bytes());
                engine.stats.messages_delivered += 1;
                let mut ctx = Context {
                    engine: &mut *engine,
                };
                protocol.deliver(&mut ctx, from, to, msg);
            }
            Envelope::Task(mut task) => {
                // `None` drops the task, `Some(period)` reschedules it.
                let reschedule = match &task.kind {
                    TaskKind::OneShot => {
                        engine.stats.tasks_executed += 1;
                        let mut ctx = Context {
                            engine: &mut *engine,
                        };
                        (task.run)(protocol, &mut ctx);
                        None
                    }
                    TaskKind::Periodic { period, stop } => {
                        if stop(protocol) {
                            engine.stats.tasks_retired += 1;
                            None
                        } else {
                            engine.stats.tasks_executed += 1;
                            let mut ctx = Context {
                                engine: &mut *engine,
                            };
                            (task.run)(protocol, &mut ctx);
                            Some(*period)
                        }
                    }
                    TaskKind::Conditional {
                        period,
                        run_if,
                        stop,
                    } => {
                        if stop(protocol) {
                            engine.stats.tasks_retired += 1;
                            None
                        } else {
                            if run_if(protocol) {
                                engine.stats.tasks_executed += 1;
                                let mut ctx = Context {
                                    engine: &mut *engine,
                                };
                                (task.run)(protocol, &mut ctx);
                            } else {
                                engine.stats.tasks_skipped += 1;
                            }
                            Some(*period)
                        }
                    }
                };

                if let Some(period) = reschedule {
                    engine
                        .queue
                        .insert(engine.now + period.max(1), Envelope::Task(task));
                }
            }
        }
    }

    // ─── Harness surface ───

    pub fn now(&self) -> Millis {
        self.engine.now
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.engine.nodes.get(id)
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.engine.nodes
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.engine.stats
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    /// Drop every pending delivery and task.
    pub fn clear_pending(&mut self) {
        self.engine.queue.clear();
    }

    /// Deliveries and tasks still waiting in the queue.
    pub fn pending(&self) -> usize {
        self.engine.queue.len()
    }
}
