//! End-to-end runs of the gossip aggregation protocol.

use aggsim_gossip::{Gossip, GossipConfig};
use aggsim_simulation::{LatencyConfig, Simulation, SimulationConfig};
use std::time::Duration;
use tracing_test::traced_test;

fn build(config: GossipConfig, seed: u64, latency: LatencyConfig) -> Simulation<Gossip> {
    let node_count = config.node_count;
    let mut sim = Simulation::new(
        Gossip::new(config),
        SimulationConfig {
            node_count,
            seed,
            latency,
        },
    )
    .expect("valid simulation config");
    sim.init(|p, ctx| p.start(ctx));
    sim
}

fn majority_config(node_count: u32) -> GossipConfig {
    GossipConfig {
        node_count,
        threshold: (node_count / 2 + 1) as usize,
        connection_count: 8,
        pairing_time: 3,
        send_period: 20,
        double_aggregate: true,
    }
}

#[traced_test]
#[test]
fn population_reaches_majority_threshold() {
    let mut sim = build(majority_config(64), 42, LatencyConfig::None);
    sim.run_for(Duration::from_secs(30));

    let p = sim.protocol();
    for id in 0..64 {
        let state = p.node_state(id);
        assert!(state.is_done(), "node {id} never crossed the threshold");
        assert!(state.verified().cardinality() >= 33);
        assert!(state.done_at().is_some());
    }
}

#[test]
fn both_verification_strategies_converge() {
    for double_aggregate in [true, false] {
        let config = GossipConfig {
            double_aggregate,
            ..majority_config(32)
        };
        let mut sim = build(config, 7, LatencyConfig::None);
        sim.run_for(Duration::from_secs(30));

        let done = (0..32)
            .filter(|&id| sim.protocol().node_state(id).is_done())
            .count();
        assert_eq!(
            done, 32,
            "strategy double_aggregate={double_aggregate} left stragglers"
        );
    }
}

#[test]
fn peer_graph_is_symmetric_and_wide_enough() {
    let mut sim = build(majority_config(64), 3, LatencyConfig::None);
    sim.run_millis(1);

    let p = sim.protocol();
    for id in 0..64u32 {
        let peers = p.peers(id);
        assert!(peers.len() >= 8, "node {id} has too few peers");
        assert!(!peers.contains(&id), "node {id} peered with itself");
        for &peer in peers {
            assert!(
                p.peers(peer).contains(&id),
                "edge {id} -> {peer} is not symmetric"
            );
        }
    }
}

#[test]
fn accounting_reflects_gossip_traffic() {
    let mut sim = build(majority_config(32), 11, LatencyConfig::Distance);
    sim.run_for(Duration::from_secs(10));

    // Every node at least broadcast its initial state to its peers.
    for id in 0..32 {
        let node = sim.node(id);
        assert!(node.msg_sent() >= 8);
        assert!(node.bytes_sent() > 0);
    }
    let stats = sim.stats();
    assert!(stats.messages_delivered <= stats.messages_sent);
    assert!(stats.tasks_skipped > 0, "conditional gates never idled");
}

#[test]
fn same_seed_reproduces_completion_times() {
    let run = |seed: u64| {
        let mut sim = build(majority_config(32), seed, LatencyConfig::Distance);
        sim.run_for(Duration::from_secs(30));
        let done_ats: Vec<Option<u64>> = (0..32)
            .map(|id| sim.protocol().node_state(id).done_at())
            .collect();
        (sim.stats().clone(), done_ats)
    };

    let (stats_a, times_a) = run(5);
    let (stats_b, times_b) = run(5);
    assert_eq!(stats_a, stats_b);
    assert_eq!(times_a, times_b);
}
