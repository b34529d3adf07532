//! Property tests for partition ownership and route selection.

use std::collections::BTreeSet;

use proptest::prelude::*;
use serde_json::json;

use queue_mediator::config::schema::{AssignmentScheme, PartitionStrategy, PartitioningConfig, RouteConfig};
use queue_mediator::partition::assigner::{owner_of, partitions_for_worker, stable_hash};
use queue_mediator::partition::{PartitionAssigner, PartitionDecision};
use queue_mediator::routing::{RouteMatch, RouteTable};
use queue_mediator::Message;

fn arb_scheme() -> impl Strategy<Value = AssignmentScheme> {
    prop::sample::select(vec![AssignmentScheme::Modulo, AssignmentScheme::ContiguousRange])
}

fn arb_strategy() -> impl Strategy<Value = PartitionStrategy> {
    prop::sample::select(vec![
        PartitionStrategy::Sticky,
        PartitionStrategy::Hash,
        PartitionStrategy::Key,
    ])
}

fn config(strategy: PartitionStrategy, scheme: AssignmentScheme, partitions: u32) -> PartitioningConfig {
    PartitioningConfig {
        enabled: true,
        strategy,
        assignment: scheme,
        partition_count: partitions,
        ..PartitioningConfig::default()
    }
}

proptest! {
    #[test]
    fn every_partition_has_exactly_one_owner(
        scheme in arb_scheme(),
        partitions in 1u32..200,
        workers in 1usize..40,
    ) {
        let mut seen = BTreeSet::new();
        for worker in 0..workers {
            for pid in partitions_for_worker(scheme, partitions, worker, workers) {
                prop_assert!(seen.insert(pid), "partition {} owned twice", pid);
            }
        }
        let all: BTreeSet<u32> = (0..partitions).collect();
        prop_assert_eq!(seen, all);
    }

    #[test]
    fn owner_index_is_in_range(
        scheme in arb_scheme(),
        partitions in 1u32..500,
        workers in 1usize..64,
        pid_seed in any::<u32>(),
    ) {
        let pid = pid_seed % partitions;
        prop_assert!(owner_of(scheme, pid, partitions, workers) < workers);
    }

    #[test]
    fn stable_hash_is_deterministic(key in ".{0,40}", partitions in 1u32..1000) {
        let first = stable_hash(&key, partitions);
        prop_assert!(first < partitions);
        prop_assert_eq!(first, stable_hash(&key, partitions));
    }

    #[test]
    fn exactly_one_worker_processes_each_key(
        strategy in arb_strategy(),
        scheme in arb_scheme(),
        workers in 1usize..8,
        extra in 0u32..20,
        key in "[a-z0-9-]{1,24}",
        sequence in any::<u64>(),
    ) {
        let partitions = workers as u32 + extra;
        let cfg = config(strategy, scheme, partitions);
        let assigners: Vec<_> = (0..workers)
            .map(|i| PartitionAssigner::new(&cfg, i, workers))
            .collect();

        let owners: Vec<usize> = assigners
            .iter()
            .filter(|a| matches!(a.decide(Some(&key), sequence), PartitionDecision::Owned { .. }))
            .map(|a| a.worker_index())
            .collect();
        prop_assert_eq!(owners.len(), 1);
    }

    #[test]
    fn round_robin_agrees_across_workers(
        workers in 1usize..8,
        extra in 0u32..20,
        sequence in any::<u64>(),
    ) {
        let partitions = workers as u32 + extra;
        let mut cfg = config(PartitionStrategy::RoundRobin, AssignmentScheme::Modulo, partitions);
        cfg.session_affinity = false;
        let owners = (0..workers)
            .map(|i| PartitionAssigner::new(&cfg, i, workers))
            .filter(|a| matches!(a.decide(Some("ignored"), sequence), PartitionDecision::Owned { .. }))
            .count();
        prop_assert_eq!(owners, 1);
    }

    #[test]
    fn equal_priority_ties_follow_declaration_order(
        order in Just((0..6).collect::<Vec<usize>>()).prop_shuffle(),
    ) {
        let routes: Vec<RouteConfig> = order
            .iter()
            .map(|i| {
                let mut route = RouteConfig::new(format!("route-{}", i));
                route.match_field = Some("metadata.type".to_string());
                route.match_value = Some(json!("same"));
                route.priority = 5;
                route
            })
            .collect();
        let table = RouteTable::compile(&routes, None, false).unwrap();
        let message = Message::with_id("c-1", json!({})).with_metadata("type", "same");

        let expected = format!("route-{}", order[0]);
        for _ in 0..3 {
            match table.match_message(&message).unwrap() {
                RouteMatch::Route(route) => prop_assert_eq!(&route.name, &expected),
                RouteMatch::Fallback { .. } => prop_assert!(false, "unexpected fallback"),
            }
        }
    }

    #[test]
    fn higher_priority_always_wins(
        order in Just((0..5).collect::<Vec<i32>>()).prop_shuffle(),
    ) {
        let routes: Vec<RouteConfig> = order
            .iter()
            .map(|p| {
                let mut route = RouteConfig::new(format!("p{}", p));
                route.is_default = true;
                route.priority = *p;
                route
            })
            .collect();
        let table = RouteTable::compile(&routes, None, false).unwrap();
        let doc = Message::with_id("c-1", json!({})).document();
        prop_assert_eq!(&table.find(&doc).unwrap().name, "p4");
    }
}

#[test]
fn rebalance_moves_ownership_without_gaps() {
    let cfg = config(PartitionStrategy::Hash, AssignmentScheme::ContiguousRange, 12);
    let assigners: Vec<_> = (0..4).map(|i| PartitionAssigner::new(&cfg, i, 4)).collect();
    for a in &assigners {
        a.reassign(3);
    }

    let owned: Vec<usize> = assigners.iter().map(|a| a.stats().assigned_partitions).collect();
    assert_eq!(owned, vec![4, 4, 4, 0]);
}
