//! Property-based tests for the prodsim core.
//!
//! Uses proptest to drive queues with random operation sequences and to run
//! randomly sized models, then verify the structural invariants hold.

use prodsim_core::builder::{
    ProcessSpec, ProductSpec, QueueSpec, ResourceSpec, SimulationBuilder, SinkSpec, SourceSpec,
    TimeModelSpec,
};
use prodsim_core::control::ControlPolicyKind;
use prodsim_core::engine::Engine;
use prodsim_core::event::SimEvent;
use prodsim_core::id::{ProductId, QueueId};
use prodsim_core::queue::Queue;
use prodsim_core::sim::SimulationConfig;
use prodsim_core::test_utils::*;
use prodsim_core::time_model::Distribution;
use proptest::prelude::*;
use slotmap::SlotMap;

// ===========================================================================
// Generators
// ===========================================================================

#[derive(Debug, Clone)]
enum QueueOp {
    Put,
    Reserve,
    Unreserve,
    PutReserved,
    Get,
}

fn arb_queue_ops(max_ops: usize) -> impl Strategy<Value = Vec<QueueOp>> {
    proptest::collection::vec(
        prop_oneof![
            Just(QueueOp::Put),
            Just(QueueOp::Reserve),
            Just(QueueOp::Unreserve),
            Just(QueueOp::PutReserved),
            Just(QueueOp::Get),
        ],
        1..=max_ops,
    )
}

fn fresh_queue(capacity: usize) -> Queue {
    let mut ids: SlotMap<QueueId, ()> = SlotMap::with_key();
    Queue::new(ids.insert(()), "q", capacity)
}

/// A stochastic line: exponential arrivals and lognormal work.
fn noisy_line(seed: u64, queue_capacity: usize) -> Engine {
    SimulationBuilder::new(SimulationConfig::default().with_seed(seed))
        .add_time_model(
            "arrival",
            TimeModelSpec::Distribution {
                distribution: Distribution::Exponential,
                location: 3.0,
                scale: 0.0,
            },
        )
        .add_time_model(
            "work",
            TimeModelSpec::Distribution {
                distribution: Distribution::Lognormal,
                location: 2.0,
                scale: 0.5,
            },
        )
        .add_time_model("drive", travel(10.0))
        .add_process(ProcessSpec::production("drill", "work"))
        .add_process(ProcessSpec::transport("move", "drive"))
        .add_product(ProductSpec::new("widget", &["drill"], "move"))
        .add_queue(QueueSpec::new("src_out", 0))
        .add_queue(QueueSpec::new("m1_in", queue_capacity))
        .add_queue(QueueSpec::new("m1_out", queue_capacity))
        .add_queue(QueueSpec::new("m2_in", queue_capacity))
        .add_queue(QueueSpec::new("m2_out", queue_capacity))
        .add_queue(QueueSpec::new("sink_in", 0))
        .add_resource(ResourceSpec::production("m1", 1, &["drill"], "m1_in", "m1_out").at(5.0, 0.0))
        .add_resource(ResourceSpec::production("m2", 1, &["drill"], "m2_in", "m2_out").at(5.0, 5.0))
        .add_resource(ResourceSpec::transport("agv", 1, &["move"]))
        .add_source(SourceSpec::new("src", "widget", "arrival", "src_out"))
        .add_sink(SinkSpec::new("sink", "widget", "sink_in").at(10.0, 0.0))
        .build()
        .unwrap()
}

// ===========================================================================
// Queue invariants
// ===========================================================================

proptest! {
    /// Stored items plus reservations never exceed a bounded capacity, and
    /// refused operations leave the queue untouched.
    #[test]
    fn queue_never_exceeds_capacity(capacity in 1..6usize, ops in arb_queue_ops(60)) {
        let mut queue = fresh_queue(capacity);
        let mut products: SlotMap<ProductId, ()> = SlotMap::with_key();

        for op in ops {
            let before = (queue.len(), queue.pending_put());
            match op {
                QueueOp::Put => {
                    if queue.put(products.insert(())).is_err() {
                        prop_assert_eq!((queue.len(), queue.pending_put()), before);
                    }
                }
                QueueOp::Reserve => {
                    if queue.reserve().is_err() {
                        prop_assert!(queue.is_full());
                        prop_assert_eq!((queue.len(), queue.pending_put()), before);
                    }
                }
                QueueOp::Unreserve => {
                    let result = queue.unreserve();
                    prop_assert_eq!(result.is_err(), before.1 == 0);
                }
                QueueOp::PutReserved => {
                    let result = queue.put_reserved(products.insert(()));
                    prop_assert_eq!(result.is_err(), before.1 == 0);
                }
                QueueOp::Get => {
                    let got = queue.get(|_| true);
                    prop_assert_eq!(got.is_some(), before.0 > 0);
                }
            }
            prop_assert!(queue.len() + queue.pending_put() <= capacity);
        }
    }

    /// Every reservation can be released exactly once.
    #[test]
    fn reservations_balance(capacity in 1..8usize, claims in 0..8usize) {
        let mut queue = fresh_queue(capacity);
        let granted = (0..claims).filter(|_| queue.reserve().is_ok()).count();
        prop_assert_eq!(granted, claims.min(capacity));
        prop_assert_eq!(queue.pending_put(), granted);

        for _ in 0..granted {
            prop_assert!(queue.unreserve().is_ok());
        }
        prop_assert_eq!(queue.pending_put(), 0);
        prop_assert!(queue.unreserve().is_err());
    }
}

// ===========================================================================
// Engine invariants
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A resource never runs more occupations than its capacity, and every
    /// request eventually completes.
    #[test]
    fn occupations_respect_capacity(
        capacity in 1..4usize,
        requests in 1..8usize,
        duration in 1..6u32,
    ) {
        let mut engine = single_machine(capacity, &[("p", duration as f64)], ControlPolicyKind::Fifo);
        let names = vec!["p"; requests];
        queue_requests(&mut engine, &names);
        engine.run_until(t((duration as usize * requests + 1) as f64)).unwrap();

        let mut active = 0usize;
        let mut completed = 0usize;
        for event in engine.trace().iter() {
            match event {
                SimEvent::StateStarted { .. } => {
                    active += 1;
                    prop_assert!(active <= capacity);
                }
                SimEvent::StateEnded { .. } => {
                    active -= 1;
                    completed += 1;
                }
                _ => {}
            }
        }
        prop_assert_eq!(active, 0);
        prop_assert_eq!(completed, requests);
    }

    /// The same seed reproduces the same trace.
    #[test]
    fn same_seed_same_trace(seed in any::<u64>(), queue_capacity in 0..3usize) {
        let mut a = noisy_line(seed, queue_capacity);
        let mut b = noisy_line(seed, queue_capacity);
        let summary_a = a.run_until(t(40.0)).unwrap();
        let summary_b = b.run_until(t(40.0)).unwrap();
        prop_assert_eq!(summary_a, summary_b);
        prop_assert_eq!(a.trace_hash(), b.trace_hash());
    }
}
