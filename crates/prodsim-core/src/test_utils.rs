//! Shared test helpers for unit tests, integration tests, and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::builder::{
    NodeSpec, ProcessSpec, ProductSpec, QueueSpec, ResourceSpec, SimulationBuilder, SinkSpec,
    SourceSpec, TimeModelSpec,
};
use crate::control::ControlPolicyKind;
use crate::engine::Engine;
use crate::fixed::{Fixed64, SimTime};
use crate::id::{LocationId, SignalId};
use crate::router::RoutingHeuristicKind;
use crate::sim::SimulationConfig;
use crate::time_model::DistanceMetric;

// ===========================================================================
// Fixed-point helpers
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Simulation time from seconds.
pub fn t(v: f64) -> SimTime {
    SimTime::from_num(v)
}

// ===========================================================================
// Spec shorthands
// ===========================================================================

pub fn constant(duration: f64) -> TimeModelSpec {
    TimeModelSpec::Constant { duration }
}

/// Distance-based travel time with no reaction time.
pub fn travel(speed: f64) -> TimeModelSpec {
    TimeModelSpec::Distance {
        speed,
        reaction_time: 0.0,
        metric: DistanceMetric::Manhattan,
    }
}

// ===========================================================================
// Single machine
// ===========================================================================

/// One production resource `m` with the given capacity and processes
/// (name, constant duration), reading from `in` and writing to `out`. Both
/// queues are unbounded. Products of type `item` can be inserted directly
/// with [`queue_requests`].
pub fn single_machine(capacity: usize, processes: &[(&str, f64)], policy: ControlPolicyKind) -> Engine {
    machine_builder(capacity, processes, policy, 0)
        .build()
        .expect("single machine builds")
}

/// [`single_machine`] with a bounded output queue.
pub fn single_machine_with_output(capacity: usize, processes: &[(&str, f64)], output_capacity: usize) -> Engine {
    machine_builder(capacity, processes, ControlPolicyKind::Fifo, output_capacity)
        .build()
        .expect("single machine builds")
}

fn machine_builder(
    capacity: usize,
    processes: &[(&str, f64)],
    policy: ControlPolicyKind,
    output_capacity: usize,
) -> SimulationBuilder {
    let mut builder = SimulationBuilder::new(SimulationConfig::default())
        .add_time_model("instant", constant(0.0))
        .add_process(ProcessSpec::transport("move", "instant"))
        .add_product(ProductSpec::new("item", &[], "move"))
        .add_queue(QueueSpec::new("in", 0))
        .add_queue(QueueSpec::new("out", output_capacity));
    let mut names = Vec::with_capacity(processes.len());
    for (name, duration) in processes {
        let model = format!("{name}_time");
        builder = builder
            .add_time_model(&model, constant(*duration))
            .add_process(ProcessSpec::production(name, &model));
        if !names.contains(name) {
            names.push(*name);
        }
    }
    builder.add_resource(ResourceSpec::production("m", capacity, &names, "in", "out").with_policy(policy))
}

/// Put one `item` per entry into `in` and request the named process for it
/// on `m`. Returns each request's done signal, in order.
pub fn queue_requests(engine: &mut Engine, processes: &[&str]) -> Vec<SignalId> {
    let world = engine.world();
    let machine = world.resource_id("m").expect("machine exists");
    let input = world.queue_id("in").expect("input queue exists");
    let item = world.product_type_id("item").expect("item type exists");
    processes
        .iter()
        .map(|name| {
            let process = engine.world().process_id(name).expect("process exists");
            let product = engine
                .insert_product(item, LocationId::Resource(machine), Some(input))
                .expect("insert product");
            engine
                .request_production(machine, process, product)
                .expect("request production")
        })
        .collect()
}

// ===========================================================================
// Two machines and a vehicle
// ===========================================================================

/// Machines `a` at (0, 0) and `b` at (10, 0), both offering `drill`, with
/// input queues `a_in`/`b_in` of capacity 1. Vehicle `agv` at (0, 0) offers
/// `move` at speed 2 with the given capacity. No sources or sinks.
pub fn two_machines(agv_capacity: usize) -> Engine {
    SimulationBuilder::new(SimulationConfig::default())
        .add_time_model("five", constant(5.0))
        .add_time_model("drive", travel(2.0))
        .add_process(ProcessSpec::production("drill", "five"))
        .add_process(ProcessSpec::transport("move", "drive"))
        .add_queue(QueueSpec::new("a_in", 1))
        .add_queue(QueueSpec::new("a_out", 0))
        .add_queue(QueueSpec::new("b_in", 1))
        .add_queue(QueueSpec::new("b_out", 0))
        .add_resource(ResourceSpec::production("a", 1, &["drill"], "a_in", "a_out"))
        .add_resource(ResourceSpec::production("b", 1, &["drill"], "b_in", "b_out").at(10.0, 0.0))
        .add_resource(ResourceSpec::transport("agv", agv_capacity, &["move"]))
        .build()
        .expect("two machines build")
}

// ===========================================================================
// A small line
// ===========================================================================

/// Source `src` (0, 0) -> machine `m` (5, 0) -> sink `sink` (10, 0), served
/// by vehicle `agv` at speed 10. `src` creates a `widget` every
/// `interarrival`; `m` runs `drill` for `process_time`. `m_in` and `m_out`
/// hold `queue_capacity` items (0 = unbounded). Product type `orphan` needs
/// `paint`, which nothing offers.
pub fn simple_line(interarrival: f64, process_time: f64, queue_capacity: usize) -> Engine {
    line_builder(interarrival, process_time, queue_capacity)
        .build()
        .expect("simple line builds")
}

pub fn line_builder(interarrival: f64, process_time: f64, queue_capacity: usize) -> SimulationBuilder {
    SimulationBuilder::new(SimulationConfig::default())
        .add_time_model("arrival", constant(interarrival))
        .add_time_model("work", constant(process_time))
        .add_time_model("drive", travel(10.0))
        .add_process(ProcessSpec::production("drill", "work"))
        .add_process(ProcessSpec::production("paint", "work"))
        .add_process(ProcessSpec::transport("move", "drive"))
        .add_product(ProductSpec::new("widget", &["drill"], "move"))
        .add_product(ProductSpec::new("orphan", &["paint"], "move"))
        .add_queue(QueueSpec::new("src_out", 0))
        .add_queue(QueueSpec::new("m_in", queue_capacity))
        .add_queue(QueueSpec::new("m_out", queue_capacity))
        .add_queue(QueueSpec::new("sink_in", 0))
        .add_resource(ResourceSpec::production("m", 1, &["drill"], "m_in", "m_out").at(5.0, 0.0))
        .add_resource(ResourceSpec::transport("agv", 1, &["move"]))
        .add_source(
            SourceSpec::new("src", "widget", "arrival", "src_out").with_routing(RoutingHeuristicKind::Fifo),
        )
        .add_sink(SinkSpec::new("sink", "widget", "sink_in").at(10.0, 0.0))
}

/// A node for link networks.
pub fn node(name: &str, x: f64, y: f64) -> NodeSpec {
    NodeSpec::new(name, x, y)
}
