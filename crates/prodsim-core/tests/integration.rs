//! End-to-end scenarios for the prodsim kernel.
//!
//! Each test builds a small model, runs it, and checks the trace.

use prodsim_core::builder::{
    NodeSpec, ProcessSpec, ProductSpec, QueueSpec, ResourceSpec, SimulationBuilder, SinkSpec,
    SourceSpec, StateSpec,
};
use prodsim_core::control::ControlPolicyKind;
use prodsim_core::engine::Engine;
use prodsim_core::event::{ProductActivity, SimEvent};
use prodsim_core::fixed::SimTime;
use prodsim_core::id::{LocationId, StateId};
use prodsim_core::product::ProductStatus;
use prodsim_core::rng::SimRng;
use prodsim_core::router::{Candidate, FirstCandidate, RoutingError, RoutingHeuristic, RoutingHeuristicKind};
use prodsim_core::sim::SimulationConfig;
use prodsim_core::test_utils::*;

fn starts(engine: &Engine, state: StateId) -> Vec<SimTime> {
    engine
        .trace()
        .iter()
        .filter_map(|e| match e {
            SimEvent::StateStarted { state: s, time, .. } if *s == state => Some(*time),
            _ => None,
        })
        .collect()
}

fn ends(engine: &Engine, state: StateId) -> Vec<SimTime> {
    engine
        .trace()
        .iter()
        .filter_map(|e| match e {
            SimEvent::StateEnded { state: s, time, .. } if *s == state => Some(*time),
            _ => None,
        })
        .collect()
}

fn state(engine: &Engine, name: &str) -> StateId {
    engine.world().state_id(name).unwrap()
}

/// The machine from `single_machine`, open for extra states.
fn machine_with_states(
    capacity: usize,
    processes: &[(&str, f64)],
    states: Vec<StateSpec>,
    extra_models: &[(&str, f64)],
) -> Engine {
    let mut builder = SimulationBuilder::new(SimulationConfig::default())
        .add_time_model("instant", constant(0.0))
        .add_process(ProcessSpec::transport("move", "instant"))
        .add_product(ProductSpec::new("item", &[], "move"))
        .add_queue(QueueSpec::new("in", 0))
        .add_queue(QueueSpec::new("out", 0));
    for (name, duration) in extra_models {
        builder = builder.add_time_model(name, constant(*duration));
    }
    let mut names = Vec::new();
    for (name, duration) in processes {
        let model = format!("{name}_time");
        builder = builder
            .add_time_model(&model, constant(*duration))
            .add_process(ProcessSpec::production(name, &model));
        names.push(*name);
    }
    let state_names: Vec<String> = states.iter().map(|s| s.name.clone()).collect();
    for spec in states {
        builder = builder.add_state(spec);
    }
    let state_refs: Vec<&str> = state_names.iter().map(String::as_str).collect();
    builder
        .add_resource(ResourceSpec::production("m", capacity, &names, "in", "out").with_states(&state_refs))
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Test 1: capacity 1 serialises same-instant requests
// ---------------------------------------------------------------------------
#[test]
fn capacity_one_runs_back_to_back() {
    let mut engine = single_machine(1, &[("p", 5.0)], ControlPolicyKind::Fifo);
    queue_requests(&mut engine, &["p", "p", "p"]);
    engine.run_until(t(20.0)).unwrap();

    let work = state(&engine, "m:p:0");
    assert_eq!(starts(&engine, work), vec![t(0.0), t(5.0), t(10.0)]);
    assert_eq!(ends(&engine, work), vec![t(5.0), t(10.0), t(15.0)]);
}

// ---------------------------------------------------------------------------
// Test 2: capacity 2 starts both requests at once
// ---------------------------------------------------------------------------
#[test]
fn capacity_two_runs_concurrently() {
    let mut engine = single_machine(2, &[("p", 5.0)], ControlPolicyKind::Fifo);
    queue_requests(&mut engine, &["p", "p"]);
    engine.run_until(t(1.0)).unwrap();

    let first = starts(&engine, state(&engine, "m:p:0"));
    let second = starts(&engine, state(&engine, "m:p:1"));
    assert_eq!(first, vec![t(0.0)]);
    assert_eq!(second, vec![t(0.0)]);
}

// ---------------------------------------------------------------------------
// Test 3: routing avoids a full resource
// ---------------------------------------------------------------------------
#[test]
fn router_prefers_resource_with_room() {
    let mut engine = two_machines(1);
    let router = engine.add_router(Box::new(FirstCandidate));
    let drill = engine.world().process_id("drill").unwrap();
    let a = engine.world().resource_id("a").unwrap();
    let b = engine.world().resource_id("b").unwrap();

    // The first call claims a's only slot.
    let first = engine.route_production(router, drill).unwrap().unwrap();
    assert_eq!(first.resource, a);
    let second = engine.route_production(router, drill).unwrap().unwrap();
    assert_eq!(second.resource, b);
}

// ---------------------------------------------------------------------------
// Test 4: a full input queue applies backpressure
// ---------------------------------------------------------------------------
#[test]
fn full_input_queue_yields_no_destination() {
    let mut engine = simple_line(100.0, 1.0, 2);
    let drill = engine.world().process_id("drill").unwrap();
    let widget = engine.world().product_type_id("widget").unwrap();
    let m = engine.world().resource_id("m").unwrap();
    let m_in = engine.world().queue_id("m_in").unwrap();
    let router = engine.world().source(engine.world().source_id("src").unwrap()).unwrap().router;

    for _ in 0..2 {
        engine
            .insert_product(widget, LocationId::Resource(m), Some(m_in))
            .unwrap();
    }
    assert_eq!(engine.route_production(router, drill).unwrap(), None);
    assert_eq!(engine.snapshot_queue(m_in).unwrap().pending_put, 0);
}

// ---------------------------------------------------------------------------
// Test 5: SPT dispatches the shortest request first
// ---------------------------------------------------------------------------
#[test]
fn spt_orders_by_expected_duration() {
    let mut engine = single_machine(
        1,
        &[("long", 5.0), ("short", 1.0), ("mid", 3.0)],
        ControlPolicyKind::ShortestProcessingTime,
    );
    queue_requests(&mut engine, &["long", "short", "mid"]);
    engine.run_until(t(20.0)).unwrap();

    assert_eq!(starts(&engine, state(&engine, "m:short:0")), vec![t(0.0)]);
    assert_eq!(starts(&engine, state(&engine, "m:mid:0")), vec![t(1.0)]);
    assert_eq!(starts(&engine, state(&engine, "m:long:0")), vec![t(4.0)]);
}

// ---------------------------------------------------------------------------
// Test 6: a breakdown pauses work and it resumes after repair
// ---------------------------------------------------------------------------
#[test]
fn breakdown_resumes_remaining_duration() {
    let mut engine = machine_with_states(
        1,
        &[("p", 10.0)],
        vec![StateSpec::breakdown("bd", "ttf", "repair")],
        &[("ttf", 4.0), ("repair", 3.0)],
    );
    queue_requests(&mut engine, &["p"]);
    engine.run_until(t(20.0)).unwrap();

    // Down 4..7 and 11..14; 10 units of work finish at 16.
    let breakdown = state(&engine, "m:bd");
    assert_eq!(starts(&engine, breakdown), vec![t(4.0), t(11.0), t(18.0)]);
    let work = state(&engine, "m:p:0");
    assert_eq!(starts(&engine, work), vec![t(0.0)]);
    assert_eq!(ends(&engine, work), vec![t(16.0)]);

    let duration = engine.trace().iter().find_map(|e| match e {
        SimEvent::StateEnded { state: s, duration, .. } if *s == work => Some(*duration),
        _ => None,
    });
    assert_eq!(duration, Some(t(10.0)));
}

// ---------------------------------------------------------------------------
// Test 7: switching process runs the matching setup first
// ---------------------------------------------------------------------------
#[test]
fn setup_runs_between_processes() {
    let mut engine = machine_with_states(
        1,
        &[("a", 1.0), ("b", 1.0)],
        vec![StateSpec::setup("a_to_b", "changeover", "a", "b")],
        &[("changeover", 2.0)],
    );
    queue_requests(&mut engine, &["a", "b", "b"]);
    engine.run_until(t(10.0)).unwrap();

    assert_eq!(starts(&engine, state(&engine, "m:a:0")), vec![t(0.0)]);
    assert_eq!(starts(&engine, state(&engine, "m:a_to_b")), vec![t(1.0)]);
    // Already set up for b: no second changeover.
    assert_eq!(starts(&engine, state(&engine, "m:b:0")), vec![t(3.0), t(4.0)]);

    let m = engine.world().resource_id("m").unwrap();
    let b = engine.world().process_id("b").unwrap();
    assert_eq!(engine.snapshot_resource(m).unwrap().current_setup, Some(b));
}

// ---------------------------------------------------------------------------
// Test 8: link transports follow the network
// ---------------------------------------------------------------------------
#[test]
fn link_transport_follows_links() {
    let mut engine = SimulationBuilder::new(SimulationConfig::default())
        .add_time_model("arrival", constant(50.0))
        .add_time_model("work", constant(1.0))
        .add_time_model("drive", travel(1.0))
        .add_process(ProcessSpec::production("drill", "work"))
        .add_process(ProcessSpec::link_transport(
            "move",
            "drive",
            &[("src", "n1"), ("n1", "m"), ("m", "n2"), ("n2", "sink")],
        ))
        .add_product(ProductSpec::new("widget", &["drill"], "move"))
        .add_queue(QueueSpec::new("src_out", 0))
        .add_queue(QueueSpec::new("m_in", 0))
        .add_queue(QueueSpec::new("m_out", 0))
        .add_queue(QueueSpec::new("sink_in", 0))
        .add_node(NodeSpec::new("n1", 0.0, 10.0))
        .add_node(NodeSpec::new("n2", 10.0, 0.0))
        .add_resource(ResourceSpec::production("m", 1, &["drill"], "m_in", "m_out").at(10.0, 10.0))
        .add_resource(ResourceSpec::transport("agv", 1, &["move"]))
        .add_source(SourceSpec::new("src", "widget", "arrival", "src_out").with_routing(RoutingHeuristicKind::Fifo))
        .add_sink(SinkSpec::new("sink", "widget", "sink_in").at(20.0, 0.0))
        .build()
        .unwrap();
    let summary = engine.run_until(t(95.0)).unwrap();
    assert_eq!(summary.products_created, 1);
    assert_eq!(summary.products_finished, 1);

    let world = engine.world();
    let expected = vec![
        LocationId::Node(world.node_id("n1").unwrap()),
        LocationId::Resource(world.resource_id("m").unwrap()),
        LocationId::Node(world.node_id("n2").unwrap()),
        LocationId::Sink(world.sink_id("sink").unwrap()),
    ];
    let loaded: Vec<LocationId> = engine
        .trace()
        .iter()
        .filter_map(|e| match e {
            SimEvent::Transport { target, empty: false, .. } => Some(*target),
            _ => None,
        })
        .collect();
    assert_eq!(loaded, expected);

    // 20 to the machine, 1 of work, 20 to the sink.
    let finished = engine.trace().iter().find_map(|e| match e {
        SimEvent::Product {
            activity: ProductActivity::Finished,
            time,
            ..
        } => Some(*time),
        _ => None,
    });
    assert_eq!(finished, Some(t(91.0)));
}

// ---------------------------------------------------------------------------
// Test 9: a full source queue holds the source back
// ---------------------------------------------------------------------------
#[test]
fn source_blocks_on_full_output() {
    let mut engine = SimulationBuilder::new(SimulationConfig::default())
        .add_time_model("arrival", constant(1.0))
        .add_time_model("work", constant(10.0))
        .add_time_model("drive", travel(10.0))
        .add_process(ProcessSpec::production("drill", "work"))
        .add_process(ProcessSpec::transport("move", "drive"))
        .add_product(ProductSpec::new("widget", &["drill"], "move"))
        .add_queue(QueueSpec::new("src_out", 1))
        .add_queue(QueueSpec::new("m_in", 1))
        .add_queue(QueueSpec::new("m_out", 1))
        .add_queue(QueueSpec::new("sink_in", 0))
        .add_resource(ResourceSpec::production("m", 1, &["drill"], "m_in", "m_out").at(5.0, 0.0))
        .add_resource(ResourceSpec::transport("agv", 1, &["move"]))
        .add_source(SourceSpec::new("src", "widget", "arrival", "src_out"))
        .add_sink(SinkSpec::new("sink", "widget", "sink_in").at(10.0, 0.0))
        .build()
        .unwrap();
    let src_out = engine.world().queue_id("src_out").unwrap();

    let mut saw_blocked = false;
    let mut now = 0.0;
    while now < 40.0 {
        now += 0.5;
        engine.run_until(t(now)).unwrap();
        let snap = engine.snapshot_queue(src_out).unwrap();
        assert!(snap.items.len() <= 1);
        saw_blocked |= snap.blocked_puts > 0;
    }
    assert!(saw_blocked);

    let summary = engine.run_until(t(40.0)).unwrap();
    assert!(summary.products_created < 20);
    assert_eq!(summary.products_failed, 0);
    assert!(summary.products_finished >= 2);
}

// ---------------------------------------------------------------------------
// Test 10: a product nothing can process fails alone
// ---------------------------------------------------------------------------
#[test]
fn unroutable_product_does_not_stop_the_run() {
    let mut engine = simple_line(5.0, 1.0, 0);
    let orphan = engine.world().product_type_id("orphan").unwrap();
    let src = engine.world().source_id("src").unwrap();
    let src_out = engine.world().queue_id("src_out").unwrap();
    let router = engine.world().source(src).unwrap().router;
    let product = engine
        .insert_product(orphan, LocationId::Source(src), Some(src_out))
        .unwrap();
    engine.release_product(product, router).unwrap();

    let summary = engine.run_until(t(30.0)).unwrap();
    assert_eq!(summary.products_failed, 1);
    assert!(summary.products_finished > 0);

    let snap = engine.snapshot_product(product).unwrap();
    assert_eq!(snap.queue, None);
    assert!(!engine.snapshot_queue(src_out).unwrap().items.contains(&product));
}

// ---------------------------------------------------------------------------
// Test 11: a process breakdown stops only its own process
// ---------------------------------------------------------------------------
#[test]
fn process_breakdown_spares_other_processes() {
    let mut engine = machine_with_states(
        2,
        &[("p", 10.0), ("q", 10.0)],
        vec![StateSpec::process_breakdown("p_down", "ttf", "repair", "p")],
        &[("ttf", 4.0), ("repair", 3.0)],
    );
    queue_requests(&mut engine, &["p", "q"]);
    engine.run_until(t(20.0)).unwrap();

    let p = state(&engine, "m:p:0");
    let q = state(&engine, "m:q:0");
    assert_eq!(starts(&engine, p), vec![t(0.0)]);
    assert_eq!(starts(&engine, q), vec![t(0.0)]);
    // p is down 4..7 and 11..14; q runs straight through.
    assert_eq!(starts(&engine, state(&engine, "m:p_down")), vec![t(4.0), t(11.0), t(18.0)]);
    assert_eq!(ends(&engine, p), vec![t(16.0)]);
    assert_eq!(ends(&engine, q), vec![t(10.0)]);
}

// ---------------------------------------------------------------------------
// Test 12: a capability requirement is served by a matching process
// ---------------------------------------------------------------------------
fn capability_line() -> Engine {
    SimulationBuilder::new(SimulationConfig::default())
        .add_time_model("arrival", constant(5.0))
        .add_time_model("work", constant(1.0))
        .add_time_model("drive", travel(10.0))
        .add_process(ProcessSpec::production("drill", "work").with_capability("hole"))
        .add_process(ProcessSpec::production("any_hole", "work").with_capability("hole"))
        .add_process(ProcessSpec::transport("move", "drive"))
        .add_product(ProductSpec::new("widget", &["any_hole"], "move"))
        .add_queue(QueueSpec::new("src_out", 0))
        .add_queue(QueueSpec::new("m_in", 0))
        .add_queue(QueueSpec::new("m_out", 0))
        .add_queue(QueueSpec::new("sink_in", 0))
        .add_resource(ResourceSpec::production("m", 1, &["drill"], "m_in", "m_out").at(5.0, 0.0))
        .add_resource(ResourceSpec::transport("agv", 1, &["move"]))
        .add_source(SourceSpec::new("src", "widget", "arrival", "src_out"))
        .add_sink(SinkSpec::new("sink", "widget", "sink_in").at(10.0, 0.0))
        .build()
        .unwrap()
}

#[test]
fn capability_routes_to_offered_process() {
    let mut engine = capability_line();
    let router = engine.add_router(Box::new(FirstCandidate));
    let any_hole = engine.world().process_id("any_hole").unwrap();
    let dest = engine.route_production(router, any_hole).unwrap().unwrap();
    assert_eq!(dest.resource, engine.world().resource_id("m").unwrap());
    assert_eq!(dest.process, engine.world().process_id("drill").unwrap());
}

#[test]
fn capability_line_finishes_products() {
    let mut engine = capability_line();
    let summary = engine.run_until(t(100.0)).unwrap();
    assert_eq!(summary.products_failed, 0);
    assert!(summary.products_finished >= 15);
    // All work ran on the offered process.
    let drill = state(&engine, "m:drill:0");
    assert!(ends(&engine, drill).len() as u64 >= summary.products_finished);
    assert!(engine.world().state_id("m:any_hole:0").is_none());
}

// ---------------------------------------------------------------------------
// Test 13: a precedence graph runs both branches before the join
// ---------------------------------------------------------------------------
#[test]
fn diamond_graph_joins_after_both_branches() {
    let mut engine = SimulationBuilder::new(SimulationConfig::default())
        .add_time_model("arrival", constant(1000.0))
        .add_time_model("short", constant(1.0))
        .add_time_model("long", constant(3.0))
        .add_time_model("drive", travel(10.0))
        .add_process(ProcessSpec::production("a", "short"))
        .add_process(ProcessSpec::production("b", "long"))
        .add_process(ProcessSpec::production("c", "short"))
        .add_process(ProcessSpec::production("d", "short"))
        .add_process(ProcessSpec::transport("move", "drive"))
        .add_product(ProductSpec::precedence(
            "diamond",
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
            "move",
        ))
        .add_queue(QueueSpec::new("src_out", 0))
        .add_queue(QueueSpec::new("m_in", 0))
        .add_queue(QueueSpec::new("m_out", 0))
        .add_queue(QueueSpec::new("sink_in", 0))
        .add_resource(ResourceSpec::production("m", 1, &["a", "b", "c", "d"], "m_in", "m_out").at(5.0, 0.0))
        .add_resource(ResourceSpec::transport("agv", 1, &["move"]))
        .add_source(SourceSpec::new("src", "diamond", "arrival", "src_out"))
        .add_sink(SinkSpec::new("sink", "diamond", "sink_in").at(10.0, 0.0))
        .build()
        .unwrap();
    let diamond = engine.world().product_type_id("diamond").unwrap();
    let src = engine.world().source_id("src").unwrap();
    let src_out = engine.world().queue_id("src_out").unwrap();
    let router = engine.world().source(src).unwrap().router;
    let product = engine
        .insert_product(diamond, LocationId::Source(src), Some(src_out))
        .unwrap();
    assert_eq!(engine.snapshot_product(product).unwrap().remaining.len(), 4);
    engine.release_product(product, router).unwrap();

    let summary = engine.run_until(t(100.0)).unwrap();
    assert_eq!(summary.products_finished, 1);
    assert!(engine.snapshot_product(product).unwrap().remaining.is_empty());

    let span = |name: &str| {
        let s = state(&engine, &format!("m:{name}:0"));
        let (starts, ends) = (starts(&engine, s), ends(&engine, s));
        assert_eq!((starts.len(), ends.len()), (1, 1), "{name} runs once");
        (starts[0], ends[0])
    };
    let (a, b, c, join) = (span("a"), span("b"), span("c"), span("d"));
    assert!(a.1 <= b.0 && a.1 <= c.0);
    // Ties between ready branches go to the first declared.
    assert!(b.0 < c.0);
    assert!(join.0 >= b.1 && join.0 >= c.1);
}

// ---------------------------------------------------------------------------
// Test 14: a heuristic answering out of range fails products, not the run
// ---------------------------------------------------------------------------
#[derive(Debug)]
struct OneTooFar;

impl RoutingHeuristic for OneTooFar {
    fn name(&self) -> &'static str {
        "one_too_far"
    }

    fn select(&self, candidates: &[Candidate], _rng: &mut SimRng) -> Option<usize> {
        Some(candidates.len())
    }
}

#[test]
fn invalid_selection_fails_products_only() {
    let mut engine = line_builder(5.0, 1.0, 0)
        .set_heuristic("src", Box::new(OneTooFar))
        .build()
        .unwrap();
    let summary = engine.run_until(t(32.0)).unwrap();
    assert_eq!(summary.products_created, 6);
    assert_eq!(summary.products_failed, summary.products_created);
    assert_eq!(summary.products_finished, 0);

    let failed = engine.snapshot_all_products();
    assert!(failed.iter().all(|p| matches!(
        p.status,
        ProductStatus::Failed {
            reason: RoutingError::InvalidSelection { index: Some(1), .. },
            ..
        }
    )));
}
