//! Name-based construction of a simulation.
//!
//! Callers (or the data crate) describe a system with plain specs that
//! refer to each other by name. [`SimulationBuilder::build`] resolves every
//! reference, validates the combination, and returns an [`Engine`] with one
//! control loop per resource, one loop per breakdown state and one per
//! source already scheduled.
//!
//! # Build order
//!
//! 1. Time models (validated), processes, product types, queues, nodes.
//! 2. Resources with their work states (`resource:process:index`) and
//!    setup/breakdown states (`resource:state`).
//! 3. Sources and sinks.
//! 4. Transport links, once every location they may name exists.
//! 5. Engine: routers, controllers, and the initial tasks.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::control::{ControlPolicyKind, Controller, ControllerKind};
use crate::engine::{Engine, Task};
use crate::fixed::{Position, duration_from_f64, f64_to_fixed64};
use crate::id::{LocationId, ProcessId, ProductTypeId, ResourceId, RouterId, TimeModelId};
use crate::path::LinkGraph;
use crate::process::{ProcessDef, ProcessKind};
use crate::product::{Node, ProcessModel, ProductType, Sink, Source, SourceLoop};
use crate::queue::Queue;
use crate::resource::{Resource, ResourceKind};
use crate::router::{RoutingHeuristic, RoutingHeuristicKind};
use crate::sim::SimulationConfig;
use crate::state::{BreakdownPhase, State, StateKind};
use crate::time_model::{DistanceMetric, Distribution, TimeModel, TimeModelError};
use crate::world::World;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A system description that cannot be built. Always reported before the
/// first event runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("duplicate {kind} name `{name}`")]
    DuplicateName { kind: &'static str, name: String },
    #[error("`{owner}` references unknown {kind} `{name}`")]
    UnknownReference {
        owner: String,
        kind: &'static str,
        name: String,
    },
    #[error("`{owner}` has no queue configured where one is required")]
    MissingQueueConfiguration { owner: String },
    #[error("`{owner}` has capacity 0")]
    InvalidCapacity { owner: String },
    #[error("{kind:?} resource `{resource}` cannot run process `{process}`")]
    ProcessKindMismatch {
        resource: String,
        kind: ResourceKind,
        process: String,
    },
    #[error("time model `{name}`: {source}")]
    InvalidTimeModel {
        name: String,
        #[source]
        source: TimeModelError,
    },
    #[error("resource `{resource}` cannot use control policy {policy:?}")]
    UnsupportedPolicy {
        resource: String,
        policy: ControlPolicyKind,
    },
    #[error("resource `{resource}` lists {capacities} process capacities for {processes} processes")]
    CapacityMismatch {
        resource: String,
        capacities: usize,
        processes: usize,
    },
    #[error("product `{product}`: `{process}` is not a transport process")]
    NotATransportProcess { product: String, process: String },
    #[error("product `{product}`: precedence cycle reaches `{process}`")]
    CyclicPrecedence { product: String, process: String },
}

// ---------------------------------------------------------------------------
// Specs
// ---------------------------------------------------------------------------

/// A duration model as written by users: plain numbers, converted to
/// simulation time at build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeModelSpec {
    Constant {
        duration: f64,
    },
    Distribution {
        distribution: Distribution,
        location: f64,
        #[serde(default)]
        scale: f64,
    },
    Sequence {
        values: Vec<f64>,
    },
    Distance {
        speed: f64,
        #[serde(default)]
        reaction_time: f64,
        #[serde(default)]
        metric: DistanceMetric,
    },
}

impl TimeModelSpec {
    pub fn into_model(self) -> TimeModel {
        match self {
            TimeModelSpec::Constant { duration } => TimeModel::constant(duration),
            TimeModelSpec::Distribution {
                distribution,
                location,
                scale,
            } => TimeModel::Distribution {
                distribution,
                location,
                scale,
            },
            TimeModelSpec::Sequence { values } => TimeModel::sequence(&values),
            TimeModelSpec::Distance {
                speed,
                reaction_time,
                metric,
            } => TimeModel::Distance {
                speed: f64_to_fixed64(speed),
                reaction_time: duration_from_f64(reaction_time),
                metric,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessKindSpec {
    #[default]
    Production,
    Transport,
    /// Links between named locations (nodes, resources, sources, sinks).
    LinkTransport { links: Vec<(String, String)> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    pub time_model: String,
    #[serde(default)]
    pub kind: ProcessKindSpec,
    #[serde(default)]
    pub capability: Option<String>,
}

impl ProcessSpec {
    pub fn production(name: &str, time_model: &str) -> Self {
        Self {
            name: name.to_string(),
            time_model: time_model.to_string(),
            kind: ProcessKindSpec::Production,
            capability: None,
        }
    }

    pub fn transport(name: &str, time_model: &str) -> Self {
        Self {
            kind: ProcessKindSpec::Transport,
            ..Self::production(name, time_model)
        }
    }

    pub fn link_transport(name: &str, time_model: &str, links: &[(&str, &str)]) -> Self {
        Self {
            kind: ProcessKindSpec::LinkTransport {
                links: links
                    .iter()
                    .map(|(a, b)| (a.to_string(), b.to_string()))
                    .collect(),
            },
            ..Self::production(name, time_model)
        }
    }

    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capability = Some(capability.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSpec {
    pub name: String,
    /// 0 means unbounded.
    #[serde(default)]
    pub capacity: usize,
}

impl QueueSpec {
    pub fn new(name: &str, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateKindSpec {
    Setup { origin: String, target: String },
    Breakdown { repair_time_model: String },
    ProcessBreakdown {
        process: String,
        repair_time_model: String,
    },
}

/// A setup or breakdown state. Resources list the ones they carry; every
/// resource gets its own instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSpec {
    pub name: String,
    /// Setup duration, or time to failure for breakdowns.
    pub time_model: String,
    pub kind: StateKindSpec,
}

impl StateSpec {
    pub fn setup(name: &str, time_model: &str, origin: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            time_model: time_model.to_string(),
            kind: StateKindSpec::Setup {
                origin: origin.to_string(),
                target: target.to_string(),
            },
        }
    }

    pub fn breakdown(name: &str, time_to_failure: &str, repair: &str) -> Self {
        Self {
            name: name.to_string(),
            time_model: time_to_failure.to_string(),
            kind: StateKindSpec::Breakdown {
                repair_time_model: repair.to_string(),
            },
        }
    }

    pub fn process_breakdown(name: &str, time_to_failure: &str, repair: &str, process: &str) -> Self {
        Self {
            name: name.to_string(),
            time_model: time_to_failure.to_string(),
            kind: StateKindSpec::ProcessBreakdown {
                process: process.to_string(),
                repair_time_model: repair.to_string(),
            },
        }
    }
}

fn default_capacity() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub kind: ResourceKind,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub position: (f64, f64),
    pub processes: Vec<String>,
    /// Parallel occupations per process; defaults to `capacity` each.
    #[serde(default)]
    pub process_capacities: Option<Vec<usize>>,
    #[serde(default)]
    pub states: Vec<String>,
    #[serde(default)]
    pub input_queues: Vec<String>,
    #[serde(default)]
    pub output_queues: Vec<String>,
    #[serde(default)]
    pub policy: ControlPolicyKind,
}

impl ResourceSpec {
    pub fn production(name: &str, capacity: usize, processes: &[&str], input: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ResourceKind::Production,
            capacity,
            position: (0.0, 0.0),
            processes: processes.iter().map(|p| p.to_string()).collect(),
            process_capacities: None,
            states: Vec::new(),
            input_queues: vec![input.to_string()],
            output_queues: vec![output.to_string()],
            policy: ControlPolicyKind::Fifo,
        }
    }

    pub fn transport(name: &str, capacity: usize, processes: &[&str]) -> Self {
        Self {
            kind: ResourceKind::Transport,
            input_queues: Vec::new(),
            output_queues: Vec::new(),
            ..Self::production(name, capacity, processes, "", "")
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = (x, y);
        self
    }

    pub fn with_policy(mut self, policy: ControlPolicyKind) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_states(mut self, states: &[&str]) -> Self {
        self.states = states.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_process_capacities(mut self, capacities: &[usize]) -> Self {
        self.process_capacities = Some(capacities.to_vec());
        self
    }
}

/// The required processes of a product, in one of three written forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessModelSpec {
    /// Process names, run in order.
    List(Vec<String>),
    /// `[before, after]` pairs. Steps are declared in order of first mention.
    Edges(Vec<(String, String)>),
    /// Each process with its successors. Keys are declared in name order,
    /// then successors that are not keys.
    Adjacency(BTreeMap<String, Vec<String>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSpec {
    pub name: String,
    pub processes: ProcessModelSpec,
    pub transport_process: String,
}

impl ProductSpec {
    pub fn new(name: &str, processes: &[&str], transport_process: &str) -> Self {
        Self {
            name: name.to_string(),
            processes: ProcessModelSpec::List(processes.iter().map(|p| p.to_string()).collect()),
            transport_process: transport_process.to_string(),
        }
    }

    /// A product whose processes are ordered only by `edges`.
    pub fn precedence(name: &str, edges: &[(&str, &str)], transport_process: &str) -> Self {
        Self {
            name: name.to_string(),
            processes: ProcessModelSpec::Edges(
                edges.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect(),
            ),
            transport_process: transport_process.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub product: String,
    /// Inter-arrival times.
    pub time_model: String,
    #[serde(default)]
    pub position: (f64, f64),
    pub output_queues: Vec<String>,
    #[serde(default)]
    pub routing: RoutingHeuristicKind,
}

impl SourceSpec {
    pub fn new(name: &str, product: &str, time_model: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            product: product.to_string(),
            time_model: time_model.to_string(),
            position: (0.0, 0.0),
            output_queues: vec![output.to_string()],
            routing: RoutingHeuristicKind::default(),
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = (x, y);
        self
    }

    pub fn with_routing(mut self, routing: RoutingHeuristicKind) -> Self {
        self.routing = routing;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkSpec {
    pub name: String,
    pub product: String,
    #[serde(default)]
    pub position: (f64, f64),
    pub input_queues: Vec<String>,
}

impl SinkSpec {
    pub fn new(name: &str, product: &str, input: &str) -> Self {
        Self {
            name: name.to_string(),
            product: product.to_string(),
            position: (0.0, 0.0),
            input_queues: vec![input.to_string()],
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = (x, y);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub position: (f64, f64),
}

impl NodeSpec {
    pub fn new(name: &str, x: f64, y: f64) -> Self {
        Self {
            name: name.to_string(),
            position: (x, y),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects specs, then resolves them into an [`Engine`].
#[derive(Debug)]
pub struct SimulationBuilder {
    config: SimulationConfig,
    time_models: Vec<(String, TimeModelSpec)>,
    processes: Vec<ProcessSpec>,
    queues: Vec<QueueSpec>,
    states: Vec<StateSpec>,
    resources: Vec<ResourceSpec>,
    products: Vec<ProductSpec>,
    sources: Vec<SourceSpec>,
    sinks: Vec<SinkSpec>,
    nodes: Vec<NodeSpec>,
    heuristics: Vec<(String, Box<dyn RoutingHeuristic>)>,
}

fn unknown(owner: &str, kind: &'static str, name: &str) -> ConfigError {
    ConfigError::UnknownReference {
        owner: owner.to_string(),
        kind,
        name: name.to_string(),
    }
}

fn position((x, y): (f64, f64)) -> Position {
    Position::new(x, y)
}

/// Insert `name` into a name map, rejecting duplicates.
fn register<T: Copy>(map: &mut HashMap<String, T>, kind: &'static str, name: &str, id: T) -> Result<(), ConfigError> {
    if map.insert(name.to_string(), id).is_some() {
        return Err(ConfigError::DuplicateName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn lookup<T: Copy>(map: &HashMap<String, T>, owner: &str, kind: &'static str, name: &str) -> Result<T, ConfigError> {
    map.get(name).copied().ok_or_else(|| unknown(owner, kind, name))
}

/// Resolve a product's process names and check that its precedence graph
/// has no cycle.
fn resolve_process_model(
    product: &str,
    spec: &ProcessModelSpec,
    processes: &HashMap<String, ProcessId>,
) -> Result<ProcessModel, ConfigError> {
    let mut order: Vec<&str> = Vec::new();
    let edges: Vec<(&str, &str)> = match spec {
        ProcessModelSpec::List(names) => {
            let steps = names
                .iter()
                .map(|p| lookup(processes, product, "process", p))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(ProcessModel::List(steps));
        }
        ProcessModelSpec::Edges(edges) => edges.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect(),
        ProcessModelSpec::Adjacency(map) => {
            order.extend(map.keys().map(String::as_str));
            map.iter()
                .flat_map(|(a, next)| next.iter().map(move |b| (a.as_str(), b.as_str())))
                .collect()
        }
    };
    for &(a, b) in &edges {
        for name in [a, b] {
            if !order.contains(&name) {
                order.push(name);
            }
        }
    }

    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); order.len()];
    for &(a, b) in &edges {
        let index = |name: &str| order.iter().position(|n| *n == name);
        if let (Some(a), Some(b)) = (index(a), index(b))
            && !predecessors[b].contains(&a)
        {
            predecessors[b].push(a);
        }
    }

    // Peel off steps with no open predecessor until nothing moves.
    let mut settled = vec![false; order.len()];
    loop {
        let free: Vec<usize> = (0..order.len())
            .filter(|&s| !settled[s] && predecessors[s].iter().all(|&p| settled[p]))
            .collect();
        if free.is_empty() {
            break;
        }
        for s in free {
            settled[s] = true;
        }
    }
    if let Some(stuck) = settled.iter().position(|s| !s) {
        return Err(ConfigError::CyclicPrecedence {
            product: product.to_string(),
            process: order[stuck].to_string(),
        });
    }

    let nodes = order
        .iter()
        .zip(predecessors)
        .map(|(name, preds)| lookup(processes, product, "process", name).map(|id| (id, preds)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ProcessModel::PrecedenceGraph(nodes))
}

impl SimulationBuilder {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            time_models: Vec::new(),
            processes: Vec::new(),
            queues: Vec::new(),
            states: Vec::new(),
            resources: Vec::new(),
            products: Vec::new(),
            sources: Vec::new(),
            sinks: Vec::new(),
            nodes: Vec::new(),
            heuristics: Vec::new(),
        }
    }

    pub fn add_time_model(mut self, name: &str, spec: TimeModelSpec) -> Self {
        self.time_models.push((name.to_string(), spec));
        self
    }

    pub fn add_process(mut self, spec: ProcessSpec) -> Self {
        self.processes.push(spec);
        self
    }

    pub fn add_queue(mut self, spec: QueueSpec) -> Self {
        self.queues.push(spec);
        self
    }

    pub fn add_state(mut self, spec: StateSpec) -> Self {
        self.states.push(spec);
        self
    }

    pub fn add_resource(mut self, spec: ResourceSpec) -> Self {
        self.resources.push(spec);
        self
    }

    pub fn add_product(mut self, spec: ProductSpec) -> Self {
        self.products.push(spec);
        self
    }

    pub fn add_source(mut self, spec: SourceSpec) -> Self {
        self.sources.push(spec);
        self
    }

    pub fn add_sink(mut self, spec: SinkSpec) -> Self {
        self.sinks.push(spec);
        self
    }

    pub fn add_node(mut self, spec: NodeSpec) -> Self {
        self.nodes.push(spec);
        self
    }

    /// Route the products of `source` with a custom heuristic instead of
    /// its declared one.
    pub fn set_heuristic(mut self, source: &str, heuristic: Box<dyn RoutingHeuristic>) -> Self {
        self.heuristics.push((source.to_string(), heuristic));
        self
    }

    pub fn build(self) -> Result<Engine, ConfigError> {
        let mut world = World::default();
        let mut locations: HashSet<String> = HashSet::new();
        let mut claim_location = |name: &str| -> Result<(), ConfigError> {
            if locations.insert(name.to_string()) {
                Ok(())
            } else {
                Err(ConfigError::DuplicateName {
                    kind: "location",
                    name: name.to_string(),
                })
            }
        };

        // ---- Time models ----
        let mut model_ids: HashMap<String, TimeModelId> = HashMap::new();
        let mut time_models = Vec::with_capacity(self.time_models.len());
        for (name, spec) in self.time_models {
            let model = spec.into_model();
            model
                .validate()
                .map_err(|source| ConfigError::InvalidTimeModel {
                    name: name.clone(),
                    source,
                })?;
            register(&mut model_ids, "time model", &name, TimeModelId(time_models.len() as u32))?;
            time_models.push(model);
        }

        // ---- Processes (links resolved later) ----
        let mut pending_links: Vec<(ProcessId, String, Vec<(String, String)>)> = Vec::new();
        for spec in &self.processes {
            let id = ProcessId(world.processes.len() as u32);
            register(&mut world.names.processes, "process", &spec.name, id)?;
            let time_model = lookup(&model_ids, &spec.name, "time model", &spec.time_model)?;
            let kind = match &spec.kind {
                ProcessKindSpec::Production => ProcessKind::Production,
                ProcessKindSpec::Transport => ProcessKind::Transport,
                ProcessKindSpec::LinkTransport { links } => {
                    pending_links.push((id, spec.name.clone(), links.clone()));
                    ProcessKind::LinkTransport {
                        links: LinkGraph::default(),
                    }
                }
            };
            world.processes.push(ProcessDef {
                id,
                name: spec.name.clone(),
                kind,
                time_model,
                capability: spec.capability.clone(),
            });
        }

        // ---- Product types ----
        for spec in &self.products {
            let id = ProductTypeId(world.product_types.len() as u32);
            register(&mut world.names.product_types, "product", &spec.name, id)?;
            let process_model = resolve_process_model(&spec.name, &spec.processes, &world.names.processes)?;
            let transport_process = lookup(
                &world.names.processes,
                &spec.name,
                "process",
                &spec.transport_process,
            )?;
            if !world.processes[transport_process.0 as usize].is_transport() {
                return Err(ConfigError::NotATransportProcess {
                    product: spec.name.clone(),
                    process: spec.transport_process.clone(),
                });
            }
            world.product_types.push(ProductType {
                id,
                name: spec.name.clone(),
                process_model,
                transport_process,
            });
        }

        // ---- Queues and nodes ----
        for spec in &self.queues {
            let id = world
                .queues
                .insert_with_key(|id| Queue::new(id, spec.name.clone(), spec.capacity));
            register(&mut world.names.queues, "queue", &spec.name, id)?;
        }
        for spec in &self.nodes {
            claim_location(&spec.name)?;
            let id = world.nodes.insert_with_key(|id| Node {
                id,
                name: spec.name.clone(),
                position: position(spec.position),
            });
            register(&mut world.names.nodes, "node", &spec.name, id)?;
        }

        // ---- Resources ----
        let state_specs: HashMap<&str, &StateSpec> =
            self.states.iter().map(|s| (s.name.as_str(), s)).collect();
        let mut resource_order: Vec<(ResourceId, ControlPolicyKind)> = Vec::new();
        for spec in &self.resources {
            claim_location(&spec.name)?;
            if spec.capacity == 0 {
                return Err(ConfigError::InvalidCapacity {
                    owner: spec.name.clone(),
                });
            }
            if !spec.policy.supports(ControllerKind::from(spec.kind)) {
                return Err(ConfigError::UnsupportedPolicy {
                    resource: spec.name.clone(),
                    policy: spec.policy,
                });
            }
            if spec.kind == ResourceKind::Production
                && (spec.input_queues.is_empty() || spec.output_queues.is_empty())
            {
                return Err(ConfigError::MissingQueueConfiguration {
                    owner: spec.name.clone(),
                });
            }
            let capacities = match &spec.process_capacities {
                Some(caps) if caps.len() != spec.processes.len() => {
                    return Err(ConfigError::CapacityMismatch {
                        resource: spec.name.clone(),
                        capacities: caps.len(),
                        processes: spec.processes.len(),
                    });
                }
                Some(caps) => caps.clone(),
                None => vec![spec.capacity; spec.processes.len()],
            };
            if capacities.contains(&0) {
                return Err(ConfigError::InvalidCapacity {
                    owner: spec.name.clone(),
                });
            }

            let id = world.resources.insert_with_key(|id| {
                Resource::new(id, spec.name.clone(), spec.kind, spec.capacity, position(spec.position))
            });
            register(&mut world.names.resources, "resource", &spec.name, id)?;

            let mut catalogue = Vec::with_capacity(spec.processes.len());
            for (process_name, capacity) in spec.processes.iter().zip(capacities) {
                let process = lookup(&world.names.processes, &spec.name, "process", process_name)?;
                let def = &world.processes[process.0 as usize];
                if def.is_transport() != (spec.kind == ResourceKind::Transport) {
                    return Err(ConfigError::ProcessKindMismatch {
                        resource: spec.name.clone(),
                        kind: spec.kind,
                        process: process_name.clone(),
                    });
                }
                let kind = match spec.kind {
                    ResourceKind::Production => StateKind::Production { process },
                    ResourceKind::Transport => StateKind::Transport { process },
                };
                let time_model = def.time_model;
                let mut states = Vec::with_capacity(capacity);
                for i in 0..capacity {
                    let name = format!("{}:{}:{}", spec.name, process_name, i);
                    let state = world
                        .states
                        .insert_with_key(|sid| State::new(sid, name.clone(), id, kind, time_model));
                    register(&mut world.names.states, "state", &name, state)?;
                    states.push(state);
                }
                catalogue.push((process, states));
            }

            let mut setup_states = Vec::new();
            let mut breakdown_states = Vec::new();
            for state_name in &spec.states {
                let state_spec = state_specs
                    .get(state_name.as_str())
                    .ok_or_else(|| unknown(&spec.name, "state", state_name))?;
                let time_model = lookup(&model_ids, state_name, "time model", &state_spec.time_model)?;
                let kind = match &state_spec.kind {
                    StateKindSpec::Setup { origin, target } => StateKind::Setup {
                        origin: lookup(&world.names.processes, state_name, "process", origin)?,
                        target: lookup(&world.names.processes, state_name, "process", target)?,
                    },
                    StateKindSpec::Breakdown { repair_time_model } => StateKind::Breakdown {
                        repair_model: lookup(&model_ids, state_name, "time model", repair_time_model)?,
                    },
                    StateKindSpec::ProcessBreakdown {
                        process,
                        repair_time_model,
                    } => StateKind::ProcessBreakdown {
                        process: lookup(&world.names.processes, state_name, "process", process)?,
                        repair_model: lookup(&model_ids, state_name, "time model", repair_time_model)?,
                    },
                };
                let name = format!("{}:{}", spec.name, state_name);
                let state = world
                    .states
                    .insert_with_key(|sid| State::new(sid, name.clone(), id, kind, time_model));
                register(&mut world.names.states, "state", &name, state)?;
                if kind.is_breakdown() {
                    breakdown_states.push(state);
                } else {
                    setup_states.push(state);
                }
            }

            let input_queues = spec
                .input_queues
                .iter()
                .map(|q| lookup(&world.names.queues, &spec.name, "queue", q))
                .collect::<Result<Vec<_>, _>>()?;
            let output_queues = spec
                .output_queues
                .iter()
                .map(|q| lookup(&world.names.queues, &spec.name, "queue", q))
                .collect::<Result<Vec<_>, _>>()?;

            if let Some(resource) = world.resources.get_mut(id) {
                resource.processes = catalogue;
                resource.setup_states = setup_states;
                resource.breakdown_states = breakdown_states;
                resource.input_queues = input_queues;
                resource.output_queues = output_queues;
            }
            resource_order.push((id, spec.policy));
        }

        // ---- Sources and sinks ----
        let mut source_order = Vec::with_capacity(self.sources.len());
        for spec in &self.sources {
            claim_location(&spec.name)?;
            let product_type = lookup(&world.names.product_types, &spec.name, "product", &spec.product)?;
            let time_model = lookup(&model_ids, &spec.name, "time model", &spec.time_model)?;
            if spec.output_queues.is_empty() {
                return Err(ConfigError::MissingQueueConfiguration {
                    owner: spec.name.clone(),
                });
            }
            let output_queues = spec
                .output_queues
                .iter()
                .map(|q| lookup(&world.names.queues, &spec.name, "queue", q))
                .collect::<Result<Vec<_>, _>>()?;
            let id = world.sources.insert_with_key(|id| Source {
                id,
                name: spec.name.clone(),
                product_type,
                time_model,
                position: position(spec.position),
                output_queues,
                router: RouterId(0),
                created: 0,
            });
            register(&mut world.names.sources, "source", &spec.name, id)?;
            source_order.push((id, spec.name.clone(), spec.routing));
        }
        for spec in &self.sinks {
            claim_location(&spec.name)?;
            let product_type = lookup(&world.names.product_types, &spec.name, "product", &spec.product)?;
            if spec.input_queues.is_empty() {
                return Err(ConfigError::MissingQueueConfiguration {
                    owner: spec.name.clone(),
                });
            }
            let input_queues = spec
                .input_queues
                .iter()
                .map(|q| lookup(&world.names.queues, &spec.name, "queue", q))
                .collect::<Result<Vec<_>, _>>()?;
            let id = world.sinks.insert_with_key(|id| Sink {
                id,
                name: spec.name.clone(),
                product_type,
                position: position(spec.position),
                input_queues,
                finished: 0,
            });
            register(&mut world.names.sinks, "sink", &spec.name, id)?;
        }

        // ---- Links ----
        for (process, owner, links) in pending_links {
            let mut resolved = Vec::with_capacity(links.len());
            for (a, b) in &links {
                resolved.push((
                    resolve_location(&world, &owner, a)?,
                    resolve_location(&world, &owner, b)?,
                ));
            }
            world.processes[process.0 as usize].kind = ProcessKind::LinkTransport {
                links: LinkGraph::new(&resolved),
            };
        }

        // ---- Engine ----
        let mut heuristics = self.heuristics;
        for (source, _) in &heuristics {
            if world.names.sources.get(source).is_none() {
                return Err(unknown("builder", "source", source));
            }
        }
        let resources = resource_order.len();
        let sources = source_order.len();
        let mut engine = Engine::new(self.config, world, time_models, Vec::new());

        for (source, name, routing) in source_order {
            let heuristic = match heuristics.iter().position(|(s, _)| *s == name) {
                Some(i) => heuristics.swap_remove(i).1,
                None => routing.build(),
            };
            let router = engine.add_router(heuristic);
            if let Some(s) = engine.world.sources.get_mut(source) {
                s.router = router;
            }
        }

        for (resource, policy) in resource_order {
            let requested = engine.scheduler.new_signal();
            let (kind, breakdowns) = match engine.world.resources.get(resource) {
                Some(r) => (ControllerKind::from(r.kind), r.breakdown_states.clone()),
                None => continue,
            };
            engine
                .world
                .controllers
                .insert(resource, Controller::new(resource, kind, policy.build(), requested));
            engine.spawn(Task::ControlLoop { resource });
            for state in breakdowns {
                engine.spawn(Task::Breakdown {
                    state,
                    phase: BreakdownPhase::Init,
                });
            }
        }
        let source_ids: Vec<_> = engine.world.sources.keys().collect();
        for source in source_ids {
            engine.spawn(Task::Source(SourceLoop::new(source)));
        }

        tracing::info!(resources, sources, "simulation built");
        Ok(engine)
    }
}

/// Resolve a location name: nodes first, then resources, sources, sinks.
fn resolve_location(world: &World, owner: &str, name: &str) -> Result<LocationId, ConfigError> {
    world
        .names
        .nodes
        .get(name)
        .map(|id| LocationId::Node(*id))
        .or_else(|| world.names.resources.get(name).map(|id| LocationId::Resource(*id)))
        .or_else(|| world.names.sources.get(name).map(|id| LocationId::Source(*id)))
        .or_else(|| world.names.sinks.get(name).map(|id| LocationId::Sink(*id)))
        .ok_or_else(|| unknown(owner, "location", name))
}
