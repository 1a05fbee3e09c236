//! The simulation engine: owns every entity and drives the task loop.
//!
//! # Architecture
//!
//! The `Engine` owns:
//! - A [`Scheduler`] (virtual clock, event queue, signals)
//! - A [`World`] of entity arenas (resources, queues, states, controllers,
//!   products, sources, sinks, link nodes)
//! - The time models, routers, and the seeded [`SimRng`]
//! - A task arena of suspended [`Task`] state machines
//! - A [`TraceBuffer`] and any registered [`EventSink`] listeners
//!
//! # Task loop
//!
//! Work is split into cooperative tasks: one control loop per resource, one
//! job per dispatched request, one occupation per running state, one loop
//! per breakdown state and source, one lifecycle per product. The scheduler
//! hands back the next task to resume; the engine takes it out of the arena,
//! runs one step, and files it again according to the returned [`Suspend`].
//! A finished task triggers its done signal, which is what controllers and
//! jobs wait on.

use slotmap::SlotMap;

use crate::builder::ConfigError;
use crate::event::{EventSink, SimEvent, TraceBuffer, dispatch};
use crate::fixed::{Fixed64, SimTime};
use crate::id::{LocationId, ProcessId, ProductId, QueueId, ResourceId, SignalId, StateId, TaskId, TimeModelId};
use crate::job::{ProductionJob, TransportJob};
use crate::product::{ProductFlow, ProductStatus, SourceLoop};
use crate::queue::QueueError;
use crate::rng::SimRng;
use crate::router::{Router, RoutingError};
use crate::scheduler::Scheduler;
use crate::sim::{RunSummary, SimulationConfig};
use crate::state::BreakdownPhase;
use crate::time_model::TimeModel;
use crate::world::World;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A broken dispatch invariant. Always fatal: it means the engine itself
/// got into a state it should never reach.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("product {product:?} is not in any input queue of resource {resource:?}")]
    NoMatchingItem {
        product: ProductId,
        resource: ResourceId,
    },
    #[error("controller of resource {resource:?} started a job with no request left")]
    DoubleDispatch { resource: ResourceId },
    #[error("resource {resource:?} released a capacity slot it did not hold")]
    SlotNotHeld { resource: ResourceId },
    #[error("state {state:?} is already occupied")]
    StateOccupied { state: StateId },
    #[error("resource {resource:?} does not offer process {process:?}")]
    UnsupportedProcess {
        resource: ResourceId,
        process: ProcessId,
    },
    #[error("dangling {kind} handle")]
    DanglingHandle { kind: &'static str },
    #[error("task {0:?} resumed while it was already running")]
    Reentrant(TaskId),
}

/// Everything that can abort a run.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A dispatched transport cannot reach the pickup location.
    #[error("transport resource {resource:?} has no path from {from:?} to {to:?}")]
    PathNotFound {
        resource: ResourceId,
        from: LocationId,
        to: LocationId,
    },
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// A suspended unit of work. Each variant carries the state machine that
/// continues it.
#[derive(Debug)]
pub(crate) enum Task {
    ControlLoop { resource: ResourceId },
    Production(ProductionJob),
    Transport(TransportJob),
    Occupation { state: StateId },
    Breakdown { state: StateId, phase: BreakdownPhase },
    Source(SourceLoop),
    Product(ProductFlow),
}

/// What a task step wants next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Suspend {
    After(SimTime),
    Any(Vec<SignalId>),
    /// The step already arranged its own wakeup.
    Parked,
    Done,
}

#[derive(Debug)]
struct TaskSlot {
    /// `None` while the task is being stepped.
    task: Option<Task>,
    done: SignalId,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The discrete-event engine. Built by
/// [`SimulationBuilder`](crate::builder::SimulationBuilder).
pub struct Engine {
    pub(crate) config: SimulationConfig,
    pub(crate) scheduler: Scheduler,
    pub(crate) rng: SimRng,
    pub(crate) world: World,
    pub(crate) time_models: Vec<TimeModel>,
    pub(crate) routers: Vec<Router>,
    tasks: SlotMap<TaskId, TaskSlot>,
    trace: TraceBuffer,
    listeners: Vec<Box<dyn EventSink>>,
    next_request_seq: u64,
    resumptions: u64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("now", &self.scheduler.now())
            .field("config", &self.config)
            .field("resources", &self.world.resources.len())
            .field("products", &self.world.products.len())
            .field("tasks", &self.tasks.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Engine {
    pub(crate) fn new(
        config: SimulationConfig,
        world: World,
        time_models: Vec<TimeModel>,
        routers: Vec<Router>,
    ) -> Self {
        Self {
            rng: SimRng::new(config.seed),
            trace: TraceBuffer::new(config.trace_capacity),
            config,
            scheduler: Scheduler::new(),
            world,
            time_models,
            routers,
            tasks: SlotMap::with_key(),
            listeners: Vec::new(),
            next_request_seq: 0,
            resumptions: 0,
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn trace(&self) -> &TraceBuffer {
        &self.trace
    }

    /// Hash of every event recorded so far.
    pub fn trace_hash(&self) -> u64 {
        self.trace.hash()
    }

    /// Register a listener. It sees events from now on.
    pub fn add_listener(&mut self, listener: Box<dyn EventSink>) {
        self.listeners.push(listener);
    }

    /// Number of live tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    /// Dispatch every wakeup up to and including `limit`, then park the
    /// clock at `limit`. Work in flight at `limit` stays suspended and picks
    /// up again on the next call.
    pub fn run_until(&mut self, limit: SimTime) -> Result<RunSummary, SimError> {
        let started_at = self.now();
        let before = self.resumptions;
        tracing::info!(sim_time = %started_at, %limit, "run start");
        while let Some(task) = self.scheduler.next(Some(limit)) {
            self.resume(task)?;
        }
        let summary = self.summary(started_at, self.resumptions - before);
        tracing::info!(
            sim_time = %summary.ended_at,
            resumptions = summary.resumptions,
            finished = summary.products_finished,
            failed = summary.products_failed,
            "run end"
        );
        Ok(summary)
    }

    /// Resume a single task. Returns `false` once nothing is scheduled.
    pub fn step(&mut self) -> Result<bool, SimError> {
        match self.scheduler.next(None) {
            Some(task) => {
                self.resume(task)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn summary(&self, started_at: SimTime, resumptions: u64) -> RunSummary {
        let mut summary = RunSummary {
            started_at,
            ended_at: self.now(),
            resumptions,
            ..RunSummary::default()
        };
        for product in self.world.products.values() {
            summary.products_created += 1;
            match product.status {
                ProductStatus::InProgress => {}
                ProductStatus::Finished { .. } => summary.products_finished += 1,
                ProductStatus::Failed { .. } => summary.products_failed += 1,
            }
        }
        summary
    }

    fn resume(&mut self, id: TaskId) -> Result<(), SimError> {
        let Some(slot) = self.tasks.get_mut(id) else {
            return Ok(());
        };
        let mut task = slot.task.take().ok_or(ProtocolViolation::Reentrant(id))?;
        self.resumptions += 1;

        let suspend = match &mut task {
            Task::ControlLoop { resource } => self.step_control_loop(*resource)?,
            Task::Production(job) => self.step_production(job)?,
            Task::Transport(job) => self.step_transport(job)?,
            Task::Occupation { state } => self.step_occupation(id, *state)?,
            Task::Breakdown { state, phase } => self.step_breakdown(id, *state, phase)?,
            Task::Source(source) => self.step_source(source)?,
            Task::Product(flow) => self.step_product(flow)?,
        };

        match suspend {
            Suspend::Done => {
                if let Some(slot) = self.tasks.remove(id) {
                    self.scheduler.trigger(slot.done);
                }
                return Ok(());
            }
            Suspend::After(delay) => {
                self.scheduler.resume_after(id, delay);
            }
            Suspend::Any(signals) => self.scheduler.wait_any(id, &signals),
            Suspend::Parked => {}
        }
        if let Some(slot) = self.tasks.get_mut(id) {
            slot.task = Some(task);
        }
        Ok(())
    }

    /// Add a task and schedule its first step at the current instant.
    pub(crate) fn spawn(&mut self, task: Task) -> TaskId {
        let done = self.scheduler.new_signal();
        let id = self.tasks.insert(TaskSlot {
            task: Some(task),
            done,
        });
        self.scheduler.resume_now(id);
        id
    }

    /// The signal fired when `task` finishes.
    pub(crate) fn task_done(&self, task: TaskId) -> Result<SignalId, ProtocolViolation> {
        self.tasks
            .get(task)
            .map(|slot| slot.done)
            .ok_or(ProtocolViolation::DanglingHandle { kind: "task" })
    }

    // -----------------------------------------------------------------------
    // Shared helpers for task steps
    // -----------------------------------------------------------------------

    /// Draw a duration from a time model. Models are validated at build.
    pub(crate) fn sample(&mut self, model: TimeModelId, distance: Fixed64) -> SimTime {
        match self.time_models.get_mut(model.0 as usize) {
            Some(m) => m.sample(&mut self.rng, distance),
            None => SimTime::ZERO,
        }
    }

    pub(crate) fn expected(&self, model: TimeModelId, distance: Fixed64) -> SimTime {
        self.time_models
            .get(model.0 as usize)
            .map(|m| m.expected(distance))
            .unwrap_or(SimTime::ZERO)
    }

    /// Distance between two locations as `model` measures it.
    pub(crate) fn distance(&self, model: TimeModelId, from: LocationId, to: LocationId) -> Fixed64 {
        let (a, b) = (self.world.position(from), self.world.position(to));
        match self.time_models.get(model.0 as usize) {
            Some(m) => m.distance(&a, &b),
            None => a.manhattan(&b),
        }
    }

    /// Record an event and forward it to every listener.
    pub(crate) fn emit(&mut self, event: SimEvent) {
        for listener in &mut self.listeners {
            dispatch(listener.as_mut(), &event);
        }
        self.trace.push(event);
    }

    /// Trigger the signals of waiters a queue operation completed.
    pub(crate) fn flush_queue(&mut self, queue: QueueId) {
        let ready = match self.world.queues.get_mut(queue) {
            Some(q) => q.take_ready(),
            None => return,
        };
        for signal in ready {
            self.scheduler.trigger(signal);
        }
    }

    /// Hand a released capacity slot to the next waiter, if any.
    pub(crate) fn release_slot(&mut self, resource: ResourceId) -> Result<(), SimError> {
        if let Some(next) = self.world.resource_mut(resource)?.release_slot()? {
            self.scheduler.trigger(next);
        }
        Ok(())
    }

    pub(crate) fn next_request_seq(&mut self) -> u64 {
        let seq = self.next_request_seq;
        self.next_request_seq += 1;
        seq
    }

    /// Done signals of the occupations running on `states`, for waiting on a
    /// state to come free.
    pub(crate) fn busy_signals(&self, states: &[StateId]) -> Vec<SignalId> {
        states
            .iter()
            .filter_map(|s| self.world.states.get(*s))
            .filter_map(|s| s.task)
            .filter_map(|t| self.tasks.get(t).map(|slot| slot.done))
            .collect()
    }
}
