//! Per-resource dispatch: controllers and control policies.
//!
//! Every resource has exactly one [`Controller`]. Callers hand it work with
//! [`Engine::request_production`] or [`Engine::request_transport`]; its
//! control loop turns pending requests into running jobs.
//!
//! # Control loop
//!
//! The loop waits on `any(running job done signals + requested)`. On every
//! wake:
//!
//! 1. If `requested` has been triggered, replace it with a fresh signal.
//! 2. Drop finished jobs from the running set.
//! 3. If the resource is full, nothing is pending, or every pending request
//!    already has a job on its way, go back to waiting.
//! 4. Otherwise order the pending list with the control policy, count one
//!    more request as reserved and spawn a job for it. If the resource still
//!    has spare capacity, trigger `requested` again so the next wake serves
//!    the next request without an outside caller.
//!
//! The job removes the head of the list when it starts. `reserved` counts
//! requests that have a job spawned but not yet started, so a request is
//! never handed to two jobs.

use serde::{Deserialize, Serialize};

use crate::engine::{Engine, ProtocolViolation, SimError, Suspend, Task};
use crate::fixed::{Fixed64, SimTime};
use crate::id::{LocationId, ProcessId, ProductId, QueueId, ResourceId, SignalId, TaskId};
use crate::job::{ProductionJob, TransportJob};
use crate::request::{Request, RequestKind};
use crate::resource::ResourceKind;

// ---------------------------------------------------------------------------
// Control policies
// ---------------------------------------------------------------------------

/// Orders a controller's pending requests. The head of the list is served
/// next.
pub trait ControlPolicy: std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn order(&self, requests: &mut [Request]);
}

/// First come, first served.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fifo;

impl ControlPolicy for Fifo {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn order(&self, _requests: &mut [Request]) {}
}

/// Newest request first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lifo;

impl ControlPolicy for Lifo {
    fn name(&self) -> &'static str {
        "lifo"
    }

    fn order(&self, requests: &mut [Request]) {
        requests.sort_by(|a, b| b.seq.cmp(&a.seq));
    }
}

/// Shortest expected process duration first. Ties keep arrival order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestProcessingTime;

impl ControlPolicy for ShortestProcessingTime {
    fn name(&self) -> &'static str {
        "spt"
    }

    fn order(&self, requests: &mut [Request]) {
        requests.sort_by_key(|r| (r.expected_duration, r.seq));
    }
}

/// Shortest expected loaded trip first. Ties keep arrival order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestTransportTime;

impl ControlPolicy for ShortestTransportTime {
    fn name(&self) -> &'static str {
        "spt_transport"
    }

    fn order(&self, requests: &mut [Request]) {
        requests.sort_by_key(|r| (r.expected_trip(), r.seq));
    }
}

/// The built-in policies, by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPolicyKind {
    #[default]
    Fifo,
    Lifo,
    #[serde(alias = "spt")]
    ShortestProcessingTime,
    #[serde(alias = "spt_transport")]
    ShortestTransportTime,
}

impl ControlPolicyKind {
    pub fn build(self) -> Box<dyn ControlPolicy> {
        match self {
            ControlPolicyKind::Fifo => Box::new(Fifo),
            ControlPolicyKind::Lifo => Box::new(Lifo),
            ControlPolicyKind::ShortestProcessingTime => Box::new(ShortestProcessingTime),
            ControlPolicyKind::ShortestTransportTime => Box::new(ShortestTransportTime),
        }
    }

    /// Transport-time ordering only makes sense for transport controllers.
    pub fn supports(self, kind: ControllerKind) -> bool {
        !matches!(
            (self, kind),
            (ControlPolicyKind::ShortestTransportTime, ControllerKind::Production)
        )
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Which job a controller spawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    Production,
    Transport,
}

impl From<ResourceKind> for ControllerKind {
    fn from(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Production => ControllerKind::Production,
            ResourceKind::Transport => ControllerKind::Transport,
        }
    }
}

/// Dispatch authority for one resource.
#[derive(Debug)]
pub struct Controller {
    pub resource: ResourceId,
    pub kind: ControllerKind,
    pub(crate) policy: Box<dyn ControlPolicy>,
    pub(crate) requests: Vec<Request>,
    /// Requests with a job spawned that has not removed them yet.
    pub(crate) reserved: usize,
    pub(crate) running: Vec<(TaskId, SignalId)>,
    pub(crate) requested: SignalId,
}

impl Controller {
    pub fn new(
        resource: ResourceId,
        kind: ControllerKind,
        policy: Box<dyn ControlPolicy>,
        requested: SignalId,
    ) -> Self {
        Self {
            resource,
            kind,
            policy,
            requests: Vec::new(),
            reserved: 0,
            running: Vec::new(),
            requested,
        }
    }

    pub fn policy(&self) -> &dyn ControlPolicy {
        self.policy.as_ref()
    }

    pub fn pending(&self) -> &[Request] {
        &self.requests
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    fn wait_set(&self) -> Vec<SignalId> {
        self.running
            .iter()
            .map(|(_, done)| *done)
            .chain(std::iter::once(self.requested))
            .collect()
    }

    /// Remove the head request for a job that is starting.
    pub(crate) fn take_next(&mut self) -> Result<Request, ProtocolViolation> {
        if self.requests.is_empty() || self.reserved == 0 {
            return Err(ProtocolViolation::DoubleDispatch {
                resource: self.resource,
            });
        }
        self.reserved -= 1;
        Ok(self.requests.remove(0))
    }
}

// ---------------------------------------------------------------------------
// Engine integration
// ---------------------------------------------------------------------------

impl Engine {
    pub(crate) fn step_control_loop(&mut self, resource: ResourceId) -> Result<Suspend, SimError> {
        let now = self.now();
        let full = self.world.resource(resource)?.is_full();
        let controller = self.world.controller_mut(resource)?;

        if self.scheduler.is_triggered(controller.requested) {
            controller.requested = self.scheduler.new_signal();
        }
        controller
            .running
            .retain(|(_, done)| !self.scheduler.is_triggered(*done));

        let pending = controller.requests.len();
        if full || pending == 0 || controller.reserved >= pending {
            tracing::debug!(
                sim_time = %now,
                ?resource,
                pending,
                reserved = controller.reserved,
                full,
                "controller idle"
            );
            return Ok(Suspend::Any(controller.wait_set()));
        }

        controller.policy.order(&mut controller.requests);
        controller.reserved += 1;
        let job = match controller.kind {
            ControllerKind::Production => Task::Production(ProductionJob::new(resource)),
            ControllerKind::Transport => Task::Transport(TransportJob::new(resource)),
        };
        tracing::debug!(sim_time = %now, ?resource, pending, "controller dispatch");

        let task = self.spawn(job);
        let done = self.task_done(task)?;
        let full = self.world.resource(resource)?.is_full();
        let controller = self.world.controller_mut(resource)?;
        controller.running.push((task, done));
        if !full {
            self.scheduler.trigger(controller.requested);
        }
        Ok(Suspend::Any(controller.wait_set()))
    }

    /// Queue a production request on `resource`. The returned signal fires
    /// once the product has been processed and put on an output queue.
    pub fn request_production(
        &mut self,
        resource: ResourceId,
        process: ProcessId,
        product: ProductId,
    ) -> Result<SignalId, SimError> {
        let r = self.world.resource(resource)?;
        if r.kind != ResourceKind::Production || !r.offers(process) {
            return Err(ProtocolViolation::UnsupportedProcess { resource, process }.into());
        }
        let model = self.world.process(process)?.time_model;
        let expected = self.expected(model, Fixed64::ZERO);
        self.submit(resource, process, product, expected, RequestKind::Production)
    }

    /// Queue a transport request moving `product` from `origin` to `target`.
    /// `reserved_queue` is the slot claimed at the target, if any; the
    /// product is dropped into it on arrival.
    pub fn request_transport(
        &mut self,
        resource: ResourceId,
        process: ProcessId,
        product: ProductId,
        origin: LocationId,
        target: LocationId,
        reserved_queue: Option<QueueId>,
    ) -> Result<SignalId, SimError> {
        let r = self.world.resource(resource)?;
        if r.kind != ResourceKind::Transport || !r.offers(process) {
            return Err(ProtocolViolation::UnsupportedProcess { resource, process }.into());
        }
        let path = self.plan_path(process, origin, target)?;
        let expected_trip = self.expected_trip(process, &path);
        let model = self.world.process(process)?.time_model;
        let expected = self.expected(model, Fixed64::ZERO);
        self.submit(
            resource,
            process,
            product,
            expected,
            RequestKind::Transport {
                origin,
                target,
                path,
                reserved_queue,
                expected_trip,
            },
        )
    }

    fn submit(
        &mut self,
        resource: ResourceId,
        process: ProcessId,
        product: ProductId,
        expected_duration: SimTime,
        kind: RequestKind,
    ) -> Result<SignalId, SimError> {
        let seq = self.next_request_seq();
        let done = self.scheduler.new_signal();
        let controller = self.world.controller_mut(resource)?;
        controller.requests.push(Request {
            seq,
            resource,
            process,
            product,
            expected_duration,
            done,
            kind,
        });
        let requested = controller.requested;
        self.scheduler.trigger(requested);
        tracing::debug!(sim_time = %self.now(), ?resource, ?product, seq, "request");
        Ok(done)
    }
}
