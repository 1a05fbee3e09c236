//! Dispatched jobs: one task per request a controller starts.
//!
//! A **production job** takes the head request, sets the resource up for
//! the process, acquires a capacity slot, pulls the product out of an input
//! queue, runs a free production state, releases the slot, and puts the
//! product on an output queue (waiting while every output queue is full).
//!
//! A **transport job** additionally drives the vehicle: empty repositioning
//! legs to the pickup location if it is elsewhere, pickup (waiting for the
//! product if it is still being deposited), loaded legs along the planned
//! path, and drop-off into the slot reserved during routing.
//!
//! Both finish by triggering the request's done signal.

use std::collections::VecDeque;

use crate::engine::{Engine, ProtocolViolation, SimError, Suspend};
use crate::event::{ProductActivity, SimEvent};
use crate::fixed::Fixed64;
use crate::id::{LocationId, ProcessId, ProductId, QueueId, ResourceId, SignalId};
use crate::request::{Request, RequestKind};
use crate::resource::SlotGrant;
use crate::state::StateKind;

// ---------------------------------------------------------------------------
// Production job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProductionPhase {
    Start,
    Setup,
    Slot,
    Retrieve,
    Occupy,
    Running,
    Deposit,
    Finish,
}

#[derive(Debug)]
pub(crate) struct ProductionJob {
    resource: ResourceId,
    phase: ProductionPhase,
    request: Option<Request>,
}

impl ProductionJob {
    pub(crate) fn new(resource: ResourceId) -> Self {
        Self {
            resource,
            phase: ProductionPhase::Start,
            request: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportPhase {
    Start,
    Setup,
    Slot,
    Reposition,
    Empty,
    Pickup,
    Loaded,
    Dropoff,
    Unload,
    Finish,
}

#[derive(Debug)]
pub(crate) struct TransportJob {
    resource: ResourceId,
    phase: TransportPhase,
    request: Option<Request>,
    /// Legs still to drive in the current stretch.
    legs: VecDeque<(LocationId, LocationId)>,
    /// Leg being driven right now.
    leg: Option<(LocationId, LocationId)>,
    /// Blocked pickup: queue and the get's signal.
    pickup: Option<(QueueId, SignalId)>,
}

impl TransportJob {
    pub(crate) fn new(resource: ResourceId) -> Self {
        Self {
            resource,
            phase: TransportPhase::Start,
            request: None,
            legs: VecDeque::new(),
            leg: None,
            pickup: None,
        }
    }
}

/// Consecutive pairs of a path.
fn legs_of(path: &[LocationId]) -> VecDeque<(LocationId, LocationId)> {
    path.windows(2).map(|w| (w[0], w[1])).collect()
}

fn started(request: &Option<Request>) -> Result<&Request, ProtocolViolation> {
    request
        .as_ref()
        .ok_or(ProtocolViolation::DanglingHandle { kind: "request" })
}

// ---------------------------------------------------------------------------
// Engine integration
// ---------------------------------------------------------------------------

impl Engine {
    pub(crate) fn step_production(&mut self, job: &mut ProductionJob) -> Result<Suspend, SimError> {
        let resource = job.resource;
        loop {
            let now = self.now();
            match job.phase {
                ProductionPhase::Start => {
                    let request = self.world.controller_mut(resource)?.take_next()?;
                    tracing::debug!(
                        sim_time = %now,
                        ?resource,
                        product = ?request.product,
                        seq = request.seq,
                        "production job start"
                    );
                    job.request = Some(request);
                    job.phase = ProductionPhase::Setup;
                }
                ProductionPhase::Setup => {
                    let process = started(&job.request)?.process;
                    if let Some(wait) = self.setup_for(resource, process)? {
                        return Ok(Suspend::Any(vec![wait]));
                    }
                    job.phase = ProductionPhase::Slot;
                }
                ProductionPhase::Slot => {
                    job.phase = ProductionPhase::Retrieve;
                    if let Some(wait) = self.acquire_slot(resource)? {
                        return Ok(Suspend::Any(vec![wait]));
                    }
                }
                ProductionPhase::Retrieve => {
                    let product = started(&job.request)?.product;
                    self.retrieve_input(resource, product)?;
                    job.phase = ProductionPhase::Occupy;
                }
                ProductionPhase::Occupy => {
                    let (process, product) = {
                        let request = started(&job.request)?;
                        (request.process, request.product)
                    };
                    let r = self.world.resource(resource)?;
                    let Some(state) = r.free_state(process, &self.world.states) else {
                        return Ok(Suspend::Any(self.busy_signals(r.states_for(process))));
                    };
                    let done = self.occupy(state, Some(product), None, Fixed64::ZERO)?;
                    self.emit(SimEvent::Product {
                        location: LocationId::Resource(resource),
                        product,
                        activity: ProductActivity::StartProcess,
                        time: now,
                    });
                    job.phase = ProductionPhase::Running;
                    return Ok(Suspend::Any(vec![done]));
                }
                ProductionPhase::Running => {
                    let product = started(&job.request)?.product;
                    self.emit(SimEvent::Product {
                        location: LocationId::Resource(resource),
                        product,
                        activity: ProductActivity::EndProcess,
                        time: now,
                    });
                    self.release_slot(resource)?;
                    job.phase = ProductionPhase::Deposit;
                }
                ProductionPhase::Deposit => {
                    let product = started(&job.request)?.product;
                    job.phase = ProductionPhase::Finish;
                    if let Some(wait) = self.deposit_output(resource, product)? {
                        return Ok(Suspend::Any(vec![wait]));
                    }
                }
                ProductionPhase::Finish => {
                    let request = job
                        .request
                        .take()
                        .ok_or(ProtocolViolation::DanglingHandle { kind: "request" })?;
                    self.scheduler.trigger(request.done);
                    tracing::debug!(sim_time = %now, ?resource, product = ?request.product, "production job done");
                    return Ok(Suspend::Done);
                }
            }
        }
    }

    pub(crate) fn step_transport(&mut self, job: &mut TransportJob) -> Result<Suspend, SimError> {
        let resource = job.resource;
        loop {
            let now = self.now();
            match job.phase {
                TransportPhase::Start => {
                    let request = self.world.controller_mut(resource)?.take_next()?;
                    if !request.is_transport() {
                        return Err(ProtocolViolation::UnsupportedProcess {
                            resource,
                            process: request.process,
                        }
                        .into());
                    }
                    tracing::debug!(
                        sim_time = %now,
                        ?resource,
                        product = ?request.product,
                        seq = request.seq,
                        "transport job start"
                    );
                    job.request = Some(request);
                    job.phase = TransportPhase::Setup;
                }
                TransportPhase::Setup => {
                    let process = started(&job.request)?.process;
                    if let Some(wait) = self.setup_for(resource, process)? {
                        return Ok(Suspend::Any(vec![wait]));
                    }
                    job.phase = TransportPhase::Slot;
                }
                TransportPhase::Slot => {
                    job.phase = TransportPhase::Reposition;
                    if let Some(wait) = self.acquire_slot(resource)? {
                        return Ok(Suspend::Any(vec![wait]));
                    }
                }
                TransportPhase::Reposition => {
                    let request = started(&job.request)?;
                    let process = request.process;
                    let RequestKind::Transport { origin, .. } = request.kind else {
                        return Err(ProtocolViolation::DanglingHandle { kind: "transport request" }.into());
                    };
                    let location = self.world.resource(resource)?.location;
                    if location != origin {
                        let path = self.reposition_path(resource, process, location, origin)?;
                        job.legs = legs_of(&path);
                        tracing::debug!(sim_time = %now, ?resource, legs = job.legs.len(), "reposition");
                    }
                    job.phase = TransportPhase::Empty;
                }
                TransportPhase::Empty => {
                    if let Some(wait) = self.drive(job, None)? {
                        return Ok(wait);
                    }
                    job.phase = TransportPhase::Pickup;
                }
                TransportPhase::Pickup => {
                    let request = started(&job.request)?;
                    let product = request.product;
                    let (origin, path) = match &request.kind {
                        RequestKind::Transport { origin, path, .. } => (*origin, path.clone()),
                        RequestKind::Production => (LocationId::Resource(resource), Vec::new()),
                    };
                    if let Some(wait) = self.pick_up(job, resource, product)? {
                        return Ok(wait);
                    }
                    self.world.product_mut(product)?.queue = None;
                    self.emit(SimEvent::Product {
                        location: origin,
                        product,
                        activity: ProductActivity::Loaded,
                        time: now,
                    });
                    job.legs = legs_of(&path);
                    job.phase = TransportPhase::Loaded;
                }
                TransportPhase::Loaded => {
                    let product = started(&job.request)?.product;
                    if let Some(wait) = self.drive(job, Some(product))? {
                        return Ok(wait);
                    }
                    job.phase = TransportPhase::Dropoff;
                }
                TransportPhase::Dropoff => {
                    let request = started(&job.request)?;
                    let product = request.product;
                    let (target, reserved) = match request.kind {
                        RequestKind::Transport {
                            target,
                            reserved_queue,
                            ..
                        } => (target, reserved_queue),
                        RequestKind::Production => (LocationId::Resource(resource), None),
                    };
                    job.phase = TransportPhase::Unload;
                    if let Some(wait) = self.drop_off(product, target, reserved)? {
                        return Ok(Suspend::Any(vec![wait]));
                    }
                }
                TransportPhase::Unload => {
                    let request = started(&job.request)?;
                    let product = request.product;
                    let target = match request.kind {
                        RequestKind::Transport { target, .. } => target,
                        RequestKind::Production => LocationId::Resource(resource),
                    };
                    self.world.product_mut(product)?.location = target;
                    self.emit(SimEvent::Product {
                        location: target,
                        product,
                        activity: ProductActivity::Unloaded,
                        time: now,
                    });
                    self.release_slot(resource)?;
                    job.phase = TransportPhase::Finish;
                }
                TransportPhase::Finish => {
                    let request = job
                        .request
                        .take()
                        .ok_or(ProtocolViolation::DanglingHandle { kind: "request" })?;
                    self.scheduler.trigger(request.done);
                    tracing::debug!(sim_time = %now, ?resource, product = ?request.product, "transport job done");
                    return Ok(Suspend::Done);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Job steps shared by both kinds
    // -----------------------------------------------------------------------

    /// Bring the resource into the configuration `process` needs. Returns a
    /// signal to wait on while a setup runs; call again once it fires.
    ///
    /// A resource with no configuration yet, or with no setup state for the
    /// change, adopts the new configuration immediately.
    fn setup_for(&mut self, resource: ResourceId, process: ProcessId) -> Result<Option<SignalId>, SimError> {
        if let Some((target, signal)) = self.world.resource(resource)?.setup_running {
            if !self.scheduler.has_fired(signal) {
                return Ok(Some(signal));
            }
            let r = self.world.resource_mut(resource)?;
            r.setup_running = None;
            r.current_setup = Some(target);
        }

        let r = self.world.resource(resource)?;
        let current = match r.current_setup {
            Some(current) if current == process => return Ok(None),
            Some(current) => current,
            None => {
                self.world.resource_mut(resource)?.current_setup = Some(process);
                return Ok(None);
            }
        };
        let setup_state = r.setup_states.iter().copied().find(|s| {
            self.world.states.get(*s).is_some_and(|st| {
                st.kind
                    == StateKind::Setup {
                        origin: current,
                        target: process,
                    }
            })
        });
        let Some(state) = setup_state else {
            self.world.resource_mut(resource)?.current_setup = Some(process);
            return Ok(None);
        };

        let done = self.occupy(state, None, None, Fixed64::ZERO)?;
        self.world.resource_mut(resource)?.setup_running = Some((process, done));
        tracing::debug!(sim_time = %self.now(), ?resource, from = ?current, to = ?process, "setup");
        Ok(Some(done))
    }

    /// Take a capacity slot, or return the signal that hands one over.
    fn acquire_slot(&mut self, resource: ResourceId) -> Result<Option<SignalId>, SimError> {
        let scheduler = &mut self.scheduler;
        let grant = self
            .world
            .resource_mut(resource)?
            .acquire_slot(|| scheduler.new_signal());
        Ok(match grant {
            SlotGrant::Granted => None,
            SlotGrant::Queued(signal) => Some(signal),
        })
    }

    // -----------------------------------------------------------------------
    // Production steps
    // -----------------------------------------------------------------------

    /// Remove `product` from one of the resource's input queues.
    fn retrieve_input(&mut self, resource: ResourceId, product: ProductId) -> Result<(), SimError> {
        let queues = self.world.resource(resource)?.input_queues.clone();
        for queue in queues {
            if self.world.queue_mut(queue)?.get(|p| p == product).is_some() {
                self.flush_queue(queue);
                self.world.product_mut(product)?.queue = None;
                return Ok(());
            }
        }
        Err(ProtocolViolation::NoMatchingItem { product, resource }.into())
    }

    /// Put a finished product on the first output queue with room, or block
    /// on the first output queue.
    fn deposit_output(&mut self, resource: ResourceId, product: ProductId) -> Result<Option<SignalId>, SimError> {
        let queues = self.world.resource(resource)?.output_queues.clone();
        let first = *queues
            .first()
            .ok_or(ProtocolViolation::DanglingHandle { kind: "output queue" })?;
        let open = queues
            .iter()
            .copied()
            .find(|q| self.world.queues.get(*q).is_some_and(|q| !q.is_full()));

        let (queue, wait) = match open {
            Some(queue) => {
                self.world.queue_mut(queue)?.put(product)?;
                (queue, None)
            }
            None => {
                let signal = self.scheduler.new_signal();
                self.world.queue_mut(first)?.block_put(product, signal);
                tracing::debug!(sim_time = %self.now(), ?resource, ?product, "output blocked");
                (first, Some(signal))
            }
        };
        self.flush_queue(queue);
        let p = self.world.product_mut(product)?;
        p.location = LocationId::Resource(resource);
        p.queue = Some(queue);
        Ok(wait)
    }

    // -----------------------------------------------------------------------
    // Transport steps
    // -----------------------------------------------------------------------

    /// Empty path from the vehicle's current location to `origin`.
    fn reposition_path(
        &self,
        resource: ResourceId,
        process: ProcessId,
        location: LocationId,
        origin: LocationId,
    ) -> Result<Vec<LocationId>, SimError> {
        let Some(links) = self.world.process(process)?.links() else {
            return Ok(vec![location, origin]);
        };
        let world = &self.world;
        let position_of = |l: LocationId| world.position(l);
        // A vehicle parked off the network joins it at a linked location
        // with the same position.
        let start = if links.contains(location) {
            location
        } else {
            links
                .location_at(world.position(location), position_of)
                .unwrap_or(location)
        };
        let mut path = links
            .shortest_path(start, origin, position_of)
            .ok_or(SimError::PathNotFound {
                resource,
                from: location,
                to: origin,
            })?;
        if let Some(first) = path.first_mut() {
            *first = location;
        }
        Ok(path)
    }

    /// Drive the next queued leg. Returns `None` once every leg is done.
    fn drive(&mut self, job: &mut TransportJob, cargo: Option<ProductId>) -> Result<Option<Suspend>, SimError> {
        let resource = job.resource;
        if let Some((_, to)) = job.leg.take() {
            self.world.resource_mut(resource)?.location = to;
            if let Some(product) = cargo {
                self.world.product_mut(product)?.location = to;
            }
        }
        let Some((from, to)) = job.legs.front().copied() else {
            return Ok(None);
        };

        let process = started(&job.request)?.process;
        let r = self.world.resource(resource)?;
        let Some(state) = r.free_state(process, &self.world.states) else {
            return Ok(Some(Suspend::Any(self.busy_signals(r.states_for(process)))));
        };
        job.legs.pop_front();
        let model = self.world.state(state)?.time_model;
        let distance = self.distance(model, from, to);
        let done = self.occupy(state, cargo, Some((from, to)), distance)?;
        let origin = (from != LocationId::Resource(resource)).then_some(from);
        self.emit(SimEvent::Transport {
            origin,
            target: to,
            time: self.now(),
            empty: cargo.is_none(),
        });
        job.leg = Some((from, to));
        Ok(Some(Suspend::Any(vec![done])))
    }

    /// Take the product out of the queue it sits in. Waits if it has not
    /// arrived there yet.
    fn pick_up(
        &mut self,
        job: &mut TransportJob,
        resource: ResourceId,
        product: ProductId,
    ) -> Result<Option<Suspend>, SimError> {
        if let Some((queue, signal)) = job.pickup.take() {
            return match self.world.queue_mut(queue)?.take_delivery(signal) {
                Some(_) => Ok(None),
                None => Err(ProtocolViolation::NoMatchingItem { product, resource }.into()),
            };
        }

        let queue = self
            .world
            .product(product)?
            .queue
            .ok_or(ProtocolViolation::NoMatchingItem { product, resource })?;
        if self.world.queue_mut(queue)?.get(|p| p == product).is_some() {
            self.flush_queue(queue);
            return Ok(None);
        }
        let signal = self.scheduler.new_signal();
        self.world
            .queue_mut(queue)?
            .block_get(Box::new(move |p| p == product), signal);
        self.flush_queue(queue);
        job.pickup = Some((queue, signal));
        tracing::debug!(sim_time = %self.now(), ?resource, ?product, "waiting for pickup");
        Ok(Some(Suspend::Any(vec![signal])))
    }

    /// Put the product down at `target`: into the reserved slot if routing
    /// claimed one, otherwise into the first arrival queue with room.
    fn drop_off(
        &mut self,
        product: ProductId,
        target: LocationId,
        reserved: Option<QueueId>,
    ) -> Result<Option<SignalId>, SimError> {
        let (queue, wait) = match reserved {
            Some(queue) => {
                self.world.queue_mut(queue)?.put_reserved(product)?;
                (queue, None)
            }
            None => {
                let queues = self.world.arrival_queues(target).to_vec();
                let first = *queues
                    .first()
                    .ok_or(ProtocolViolation::DanglingHandle { kind: "arrival queue" })?;
                let open = queues
                    .iter()
                    .copied()
                    .find(|q| self.world.queues.get(*q).is_some_and(|q| !q.is_full()));
                match open {
                    Some(queue) => {
                        self.world.queue_mut(queue)?.put(product)?;
                        (queue, None)
                    }
                    None => {
                        let signal = self.scheduler.new_signal();
                        self.world.queue_mut(first)?.block_put(product, signal);
                        (first, Some(signal))
                    }
                }
            }
        };
        self.flush_queue(queue);
        self.world.product_mut(product)?.queue = Some(queue);
        Ok(wait)
    }
}
