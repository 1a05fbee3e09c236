//! Products and the places they enter and leave the system.
//!
//! A [`Source`] creates products of one type at sampled inter-arrival
//! times and puts them on its output queue. Every product then runs its own
//! lifecycle task ([`ProductFlow`]): for each required process it asks its
//! router for a destination, has a transport carry it there, and requests
//! the production. With no processes left it is routed to a [`Sink`] of its
//! type and finished there.
//!
//! The required processes form a [`ProcessModel`]: either a fixed list, or a
//! precedence graph where any step whose predecessors are done may go next.
//!
//! Backpressure (every capable destination full) makes the product wait
//! `retry_delay` and ask again. A topology with no answer fails only that
//! product: it is marked [`ProductStatus::Failed`], pulled from its queue,
//! and the run continues.

use crate::engine::{Engine, ProtocolViolation, SimError, Suspend, Task};
use crate::event::{ProductActivity, SimEvent};
use crate::fixed::{Fixed64, Position, SimTime};
use crate::id::{
    LocationId, NodeId, ProcessId, ProductId, ProductTypeId, QueueId, ResourceId, RouterId,
    SignalId, SinkId, SourceId, TimeModelId,
};
use crate::router::RoutingError;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// The processes a product type requires and the order constraints
/// between them. Steps are addressed by their declaration index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessModel {
    /// Steps run strictly in the listed order.
    List(Vec<ProcessId>),
    /// Each step with the indices of the steps that must finish before it.
    PrecedenceGraph(Vec<(ProcessId, Vec<usize>)>),
}

impl ProcessModel {
    pub fn len(&self) -> usize {
        match self {
            ProcessModel::List(steps) => steps.len(),
            ProcessModel::PrecedenceGraph(nodes) => nodes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn process(&self, step: usize) -> Option<ProcessId> {
        match self {
            ProcessModel::List(steps) => steps.get(step).copied(),
            ProcessModel::PrecedenceGraph(nodes) => nodes.get(step).map(|(p, _)| *p),
        }
    }

    /// Steps not yet done whose predecessors all are, in declaration order.
    /// `done` holds one flag per step.
    pub fn ready(&self, done: &[bool]) -> Vec<usize> {
        let open = |step: &usize| !done.get(*step).copied().unwrap_or(false);
        match self {
            ProcessModel::List(steps) => (0..steps.len()).find(|s| open(s)).into_iter().collect(),
            ProcessModel::PrecedenceGraph(nodes) => nodes
                .iter()
                .enumerate()
                .filter(|(step, (_, preds))| open(step) && preds.iter().all(|p| !open(p)))
                .map(|(step, _)| step)
                .collect(),
        }
    }

    /// Processes of the steps not yet done, in declaration order.
    pub fn outstanding(&self, done: &[bool]) -> Vec<ProcessId> {
        (0..self.len())
            .filter(|s| !done.get(*s).copied().unwrap_or(false))
            .filter_map(|s| self.process(s))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ProductType {
    pub id: ProductTypeId,
    pub name: String,
    pub process_model: ProcessModel,
    /// Transport process used between every two steps.
    pub transport_process: ProcessId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductStatus {
    InProgress,
    Finished { at: SimTime },
    Failed { at: SimTime, reason: RoutingError },
}

#[derive(Debug, Clone)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub product_type: ProductTypeId,
    pub source: Option<SourceId>,
    pub router: RouterId,
    pub created_at: SimTime,
    /// One flag per step of the type's process model.
    pub done: Vec<bool>,
    pub location: LocationId,
    /// Queue the product is stored in (or being put into), if any.
    pub queue: Option<QueueId>,
    pub status: ProductStatus,
}

#[derive(Debug)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub product_type: ProductTypeId,
    /// Inter-arrival times.
    pub time_model: TimeModelId,
    pub position: Position,
    pub output_queues: Vec<QueueId>,
    pub router: RouterId,
    pub created: u64,
}

#[derive(Debug)]
pub struct Sink {
    pub id: SinkId,
    pub name: String,
    pub product_type: ProductTypeId,
    pub position: Position,
    pub input_queues: Vec<QueueId>,
    pub finished: u64,
}

/// A waypoint of a transport link network.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub position: Position,
}

// ---------------------------------------------------------------------------
// Source loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourcePhase {
    Wait,
    Create,
    /// The new product is waiting for room on the output queue.
    Blocked { product: ProductId },
}

#[derive(Debug)]
pub(crate) struct SourceLoop {
    source: SourceId,
    phase: SourcePhase,
}

impl SourceLoop {
    pub(crate) fn new(source: SourceId) -> Self {
        Self {
            source,
            phase: SourcePhase::Wait,
        }
    }
}

// ---------------------------------------------------------------------------
// Product lifecycle
// ---------------------------------------------------------------------------

/// What happens once the product has been carried to its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arrival {
    Produce {
        resource: ResourceId,
        process: ProcessId,
        step: usize,
    },
    Finish {
        sink: SinkId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowPhase {
    Route,
    Transport {
        target: LocationId,
        reserved: QueueId,
        arrival: Arrival,
    },
    AwaitTransport {
        arrival: Arrival,
    },
    AwaitProduction {
        step: usize,
    },
}

#[derive(Debug)]
pub(crate) struct ProductFlow {
    product: ProductId,
    phase: FlowPhase,
}

impl ProductFlow {
    pub(crate) fn new(product: ProductId) -> Self {
        Self {
            product,
            phase: FlowPhase::Route,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine integration
// ---------------------------------------------------------------------------

impl Engine {
    pub(crate) fn step_source(&mut self, source_loop: &mut SourceLoop) -> Result<Suspend, SimError> {
        let source = source_loop.source;
        loop {
            match source_loop.phase {
                SourcePhase::Wait => {
                    let model = self.world.source(source)?.time_model;
                    let delay = self.sample(model, Fixed64::ZERO);
                    source_loop.phase = SourcePhase::Create;
                    return Ok(Suspend::After(delay));
                }
                SourcePhase::Create => {
                    let (product_type, router) = {
                        let s = self.world.source_mut(source)?;
                        s.created += 1;
                        (s.product_type, s.router)
                    };
                    let location = LocationId::Source(source);
                    let product = self.create_product(product_type, router, Some(source), location)?;
                    match self.store_at_source(source, product)? {
                        Some(signal) => {
                            source_loop.phase = SourcePhase::Blocked { product };
                            return Ok(Suspend::Any(vec![signal]));
                        }
                        None => {
                            self.spawn(Task::Product(ProductFlow::new(product)));
                            source_loop.phase = SourcePhase::Wait;
                        }
                    }
                }
                SourcePhase::Blocked { product } => {
                    self.spawn(Task::Product(ProductFlow::new(product)));
                    source_loop.phase = SourcePhase::Wait;
                }
            }
        }
    }

    fn create_product(
        &mut self,
        product_type: ProductTypeId,
        router: RouterId,
        source: Option<SourceId>,
        location: LocationId,
    ) -> Result<ProductId, SimError> {
        let now = self.now();
        let ty = self.world.product_type(product_type)?;
        let name = format!("{}_{}", ty.name, self.world.products.len());
        let done = vec![false; ty.process_model.len()];
        let product = self.world.products.insert_with_key(|id| Product {
            id,
            name,
            product_type,
            source,
            router,
            created_at: now,
            done,
            location,
            queue: None,
            status: ProductStatus::InProgress,
        });
        self.emit(SimEvent::Product {
            location,
            product,
            activity: ProductActivity::Created,
            time: now,
        });
        tracing::debug!(sim_time = %now, ?product, "product created");
        Ok(product)
    }

    /// Put a new product on the source's first output queue with room, or
    /// block on the first one.
    fn store_at_source(&mut self, source: SourceId, product: ProductId) -> Result<Option<SignalId>, SimError> {
        let queues = self.world.source(source)?.output_queues.clone();
        let first = *queues
            .first()
            .ok_or(ProtocolViolation::DanglingHandle { kind: "source queue" })?;
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
                (first, Some(signal))
            }
        };
        self.flush_queue(queue);
        self.world.product_mut(product)?.queue = Some(queue);
        Ok(wait)
    }

    /// Create a product directly in `queue` at `location`, outside any
    /// source. No lifecycle task is started; call [`Engine::release_product`]
    /// for that.
    pub fn insert_product(
        &mut self,
        product_type: ProductTypeId,
        location: LocationId,
        queue: Option<QueueId>,
    ) -> Result<ProductId, SimError> {
        let product = self.create_product(product_type, RouterId(0), None, location)?;
        if let Some(queue) = queue {
            self.world.queue_mut(queue)?.put(product)?;
            self.flush_queue(queue);
            self.world.product_mut(product)?.queue = Some(queue);
        }
        Ok(product)
    }

    /// Start the lifecycle of a product created with
    /// [`Engine::insert_product`], routing with `router`.
    pub fn release_product(&mut self, product: ProductId, router: RouterId) -> Result<(), SimError> {
        self.world.product_mut(product)?.router = router;
        self.spawn(Task::Product(ProductFlow::new(product)));
        Ok(())
    }

    pub(crate) fn step_product(&mut self, flow: &mut ProductFlow) -> Result<Suspend, SimError> {
        let product = flow.product;
        loop {
            let now = self.now();
            match flow.phase {
                FlowPhase::Route => {
                    let p = self.world.product(product)?;
                    let (router, product_type) = (p.router, p.product_type);
                    let model = &self.world.product_type(product_type)?.process_model;
                    let ready: Vec<(usize, ProcessId)> = model
                        .ready(&p.done)
                        .into_iter()
                        .filter_map(|step| model.process(step).map(|process| (step, process)))
                        .collect();
                    let routed = if ready.is_empty() {
                        self.route_sink(router, product_type).map(|dest| {
                            dest.map(|(sink, queue)| (LocationId::Sink(sink), queue, Arrival::Finish { sink }))
                        })
                    } else {
                        self.route_ready_step(router, &ready)
                    };
                    match routed {
                        Ok(Some((target, reserved, arrival))) => {
                            flow.phase = FlowPhase::Transport {
                                target,
                                reserved,
                                arrival,
                            };
                        }
                        Ok(None) => {
                            let delay = self.config.retry_delay;
                            tracing::debug!(sim_time = %now, ?product, %delay, "no free destination, retrying");
                            return Ok(Suspend::After(delay));
                        }
                        // A refused claim on a slot that passed the capacity
                        // filter is a broken queue, not a routing outcome.
                        Err(RoutingError::Reservation(err)) => return Err(err.into()),
                        Err(reason) => {
                            self.fail_product(product, reason, None)?;
                            return Ok(Suspend::Done);
                        }
                    }
                }
                FlowPhase::Transport {
                    target,
                    reserved,
                    arrival,
                } => {
                    let p = self.world.product(product)?;
                    let (router, origin) = (p.router, p.location);
                    let transport = self.world.product_type(p.product_type)?.transport_process;
                    let plan = match self.route_transport(router, transport, origin, target) {
                        Ok(plan) => plan,
                        Err(reason) => {
                            self.fail_product(product, reason, Some(reserved))?;
                            return Ok(Suspend::Done);
                        }
                    };
                    let done = self.request_transport(
                        plan.resource,
                        plan.process,
                        product,
                        origin,
                        target,
                        Some(reserved),
                    )?;
                    flow.phase = FlowPhase::AwaitTransport { arrival };
                    return Ok(Suspend::Any(vec![done]));
                }
                FlowPhase::AwaitTransport { arrival } => match arrival {
                    Arrival::Produce { resource, process, step } => {
                        let done = self.request_production(resource, process, product)?;
                        flow.phase = FlowPhase::AwaitProduction { step };
                        return Ok(Suspend::Any(vec![done]));
                    }
                    Arrival::Finish { sink } => {
                        self.finish_product(product, sink)?;
                        return Ok(Suspend::Done);
                    }
                },
                FlowPhase::AwaitProduction { step } => {
                    if let Some(flag) = self.world.product_mut(product)?.done.get_mut(step) {
                        *flag = true;
                    }
                    flow.phase = FlowPhase::Route;
                }
            }
        }
    }

    /// Route to the first ready step that has a free destination. An error
    /// on any step ends the search.
    fn route_ready_step(
        &mut self,
        router: RouterId,
        ready: &[(usize, ProcessId)],
    ) -> Result<Option<(LocationId, QueueId, Arrival)>, RoutingError> {
        for &(step, required) in ready {
            if let Some(d) = self.route_production(router, required)? {
                let arrival = Arrival::Produce {
                    resource: d.resource,
                    process: d.process,
                    step,
                };
                return Ok(Some((LocationId::Resource(d.resource), d.queue, arrival)));
            }
        }
        Ok(None)
    }

    fn finish_product(&mut self, product: ProductId, sink: SinkId) -> Result<(), SimError> {
        let now = self.now();
        self.take_out_of_queue(product)?;
        self.world.sink_mut(sink)?.finished += 1;
        let p = self.world.product_mut(product)?;
        p.status = ProductStatus::Finished { at: now };
        p.location = LocationId::Sink(sink);
        self.emit(SimEvent::Product {
            location: LocationId::Sink(sink),
            product,
            activity: ProductActivity::Finished,
            time: now,
        });
        tracing::debug!(sim_time = %now, ?product, ?sink, "product finished");
        Ok(())
    }

    /// Contain a routing failure to the product: mark it failed, pull it out
    /// of its queue, and give back a destination slot it had claimed.
    fn fail_product(
        &mut self,
        product: ProductId,
        reason: RoutingError,
        reserved: Option<QueueId>,
    ) -> Result<(), SimError> {
        let now = self.now();
        tracing::warn!(sim_time = %now, ?product, %reason, "routing failed");
        if let Some(queue) = reserved {
            self.world.queue_mut(queue)?.unreserve()?;
            self.flush_queue(queue);
        }
        self.take_out_of_queue(product)?;
        let p = self.world.product_mut(product)?;
        p.status = ProductStatus::Failed { at: now, reason };
        let location = p.location;
        self.emit(SimEvent::Product {
            location,
            product,
            activity: ProductActivity::RoutingFailed,
            time: now,
        });
        Ok(())
    }

    fn take_out_of_queue(&mut self, product: ProductId) -> Result<(), SimError> {
        if let Some(queue) = self.world.product_mut(product)?.queue.take() {
            self.world.queue_mut(queue)?.get(|p| p == product);
            self.flush_queue(queue);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    // -----------------------------------------------------------------------
    // Test 1: a source creates products at its inter-arrival time
    // -----------------------------------------------------------------------
    #[test]
    fn source_creates_on_schedule() {
        let mut engine = simple_line(4.0, 1.0, 0);
        engine.run_until(t(10.0)).unwrap();
        let source = engine.world.source_id("src").unwrap();
        // Arrivals at t = 4 and t = 8.
        assert_eq!(engine.world.source(source).unwrap().created, 2);
        let created: Vec<SimTime> = engine
            .trace()
            .iter()
            .filter_map(|e| match e {
                SimEvent::Product {
                    activity: ProductActivity::Created,
                    time,
                    ..
                } => Some(*time),
                _ => None,
            })
            .collect();
        assert_eq!(created, vec![t(4.0), t(8.0)]);
    }

    // -----------------------------------------------------------------------
    // Test 2: products flow from source through the machine to the sink
    // -----------------------------------------------------------------------
    #[test]
    fn products_reach_the_sink() {
        let mut engine = simple_line(5.0, 2.0, 0);
        let summary = engine.run_until(t(100.0)).unwrap();
        assert!(summary.products_finished >= 15);
        assert_eq!(summary.products_failed, 0);
        let sink = engine.world.sink_id("sink").unwrap();
        assert_eq!(
            engine.world.sink(sink).unwrap().finished,
            summary.products_finished
        );
        let finished = engine
            .world
            .products
            .values()
            .filter(|p| matches!(p.status, ProductStatus::Finished { .. }))
            .count() as u64;
        assert_eq!(finished, summary.products_finished);
    }

    // -----------------------------------------------------------------------
    // Test 3: a product nothing can process fails alone
    // -----------------------------------------------------------------------
    #[test]
    fn unroutable_product_fails_without_aborting() {
        let mut engine = simple_line(5.0, 1.0, 0);
        let orphan = engine.world.product_type_id("orphan").unwrap();
        let src_queue = engine.world.queue_id("src_out").unwrap();
        let src = LocationId::Source(engine.world.source_id("src").unwrap());
        let product = engine.insert_product(orphan, src, Some(src_queue)).unwrap();
        engine.release_product(product, RouterId(0)).unwrap();

        let summary = engine.run_until(t(30.0)).unwrap();
        assert_eq!(summary.products_failed, 1);
        assert!(summary.products_finished > 0);
        let p = engine.world.product(product).unwrap();
        assert!(matches!(
            p.status,
            ProductStatus::Failed {
                reason: RoutingError::NoCapableResource { .. },
                ..
            }
        ));
        assert_eq!(p.queue, None);
        assert!(!engine.world.queue(src_queue).unwrap().contains(product));
    }

    // -----------------------------------------------------------------------
    // Test 4: ready steps follow the process model
    // -----------------------------------------------------------------------
    #[test]
    fn list_offers_one_step_at_a_time() {
        let model = ProcessModel::List(vec![ProcessId(3), ProcessId(1)]);
        assert_eq!(model.ready(&[false, false]), vec![0]);
        assert_eq!(model.ready(&[true, false]), vec![1]);
        assert!(model.ready(&[true, true]).is_empty());
        assert_eq!(model.outstanding(&[true, false]), vec![ProcessId(1)]);
    }

    #[test]
    fn diamond_opens_both_branches_then_the_join() {
        // 0 -> {1, 2} -> 3
        let model = ProcessModel::PrecedenceGraph(vec![
            (ProcessId(0), vec![]),
            (ProcessId(1), vec![0]),
            (ProcessId(2), vec![0]),
            (ProcessId(3), vec![1, 2]),
        ]);
        assert_eq!(model.ready(&[false; 4]), vec![0]);
        assert_eq!(model.ready(&[true, false, false, false]), vec![1, 2]);
        assert_eq!(model.ready(&[true, true, false, false]), vec![2]);
        assert_eq!(model.ready(&[true, true, true, false]), vec![3]);
        assert!(model.ready(&[true; 4]).is_empty());
        assert_eq!(model.process(3), Some(ProcessId(3)));
        assert_eq!(model.process(4), None);
    }
}
