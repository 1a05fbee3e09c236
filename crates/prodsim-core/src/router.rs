//! Destination selection.
//!
//! A router answers three questions for a product: which production
//! resource runs its next process, which sink takes it at the end, and which
//! transport resource carries it between the two. Candidates are matched by
//! process id or capability; production and sink candidates whose input
//! queues are all full are dropped before the heuristic picks one. The
//! chosen input queue is reserved at once so no later decision can claim
//! the same slot.
//!
//! # Failure at the interface
//!
//! - `Ok(None)`: capable candidates exist but every one is full right now.
//!   The caller backs off and asks again.
//! - `Err(RoutingError)`: the topology has no answer at all (no capable
//!   resource, no sink, no path).

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::fixed::SimTime;
use crate::id::{LocationId, ProcessId, ProductTypeId, QueueId, ResourceId, RouterId, SinkId};
use crate::process::ProcessDef;
use crate::queue::QueueError;
use crate::resource::ResourceKind;
use crate::rng::SimRng;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("no production resource can run process {process:?}")]
    NoCapableResource { process: ProcessId },
    #[error("no sink accepts product type {product_type:?}")]
    NoSink { product_type: ProductTypeId },
    #[error("no transport resource offers process {process:?}")]
    NoTransport { process: ProcessId },
    #[error("no transport path from {from:?} to {to:?}")]
    NoPath { from: LocationId, to: LocationId },
    #[error("unknown process {0:?}")]
    UnknownProcess(ProcessId),
    #[error("unknown router {0:?}")]
    UnknownRouter(RouterId),
    /// The heuristic answered with an index outside the candidate list, or
    /// declined a transport choice.
    #[error("router {router:?} made an invalid selection {index:?}")]
    InvalidSelection { router: RouterId, index: Option<usize> },
    /// A destination passed the capacity filter but refused the claim.
    #[error(transparent)]
    Reservation(#[from] QueueError),
}

// ---------------------------------------------------------------------------
// Heuristics
// ---------------------------------------------------------------------------

/// An eligible destination as a heuristic sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub location: LocationId,
    /// Items stored plus slots already claimed (for transports: requests
    /// pending plus jobs running).
    pub queue_len: usize,
}

/// Picks one candidate. Called only with a non-empty slice. Returning
/// `None` declines the choice; the product backs off as if every candidate
/// were full.
pub trait RoutingHeuristic: std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn select(&self, candidates: &[Candidate], rng: &mut SimRng) -> Option<usize>;
}

/// The first candidate in catalogue order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstCandidate;

impl RoutingHeuristic for FirstCandidate {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn select(&self, candidates: &[Candidate], _rng: &mut SimRng) -> Option<usize> {
        (!candidates.is_empty()).then_some(0)
    }
}

/// Uniform choice with the simulation's seeded RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCandidate;

impl RoutingHeuristic for RandomCandidate {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&self, candidates: &[Candidate], rng: &mut SimRng) -> Option<usize> {
        (!candidates.is_empty()).then(|| rng.index(candidates.len()))
    }
}

/// Least loaded candidate; ties are broken at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestQueue;

impl RoutingHeuristic for ShortestQueue {
    fn name(&self) -> &'static str {
        "shortest_queue"
    }

    fn select(&self, candidates: &[Candidate], rng: &mut SimRng) -> Option<usize> {
        let shortest = candidates.iter().map(|c| c.queue_len).min()?;
        let ties: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.queue_len == shortest)
            .map(|(i, _)| i)
            .collect();
        match ties.as_slice() {
            [only] => Some(*only),
            _ => Some(ties[rng.index(ties.len())]),
        }
    }
}

/// The built-in heuristics, by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingHeuristicKind {
    Fifo,
    #[default]
    Random,
    ShortestQueue,
}

impl RoutingHeuristicKind {
    pub fn build(self) -> Box<dyn RoutingHeuristic> {
        match self {
            RoutingHeuristicKind::Fifo => Box::new(FirstCandidate),
            RoutingHeuristicKind::Random => Box::new(RandomCandidate),
            RoutingHeuristicKind::ShortestQueue => Box::new(ShortestQueue),
        }
    }
}

/// A heuristic registered with the engine. Sources (and through them their
/// products) name the router they use.
#[derive(Debug)]
pub struct Router {
    pub id: RouterId,
    heuristic: Box<dyn RoutingHeuristic>,
}

impl Router {
    pub fn new(id: RouterId, heuristic: Box<dyn RoutingHeuristic>) -> Self {
        Self { id, heuristic }
    }

    pub fn heuristic(&self) -> &dyn RoutingHeuristic {
        self.heuristic.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Routing results
// ---------------------------------------------------------------------------

/// A production destination with a reserved input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub resource: ResourceId,
    /// The resource's own process that satisfies the requirement.
    pub process: ProcessId,
    /// Input queue holding the reservation.
    pub queue: QueueId,
}

/// The transport resource chosen for a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportPlan {
    pub resource: ResourceId,
    pub process: ProcessId,
}

// ---------------------------------------------------------------------------
// Engine integration
// ---------------------------------------------------------------------------

impl Engine {
    /// Register a heuristic and return the id products can route with.
    pub fn add_router(&mut self, heuristic: Box<dyn RoutingHeuristic>) -> RouterId {
        let id = RouterId(self.routers.len() as u32);
        self.routers.push(Router::new(id, heuristic));
        id
    }

    /// Ask the router's heuristic to pick from `eligible`, described to it
    /// by the parallel `candidates`.
    fn choose<T: Copy>(
        &mut self,
        router: RouterId,
        eligible: &[T],
        candidates: &[Candidate],
    ) -> Result<Option<T>, RoutingError> {
        let r = self
            .routers
            .get(router.0 as usize)
            .ok_or(RoutingError::UnknownRouter(router))?;
        if eligible.is_empty() {
            return Ok(None);
        }
        match r.heuristic.select(candidates, &mut self.rng) {
            None => Ok(None),
            Some(index) => eligible
                .get(index)
                .copied()
                .map(Some)
                .ok_or(RoutingError::InvalidSelection {
                    router,
                    index: Some(index),
                }),
        }
    }

    fn required(&self, process: ProcessId) -> Result<&ProcessDef, RoutingError> {
        self.world
            .process(process)
            .map_err(|_| RoutingError::UnknownProcess(process))
    }

    /// The process `resource` would run to satisfy `required`.
    fn offered_for(&self, resource: ResourceId, required: &ProcessDef) -> Option<ProcessId> {
        let r = self.world.resources.get(resource)?;
        r.processes().find(|p| {
            self.world
                .process(*p)
                .is_ok_and(|def| def.satisfies(required))
        })
    }

    fn first_open_queue(&self, queues: &[QueueId]) -> Option<QueueId> {
        queues
            .iter()
            .copied()
            .find(|q| self.world.queues.get(*q).is_some_and(|q| !q.is_full()))
    }

    fn load(&self, queues: &[QueueId]) -> usize {
        queues
            .iter()
            .filter_map(|q| self.world.queues.get(*q))
            .map(|q| q.len() + q.pending_put())
            .sum()
    }

    /// Pick a production resource for `process` and reserve an input slot
    /// there.
    pub fn route_production(
        &mut self,
        router: RouterId,
        process: ProcessId,
    ) -> Result<Option<Destination>, RoutingError> {
        let required = self.required(process)?;
        let mut capable = 0;
        let mut eligible = Vec::new();
        for (id, r) in &self.world.resources {
            if r.kind != ResourceKind::Production {
                continue;
            }
            let Some(offered) = self.offered_for(id, required) else {
                continue;
            };
            capable += 1;
            if let Some(queue) = self.first_open_queue(&r.input_queues) {
                eligible.push((id, offered, queue, self.load(&r.input_queues)));
            }
        }
        if capable == 0 {
            return Err(RoutingError::NoCapableResource { process });
        }

        let candidates: Vec<Candidate> = eligible
            .iter()
            .map(|(id, _, _, load)| Candidate {
                location: LocationId::Resource(*id),
                queue_len: *load,
            })
            .collect();
        let Some((resource, process, queue, _)) = self.choose(router, &eligible, &candidates)? else {
            tracing::debug!(sim_time = %self.now(), ?process, capable, "every capable resource is full");
            return Ok(None);
        };
        self.reserve(queue)?;
        Ok(Some(Destination {
            resource,
            process,
            queue,
        }))
    }

    /// Pick a sink for `product_type` and reserve a slot in it.
    pub fn route_sink(
        &mut self,
        router: RouterId,
        product_type: ProductTypeId,
    ) -> Result<Option<(SinkId, QueueId)>, RoutingError> {
        let mut capable = 0;
        let mut eligible = Vec::new();
        for (id, sink) in &self.world.sinks {
            if sink.product_type != product_type {
                continue;
            }
            capable += 1;
            if let Some(queue) = self.first_open_queue(&sink.input_queues) {
                eligible.push((id, queue, self.load(&sink.input_queues)));
            }
        }
        if capable == 0 {
            return Err(RoutingError::NoSink { product_type });
        }

        let candidates: Vec<Candidate> = eligible
            .iter()
            .map(|(id, _, load)| Candidate {
                location: LocationId::Sink(*id),
                queue_len: *load,
            })
            .collect();
        let Some((sink, queue, _)) = self.choose(router, &eligible, &candidates)? else {
            return Ok(None);
        };
        self.reserve(queue)?;
        Ok(Some((sink, queue)))
    }

    /// Pick a transport resource able to move from `origin` to `target`
    /// with a process satisfying `process`.
    pub fn route_transport(
        &mut self,
        router: RouterId,
        process: ProcessId,
        origin: LocationId,
        target: LocationId,
    ) -> Result<TransportPlan, RoutingError> {
        let required = self.required(process)?;
        let mut capable = 0;
        let mut eligible = Vec::new();
        for (id, r) in &self.world.resources {
            if r.kind != ResourceKind::Transport {
                continue;
            }
            let Some(offered) = self.offered_for(id, required) else {
                continue;
            };
            capable += 1;
            if self.plan_path(offered, origin, target).is_err() {
                continue;
            }
            let load = self
                .world
                .controllers
                .get(id)
                .map(|c| c.pending().len() + c.running())
                .unwrap_or(0);
            eligible.push((id, offered, load));
        }
        if capable == 0 {
            return Err(RoutingError::NoTransport { process });
        }
        if eligible.is_empty() {
            return Err(RoutingError::NoPath {
                from: origin,
                to: target,
            });
        }

        let candidates: Vec<Candidate> = eligible
            .iter()
            .map(|(id, _, load)| Candidate {
                location: LocationId::Resource(*id),
                queue_len: *load,
            })
            .collect();
        let (resource, process, _) = self
            .choose(router, &eligible, &candidates)?
            .ok_or(RoutingError::InvalidSelection { router, index: None })?;
        Ok(TransportPlan { resource, process })
    }

    fn reserve(&mut self, queue: QueueId) -> Result<(), QueueError> {
        match self.world.queues.get_mut(queue) {
            Some(q) => q.reserve(),
            None => Ok(()),
        }
    }

    /// Loaded route for `process` from `origin` to `target`, both included.
    /// Free-moving transports go straight there.
    pub fn plan_path(
        &self,
        process: ProcessId,
        origin: LocationId,
        target: LocationId,
    ) -> Result<Vec<LocationId>, RoutingError> {
        let def = self.required(process)?;
        let Some(links) = def.links() else {
            return Ok(vec![origin, target]);
        };
        links
            .shortest_path(origin, target, |l| self.world.position(l))
            .ok_or(RoutingError::NoPath {
                from: origin,
                to: target,
            })
    }

    /// Mean time to drive `path` with `process`.
    pub fn expected_trip(&self, process: ProcessId, path: &[LocationId]) -> SimTime {
        let Ok(def) = self.world.process(process) else {
            return SimTime::ZERO;
        };
        let model = def.time_model;
        path.windows(2)
            .map(|leg| self.expected(model, self.distance(model, leg[0], leg[1])))
            .fold(SimTime::ZERO, |acc, t| acc.saturating_add(t))
    }
}
