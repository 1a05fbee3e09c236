//! Lifecycle events, listeners, and the trace ring buffer.
//!
//! The engine reports four kinds of lifecycle moment, synchronously, at the
//! virtual instant they happen:
//!
//! - a state occupation starts,
//! - a state occupation ends,
//! - something happens to a product,
//! - a transport leg starts.
//!
//! Each is recorded in a [`TraceBuffer`] (a fixed-capacity ring buffer) and
//! forwarded to every registered [`EventSink`]. Two runs with the same seed
//! and inputs produce identical traces.

use std::collections::VecDeque;
use std::hash::Hasher;

use crate::fixed::SimTime;
use crate::id::{LocationId, ProductId, ResourceId, StateId};
use crate::sim::StateHash;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// What happened to a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductActivity {
    Created,
    StartProcess,
    EndProcess,
    Loaded,
    Unloaded,
    Finished,
    RoutingFailed,
}

/// A recorded lifecycle event. All events carry the time they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    StateStarted {
        resource: ResourceId,
        state: StateId,
        time: SimTime,
    },
    StateEnded {
        resource: ResourceId,
        state: StateId,
        time: SimTime,
        duration: SimTime,
    },
    Product {
        location: LocationId,
        product: ProductId,
        activity: ProductActivity,
        time: SimTime,
    },
    /// `origin` is `None` when the vehicle leaves its home position.
    Transport {
        origin: Option<LocationId>,
        target: LocationId,
        time: SimTime,
        empty: bool,
    },
}

impl SimEvent {
    pub fn time(&self) -> SimTime {
        match self {
            SimEvent::StateStarted { time, .. }
            | SimEvent::StateEnded { time, .. }
            | SimEvent::Product { time, .. }
            | SimEvent::Transport { time, .. } => *time,
        }
    }

    /// Fold the event into a running hash. Handles are hashed through their
    /// debug form, which is stable for a given build order.
    pub fn hash_into(&self, hash: &mut StateHash) {
        hash.write(format!("{self:?}").as_bytes());
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Receives lifecycle callbacks as they happen. All methods default to
/// doing nothing.
pub trait EventSink {
    fn on_state_start(&mut self, _resource: ResourceId, _state: StateId, _time: SimTime) {}

    fn on_state_end(
        &mut self,
        _resource: ResourceId,
        _state: StateId,
        _time: SimTime,
        _duration: SimTime,
    ) {
    }

    fn on_product_event(
        &mut self,
        _location: LocationId,
        _product: ProductId,
        _activity: ProductActivity,
        _time: SimTime,
    ) {
    }

    fn on_transport(
        &mut self,
        _origin: Option<LocationId>,
        _target: LocationId,
        _time: SimTime,
        _empty: bool,
    ) {
    }
}

/// Route one event to the matching callback.
pub fn dispatch(sink: &mut dyn EventSink, event: &SimEvent) {
    match *event {
        SimEvent::StateStarted {
            resource,
            state,
            time,
        } => sink.on_state_start(resource, state, time),
        SimEvent::StateEnded {
            resource,
            state,
            time,
            duration,
        } => sink.on_state_end(resource, state, time, duration),
        SimEvent::Product {
            location,
            product,
            activity,
            time,
        } => sink.on_product_event(location, product, activity, time),
        SimEvent::Transport {
            origin,
            target,
            time,
            empty,
        } => sink.on_transport(origin, target, time, empty),
    }
}

/// Adapts a closure into an [`EventSink`] that sees every event.
pub struct FnSink<F: FnMut(&SimEvent)>(pub F);

impl<F: FnMut(&SimEvent)> EventSink for FnSink<F> {
    fn on_state_start(&mut self, resource: ResourceId, state: StateId, time: SimTime) {
        (self.0)(&SimEvent::StateStarted {
            resource,
            state,
            time,
        });
    }

    fn on_state_end(&mut self, resource: ResourceId, state: StateId, time: SimTime, duration: SimTime) {
        (self.0)(&SimEvent::StateEnded {
            resource,
            state,
            time,
            duration,
        });
    }

    fn on_product_event(
        &mut self,
        location: LocationId,
        product: ProductId,
        activity: ProductActivity,
        time: SimTime,
    ) {
        (self.0)(&SimEvent::Product {
            location,
            product,
            activity,
            time,
        });
    }

    fn on_transport(&mut self, origin: Option<LocationId>, target: LocationId, time: SimTime, empty: bool) {
        (self.0)(&SimEvent::Transport {
            origin,
            target,
            time,
            empty,
        });
    }
}

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

/// The most recent `capacity` events of a run, plus a running hash over
/// all of them. Older events fall off the front.
#[derive(Debug)]
pub struct TraceBuffer {
    events: VecDeque<SimEvent>,
    capacity: usize,
    written: u64,
    hash: StateHash,
}

impl TraceBuffer {
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            written: 0,
            hash: StateHash::new(),
        }
    }

    pub fn push(&mut self, event: SimEvent) {
        event.hash_into(&mut self.hash);
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
        self.written += 1;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events pushed so far, kept or not.
    pub fn total_written(&self) -> u64 {
        self.written
    }

    pub fn dropped_count(&self) -> u64 {
        self.written - self.events.len() as u64
    }

    /// Hash over every event written, in order.
    pub fn hash(&self) -> u64 {
        self.hash.finish()
    }

    /// Oldest first.
    pub fn iter(&self) -> TraceIter<'_> {
        self.events.iter()
    }
}

pub type TraceIter<'a> = std::collections::vec_deque::Iter<'a, SimEvent>;
