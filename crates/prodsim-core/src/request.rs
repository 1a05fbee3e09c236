use crate::fixed::SimTime;
use crate::id::{LocationId, ProcessId, ProductId, QueueId, ResourceId, SignalId};

/// One unit of requested work, waiting in a controller's pending list.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Arrival order at the controller.
    pub seq: u64,
    pub resource: ResourceId,
    /// The resource's own process that will do the work.
    pub process: ProcessId,
    pub product: ProductId,
    /// Mean duration of the process alone.
    pub expected_duration: SimTime,
    /// Fired when the work is done and the product has been handed on.
    pub done: SignalId,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Production,
    Transport {
        origin: LocationId,
        target: LocationId,
        /// Loaded route from origin to target, both included.
        path: Vec<LocationId>,
        /// Input slot claimed at the target during routing.
        reserved_queue: Option<QueueId>,
        /// Mean duration of the loaded trip along `path`.
        expected_trip: SimTime,
    },
}

impl Request {
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, RequestKind::Transport { .. })
    }

    /// Loaded trip time for transport requests, the process time otherwise.
    pub fn expected_trip(&self) -> SimTime {
        match &self.kind {
            RequestKind::Transport { expected_trip, .. } => *expected_trip,
            RequestKind::Production => self.expected_duration,
        }
    }
}
