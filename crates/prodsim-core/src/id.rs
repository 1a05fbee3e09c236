use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a production or transport resource.
    pub struct ResourceId;

    /// Identifies a queue (buffer) at some location.
    pub struct QueueId;

    /// Identifies a state instance hosted by a resource.
    pub struct StateId;

    /// Identifies a product (flow entity).
    pub struct ProductId;

    /// Identifies a product source.
    pub struct SourceId;

    /// Identifies a product sink.
    pub struct SinkId;

    /// Identifies a waypoint used by link transport.
    pub struct NodeId;

    /// Identifies a suspended task driven by the scheduler.
    pub struct TaskId;

    /// Identifies a one-shot signal that tasks can wait on.
    pub struct SignalId;
}

/// Identifies a process in the process catalogue. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub u32);

/// Identifies a time model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeModelId(pub u32);

/// Identifies a product type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductTypeId(pub u32);

/// Identifies a router. Every source owns one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouterId(pub u32);

/// Anything with a position that products and transport resources can be at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationId {
    Resource(ResourceId),
    Source(SourceId),
    Sink(SinkId),
    Node(NodeId),
}
