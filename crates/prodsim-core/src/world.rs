//! Entity arenas.
//!
//! Every entity lives in a slotmap (or a dense `Vec` for catalogue data) and
//! is addressed by handle. Components hold handles, never references; the
//! lookups below resolve them and turn a stale handle into a
//! [`ProtocolViolation::DanglingHandle`].

use std::collections::HashMap;

use slotmap::{SecondaryMap, SlotMap};

use crate::control::Controller;
use crate::engine::ProtocolViolation;
use crate::fixed::Position;
use crate::id::{
    LocationId, NodeId, ProcessId, ProductId, ProductTypeId, QueueId, ResourceId, SinkId,
    SourceId, StateId,
};
use crate::process::ProcessDef;
use crate::product::{Node, Product, ProductType, Sink, Source};
use crate::queue::Queue;
use crate::resource::Resource;
use crate::state::State;

#[derive(Debug, Default)]
pub struct World {
    pub(crate) processes: Vec<ProcessDef>,
    pub(crate) product_types: Vec<ProductType>,
    pub(crate) resources: SlotMap<ResourceId, Resource>,
    pub(crate) queues: SlotMap<QueueId, Queue>,
    pub(crate) states: SlotMap<StateId, State>,
    pub(crate) controllers: SecondaryMap<ResourceId, Controller>,
    pub(crate) products: SlotMap<ProductId, Product>,
    pub(crate) sources: SlotMap<SourceId, Source>,
    pub(crate) sinks: SlotMap<SinkId, Sink>,
    pub(crate) nodes: SlotMap<NodeId, Node>,
    pub(crate) names: Names,
}

/// Name lookups filled in by the builder.
#[derive(Debug, Default)]
pub(crate) struct Names {
    pub(crate) processes: HashMap<String, ProcessId>,
    pub(crate) product_types: HashMap<String, ProductTypeId>,
    pub(crate) resources: HashMap<String, ResourceId>,
    pub(crate) queues: HashMap<String, QueueId>,
    pub(crate) states: HashMap<String, StateId>,
    pub(crate) sources: HashMap<String, SourceId>,
    pub(crate) sinks: HashMap<String, SinkId>,
    pub(crate) nodes: HashMap<String, NodeId>,
}

fn dangling(kind: &'static str) -> ProtocolViolation {
    ProtocolViolation::DanglingHandle { kind }
}

impl World {
    // -----------------------------------------------------------------------
    // Name lookups
    // -----------------------------------------------------------------------

    pub fn process_id(&self, name: &str) -> Option<ProcessId> {
        self.names.processes.get(name).copied()
    }

    pub fn product_type_id(&self, name: &str) -> Option<ProductTypeId> {
        self.names.product_types.get(name).copied()
    }

    pub fn resource_id(&self, name: &str) -> Option<ResourceId> {
        self.names.resources.get(name).copied()
    }

    pub fn queue_id(&self, name: &str) -> Option<QueueId> {
        self.names.queues.get(name).copied()
    }

    /// Work states as `resource:process:index`, setup and breakdown states
    /// as `resource:state`.
    pub fn state_id(&self, name: &str) -> Option<StateId> {
        self.names.states.get(name).copied()
    }

    pub fn source_id(&self, name: &str) -> Option<SourceId> {
        self.names.sources.get(name).copied()
    }

    pub fn sink_id(&self, name: &str) -> Option<SinkId> {
        self.names.sinks.get(name).copied()
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.names.nodes.get(name).copied()
    }

    // -----------------------------------------------------------------------
    // Handle resolution
    // -----------------------------------------------------------------------

    pub fn process(&self, id: ProcessId) -> Result<&ProcessDef, ProtocolViolation> {
        self.processes.get(id.0 as usize).ok_or(dangling("process"))
    }

    pub fn product_type(&self, id: ProductTypeId) -> Result<&ProductType, ProtocolViolation> {
        self.product_types.get(id.0 as usize).ok_or(dangling("product type"))
    }

    pub fn resource(&self, id: ResourceId) -> Result<&Resource, ProtocolViolation> {
        self.resources.get(id).ok_or(dangling("resource"))
    }

    pub fn resource_mut(&mut self, id: ResourceId) -> Result<&mut Resource, ProtocolViolation> {
        self.resources.get_mut(id).ok_or(dangling("resource"))
    }

    pub fn queue(&self, id: QueueId) -> Result<&Queue, ProtocolViolation> {
        self.queues.get(id).ok_or(dangling("queue"))
    }

    pub fn queue_mut(&mut self, id: QueueId) -> Result<&mut Queue, ProtocolViolation> {
        self.queues.get_mut(id).ok_or(dangling("queue"))
    }

    pub fn state(&self, id: StateId) -> Result<&State, ProtocolViolation> {
        self.states.get(id).ok_or(dangling("state"))
    }

    pub fn state_mut(&mut self, id: StateId) -> Result<&mut State, ProtocolViolation> {
        self.states.get_mut(id).ok_or(dangling("state"))
    }

    pub fn controller(&self, id: ResourceId) -> Result<&Controller, ProtocolViolation> {
        self.controllers.get(id).ok_or(dangling("controller"))
    }

    pub fn controller_mut(&mut self, id: ResourceId) -> Result<&mut Controller, ProtocolViolation> {
        self.controllers.get_mut(id).ok_or(dangling("controller"))
    }

    pub fn product(&self, id: ProductId) -> Result<&Product, ProtocolViolation> {
        self.products.get(id).ok_or(dangling("product"))
    }

    pub fn product_mut(&mut self, id: ProductId) -> Result<&mut Product, ProtocolViolation> {
        self.products.get_mut(id).ok_or(dangling("product"))
    }

    pub fn source(&self, id: SourceId) -> Result<&Source, ProtocolViolation> {
        self.sources.get(id).ok_or(dangling("source"))
    }

    pub fn source_mut(&mut self, id: SourceId) -> Result<&mut Source, ProtocolViolation> {
        self.sources.get_mut(id).ok_or(dangling("source"))
    }

    pub fn sink(&self, id: SinkId) -> Result<&Sink, ProtocolViolation> {
        self.sinks.get(id).ok_or(dangling("sink"))
    }

    pub fn sink_mut(&mut self, id: SinkId) -> Result<&mut Sink, ProtocolViolation> {
        self.sinks.get_mut(id).ok_or(dangling("sink"))
    }

    /// Where a location sits on the floor. Resources report their home
    /// position; unknown handles sit at the origin.
    pub fn position(&self, location: LocationId) -> Position {
        let found = match location {
            LocationId::Resource(id) => self.resources.get(id).map(|r| r.position),
            LocationId::Source(id) => self.sources.get(id).map(|s| s.position),
            LocationId::Sink(id) => self.sinks.get(id).map(|s| s.position),
            LocationId::Node(id) => self.nodes.get(id).map(|n| n.position),
        };
        found.unwrap_or_default()
    }

    /// Display name of a location, for logs.
    pub fn location_name(&self, location: LocationId) -> &str {
        let found = match location {
            LocationId::Resource(id) => self.resources.get(id).map(|r| r.name.as_str()),
            LocationId::Source(id) => self.sources.get(id).map(|s| s.name.as_str()),
            LocationId::Sink(id) => self.sinks.get(id).map(|s| s.name.as_str()),
            LocationId::Node(id) => self.nodes.get(id).map(|n| n.name.as_str()),
        };
        found.unwrap_or("?")
    }

    /// Queues products are put into when they arrive at `location`.
    pub fn arrival_queues(&self, location: LocationId) -> &[QueueId] {
        match location {
            LocationId::Resource(id) => self.resources.get(id).map(|r| r.input_queues.as_slice()),
            LocationId::Sink(id) => self.sinks.get(id).map(|s| s.input_queues.as_slice()),
            LocationId::Source(_) | LocationId::Node(_) => None,
        }
        .unwrap_or(&[])
    }
}
