//! Read-only query API for inspecting simulation state.
//!
//! Snapshot types are owned copies, with no references into engine storage,
//! suitable for reporting code or assertions in tests.

use crate::engine::Engine;
use crate::fixed::SimTime;
use crate::id::{LocationId, ProcessId, ProductId, ProductTypeId, QueueId, ResourceId, StateId};
use crate::product::ProductStatus;
use crate::resource::ResourceKind;

// ---------------------------------------------------------------------------
// Resource snapshot
// ---------------------------------------------------------------------------

/// Aggregated view of one resource and its controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
    pub capacity: usize,
    /// Capacity slots currently held by jobs.
    pub slots_held: usize,
    /// Occupied work states.
    pub busy_states: Vec<StateId>,
    /// Work states taken down by a breakdown.
    pub down_states: Vec<StateId>,
    pub current_setup: Option<ProcessId>,
    pub location: LocationId,
    /// Requests waiting in the controller.
    pub pending_requests: usize,
    pub running_jobs: usize,
}

// ---------------------------------------------------------------------------
// Queue snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub id: QueueId,
    pub name: String,
    /// `None` when unbounded.
    pub capacity: Option<usize>,
    pub items: Vec<ProductId>,
    pub pending_put: usize,
    pub blocked_puts: usize,
}

// ---------------------------------------------------------------------------
// Product snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub name: String,
    pub product_type: ProductTypeId,
    pub location: LocationId,
    pub queue: Option<QueueId>,
    pub remaining: Vec<ProcessId>,
    pub created_at: SimTime,
    pub status: ProductStatus,
}

impl Engine {
    pub fn snapshot_resource(&self, id: ResourceId) -> Option<ResourceSnapshot> {
        let r = self.world.resources.get(id)?;
        let states: Vec<_> = r
            .work_states()
            .filter_map(|s| self.world.states.get(s))
            .collect();
        let controller = self.world.controllers.get(id);
        Some(ResourceSnapshot {
            id,
            name: r.name.clone(),
            kind: r.kind,
            capacity: r.capacity,
            slots_held: r.slots_held(),
            busy_states: states.iter().filter(|s| !s.is_free()).map(|s| s.id).collect(),
            down_states: states.iter().filter(|s| s.is_down()).map(|s| s.id).collect(),
            current_setup: r.current_setup(),
            location: r.location(),
            pending_requests: controller.map_or(0, |c| c.pending().len()),
            running_jobs: controller.map_or(0, |c| c.running()),
        })
    }

    pub fn snapshot_all_resources(&self) -> Vec<ResourceSnapshot> {
        self.world
            .resources
            .keys()
            .filter_map(|id| self.snapshot_resource(id))
            .collect()
    }

    pub fn snapshot_queue(&self, id: QueueId) -> Option<QueueSnapshot> {
        let q = self.world.queues.get(id)?;
        Some(QueueSnapshot {
            id,
            name: q.name.clone(),
            capacity: q.capacity(),
            items: q.items().collect(),
            pending_put: q.pending_put(),
            blocked_puts: q.blocked_puts(),
        })
    }

    pub fn snapshot_product(&self, id: ProductId) -> Option<ProductSnapshot> {
        let p = self.world.products.get(id)?;
        let model = &self.world.product_types.get(p.product_type.0 as usize)?.process_model;
        Some(ProductSnapshot {
            id,
            name: p.name.clone(),
            product_type: p.product_type,
            location: p.location,
            queue: p.queue,
            remaining: model.outstanding(&p.done),
            created_at: p.created_at,
            status: p.status.clone(),
        })
    }

    /// Every product, in creation order.
    pub fn snapshot_all_products(&self) -> Vec<ProductSnapshot> {
        self.world
            .products
            .keys()
            .filter_map(|id| self.snapshot_product(id))
            .collect()
    }
}
