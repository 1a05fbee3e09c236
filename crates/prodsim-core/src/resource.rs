//! Capacity-bounded servers.
//!
//! A [`Resource`] binds a number of capacity slots, a process catalogue
//! with one state instance per unit of per-process parallelism, and (for
//! production resources) its input and output queues. Slots are granted in
//! request order: a release hands the slot straight to the oldest waiter.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::engine::ProtocolViolation;
use crate::fixed::Position;
use crate::id::{LocationId, ProcessId, QueueId, ResourceId, SignalId, StateId};
use crate::state::State;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Production,
    Transport,
}

/// Outcome of asking for a capacity slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotGrant {
    Granted,
    /// Queued; the signal fires when the slot is handed over.
    Queued(SignalId),
}

#[derive(Debug)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
    pub capacity: usize,
    /// Home position.
    pub position: Position,
    pub(crate) processes: Vec<(ProcessId, Vec<StateId>)>,
    pub(crate) setup_states: Vec<StateId>,
    pub(crate) breakdown_states: Vec<StateId>,
    pub(crate) input_queues: Vec<QueueId>,
    pub(crate) output_queues: Vec<QueueId>,
    /// Where the resource currently is. Only transport resources move.
    pub(crate) location: LocationId,
    pub(crate) current_setup: Option<ProcessId>,
    /// Setup in progress: target process and the occupation's done signal.
    pub(crate) setup_running: Option<(ProcessId, SignalId)>,
    slots_held: usize,
    slot_waiters: VecDeque<SignalId>,
}

impl Resource {
    pub fn new(
        id: ResourceId,
        name: impl Into<String>,
        kind: ResourceKind,
        capacity: usize,
        position: Position,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            capacity,
            position,
            processes: Vec::new(),
            setup_states: Vec::new(),
            breakdown_states: Vec::new(),
            input_queues: Vec::new(),
            output_queues: Vec::new(),
            location: LocationId::Resource(id),
            current_setup: None,
            setup_running: None,
            slots_held: 0,
            slot_waiters: VecDeque::new(),
        }
    }

    /// Processes in catalogue order.
    pub fn processes(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.processes.iter().map(|(p, _)| *p)
    }

    pub fn offers(&self, process: ProcessId) -> bool {
        self.processes.iter().any(|(p, _)| *p == process)
    }

    /// State instances that can run `process`.
    pub fn states_for(&self, process: ProcessId) -> &[StateId] {
        self.processes
            .iter()
            .find(|(p, _)| *p == process)
            .map(|(_, states)| states.as_slice())
            .unwrap_or(&[])
    }

    /// Every production or transport state, across processes.
    pub fn work_states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.processes.iter().flat_map(|(_, s)| s.iter().copied())
    }

    /// A state for `process` with no running occupation.
    pub fn free_state(&self, process: ProcessId, states: &SlotMap<StateId, State>) -> Option<StateId> {
        self.states_for(process)
            .iter()
            .copied()
            .find(|s| states.get(*s).is_some_and(State::is_free))
    }

    pub fn setup_states(&self) -> &[StateId] {
        &self.setup_states
    }

    pub fn breakdown_states(&self) -> &[StateId] {
        &self.breakdown_states
    }

    pub fn input_queues(&self) -> &[QueueId] {
        &self.input_queues
    }

    pub fn output_queues(&self) -> &[QueueId] {
        &self.output_queues
    }

    pub fn location(&self) -> LocationId {
        self.location
    }

    pub fn current_setup(&self) -> Option<ProcessId> {
        self.current_setup
    }

    // -----------------------------------------------------------------------
    // Capacity slots
    // -----------------------------------------------------------------------

    pub fn slots_held(&self) -> usize {
        self.slots_held
    }

    pub fn slot_waiters(&self) -> usize {
        self.slot_waiters.len()
    }

    /// Every slot is held or promised to a waiter.
    pub fn is_full(&self) -> bool {
        self.slots_held + self.slot_waiters.len() >= self.capacity
    }

    /// Take a slot now, or queue for one behind earlier waiters.
    pub fn acquire_slot(&mut self, signal: impl FnOnce() -> SignalId) -> SlotGrant {
        if self.slots_held < self.capacity && self.slot_waiters.is_empty() {
            self.slots_held += 1;
            SlotGrant::Granted
        } else {
            let signal = signal();
            self.slot_waiters.push_back(signal);
            SlotGrant::Queued(signal)
        }
    }

    /// Give a slot back. Returns the waiter it was handed to, if any.
    pub fn release_slot(&mut self) -> Result<Option<SignalId>, ProtocolViolation> {
        if self.slots_held == 0 {
            return Err(ProtocolViolation::SlotNotHeld { resource: self.id });
        }
        match self.slot_waiters.pop_front() {
            Some(next) => Ok(Some(next)),
            None => {
                self.slots_held -= 1;
                Ok(None)
            }
        }
    }
}
