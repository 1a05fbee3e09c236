//! Resource-bound activities and their occupation tasks.
//!
//! Every [`State`] belongs to one resource and is reused across
//! occupations. An occupation runs as its own task:
//!
//! 1. **Starting** -- sample a duration (transport legs pass the distance).
//! 2. **Running** -- wait for the duration.
//! 3. Mark the state free and finish, firing the task's done signal.
//!
//! # Breakdowns
//!
//! Breakdown states run a perpetual loop: wait for the time to failure,
//! interrupt the affected work states, wait for the repair, restore them.
//! An interrupted occupation keeps its remaining duration and resumes it
//! once the last outage affecting it is repaired. An occupation that starts
//! during an outage waits for the repair with its full duration.

use crate::engine::{Engine, ProtocolViolation, SimError, Suspend, Task};
use crate::event::SimEvent;
use crate::fixed::{Fixed64, SimTime};
use crate::id::{LocationId, ProcessId, ProductId, ResourceId, SignalId, StateId, TaskId, TimeModelId};
use crate::scheduler::EventKey;

/// The closed set of activity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Production { process: ProcessId },
    Transport { process: ProcessId },
    /// Changes the resource's configuration from `origin` to `target`.
    Setup { origin: ProcessId, target: ProcessId },
    /// Takes the whole resource down.
    Breakdown { repair_model: TimeModelId },
    /// Takes down only the states of one process.
    ProcessBreakdown {
        process: ProcessId,
        repair_model: TimeModelId,
    },
}

impl StateKind {
    pub fn is_work(&self) -> bool {
        matches!(self, StateKind::Production { .. } | StateKind::Transport { .. })
    }

    pub fn is_breakdown(&self) -> bool {
        matches!(
            self,
            StateKind::Breakdown { .. } | StateKind::ProcessBreakdown { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OccupationPhase {
    #[default]
    Idle,
    Starting,
    Running,
    Interrupted,
}

/// Bookkeeping for the current occupation. Reset by [`State::prepare_for_run`].
#[derive(Debug, Clone, Default)]
pub struct Occupation {
    pub phase: OccupationPhase,
    pub product: Option<ProductId>,
    /// Leg endpoints for transport states.
    pub leg: Option<(LocationId, LocationId)>,
    pub distance: Fixed64,
    pub started_at: SimTime,
    pub resumed_at: SimTime,
    pub duration: SimTime,
    pub remaining: SimTime,
    pub interruptions: u32,
    pub(crate) completion: Option<EventKey>,
}

#[derive(Debug)]
pub struct State {
    pub id: StateId,
    pub name: String,
    pub resource: ResourceId,
    pub kind: StateKind,
    pub time_model: TimeModelId,
    pub(crate) task: Option<TaskId>,
    pub(crate) run: Occupation,
    /// Outages currently affecting this state.
    pub(crate) outages: u32,
}

impl State {
    pub fn new(
        id: StateId,
        name: impl Into<String>,
        resource: ResourceId,
        kind: StateKind,
        time_model: TimeModelId,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            resource,
            kind,
            time_model,
            task: None,
            run: Occupation::default(),
            outages: 0,
        }
    }

    /// Free iff no task occupies it.
    pub fn is_free(&self) -> bool {
        self.task.is_none()
    }

    pub fn task(&self) -> Option<TaskId> {
        self.task
    }

    pub fn occupation(&self) -> &Occupation {
        &self.run
    }

    pub fn is_down(&self) -> bool {
        self.outages > 0
    }

    /// The process this state serves, for work and process-breakdown states.
    pub fn process(&self) -> Option<ProcessId> {
        match self.kind {
            StateKind::Production { process }
            | StateKind::Transport { process }
            | StateKind::ProcessBreakdown { process, .. } => Some(process),
            StateKind::Setup { target, .. } => Some(target),
            StateKind::Breakdown { .. } => None,
        }
    }

    /// Reset bookkeeping before a new occupation.
    pub fn prepare_for_run(&mut self, product: Option<ProductId>, leg: Option<(LocationId, LocationId)>, distance: Fixed64) {
        self.run = Occupation {
            phase: OccupationPhase::Starting,
            product,
            leg,
            distance,
            ..Occupation::default()
        };
    }
}

// ---------------------------------------------------------------------------
// Breakdown loop phases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BreakdownPhase {
    Init,
    Up,
    Down { repair: SimTime },
}

// ---------------------------------------------------------------------------
// Engine integration
// ---------------------------------------------------------------------------

impl Engine {
    /// Start an occupation of `state_id` as a new task. Returns the signal
    /// fired when the occupation ends.
    pub(crate) fn occupy(
        &mut self,
        state_id: StateId,
        product: Option<ProductId>,
        leg: Option<(LocationId, LocationId)>,
        distance: Fixed64,
    ) -> Result<SignalId, SimError> {
        let state = self.world.state_mut(state_id)?;
        if !state.is_free() {
            return Err(ProtocolViolation::StateOccupied { state: state_id }.into());
        }
        state.prepare_for_run(product, leg, distance);
        let task = self.spawn(Task::Occupation { state: state_id });
        self.world.state_mut(state_id)?.task = Some(task);
        Ok(self.task_done(task)?)
    }

    pub(crate) fn step_occupation(&mut self, task: TaskId, state_id: StateId) -> Result<Suspend, SimError> {
        let now = self.now();
        let state = self.world.state(state_id)?;
        let resource = state.resource;
        let phase = state.run.phase;
        match phase {
            OccupationPhase::Starting => {
                let (model, distance) = (state.time_model, state.run.distance);
                let duration = self.sample(model, distance);
                let state = self.world.state_mut(state_id)?;
                state.run.started_at = now;
                state.run.duration = duration;
                state.run.remaining = duration;
                let down = state.is_down();
                if down {
                    state.run.phase = OccupationPhase::Interrupted;
                } else {
                    state.run.phase = OccupationPhase::Running;
                    state.run.resumed_at = now;
                    state.run.completion = Some(self.scheduler.resume_after(task, duration));
                }
                tracing::debug!(sim_time = %now, ?resource, state = ?state_id, %duration, down, "state start");
                self.emit(SimEvent::StateStarted {
                    resource,
                    state: state_id,
                    time: now,
                });
                Ok(Suspend::Parked)
            }
            OccupationPhase::Running => {
                let state = self.world.state_mut(state_id)?;
                let duration = state.run.duration;
                state.run.phase = OccupationPhase::Idle;
                state.run.completion = None;
                state.task = None;
                tracing::debug!(sim_time = %now, ?resource, state = ?state_id, "state end");
                self.emit(SimEvent::StateEnded {
                    resource,
                    state: state_id,
                    time: now,
                    duration,
                });
                Ok(Suspend::Done)
            }
            // Only restore_state resumes an interrupted occupation.
            OccupationPhase::Interrupted | OccupationPhase::Idle => Ok(Suspend::Parked),
        }
    }

    /// Take `state_id` down. The first outage suspends a running occupation
    /// and keeps what is left of its duration.
    pub(crate) fn interrupt_state(&mut self, state_id: StateId) -> Result<(), SimError> {
        let now = self.now();
        let state = self.world.state_mut(state_id)?;
        state.outages += 1;
        if state.outages > 1 || state.run.phase != OccupationPhase::Running {
            return Ok(());
        }
        let elapsed = now - state.run.resumed_at;
        state.run.remaining = (state.run.remaining - elapsed).max(SimTime::ZERO);
        state.run.phase = OccupationPhase::Interrupted;
        state.run.interruptions += 1;
        let remaining = state.run.remaining;
        if let Some(key) = state.run.completion.take() {
            self.scheduler.withdraw(key);
        }
        tracing::debug!(sim_time = %now, state = ?state_id, %remaining, "state interrupted");
        Ok(())
    }

    /// Lift one outage. When none remain, an interrupted occupation picks up
    /// its remaining duration.
    pub(crate) fn restore_state(&mut self, state_id: StateId) -> Result<(), SimError> {
        let now = self.now();
        let state = self.world.state_mut(state_id)?;
        state.outages = state.outages.saturating_sub(1);
        if state.outages > 0 || state.run.phase != OccupationPhase::Interrupted {
            return Ok(());
        }
        let Some(task) = state.task else {
            return Ok(());
        };
        state.run.phase = OccupationPhase::Running;
        state.run.resumed_at = now;
        let remaining = state.run.remaining;
        state.run.completion = Some(self.scheduler.resume_after(task, remaining));
        tracing::debug!(sim_time = %now, state = ?state_id, %remaining, "state resumed");
        Ok(())
    }

    /// Work states a breakdown state takes down.
    fn breakdown_targets(&self, state_id: StateId) -> Result<Vec<StateId>, SimError> {
        let state = self.world.state(state_id)?;
        let resource = self.world.resource(state.resource)?;
        Ok(match state.kind {
            StateKind::ProcessBreakdown { process, .. } => resource.states_for(process).to_vec(),
            _ => resource.work_states().collect(),
        })
    }

    pub(crate) fn step_breakdown(
        &mut self,
        task: TaskId,
        state_id: StateId,
        phase: &mut BreakdownPhase,
    ) -> Result<Suspend, SimError> {
        let now = self.now();
        let state = self.world.state(state_id)?;
        let (resource, failure_model) = (state.resource, state.time_model);
        let repair_model = match state.kind {
            StateKind::Breakdown { repair_model } | StateKind::ProcessBreakdown { repair_model, .. } => {
                repair_model
            }
            _ => return Ok(Suspend::Done),
        };

        match *phase {
            BreakdownPhase::Init => {
                self.world.state_mut(state_id)?.task = Some(task);
                let ttf = self.sample(failure_model, Fixed64::ZERO);
                *phase = BreakdownPhase::Up;
                Ok(Suspend::After(ttf))
            }
            BreakdownPhase::Up => {
                for target in self.breakdown_targets(state_id)? {
                    self.interrupt_state(target)?;
                }
                let repair = self.sample(repair_model, Fixed64::ZERO);
                let state = self.world.state_mut(state_id)?;
                state.prepare_for_run(None, None, Fixed64::ZERO);
                state.run.phase = OccupationPhase::Running;
                state.run.started_at = now;
                state.run.duration = repair;
                tracing::debug!(sim_time = %now, ?resource, state = ?state_id, %repair, "breakdown");
                self.emit(SimEvent::StateStarted {
                    resource,
                    state: state_id,
                    time: now,
                });
                *phase = BreakdownPhase::Down { repair };
                Ok(Suspend::After(repair))
            }
            BreakdownPhase::Down { repair } => {
                for target in self.breakdown_targets(state_id)? {
                    self.restore_state(target)?;
                }
                self.world.state_mut(state_id)?.run.phase = OccupationPhase::Idle;
                tracing::debug!(sim_time = %now, ?resource, state = ?state_id, "repaired");
                self.emit(SimEvent::StateEnded {
                    resource,
                    state: state_id,
                    time: now,
                    duration: repair,
                });
                let ttf = self.sample(failure_model, Fixed64::ZERO);
                *phase = BreakdownPhase::Up;
                Ok(Suspend::After(ttf))
            }
        }
    }
}
