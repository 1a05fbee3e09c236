//! Prodsim Core -- a discrete-event simulation kernel for production systems.
//!
//! This crate provides the event scheduler, bounded queues with
//! reservations, resource states, controllers, routers, and products that a
//! manufacturing model is assembled from. All time is Q32.32 fixed-point, so
//! a run is fully determined by its description and seed.
//!
//! # Execution Model
//!
//! Every active entity (a controller loop, a production or transport job, a
//! state occupation, a breakdown cycle, a source, a product's lifecycle) is a
//! task. A task runs until it has to wait, then returns what it waits on:
//!
//! 1. **Timeout** -- resume after a sampled duration.
//! 2. **Signal** -- resume when a one-shot signal fires (a job finished, a
//!    queue slot freed, a request arrived).
//! 3. **Any** -- resume on the first of several signals.
//!
//! The [`scheduler::Scheduler`] orders resumptions by `(time, sequence)`, so
//! ties resolve in scheduling order.
//!
//! # Building a Model
//!
//! ```rust,ignore
//! let mut engine = SimulationBuilder::new(SimulationConfig::default())
//!     .add_time_model("work", TimeModelSpec::Constant { duration: 2.0 })
//!     .add_process(ProcessSpec::production("drill", "work"))
//!     .add_queue(QueueSpec::new("in", 10))
//!     .add_queue(QueueSpec::new("out", 10))
//!     .add_resource(ResourceSpec::production("m", 1, &["drill"], "in", "out"))
//!     .build()?;
//! let summary = engine.run_until(SimTime::from_num(100))?;
//! ```
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- Owns the world and drives tasks to completion.
//! - [`builder::SimulationBuilder`] -- Validates a named description and
//!   wires it into an engine.
//! - [`queue::Queue`] -- Bounded FIFO store with put reservations.
//! - [`resource::Resource`] -- Capacity, states, setup, and location of a
//!   machine or vehicle.
//! - [`control::ControlPolicy`] -- Orders pending requests (FIFO, LIFO, SPT,
//!   nearest origin).
//! - [`router::RoutingHeuristic`] -- Chooses among capable destinations.
//! - [`event::SimEvent`] -- Trace entries, kept in a bounded ring buffer.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic math.

pub mod builder;
pub mod control;
pub mod engine;
pub mod event;
pub mod fixed;
pub mod id;
mod job;
pub mod path;
pub mod process;
pub mod product;
pub mod query;
pub mod queue;
pub mod request;
pub mod resource;
pub mod rng;
pub mod router;
pub mod scheduler;
pub mod sim;
pub mod state;
pub mod time_model;
pub mod validation;
pub mod world;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
