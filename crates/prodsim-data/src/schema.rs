//! Serde data file structs for scenario descriptions.
//!
//! A scenario file holds run settings plus named lists of time models,
//! processes, queues, states, resources, products, sources, sinks, and
//! nodes. Entity entries reuse the core builder specs directly; only the
//! run settings and time model table have a file-specific shape.

use prodsim_core::builder::{
    NodeSpec, ProcessSpec, ProductSpec, QueueSpec, ResourceSpec, SinkSpec, SourceSpec, StateSpec,
    TimeModelSpec,
};
use prodsim_core::fixed::duration_from_f64;
use prodsim_core::sim::SimulationConfig;
use serde::Deserialize;

// ===========================================================================
// Run settings
// ===========================================================================

/// Run settings in plain numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConfigData {
    pub seed: u64,
    /// Seconds a product waits before routing again.
    pub retry_delay: f64,
    pub trace_capacity: usize,
}

impl Default for ConfigData {
    fn default() -> Self {
        Self {
            seed: 0,
            retry_delay: 1.0,
            trace_capacity: 4096,
        }
    }
}

impl ConfigData {
    pub fn into_config(self) -> SimulationConfig {
        SimulationConfig {
            seed: self.seed,
            retry_delay: duration_from_f64(self.retry_delay),
            trace_capacity: self.trace_capacity,
        }
    }
}

// ===========================================================================
// Time models
// ===========================================================================

/// A named duration model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimeModelData {
    pub name: String,
    pub model: TimeModelSpec,
}

// ===========================================================================
// Scenario
// ===========================================================================

/// A complete scenario file. Every list may be omitted.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioData {
    pub config: ConfigData,
    pub time_models: Vec<TimeModelData>,
    pub processes: Vec<ProcessSpec>,
    pub queues: Vec<QueueSpec>,
    pub states: Vec<StateSpec>,
    pub resources: Vec<ResourceSpec>,
    pub products: Vec<ProductSpec>,
    pub sources: Vec<SourceSpec>,
    pub sinks: Vec<SinkSpec>,
    pub nodes: Vec<NodeSpec>,
}
