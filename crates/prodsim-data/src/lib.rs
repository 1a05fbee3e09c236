//! Scenario files for prodsim.
//!
//! Describes a production system in RON, TOML, or JSON and builds it with
//! the core [`SimulationBuilder`](prodsim_core::builder::SimulationBuilder).

pub mod loader;
pub mod schema;

pub use loader::{DataLoadError, load_scenario, load_scenario_dir};
pub use schema::ScenarioData;
