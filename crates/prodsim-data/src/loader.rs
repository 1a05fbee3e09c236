//! Reads scenario files and turns them into engines.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization. Name references are resolved by the core builder, whose
//! [`ConfigError`] is passed through.

use prodsim_core::builder::{ConfigError, SimulationBuilder};
use prodsim_core::engine::Engine;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crate::schema::ScenarioData;

/// Base name looked up by [`load_scenario_dir`].
pub const SCENARIO_FILE: &str = "scenario";

/// Why a scenario could not be turned into an engine.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// The directory holds no `scenario.{ron,toml,json}`.
    #[error("no {file}.ron, {file}.toml or {file}.json in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    #[error("cannot tell the format of {file} from its extension")]
    UnsupportedFormat { file: PathBuf },

    /// The same scenario exists in two formats; neither wins.
    #[error("ambiguous scenario: both {a} and {b} exist")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    #[error("{file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The scenario parsed but does not describe a valid system.
    #[error("invalid scenario: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Scenario file formats, in lookup priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Ron, Format::Toml, Format::Json];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Ron => "ron",
            Format::Toml => "toml",
            Format::Json => "json",
        }
    }
}

/// Pick the format from the file extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    let ext = path.extension().and_then(|e| e.to_str());
    Format::ALL
        .into_iter()
        .find(|f| Some(f.extension()) == ext)
        .ok_or_else(|| DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        })
}

/// Look for `{base_name}.<ext>` in `dir` for every known format. At most
/// one may exist.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut present = Format::ALL
        .into_iter()
        .map(|f| dir.join(format!("{base_name}.{}", f.extension())))
        .filter(|p| p.is_file());
    match (present.next(), present.next()) {
        (Some(a), Some(b)) => Err(DataLoadError::ConflictingFormats { a, b }),
        (first, _) => Ok(first),
    }
}

/// Parse `content` in the given format. `file` only labels errors.
pub fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    file: &Path,
) -> Result<T, DataLoadError> {
    let parse_error = |detail: String| DataLoadError::Parse {
        file: file.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Read a file and deserialize it according to its extension.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    deserialize_str(&std::fs::read_to_string(path)?, format, path)
}

/// Feed every entry of `data` to a fresh builder, in file order.
pub fn into_builder(data: ScenarioData) -> SimulationBuilder {
    let ScenarioData {
        config,
        time_models,
        processes,
        queues,
        states,
        resources,
        products,
        sources,
        sinks,
        nodes,
    } = data;

    let mut builder = SimulationBuilder::new(config.into_config());
    for entry in time_models {
        builder = builder.add_time_model(&entry.name, entry.model);
    }
    builder = processes.into_iter().fold(builder, SimulationBuilder::add_process);
    builder = queues.into_iter().fold(builder, SimulationBuilder::add_queue);
    builder = states.into_iter().fold(builder, SimulationBuilder::add_state);
    builder = nodes.into_iter().fold(builder, SimulationBuilder::add_node);
    builder = resources.into_iter().fold(builder, SimulationBuilder::add_resource);
    builder = products.into_iter().fold(builder, SimulationBuilder::add_product);
    builder = sources.into_iter().fold(builder, SimulationBuilder::add_source);
    sinks.into_iter().fold(builder, SimulationBuilder::add_sink)
}

/// Load a scenario file and build its engine.
pub fn load_scenario(path: &Path) -> Result<Engine, DataLoadError> {
    let data: ScenarioData = deserialize_file(path)?;
    tracing::debug!(file = %path.display(), resources = data.resources.len(), "scenario parsed");
    Ok(into_builder(data).build()?)
}

/// Load `scenario.{ron,toml,json}` from `dir`.
pub fn load_scenario_dir(dir: &Path) -> Result<Engine, DataLoadError> {
    let path = find_data_file(dir, SCENARIO_FILE)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: SCENARIO_FILE.to_string(),
        dir: dir.to_path_buf(),
    })?;
    load_scenario(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prodsim_core::fixed::SimTime;
    use std::fs;

    /// Fresh per-process scratch directory.
    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("prodsim_loader_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    const MACHINE_JSON: &str = r#"{
        "time_models": [{"name": "work", "model": {"type": "constant", "duration": 2.0}}],
        "processes": [{"name": "drill", "time_model": "work"}],
        "queues": [{"name": "in", "capacity": 4}, {"name": "out"}],
        "resources": [{
            "name": "m",
            "kind": "production",
            "processes": ["drill"],
            "input_queues": ["in"],
            "output_queues": ["out"]
        }]
    }"#;

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("line.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("line.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("line.json")).unwrap(), Format::Json);
    }

    #[test]
    fn yaml_and_bare_names_are_rejected() {
        for name in ["line.yaml", "line"] {
            let err = detect_format(Path::new(name)).unwrap_err();
            assert!(matches!(err, DataLoadError::UnsupportedFormat { .. }), "{name}");
        }
    }

    #[test]
    fn find_data_file_found_and_missing() {
        let dir = scratch("find");
        assert_eq!(find_data_file(&dir, SCENARIO_FILE).unwrap(), None);

        fs::write(dir.join("scenario.json"), "{}").unwrap();
        assert_eq!(
            find_data_file(&dir, SCENARIO_FILE).unwrap(),
            Some(dir.join("scenario.json"))
        );
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn two_formats_of_one_scenario_conflict() {
        let dir = scratch("conflict");
        fs::write(dir.join("scenario.ron"), "()").unwrap();
        fs::write(dir.join("scenario.json"), "{}").unwrap();
        assert!(matches!(
            find_data_file(&dir, SCENARIO_FILE),
            Err(DataLoadError::ConflictingFormats { .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn json_scenario_builds_machine() {
        let data: ScenarioData = deserialize_str(MACHINE_JSON, Format::Json, Path::new("m.json")).unwrap();
        let engine = into_builder(data).build().unwrap();
        let world = engine.world();
        let m = world.resource_id("m").unwrap();
        assert_eq!(world.resource(m).unwrap().capacity, 1);
        assert!(world.state_id("m:drill:0").is_some());
        let input = world.queue_id("in").unwrap();
        assert_eq!(world.queue(input).unwrap().capacity(), Some(4));
    }

    #[test]
    fn ron_scenario_builds_machine() {
        let ron = r#"(
            config: (seed: 5),
            time_models: [(name: "work", model: (type: "constant", duration: 2.0))],
            processes: [(name: "drill", time_model: "work")],
            queues: [(name: "in"), (name: "out")],
            resources: [(
                name: "m",
                kind: production,
                capacity: 2,
                processes: ["drill"],
                input_queues: ["in"],
                output_queues: ["out"],
            )],
        )"#;
        let data: ScenarioData = deserialize_str(ron, Format::Ron, Path::new("m.ron")).unwrap();
        assert_eq!(data.config.seed, 5);
        let engine = into_builder(data).build().unwrap();
        assert_eq!(engine.config().seed, 5);
        assert!(engine.world().state_id("m:drill:1").is_some());
    }

    #[test]
    fn unknown_reference_surfaces_config_error() {
        let json = r#"{"processes": [{"name": "drill", "time_model": "missing"}]}"#;
        let data: ScenarioData = deserialize_str(json, Format::Json, Path::new("bad.json")).unwrap();
        let dir = scratch("bad_ref");
        let path = dir.join("scenario.json");
        fs::write(&path, json).unwrap();
        assert!(matches!(load_scenario(&path), Err(DataLoadError::Config(_))));
        assert!(into_builder(data).build().is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn product_precedence_map_loads() {
        let json = r#"{
            "time_models": [{"name": "work", "model": {"type": "constant", "duration": 2.0}}],
            "processes": [
                {"name": "cut", "time_model": "work"},
                {"name": "bend", "time_model": "work"},
                {"name": "weld", "time_model": "work"},
                {"name": "move", "time_model": "work", "kind": {"type": "transport"}}
            ],
            "products": [{
                "name": "frame",
                "processes": {"cut": ["weld"], "bend": ["weld"]},
                "transport_process": "move"
            }]
        }"#;
        let data: ScenarioData = deserialize_str(json, Format::Json, Path::new("frame.json")).unwrap();
        let engine = into_builder(data).build().unwrap();
        let world = engine.world();
        let frame = world.product_type(world.product_type_id("frame").unwrap()).unwrap();
        assert_eq!(frame.process_model.len(), 3);
        // Both roots are ready, the join is not.
        assert_eq!(frame.process_model.ready(&[false; 3]), vec![0, 1]);
    }

    #[test]
    fn parse_error_names_file() {
        let result: Result<ScenarioData, _> = deserialize_str("{ not json", Format::Json, Path::new("x.json"));
        match result {
            Err(DataLoadError::Parse { file, .. }) => assert_eq!(file, PathBuf::from("x.json")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn load_scenario_dir_requires_file() {
        let dir = scratch("dir");
        assert!(matches!(
            load_scenario_dir(&dir),
            Err(DataLoadError::MissingRequired { .. })
        ));
        fs::write(dir.join("scenario.json"), MACHINE_JSON).unwrap();
        let mut engine = load_scenario_dir(&dir).unwrap();
        let summary = engine.run_until(SimTime::from_num(10)).unwrap();
        assert_eq!(summary.products_created, 0);
        let _ = fs::remove_dir_all(&dir);
    }
}
