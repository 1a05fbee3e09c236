//! Loads whole scenario files from disk and runs them.

use prodsim_core::fixed::SimTime;
use prodsim_data::{DataLoadError, load_scenario, load_scenario_dir};
use std::fs;
use std::path::{Path, PathBuf};

fn make_test_dir(suffix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("prodsim_files_{suffix}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn cleanup(dir: &Path) {
    let _ = fs::remove_dir_all(dir);
}

const LINE_TOML: &str = r#"
[config]
seed = 7

[[time_models]]
name = "arrival"
model = { type = "constant", duration = 5.0 }

[[time_models]]
name = "work"
model = { type = "constant", duration = 2.0 }

[[time_models]]
name = "drive"
model = { type = "distance", speed = 10.0 }

[[processes]]
name = "drill"
time_model = "work"

[[processes]]
name = "move"
time_model = "drive"
kind = { type = "transport" }

[[queues]]
name = "src_out"

[[queues]]
name = "m_in"
capacity = 2

[[queues]]
name = "m_out"
capacity = 2

[[queues]]
name = "sink_in"

[[resources]]
name = "m"
kind = "production"
position = [5.0, 0.0]
processes = ["drill"]
input_queues = ["m_in"]
output_queues = ["m_out"]

[[resources]]
name = "agv"
kind = "transport"
processes = ["move"]

[[products]]
name = "widget"
processes = ["drill"]
transport_process = "move"

[[sources]]
name = "src"
product = "widget"
time_model = "arrival"
output_queues = ["src_out"]
routing = "fifo"

[[sinks]]
name = "sink"
product = "widget"
position = [10.0, 0.0]
input_queues = ["sink_in"]
"#;

const LINE_JSON: &str = r#"{
    "config": {"seed": 7},
    "time_models": [
        {"name": "arrival", "model": {"type": "constant", "duration": 5.0}},
        {"name": "work", "model": {"type": "constant", "duration": 2.0}},
        {"name": "drive", "model": {"type": "distance", "speed": 10.0}}
    ],
    "processes": [
        {"name": "drill", "time_model": "work"},
        {"name": "move", "time_model": "drive", "kind": {"type": "transport"}}
    ],
    "queues": [
        {"name": "src_out"},
        {"name": "m_in", "capacity": 2},
        {"name": "m_out", "capacity": 2},
        {"name": "sink_in"}
    ],
    "resources": [
        {"name": "m", "kind": "production", "position": [5.0, 0.0], "processes": ["drill"],
         "input_queues": ["m_in"], "output_queues": ["m_out"]},
        {"name": "agv", "kind": "transport", "processes": ["move"]}
    ],
    "products": [{"name": "widget", "processes": ["drill"], "transport_process": "move"}],
    "sources": [{"name": "src", "product": "widget", "time_model": "arrival",
                 "output_queues": ["src_out"], "routing": "fifo"}],
    "sinks": [{"name": "sink", "product": "widget", "position": [10.0, 0.0],
               "input_queues": ["sink_in"]}]
}"#;

#[test]
fn toml_line_runs_to_completion() {
    let dir = make_test_dir("toml_line");
    let path = dir.join("line.toml");
    fs::write(&path, LINE_TOML).unwrap();

    let mut engine = load_scenario(&path).unwrap();
    assert_eq!(engine.config().seed, 7);
    let summary = engine.run_until(SimTime::from_num(100)).unwrap();
    assert_eq!(summary.products_created, 20);
    assert!(summary.products_finished >= 15);
    assert_eq!(summary.products_failed, 0);
    cleanup(&dir);
}

#[test]
fn toml_and_json_describe_the_same_run() {
    let dir = make_test_dir("same_run");
    fs::create_dir_all(dir.join("a")).unwrap();
    fs::create_dir_all(dir.join("b")).unwrap();
    fs::write(dir.join("a").join("scenario.toml"), LINE_TOML).unwrap();
    fs::write(dir.join("b").join("scenario.json"), LINE_JSON).unwrap();

    let mut from_toml = load_scenario_dir(&dir.join("a")).unwrap();
    let mut from_json = load_scenario_dir(&dir.join("b")).unwrap();
    from_toml.run_until(SimTime::from_num(60)).unwrap();
    from_json.run_until(SimTime::from_num(60)).unwrap();
    assert_eq!(from_toml.trace_hash(), from_json.trace_hash());
    cleanup(&dir);
}

#[test]
fn missing_file_is_io_error() {
    let result = load_scenario(Path::new("/definitely/not/here/scenario.json"));
    assert!(matches!(result, Err(DataLoadError::Io(_))));
}
