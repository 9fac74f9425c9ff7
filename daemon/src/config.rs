//! Version-4 configuration document.
//!
//! One or more JSON files are merged root node by root node (a root node may
//! appear in only one file), checked against the schema via serde with
//! unknown keys rejected, then cross-validated into the core configuration.
//! Every failure here is fatal before the tick loop starts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use controller_core::bus::{InputAction, InputConfig, RecallType};
use controller_core::calls::{CallWeights, RandomConfig};
use controller_core::phase::{FlashMode, PhaseId, PhaseTiming};
use controller_core::runtime::{ControlMode, ControllerConfig, PhaseConfig};
use controller_core::timing::DEFAULT_TICK_SIZE;

/// The only schema version this build accepts.
pub const CONFIG_SCHEMA_VERSION: u32 = 4;

/// Phase count bounds imposed by the v4 schema.
const MIN_SCHEMA_PHASES: usize = 2;
const MAX_SCHEMA_PHASES: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration files given")]
    NoPaths,
    #[error("configuration file {0} not found")]
    NotFound(PathBuf),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{0} does not hold a JSON object")]
    NotAnObject(PathBuf),
    #[error("{path} has no version key")]
    NoVersion { path: PathBuf },
    #[error("unsupported schema version {0} (this build speaks version 4)")]
    UnknownVersion(u64),
    #[error("root node \"{node}\" redefined by {path}")]
    DuplicateRootNode { node: String, path: PathBuf },
    #[error("schema violation: {0}")]
    Schema(serde_json::Error),
    #[error("phase count {0} outside {MIN_SCHEMA_PHASES}..={MAX_SCHEMA_PHASES}")]
    PhaseCount(usize),
    #[error("invalid configuration: {0}")]
    Semantic(controller_core::runtime::ConfigError),
}

/// The merged, schema-checked document.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    pub version: u32,
    pub device: DeviceNode,
    pub network: NetworkNode,
    pub bus: BusNode,
    pub init: InitNode,
    #[serde(rename = "random-actuation")]
    pub random_actuation: RandomNode,
    pub idling: IdlingNode,
    #[serde(rename = "default-timing")]
    pub default_timing: TimingNode,
    pub phases: Vec<PhaseNode>,
    pub rings: Vec<Vec<u8>>,
    pub barriers: Vec<Vec<u8>>,
    #[serde(default)]
    pub inputs: Vec<InputNode>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceNode {
    pub name: String,
    #[serde(rename = "tick-size", default)]
    pub tick_size: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkNode {
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusNode {
    pub enabled: bool,
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub baud: Option<u32>,
    #[serde(rename = "response-attempts", default = "default_response_attempts")]
    pub response_attempts: u8,
}

fn default_response_attempts() -> u8 {
    3
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitNode {
    pub mode: ModeName,
    #[serde(rename = "recall-all", default)]
    pub recall_all: bool,
    #[serde(rename = "cet-delay", default)]
    pub cet_delay: f32,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeName {
    Off,
    Cet,
    Cxt,
    LsFlash,
    Normal,
}

impl From<ModeName> for ControlMode {
    fn from(name: ModeName) -> Self {
        match name {
            ModeName::Off => ControlMode::Off,
            ModeName::Cet => ControlMode::Cet,
            ModeName::Cxt => ControlMode::Cxt,
            ModeName::LsFlash => ControlMode::LsFlash,
            ModeName::Normal => ControlMode::Normal,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RandomNode {
    pub min: u32,
    pub max: u32,
    pub delay: u32,
    pub seed: u64,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdlingNode {
    pub phases: Vec<u8>,
}

/// Controller-wide interval defaults. `min-stop` is optional in v4 and means
/// no post-clearance lockout when absent.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingNode {
    pub rclr: f32,
    pub caution: f32,
    pub extend: f32,
    pub go: f32,
    pub pclr: f32,
    pub walk: f32,
    #[serde(rename = "max-go")]
    pub max_go: f32,
    #[serde(rename = "min-stop", default)]
    pub min_stop: f32,
}

/// Per-phase overrides; any key absent falls back to the default table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingOverrideNode {
    pub rclr: Option<f32>,
    pub caution: Option<f32>,
    pub extend: Option<f32>,
    pub go: Option<f32>,
    pub pclr: Option<f32>,
    pub walk: Option<f32>,
    #[serde(rename = "max-go")]
    pub max_go: Option<f32>,
    #[serde(rename = "min-stop")]
    pub min_stop: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseNode {
    pub id: u8,
    #[serde(default)]
    pub timing: Option<TimingOverrideNode>,
    #[serde(rename = "flash-mode")]
    pub flash_mode: FlashModeName,
    #[serde(rename = "load-switches")]
    pub load_switches: LoadSwitchesNode,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlashModeName {
    Red,
    Yellow,
}

impl From<FlashModeName> for FlashMode {
    fn from(name: FlashModeName) -> Self {
        match name {
            FlashModeName::Red => FlashMode::Red,
            FlashModeName::Yellow => FlashMode::Yellow,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadSwitchesNode {
    pub vehicle: u8,
    #[serde(default)]
    pub ped: Option<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputNode {
    pub id: u8,
    pub action: ActionName,
    #[serde(rename = "recall-type", default)]
    pub recall_type: Option<RecallTypeName>,
    #[serde(rename = "recall-delay", default)]
    pub recall_delay: f32,
    #[serde(rename = "ped-service", default)]
    pub ped_service: bool,
    #[serde(default)]
    pub targets: Vec<u8>,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionName {
    Ignore,
    Recall,
    Preemption,
    TimeFreeze,
    TechFlash,
    CallInhibit,
    ExtendInhibit,
    PedClearInhibit,
    Dark,
    RandomRecallInhibit,
}

impl From<ActionName> for InputAction {
    fn from(name: ActionName) -> Self {
        match name {
            ActionName::Ignore => InputAction::Ignore,
            ActionName::Recall => InputAction::Recall,
            ActionName::Preemption => InputAction::Preemption,
            ActionName::TimeFreeze => InputAction::TimeFreeze,
            ActionName::TechFlash => InputAction::TechFlash,
            ActionName::CallInhibit => InputAction::CallInhibit,
            ActionName::ExtendInhibit => InputAction::ExtendInhibit,
            ActionName::PedClearInhibit => InputAction::PedClearInhibit,
            ActionName::Dark => InputAction::Dark,
            ActionName::RandomRecallInhibit => InputAction::RandomRecallInhibit,
        }
    }
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecallTypeName {
    Maintain,
    Latch,
}

impl From<RecallTypeName> for RecallType {
    fn from(name: RecallTypeName) -> Self {
        match name {
            RecallTypeName::Maintain => RecallType::Maintain,
            RecallTypeName::Latch => RecallType::Latch,
        }
    }
}

/// Loads and merges configuration files, then schema-checks the result.
pub fn load(paths: &[PathBuf]) -> Result<ConfigDocument, ConfigError> {
    if paths.is_empty() {
        return Err(ConfigError::NoPaths);
    }

    let mut merged = serde_json::Map::new();
    let mut version: Option<u64> = None;

    for path in paths {
        let object = read_object(path)?;

        let file_version = object
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| ConfigError::NoVersion { path: path.clone() })?;
        if file_version != u64::from(CONFIG_SCHEMA_VERSION) {
            return Err(ConfigError::UnknownVersion(file_version));
        }
        version = Some(file_version);

        for (node, value) in object {
            if node != "version" && merged.contains_key(&node) {
                return Err(ConfigError::DuplicateRootNode {
                    node,
                    path: path.clone(),
                });
            }
            merged.insert(node, value);
        }
    }

    debug_assert!(version.is_some());
    serde_json::from_value(Value::Object(merged)).map_err(ConfigError::Schema)
}

fn read_object(path: &Path) -> Result<serde_json::Map<String, Value>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Object(object) => Ok(object),
        _ => Err(ConfigError::NotAnObject(path.to_path_buf())),
    }
}

impl ConfigDocument {
    /// The effective control clock period.
    pub fn tick_size(&self) -> f32 {
        self.device.tick_size.unwrap_or(DEFAULT_TICK_SIZE)
    }

    /// Cross-validates and converts into the core configuration.
    pub fn to_controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        if self.phases.len() < MIN_SCHEMA_PHASES || self.phases.len() > MAX_SCHEMA_PHASES {
            return Err(ConfigError::PhaseCount(self.phases.len()));
        }

        let defaults = &self.default_timing;
        let mut phases = heapless::Vec::new();
        for node in &self.phases {
            let timing = merge_timing(defaults, node.timing.as_ref());
            phases
                .push(PhaseConfig {
                    id: node.id,
                    flash_mode: node.flash_mode.into(),
                    timing,
                    vehicle_switch: node.load_switches.vehicle,
                    ped_switch: node.load_switches.ped,
                })
                .map_err(|_| ConfigError::PhaseCount(self.phases.len()))?;
        }

        let mut rings = heapless::Vec::new();
        for members in &self.rings {
            let mut ring = heapless::Vec::new();
            for id in members {
                ring.push(PhaseId::new(*id)).map_err(|_| {
                    ConfigError::Semantic(controller_core::runtime::ConfigError::RingCount)
                })?;
            }
            rings.push(ring).map_err(|_| {
                ConfigError::Semantic(controller_core::runtime::ConfigError::RingCount)
            })?;
        }
        let mut barriers = heapless::Vec::new();
        for members in &self.barriers {
            let mut barrier = heapless::Vec::new();
            for id in members {
                barrier.push(PhaseId::new(*id)).map_err(|_| {
                    ConfigError::Semantic(controller_core::runtime::ConfigError::BarrierCount)
                })?;
            }
            barriers.push(barrier).map_err(|_| {
                ConfigError::Semantic(controller_core::runtime::ConfigError::BarrierCount)
            })?;
        }

        let mut idle_phases = heapless::Vec::new();
        for id in &self.idling.phases {
            idle_phases.push(PhaseId::new(*id)).map_err(|_| {
                ConfigError::Semantic(controller_core::runtime::ConfigError::UnknownIdlePhase {
                    id: *id,
                })
            })?;
        }

        let mut inputs = heapless::Vec::new();
        for node in &self.inputs {
            let mut targets = heapless::Vec::new();
            for id in &node.targets {
                targets.push(PhaseId::new(*id)).map_err(|_| {
                    ConfigError::Semantic(
                        controller_core::runtime::ConfigError::UnknownInputTarget {
                            slot: node.id,
                            id: *id,
                        },
                    )
                })?;
            }
            inputs
                .push(InputConfig {
                    slot: node.id,
                    action: node.action.into(),
                    recall_type: node.recall_type.map(Into::into),
                    recall_delay: node.recall_delay,
                    ped_service: node.ped_service,
                    targets,
                })
                .map_err(|_| {
                    ConfigError::Semantic(
                        controller_core::runtime::ConfigError::DuplicateInputSlot {
                            slot: node.id,
                        },
                    )
                })?;
        }

        let random = self.random_actuation.enabled.then(|| RandomConfig {
            min: self.random_actuation.min,
            max: self.random_actuation.max,
            delay: self.random_actuation.delay,
            seed: self.random_actuation.seed,
        });

        let config = ControllerConfig {
            tick_size: self.tick_size(),
            init_mode: self.init.mode.into(),
            recall_all: self.init.recall_all,
            cet_delay: self.init.cet_delay,
            idle_phases,
            phases,
            rings,
            barriers,
            inputs,
            random,
            weights: CallWeights::default(),
        };
        config.validate().map_err(ConfigError::Semantic)?;
        Ok(config)
    }
}

fn merge_timing(defaults: &TimingNode, overrides: Option<&TimingOverrideNode>) -> PhaseTiming {
    let base = PhaseTiming {
        min_stop: defaults.min_stop,
        rclr: defaults.rclr,
        caution: defaults.caution,
        extend: defaults.extend,
        go: defaults.go,
        pclr: defaults.pclr,
        walk: defaults.walk,
        max_go: defaults.max_go,
    };
    let Some(tweaks) = overrides else {
        return base;
    };
    PhaseTiming {
        min_stop: tweaks.min_stop.unwrap_or(base.min_stop),
        rclr: tweaks.rclr.unwrap_or(base.rclr),
        caution: tweaks.caution.unwrap_or(base.caution),
        extend: tweaks.extend.unwrap_or(base.extend),
        go: tweaks.go.unwrap_or(base.go),
        pclr: tweaks.pclr.unwrap_or(base.pclr),
        walk: tweaks.walk.unwrap_or(base.walk),
        max_go: tweaks.max_go.unwrap_or(base.max_go),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn document() -> &'static str {
        r#"{
            "version": 4,
            "device": {"name": "test-intersection"},
            "network": {"enabled": false},
            "bus": {"enabled": false},
            "init": {"mode": "normal", "recall-all": true, "cet-delay": 4.0},
            "random-actuation": {"min": 3, "max": 10, "delay": 5, "seed": 42, "enabled": false},
            "idling": {"phases": [2, 6]},
            "default-timing": {
                "rclr": 1.0, "caution": 4.0, "extend": 2.5,
                "go": 12.5, "pclr": 5.0, "walk": 7.0, "max-go": 30.0
            },
            "phases": [
                {"id": 1, "flash-mode": "yellow", "load-switches": {"vehicle": 1}},
                {"id": 2, "flash-mode": "red", "load-switches": {"vehicle": 2, "ped": 9},
                 "timing": {"go": 15.0}},
                {"id": 3, "flash-mode": "yellow", "load-switches": {"vehicle": 3}},
                {"id": 4, "flash-mode": "red", "load-switches": {"vehicle": 4, "ped": 10}},
                {"id": 5, "flash-mode": "yellow", "load-switches": {"vehicle": 5}},
                {"id": 6, "flash-mode": "red", "load-switches": {"vehicle": 6, "ped": 11}},
                {"id": 7, "flash-mode": "yellow", "load-switches": {"vehicle": 7}},
                {"id": 8, "flash-mode": "red", "load-switches": {"vehicle": 8, "ped": 12}}
            ],
            "rings": [[1, 2, 3, 4], [5, 6, 7, 8]],
            "barriers": [[1, 2, 5, 6], [3, 4, 7, 8]],
            "inputs": [
                {"id": 1, "action": "recall", "recall-type": "maintain", "targets": [2]},
                {"id": 2, "action": "time-freeze", "targets": []}
            ]
        }"#
    }

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("controller-config-{}-{name}", std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn full_document_round_trips_into_core_config() {
        let path = write_temp("full.json", document());
        let document = load(&[path.clone()]).unwrap();
        fs::remove_file(&path).ok();

        let config = document.to_controller_config().unwrap();
        assert_eq!(config.phases.len(), 8);
        assert_eq!(config.tick_size, DEFAULT_TICK_SIZE);
        assert!(config.recall_all);
        assert!(config.random.is_none());

        // Phase 2 override applied on top of the defaults.
        let phase2 = config.phases.iter().find(|p| p.id == 2).unwrap();
        assert_eq!(phase2.timing.go, 15.0);
        assert_eq!(phase2.timing.caution, 4.0);
        assert_eq!(phase2.ped_switch, Some(9));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let doctored = document().replace("\"device\":", "\"vendor-blob\": {}, \"device\":");
        let path = write_temp("unknown.json", &doctored);
        let result = load(&[path.clone()]);
        fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ConfigError::Schema(_))));
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let doctored = document().replace("\"version\": 4", "\"version\": 3");
        let path = write_temp("v3.json", &doctored);
        let result = load(&[path.clone()]);
        fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ConfigError::UnknownVersion(3))));
    }

    #[test]
    fn duplicate_root_nodes_across_files_are_fatal() {
        let first = write_temp("merge-a.json", document());
        let second = write_temp(
            "merge-b.json",
            r#"{"version": 4, "device": {"name": "duplicate"}}"#,
        );
        let result = load(&[first.clone(), second.clone()]);
        fs::remove_file(&first).ok();
        fs::remove_file(&second).ok();
        assert!(matches!(result, Err(ConfigError::DuplicateRootNode { .. })));
    }

    #[test]
    fn partition_mismatch_is_caught_semantically() {
        let doctored = document().replace("[3, 4, 7, 8]", "[3, 4, 7, 1]");
        let path = write_temp("partition.json", &doctored);
        let document = load(&[path.clone()]).unwrap();
        fs::remove_file(&path).ok();
        assert!(matches!(
            document.to_controller_config(),
            Err(ConfigError::Semantic(_))
        ));
    }
}
