//! Control-point configuration: raw model, loading and validation.
//!
//! The raw configuration is a mapping from control-point name to a table of
//! wiring and parameters, loaded from TOML or JSON. `validate()` turns it
//! into the structures the engine runs on: the required device sets, the
//! per-device construction arguments, the channel-claim tables and the
//! ordered control-point list. Partial configurations are never accepted —
//! any structural violation aborts the whole startup.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::capability::{self, Capability, ControlKind, Direction};
use crate::control::RuntimeState;

/// Input devices are considered silent after this much inactivity unless a
/// control point overrides it with `timeout_ms`.
pub const DEFAULT_INPUT_TIMEOUT: Duration = Duration::from_millis(1000);

// ─── Errors ─────────────────────────────────────────────────────────

/// Configuration validation error. All variants are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("control point '{point}' is missing required field '{field}'")]
    MissingField { point: String, field: &'static str },

    #[error(
        "control point '{point}' claims {direction} channel {channel} on \
         '{uid}' already owned by '{owner}'"
    )]
    ChannelClaimed {
        point: String,
        direction: Direction,
        uid: String,
        channel: u16,
        owner: String,
    },

    #[error("control point '{point}' has unknown thermocouple kind '{kind}' (expected one of B E J K N R S T)")]
    UnknownThermocoupleKind { point: String, kind: String },

    #[error("control point '{point}' has unsupported output mode '{mode}' (expected 'pwm' or 'digital')")]
    UnsupportedOutputMode { point: String, mode: String },

    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error("unrecognised config extension for {0:?} (expected .toml or .json)")]
    UnknownFormat(PathBuf),
}

// ─── Raw model ──────────────────────────────────────────────────────

/// One raw configuration entry, exactly as written by the operator.
///
/// Unknown extra keys are ignored for forward compatibility. Legacy key
/// spellings from earlier rig configs are accepted as aliases.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPoint {
    #[serde(rename = "type")]
    pub type_name: String,
    pub input_device: Option<String>,
    pub input_channel: Option<u16>,
    pub output_device: Option<String>,
    pub output_channel: Option<u16>,
    /// Per-channel output mode, `pwm` or `digital`.
    #[serde(alias = "output_param")]
    pub output_mode: Option<String>,
    pub gradient: Option<f64>,
    #[serde(alias = "x", alias = "y")]
    pub offset: Option<f64>,
    pub permissible_deviation: Option<f64>,
    pub reference_setpoint: Option<f64>,
    pub setpoint: Option<f64>,
    pub kp: Option<f64>,
    pub ki: Option<f64>,
    #[serde(alias = "thermocouple_type")]
    pub tc_type: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Raw configuration: control-point name → entry.
///
/// A `BTreeMap` keeps iteration deterministic; insertion order in the file
/// carries no meaning.
pub type RawConfig = BTreeMap<String, RawPoint>;

/// Load a raw configuration from a TOML string.
pub fn from_toml(content: &str) -> Result<RawConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Parse {
        format: "TOML",
        message: e.to_string(),
    })
}

/// Load a raw configuration from a JSON string.
pub fn from_json(content: &str) -> Result<RawConfig, ConfigError> {
    serde_json::from_str(content).map_err(|e| ConfigError::Parse {
        format: "JSON",
        message: e.to_string(),
    })
}

/// Load a raw configuration from a file, dispatching on the extension.
pub fn load(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => from_toml(&content),
        Some("json") => from_json(&content),
        _ => Err(ConfigError::UnknownFormat(path.to_path_buf())),
    }
}

// ─── Validated model ────────────────────────────────────────────────

/// Output channel mode for the digital/PWM output modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Pwm,
    Digital,
}

/// One typed per-channel construction argument for a device driver.
///
/// Every device gets a single ordered list of these, whatever its type;
/// the driver validates arity and content at bind time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BindArg {
    pub channel: u16,
    pub value: BindValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BindValue {
    OutputMode(OutputMode),
    ThermocoupleKind(char),
}

/// Wire protocol code for a thermocouple probe kind letter.
pub fn thermocouple_code(kind: char) -> Option<u8> {
    match kind.to_ascii_uppercase() {
        'B' => Some(0),
        'E' => Some(1),
        'J' => Some(2),
        'K' => Some(3),
        'N' => Some(4),
        'R' => Some(5),
        'S' => Some(6),
        'T' => Some(7),
        _ => None,
    }
}

/// A reference to one channel on one physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub uid: String,
    pub channel: u16,
}

/// Numeric parameters of a validated control point.
///
/// Fields not meaningful for the point's kind stay at their defaults;
/// kind-specific requirements are enforced during validation.
#[derive(Debug, Clone)]
pub struct PointParams {
    pub gradient: f64,
    pub offset: f64,
    pub permissible_deviation: f64,
    pub reference_setpoint: f64,
    pub setpoint: f64,
    pub kp: f64,
    pub ki: f64,
}

impl Default for PointParams {
    fn default() -> Self {
        Self {
            gradient: 1.0,
            offset: 0.0,
            permissible_deviation: 0.0,
            reference_setpoint: 0.0,
            setpoint: 0.0,
            kp: 0.0,
            ki: 0.0,
        }
    }
}

/// A validated control point. Immutable after validation.
#[derive(Debug, Clone)]
pub struct ControlPoint {
    pub name: String,
    pub type_name: String,
    pub kind: ControlKind,
    pub input: Option<ChannelRef>,
    pub output: Option<ChannelRef>,
    pub params: PointParams,
}

/// Per-direction channel ownership. No two control points may claim the
/// same `(device, channel)` pair in the same direction.
#[derive(Debug, Default)]
pub struct ChannelClaims {
    inputs: BTreeMap<(String, u16), String>,
    outputs: BTreeMap<(String, u16), String>,
}

impl ChannelClaims {
    fn table(&mut self, direction: Direction) -> &mut BTreeMap<(String, u16), String> {
        match direction {
            Direction::Input => &mut self.inputs,
            Direction::Output => &mut self.outputs,
        }
    }

    /// Claim a channel for `point`; a repeat claim is a fatal config error
    /// naming the offending control point.
    pub fn claim(
        &mut self,
        direction: Direction,
        uid: &str,
        channel: u16,
        point: &str,
    ) -> Result<(), ConfigError> {
        let table = self.table(direction);
        if let Some(owner) = table.get(&(uid.to_string(), channel)) {
            return Err(ConfigError::ChannelClaimed {
                point: point.to_string(),
                direction,
                uid: uid.to_string(),
                channel,
                owner: owner.clone(),
            });
        }
        table.insert((uid.to_string(), channel), point.to_string());
        Ok(())
    }

    /// Owning control point of a claimed channel, if any.
    pub fn owner(&self, direction: Direction, uid: &str, channel: u16) -> Option<&str> {
        let table = match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        };
        table.get(&(uid.to_string(), channel)).map(String::as_str)
    }
}

/// Everything the engine needs to start, produced by [`validate`].
#[derive(Debug)]
pub struct ValidatedConfig {
    pub required_inputs: BTreeSet<String>,
    pub required_outputs: BTreeSet<String>,
    /// Per-device ordered construction arguments.
    pub bind_args: BTreeMap<String, Vec<BindArg>>,
    /// Resolved silence timeout per required input device.
    pub input_timeouts: BTreeMap<String, Duration>,
    pub claims: ChannelClaims,
    /// Control points in deterministic evaluation order.
    pub points: Vec<ControlPoint>,
}

impl ValidatedConfig {
    /// Seed one runtime state per control point: no prior deviation, zero
    /// integral.
    pub fn runtime_states(&self) -> BTreeMap<String, RuntimeState> {
        self.points
            .iter()
            .map(|p| (p.name.clone(), RuntimeState::seed()))
            .collect()
    }
}

// ─── Validation ─────────────────────────────────────────────────────

/// Validate a raw configuration.
///
/// Externally-managed types are skipped entirely — they contribute no
/// device requirements, no channel claims, and are never evaluated here.
pub fn validate(raw: &RawConfig) -> Result<ValidatedConfig, ConfigError> {
    let mut required_inputs = BTreeSet::new();
    let mut required_outputs = BTreeSet::new();
    let mut bind_args: BTreeMap<String, Vec<BindArg>> = BTreeMap::new();
    let mut input_timeouts: BTreeMap<String, Duration> = BTreeMap::new();
    let mut claims = ChannelClaims::default();
    let mut points = Vec::new();

    for (name, entry) in raw {
        let (caps, kind) = capability::lookup(&entry.type_name);
        if kind == ControlKind::External {
            debug!(point = %name, type_name = %entry.type_name, "skipping externally managed control point");
            continue;
        }

        let mut input = None;
        let mut output = None;

        if caps.contains(Capability::OUTPUT) {
            let uid = entry
                .output_device
                .clone()
                .ok_or_else(|| missing(name, "output_device"))?;
            let channel = entry
                .output_channel
                .ok_or_else(|| missing(name, "output_channel"))?;
            claims.claim(Direction::Output, &uid, channel, name)?;
            if let Some(mode) = &entry.output_mode {
                let mode = parse_output_mode(name, mode)?;
                bind_args.entry(uid.clone()).or_default().push(BindArg {
                    channel,
                    value: BindValue::OutputMode(mode),
                });
            }
            required_outputs.insert(uid.clone());
            output = Some(ChannelRef { uid, channel });
        }

        if caps.contains(Capability::INPUT) {
            let uid = entry
                .input_device
                .clone()
                .ok_or_else(|| missing(name, "input_device"))?;
            let is_thermocouple = entry.type_name.eq_ignore_ascii_case("thermocouple");
            let channel = match entry.input_channel {
                Some(c) => c,
                // A thermocouple module has a single probe; channel 0 is
                // implied when omitted.
                None if is_thermocouple => {
                    debug!(point = %name, "input_channel omitted, defaulting to 0");
                    0
                }
                None => return Err(missing(name, "input_channel")),
            };
            claims.claim(Direction::Input, &uid, channel, name)?;
            if is_thermocouple {
                let letter = entry.tc_type.as_deref().unwrap_or("N");
                let kind_char = single_letter(letter).ok_or_else(|| {
                    ConfigError::UnknownThermocoupleKind {
                        point: name.clone(),
                        kind: letter.to_string(),
                    }
                })?;
                if thermocouple_code(kind_char).is_none() {
                    return Err(ConfigError::UnknownThermocoupleKind {
                        point: name.clone(),
                        kind: letter.to_string(),
                    });
                }
                bind_args.entry(uid.clone()).or_default().push(BindArg {
                    channel,
                    value: BindValue::ThermocoupleKind(kind_char.to_ascii_uppercase()),
                });
            }
            let timeout = entry
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_INPUT_TIMEOUT);
            input_timeouts
                .entry(uid.clone())
                .and_modify(|t| *t = (*t).min(timeout))
                .or_insert(timeout);
            required_inputs.insert(uid.clone());
            input = Some(ChannelRef { uid, channel });
        }

        let params = resolve_params(name, kind, entry)?;

        points.push(ControlPoint {
            name: name.clone(),
            type_name: entry.type_name.clone(),
            kind,
            input,
            output,
            params,
        });
    }

    Ok(ValidatedConfig {
        required_inputs,
        required_outputs,
        bind_args,
        input_timeouts,
        claims,
        points,
    })
}

fn missing(point: &str, field: &'static str) -> ConfigError {
    ConfigError::MissingField {
        point: point.to_string(),
        field,
    }
}

fn parse_output_mode(point: &str, mode: &str) -> Result<OutputMode, ConfigError> {
    match mode.to_ascii_lowercase().as_str() {
        "pwm" => Ok(OutputMode::Pwm),
        "digital" => Ok(OutputMode::Digital),
        _ => Err(ConfigError::UnsupportedOutputMode {
            point: point.to_string(),
            mode: mode.to_string(),
        }),
    }
}

fn single_letter(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

/// Pull the kind-specific parameters out of a raw entry, enforcing the
/// ones its evaluator cannot run without.
fn resolve_params(
    name: &str,
    kind: ControlKind,
    entry: &RawPoint,
) -> Result<PointParams, ConfigError> {
    let mut params = PointParams {
        gradient: entry.gradient.unwrap_or(1.0),
        offset: entry.offset.unwrap_or(0.0),
        ..PointParams::default()
    };
    match kind {
        ControlKind::Deviation => {
            params.permissible_deviation = entry
                .permissible_deviation
                .ok_or_else(|| missing(name, "permissible_deviation"))?;
            params.reference_setpoint = entry
                .reference_setpoint
                .ok_or_else(|| missing(name, "reference_setpoint"))?;
        }
        ControlKind::PiHeater => {
            params.setpoint = entry.setpoint.ok_or_else(|| missing(name, "setpoint"))?;
            params.kp = entry.kp.ok_or_else(|| missing(name, "kp"))?;
            params.ki = entry.ki.ok_or_else(|| missing(name, "ki"))?;
        }
        _ => {}
    }
    Ok(params)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_toml(content: &str) -> Result<ValidatedConfig, ConfigError> {
        validate(&from_toml(content).unwrap())
    }

    #[test]
    fn flow_scenario_validates() {
        let cfg = validate_toml(
            r#"
[flow_a]
type = "linear"
input_device = "A"
input_channel = 0
output_device = "B"
output_channel = 1
gradient = 0.2
offset = 50.0
"#,
        )
        .unwrap();
        assert_eq!(cfg.required_inputs.iter().collect::<Vec<_>>(), ["A"]);
        assert_eq!(cfg.required_outputs.iter().collect::<Vec<_>>(), ["B"]);
        let p = &cfg.points[0];
        assert_eq!(p.kind, ControlKind::Linear);
        assert_eq!(p.params.gradient, 0.2);
        assert_eq!(p.params.offset, 50.0);
        assert_eq!(cfg.claims.owner(Direction::Input, "A", 0), Some("flow_a"));
        assert_eq!(cfg.claims.owner(Direction::Output, "B", 1), Some("flow_a"));
    }

    #[test]
    fn legacy_offset_alias_accepted() {
        let raw = from_json(
            r#"{
                "mfc_2": {
                    "type": "mfc",
                    "input_device": "23S1",
                    "input_channel": 0,
                    "output_device": "TkW",
                    "output_channel": 1,
                    "output_param": "pwm",
                    "gradient": 0.2,
                    "x": 50
                }
            }"#,
        )
        .unwrap();
        let cfg = validate(&raw).unwrap();
        assert_eq!(cfg.points[0].params.offset, 50.0);
        assert_eq!(
            cfg.bind_args["TkW"],
            [BindArg {
                channel: 1,
                value: BindValue::OutputMode(OutputMode::Pwm)
            }]
        );
    }

    #[test]
    fn duplicate_output_claim_rejected_naming_second_point() {
        let err = validate_toml(
            r#"
[valve_a]
type = "valve"
output_device = "R1"
output_channel = 0

[valve_b]
type = "valve"
output_device = "R1"
output_channel = 0
"#,
        )
        .unwrap_err();
        match err {
            ConfigError::ChannelClaimed {
                point,
                owner,
                direction,
                ..
            } => {
                assert_eq!(point, "valve_b");
                assert_eq!(owner, "valve_a");
                assert_eq!(direction, Direction::Output);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn same_channel_in_opposite_directions_is_allowed() {
        // Input claims and output claims are independent namespaces.
        let cfg = validate_toml(
            r#"
[reader]
type = "pressure"
input_device = "X"
input_channel = 0

[driver]
type = "valve"
output_device = "X"
output_channel = 0
"#,
        )
        .unwrap();
        assert_eq!(cfg.points.len(), 2);
        assert!(cfg.required_inputs.contains("X"));
        assert!(cfg.required_outputs.contains("X"));
    }

    #[test]
    fn unknown_type_requires_both_directions() {
        let err = validate_toml(
            r#"
[mystery]
type = "flowmeter_typo"
input_device = "A"
input_channel = 0
"#,
        )
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingField { ref field, .. } if *field == "output_device"),
            "unexpected error: {err}"
        );

        let err = validate_toml(
            r#"
[mystery]
type = "flowmeter_typo"
output_device = "B"
output_channel = 0
"#,
        )
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingField { ref field, .. } if *field == "input_device"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn external_types_contribute_nothing() {
        let cfg = validate_toml(
            r#"
[pump]
type = "modbus_pump"

[bridge]
type = "ext_input_output"
input_device = "ignored"
"#,
        )
        .unwrap();
        assert!(cfg.points.is_empty());
        assert!(cfg.required_inputs.is_empty());
        assert!(cfg.required_outputs.is_empty());
        assert!(cfg.bind_args.is_empty());
    }

    #[test]
    fn thermocouple_channel_defaults_to_zero() {
        let cfg = validate_toml(
            r#"
[reactor_temp]
type = "thermocouple"
input_device = "T1"
tc_type = "K"
"#,
        )
        .unwrap();
        let p = &cfg.points[0];
        assert_eq!(p.input.as_ref().unwrap().channel, 0);
        assert_eq!(
            cfg.bind_args["T1"],
            [BindArg {
                channel: 0,
                value: BindValue::ThermocoupleKind('K')
            }]
        );
    }

    #[test]
    fn unknown_thermocouple_kind_is_fatal() {
        let err = validate_toml(
            r#"
[reactor_temp]
type = "thermocouple"
input_device = "T1"
tc_type = "Q"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownThermocoupleKind { .. }));
    }

    #[test]
    fn bad_output_mode_is_fatal() {
        let err = validate_toml(
            r#"
[heater]
type = "direct_heat"
output_device = "D1"
output_channel = 2
output_mode = "default"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedOutputMode { ref mode, .. } if mode == "default"));
    }

    #[test]
    fn deviation_requires_reference_setpoint() {
        let err = validate_toml(
            r#"
[mfc_watch]
type = "deviation_alarm"
input_device = "A"
input_channel = 0
output_device = "B"
output_channel = 0
permissible_deviation = 0.1
"#,
        )
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingField { ref field, .. } if *field == "reference_setpoint")
        );
    }

    #[test]
    fn pi_heater_requires_gains_and_setpoint() {
        let err = validate_toml(
            r#"
[oven]
type = "pi_heater"
input_device = "T1"
input_channel = 0
output_device = "D1"
output_channel = 1
setpoint = 200.0
kp = 0.018
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field, .. } if *field == "ki"));
    }

    #[test]
    fn per_point_timeout_resolves_to_minimum() {
        let cfg = validate_toml(
            r#"
[fast]
type = "pressure"
input_device = "P1"
input_channel = 0
timeout_ms = 250

[slow]
type = "pressure"
input_device = "P1"
input_channel = 1
"#,
        )
        .unwrap();
        assert_eq!(cfg.input_timeouts["P1"], Duration::from_millis(250));
    }

    #[test]
    fn unknown_extra_keys_are_ignored() {
        let cfg = validate_toml(
            r#"
[probe]
type = "pressure"
input_device = "P1"
input_channel = 0
display_color = "teal"
"#,
        );
        assert!(cfg.is_ok());
    }

    #[test]
    fn runtime_states_seeded_per_point() {
        let cfg = validate_toml(
            r#"
[probe]
type = "pressure"
input_device = "P1"
input_channel = 0

[valve_1]
type = "valve"
output_device = "R1"
output_channel = 0
"#,
        )
        .unwrap();
        let states = cfg.runtime_states();
        assert_eq!(states.len(), 2);
        let s = &states["probe"];
        assert!(s.last_deviation.is_none());
        assert_eq!(s.integral, 0.0);
    }

    #[test]
    fn load_dispatches_on_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let toml_path = dir.path().join("rig.toml");
        std::fs::write(
            &toml_path,
            "[p]\ntype = \"pressure\"\ninput_device = \"P\"\ninput_channel = 0\n",
        )
        .unwrap();
        assert!(load(&toml_path).is_ok());

        let json_path = dir.path().join("rig.json");
        std::fs::write(
            &json_path,
            r#"{"p": {"type": "pressure", "input_device": "P", "input_channel": 0}}"#,
        )
        .unwrap();
        assert!(load(&json_path).is_ok());

        let other = dir.path().join("rig.yaml");
        std::fs::write(&other, "p:\n").unwrap();
        assert!(matches!(load(&other), Err(ConfigError::UnknownFormat(_))));
    }
}
