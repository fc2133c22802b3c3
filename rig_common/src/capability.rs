//! Control-point type taxonomy.
//!
//! Maps a control-point `type` string to the capabilities it must be wired
//! with and to the evaluator that runs it every tick. The table is a static
//! constant so the set of supported types is visible and testable.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Wiring a control-point type demands from the configuration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capability: u8 {
        /// The type reads from an input device channel.
        const INPUT = 0b01;
        /// The type commands an output device channel.
        const OUTPUT = 0b10;
    }
}

/// Which evaluator runs a control point each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Input only; the value is exposed for consumers, no per-tick rule.
    Monitor,
    /// `scaled = (reading - offset) * gradient`, written to the output channel.
    Linear,
    /// Alarm when input and commanded output diverge beyond tolerance.
    Deviation,
    /// PI duty-cycle control of a heater, written as a PWM command.
    PiHeater,
    /// Output only; values are commanded externally and re-pushed every tick.
    Actuate,
    /// Delegated to another protocol bridge; never enters this engine.
    External,
}

/// Direction of a channel claim or a device driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// One row of the type table.
#[derive(Debug, Clone, Copy)]
pub struct TypeSpec {
    pub name: &'static str,
    pub caps: Capability,
    pub kind: ControlKind,
}

const BOTH: Capability = Capability::INPUT.union(Capability::OUTPUT);

/// Supported control-point types.
pub const TYPE_TABLE: &[TypeSpec] = &[
    TypeSpec { name: "flow_meter", caps: Capability::INPUT, kind: ControlKind::Monitor },
    TypeSpec { name: "pressure", caps: Capability::INPUT, kind: ControlKind::Monitor },
    TypeSpec { name: "thermocouple", caps: Capability::INPUT, kind: ControlKind::Monitor },
    TypeSpec { name: "analytic", caps: Capability::INPUT, kind: ControlKind::Monitor },
    TypeSpec { name: "linear", caps: BOTH, kind: ControlKind::Linear },
    TypeSpec { name: "mfc", caps: BOTH, kind: ControlKind::Linear },
    TypeSpec { name: "deviation_alarm", caps: BOTH, kind: ControlKind::Deviation },
    TypeSpec { name: "pi_heater", caps: BOTH, kind: ControlKind::PiHeater },
    TypeSpec { name: "valve", caps: Capability::OUTPUT, kind: ControlKind::Actuate },
    TypeSpec { name: "direct_heat", caps: Capability::OUTPUT, kind: ControlKind::Actuate },
    TypeSpec { name: "ext_input", caps: Capability::empty(), kind: ControlKind::External },
    TypeSpec { name: "ext_output", caps: Capability::empty(), kind: ControlKind::External },
    TypeSpec { name: "ext_input_output", caps: Capability::empty(), kind: ControlKind::External },
    TypeSpec { name: "modbus_pump", caps: Capability::empty(), kind: ControlKind::External },
    TypeSpec { name: "setpoint", caps: Capability::empty(), kind: ControlKind::External },
];

/// Resolve a type name to its capabilities and evaluator.
///
/// Unknown names demand full wiring: a silently misspelled type still has to
/// name both its input and output before the configuration validates, and is
/// run as a passthrough scaling if it ever does.
pub fn lookup(name: &str) -> (Capability, ControlKind) {
    for spec in TYPE_TABLE {
        if spec.name.eq_ignore_ascii_case(name) {
            return (spec.caps, spec.kind);
        }
    }
    (BOTH, ControlKind::Linear)
}
