//! Device driver shims and the static type table.
//!
//! Every supported device type has one row in [`DRIVER_TABLE`] mapping its
//! bus type code to a capability direction and a constructor. The table is
//! built once at compile time — the set of supported device types is a
//! visible, testable constant, with no runtime type scanning.

pub mod inputs;
pub mod outputs;

use std::sync::Arc;

use thiserror::Error;

use rig_common::capability::Direction;
use rig_common::config::BindArg;

use crate::binding::{OutputValue, ValueSink};
use crate::bus::{Bus, BusError};

// ─── Type codes ─────────────────────────────────────────────────────

pub const TYPE_MASTER: u16 = 13;
pub const TYPE_STEPPER: u16 = 19;
pub const TYPE_DUAL_RELAY: u16 = 284;
pub const TYPE_DIGITAL_IN_4: u16 = 2100;
pub const TYPE_THERMOCOUPLE: u16 = 2109;
pub const TYPE_ANALOG_OUT: u16 = 2116;
pub const TYPE_DUAL_CURRENT_IN: u16 = 2120;
pub const TYPE_DUAL_ANALOG_IN: u16 = 2121;
pub const TYPE_DIGITAL_OUT_4: u16 = 2124;

// ─── Contracts ──────────────────────────────────────────────────────

/// Binding failure. Fatal during startup; logged and retried on a runtime
/// reconnect.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("device '{uid}' has no registered driver for type code {type_code}")]
    UnknownTypeCode { uid: String, type_code: u16 },

    #[error("device '{uid}' given invalid construction arguments: {reason}")]
    BadArgs { uid: String, reason: String },

    #[error("device '{uid}' is not present on the bus")]
    NotPresent { uid: String },

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Uniform push interface over every output device variant.
///
/// Each variant knows how to translate the value buffer into its own write
/// commands; no capability probing happens at push time.
pub trait OutputDevice: Send {
    fn kind(&self) -> &'static str;

    /// Push the whole value buffer to the device.
    fn apply(&mut self, values: &[OutputValue]) -> Result<(), BusError>;

    /// Bring the device to an immediate stop. Most variants need nothing
    /// beyond a zeroed `apply`.
    fn halt(&mut self) -> Result<(), BusError> {
        Ok(())
    }
}

/// Constructor for an input device: registers the value callback with the
/// transport so readings flow into the binding's sink.
pub type InputCtor = fn(&str, &Arc<dyn Bus>, &[BindArg], ValueSink) -> Result<(), BindError>;

/// Constructor for an output device: returns the driver shim plus the
/// initial value buffer (one entry per channel, variant per channel mode).
pub type OutputCtor =
    fn(&str, Arc<dyn Bus>, &[BindArg]) -> Result<(Box<dyn OutputDevice>, Vec<OutputValue>), BindError>;

pub enum Constructor {
    Input(InputCtor),
    Output(OutputCtor),
}

/// One row of the driver table.
pub struct DriverSpec {
    pub type_code: u16,
    pub name: &'static str,
    pub direction: Direction,
    pub channels: usize,
    pub construct: Constructor,
}

/// Supported device types, fixed at compile time.
pub const DRIVER_TABLE: &[DriverSpec] = &[
    DriverSpec {
        type_code: TYPE_DUAL_ANALOG_IN,
        name: "dual_analog_in",
        direction: Direction::Input,
        channels: 2,
        construct: Constructor::Input(inputs::bind_dual_analog_in),
    },
    DriverSpec {
        type_code: TYPE_DUAL_CURRENT_IN,
        name: "dual_current_in",
        direction: Direction::Input,
        channels: 2,
        construct: Constructor::Input(inputs::bind_dual_current_in),
    },
    DriverSpec {
        type_code: TYPE_THERMOCOUPLE,
        name: "thermocouple",
        direction: Direction::Input,
        channels: 1,
        construct: Constructor::Input(inputs::bind_thermocouple),
    },
    DriverSpec {
        type_code: TYPE_DIGITAL_IN_4,
        name: "digital_in_4",
        direction: Direction::Input,
        channels: 4,
        construct: Constructor::Input(inputs::bind_digital_in_4),
    },
    DriverSpec {
        type_code: TYPE_DUAL_RELAY,
        name: "dual_relay",
        direction: Direction::Output,
        channels: 2,
        construct: Constructor::Output(outputs::bind_dual_relay),
    },
    DriverSpec {
        type_code: TYPE_ANALOG_OUT,
        name: "analog_out",
        direction: Direction::Output,
        channels: 2,
        construct: Constructor::Output(outputs::bind_analog_out),
    },
    DriverSpec {
        type_code: TYPE_DIGITAL_OUT_4,
        name: "digital_out_4",
        direction: Direction::Output,
        channels: 4,
        construct: Constructor::Output(outputs::bind_digital_out_4),
    },
    DriverSpec {
        type_code: TYPE_STEPPER,
        name: "stepper",
        direction: Direction::Output,
        channels: 1,
        construct: Constructor::Output(outputs::bind_stepper),
    },
];

/// Look up the driver row for a bus type code.
pub fn driver_for(type_code: u16) -> Option<&'static DriverSpec> {
    DRIVER_TABLE.iter().find(|spec| spec.type_code == type_code)
}

/// Human-readable name for a type code, for logs.
pub fn device_name(type_code: u16) -> &'static str {
    if type_code == TYPE_MASTER {
        return "master";
    }
    driver_for(type_code).map(|spec| spec.name).unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_codes_are_unique() {
        for (i, a) in DRIVER_TABLE.iter().enumerate() {
            for b in &DRIVER_TABLE[i + 1..] {
                assert_ne!(a.type_code, b.type_code);
            }
        }
    }

    #[test]
    fn lookup_by_code() {
        let spec = driver_for(TYPE_THERMOCOUPLE).unwrap();
        assert_eq!(spec.name, "thermocouple");
        assert_eq!(spec.direction, Direction::Input);
        assert_eq!(spec.channels, 1);
        assert!(driver_for(9999).is_none());
    }

    #[test]
    fn device_names() {
        assert_eq!(device_name(TYPE_MASTER), "master");
        assert_eq!(device_name(TYPE_DUAL_RELAY), "dual_relay");
        assert_eq!(device_name(0), "unknown");
    }

    #[test]
    fn directions_match_constructors() {
        for spec in DRIVER_TABLE {
            match (&spec.construct, spec.direction) {
                (Constructor::Input(_), Direction::Input) => {}
                (Constructor::Output(_), Direction::Output) => {}
                _ => panic!("driver '{}' direction mismatch", spec.name),
            }
        }
    }
}
