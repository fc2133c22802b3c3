//! Input device constructors.
//!
//! Each constructor wires the transport's periodic value delivery into the
//! binding's sink and applies any bind-time channel configuration. The
//! asynchronous readings themselves never pass through this module again.

use std::sync::Arc;
use std::time::Duration;

use rig_common::config::{BindArg, BindValue, thermocouple_code};

use crate::binding::ValueSink;
use crate::bus::{Bus, ChannelSetting};

use super::BindError;

/// Delivery period for the slow analog inputs.
const ANALOG_PERIOD: Duration = Duration::from_millis(500);
/// Delivery period for thermocouples and digital edges.
const FAST_PERIOD: Duration = Duration::from_millis(100);

/// Two-channel industrial analog-in module.
pub fn bind_dual_analog_in(
    uid: &str,
    bus: &Arc<dyn Bus>,
    _args: &[BindArg],
    sink: ValueSink,
) -> Result<(), BindError> {
    bus.subscribe(uid, ANALOG_PERIOD, sink)?;
    Ok(())
}

/// Two-channel 0–20 mA current-loop module (flow meters, pressure
/// transducers).
pub fn bind_dual_current_in(
    uid: &str,
    bus: &Arc<dyn Bus>,
    _args: &[BindArg],
    sink: ValueSink,
) -> Result<(), BindError> {
    bus.subscribe(uid, ANALOG_PERIOD, sink)?;
    Ok(())
}

/// Single-probe thermocouple module. The probe kind letter arrives in the
/// bind args; without one the common type N probe is assumed.
pub fn bind_thermocouple(
    uid: &str,
    bus: &Arc<dyn Bus>,
    args: &[BindArg],
    sink: ValueSink,
) -> Result<(), BindError> {
    let kind = args
        .iter()
        .find_map(|arg| match arg.value {
            BindValue::ThermocoupleKind(k) => Some(k),
            _ => None,
        })
        .unwrap_or('N');
    let code = thermocouple_code(kind).ok_or_else(|| BindError::BadArgs {
        uid: uid.to_string(),
        reason: format!("unknown thermocouple kind '{kind}'"),
    })?;
    bus.configure(uid, ChannelSetting::ThermocoupleKind { code })?;
    bus.subscribe(uid, FAST_PERIOD, sink)?;
    Ok(())
}

/// Four-channel digital-in module.
pub fn bind_digital_in_4(
    uid: &str,
    bus: &Arc<dyn Bus>,
    _args: &[BindArg],
    sink: ValueSink,
) -> Result<(), BindError> {
    bus.subscribe(uid, FAST_PERIOD, sink)?;
    Ok(())
}
