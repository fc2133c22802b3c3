//! Output device variants.
//!
//! Each variant implements [`OutputDevice`] and translates the binding's
//! value buffer into its own write commands. Channel modes are fixed at
//! bind time from the validated construction arguments.

use std::sync::Arc;

use rig_common::config::{BindArg, BindValue, OutputMode};

use crate::binding::OutputValue;
use crate::bus::{Bus, BusError, ChannelSetting, WriteCommand};

use super::{BindError, OutputDevice};

/// PWM carrier frequency for digital output channels in PWM mode.
const PWM_HERTZ: u32 = 100;

// ─── Dual relay ─────────────────────────────────────────────────────

pub struct DualRelay {
    uid: String,
    bus: Arc<dyn Bus>,
}

impl OutputDevice for DualRelay {
    fn kind(&self) -> &'static str {
        "dual_relay"
    }

    fn apply(&mut self, values: &[OutputValue]) -> Result<(), BusError> {
        let levels = values.iter().map(|v| v.is_on()).collect();
        self.bus.write(&self.uid, WriteCommand::Relay { levels })
    }
}

pub fn bind_dual_relay(
    uid: &str,
    bus: Arc<dyn Bus>,
    _args: &[BindArg],
) -> Result<(Box<dyn OutputDevice>, Vec<OutputValue>), BindError> {
    let driver = DualRelay {
        uid: uid.to_string(),
        bus,
    };
    Ok((Box::new(driver), vec![OutputValue::Digital(false); 2]))
}

// ─── Analog out ─────────────────────────────────────────────────────

/// Two-channel analog output: channel 0 drives the voltage output,
/// channel 1 the current loop.
pub struct AnalogOut {
    uid: String,
    bus: Arc<dyn Bus>,
}

impl OutputDevice for AnalogOut {
    fn kind(&self) -> &'static str {
        "analog_out"
    }

    fn apply(&mut self, values: &[OutputValue]) -> Result<(), BusError> {
        for (channel, value) in values.iter().enumerate() {
            self.bus.write(
                &self.uid,
                WriteCommand::Analog {
                    channel: channel as u16,
                    value: value.as_f64(),
                },
            )?;
        }
        Ok(())
    }
}

pub fn bind_analog_out(
    uid: &str,
    bus: Arc<dyn Bus>,
    _args: &[BindArg],
) -> Result<(Box<dyn OutputDevice>, Vec<OutputValue>), BindError> {
    // Start from a known-quiet state before the binding is exposed.
    for channel in 0..2 {
        bus.write(uid, WriteCommand::Analog { channel, value: 0.0 })?;
    }
    let driver = AnalogOut {
        uid: uid.to_string(),
        bus,
    };
    Ok((Box::new(driver), vec![OutputValue::Analog(0.0); 2]))
}

// ─── Digital out (PWM-capable) ──────────────────────────────────────

/// Four-channel digital output; each channel runs in PWM or plain digital
/// mode as claimed in the configuration. Unclaimed channels stay silent.
pub struct DigitalOut4 {
    uid: String,
    bus: Arc<dyn Bus>,
    modes: [Option<OutputMode>; 4],
}

impl OutputDevice for DigitalOut4 {
    fn kind(&self) -> &'static str {
        "digital_out_4"
    }

    fn apply(&mut self, values: &[OutputValue]) -> Result<(), BusError> {
        for (channel, value) in values.iter().enumerate() {
            let command = match self.modes.get(channel).copied().flatten() {
                Some(OutputMode::Pwm) => WriteCommand::Pwm {
                    channel: channel as u16,
                    duty: value.as_f64().clamp(0.0, 1.0),
                },
                Some(OutputMode::Digital) => WriteCommand::Digital {
                    channel: channel as u16,
                    level: value.is_on(),
                },
                None => continue,
            };
            self.bus.write(&self.uid, command)?;
        }
        Ok(())
    }
}

pub fn bind_digital_out_4(
    uid: &str,
    bus: Arc<dyn Bus>,
    args: &[BindArg],
) -> Result<(Box<dyn OutputDevice>, Vec<OutputValue>), BindError> {
    let mut modes: [Option<OutputMode>; 4] = [None; 4];
    for arg in args {
        let BindValue::OutputMode(mode) = arg.value else {
            continue;
        };
        let slot = modes
            .get_mut(arg.channel as usize)
            .ok_or_else(|| BindError::BadArgs {
                uid: uid.to_string(),
                reason: format!("channel {} out of range (module has 4)", arg.channel),
            })?;
        *slot = Some(mode);
        match mode {
            OutputMode::Pwm => bus.configure(
                uid,
                ChannelSetting::PwmFrequency {
                    channel: arg.channel,
                    hertz: PWM_HERTZ,
                },
            )?,
            OutputMode::Digital => bus.write(
                uid,
                WriteCommand::Digital {
                    channel: arg.channel,
                    level: false,
                },
            )?,
        }
    }
    let initial = modes
        .iter()
        .map(|mode| match mode {
            Some(OutputMode::Pwm) => OutputValue::Analog(0.0),
            _ => OutputValue::Digital(false),
        })
        .collect();
    let driver = DigitalOut4 {
        uid: uid.to_string(),
        bus,
        modes,
    };
    Ok((Box::new(driver), initial))
}

// ─── Stepper ────────────────────────────────────────────────────────

/// Single-channel stepper drive; the channel value is the commanded
/// velocity. Halted explicitly on engine shutdown.
pub struct Stepper {
    uid: String,
    bus: Arc<dyn Bus>,
}

impl OutputDevice for Stepper {
    fn kind(&self) -> &'static str {
        "stepper"
    }

    fn apply(&mut self, values: &[OutputValue]) -> Result<(), BusError> {
        let velocity = values.first().map(|v| v.as_f64()).unwrap_or(0.0);
        self.bus.write(
            &self.uid,
            WriteCommand::Analog {
                channel: 0,
                value: velocity,
            },
        )
    }

    fn halt(&mut self) -> Result<(), BusError> {
        self.bus.write(&self.uid, WriteCommand::Halt)
    }
}

pub fn bind_stepper(
    uid: &str,
    bus: Arc<dyn Bus>,
    _args: &[BindArg],
) -> Result<(Box<dyn OutputDevice>, Vec<OutputValue>), BindError> {
    let driver = Stepper {
        uid: uid.to_string(),
        bus,
    };
    Ok((Box::new(driver), vec![OutputValue::Analog(0.0)]))
}

// ─── Tests ──────────────────────────────────────────────────────────
