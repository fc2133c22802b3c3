//! Live input/output bindings.
//!
//! A binding is the runtime association between a configured device UID and
//! its value buffer (plus, for outputs, the driver shim that pushes the
//! buffer to hardware). Each binding carries its own lock; the transport's
//! callback context and the scheduler tick never contend across devices.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::bus::BusError;
use crate::drivers::OutputDevice;

// ─── Inputs ─────────────────────────────────────────────────────────

/// Value buffer of one input device.
///
/// `values` holds one slot per channel; `None` is the invalid sentinel,
/// distinct from a legitimate zero reading.
#[derive(Debug)]
pub struct InputSlot {
    pub values: Vec<Option<f64>>,
    pub last_activity: Instant,
    pub operational: bool,
}

/// Cloneable write handle over an input binding's slot.
///
/// Handed to the transport at subscribe time. Writes are short, hold the
/// slot lock only for the copy, and never call back into the bus.
#[derive(Clone)]
pub struct ValueSink {
    slot: Arc<Mutex<InputSlot>>,
}

impl ValueSink {
    /// Store a single channel reading and refresh the activity timestamp.
    pub fn store(&self, channel: usize, value: f64) {
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(v) = slot.values.get_mut(channel) {
            *v = Some(value);
        }
        slot.last_activity = Instant::now();
    }

    /// Store all channel readings at once.
    pub fn store_all(&self, values: &[f64]) {
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (i, value) in values.iter().enumerate() {
            if let Some(v) = slot.values.get_mut(i) {
                *v = Some(*value);
            }
        }
        slot.last_activity = Instant::now();
    }
}

/// Runtime binding of one input device.
pub struct InputBinding {
    pub uid: String,
    pub channel_count: usize,
    pub timeout: Duration,
    /// Simulated stand-in; exempt from the timeout sweep.
    pub dummy: bool,
    slot: Arc<Mutex<InputSlot>>,
}

impl InputBinding {
    /// Fresh binding with empty value slots. No stale values survive a
    /// rebind — the previous slot is dropped with the previous binding.
    pub fn new(uid: &str, channel_count: usize, timeout: Duration) -> Self {
        Self {
            uid: uid.to_string(),
            channel_count,
            timeout,
            dummy: false,
            slot: Arc::new(Mutex::new(InputSlot {
                values: vec![None; channel_count],
                last_activity: Instant::now(),
                operational: true,
            })),
        }
    }

    /// Zero-valued simulated binding, always operational.
    pub fn dummy(uid: &str, channel_count: usize) -> Self {
        Self {
            uid: uid.to_string(),
            channel_count,
            timeout: Duration::MAX,
            dummy: true,
            slot: Arc::new(Mutex::new(InputSlot {
                values: vec![Some(0.0); channel_count],
                last_activity: Instant::now(),
                operational: true,
            })),
        }
    }

    /// Write handle for the transport.
    pub fn sink(&self) -> ValueSink {
        ValueSink {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Current reading of one channel; `None` when invalid or out of range.
    pub fn value(&self, channel: usize) -> Option<f64> {
        self.with_slot(|slot| slot.values.get(channel).copied().flatten())
    }

    pub fn operational(&self) -> bool {
        self.with_slot(|slot| slot.operational)
    }

    /// Run `f` with the slot locked. Used by the timeout sweep.
    pub fn with_slot<R>(&self, f: impl FnOnce(&mut InputSlot) -> R) -> R {
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut slot)
    }
}

// ─── Outputs ────────────────────────────────────────────────────────

/// One commanded output value. The variant matches the channel's mode on
/// the physical device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputValue {
    Analog(f64),
    Digital(bool),
}

impl OutputValue {
    /// The quiescent value of the same variant.
    pub fn zeroed(self) -> Self {
        match self {
            OutputValue::Analog(_) => OutputValue::Analog(0.0),
            OutputValue::Digital(_) => OutputValue::Digital(false),
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            OutputValue::Analog(v) => v,
            OutputValue::Digital(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn is_on(self) -> bool {
        match self {
            OutputValue::Analog(v) => v != 0.0,
            OutputValue::Digital(b) => b,
        }
    }
}

/// Runtime binding of one output device.
///
/// Evaluators record intent in `values`; the scheduler's output phase
/// pushes the buffer through the driver shim.
pub struct OutputBinding {
    pub uid: String,
    pub channel_count: usize,
    /// Simulated stand-in; holds values but pushes nowhere.
    pub dummy: bool,
    values: Arc<Mutex<Vec<OutputValue>>>,
    driver: Option<Mutex<Box<dyn OutputDevice>>>,
}

impl OutputBinding {
    pub fn new(uid: &str, driver: Box<dyn OutputDevice>, initial: Vec<OutputValue>) -> Self {
        Self {
            uid: uid.to_string(),
            channel_count: initial.len(),
            dummy: false,
            values: Arc::new(Mutex::new(initial)),
            driver: Some(Mutex::new(driver)),
        }
    }

    /// Zero-valued simulated binding with no driver behind it.
    pub fn dummy(uid: &str, channel_count: usize) -> Self {
        Self {
            uid: uid.to_string(),
            channel_count,
            dummy: true,
            values: Arc::new(Mutex::new(vec![OutputValue::Analog(0.0); channel_count])),
            driver: None,
        }
    }

    pub fn snapshot(&self) -> Vec<OutputValue> {
        self.lock_values().clone()
    }

    pub fn value(&self, channel: usize) -> Option<OutputValue> {
        self.lock_values().get(channel).copied()
    }

    pub fn set(&self, channel: usize, value: OutputValue) {
        let mut values = self.lock_values();
        if let Some(v) = values.get_mut(channel) {
            *v = value;
        }
    }

    /// Carry the previously commanded values into this binding, so a
    /// reconnect restores the device to its last commanded state.
    pub fn restore(&self, previous: &[OutputValue]) {
        let mut values = self.lock_values();
        if previous.len() == values.len() {
            values.copy_from_slice(previous);
        } else {
            warn!(
                uid = %self.uid,
                "channel count changed across rebind ({} -> {}), not restoring values",
                previous.len(),
                values.len()
            );
        }
    }

    /// Zero every channel in place, each in its own variant.
    pub fn quiesce(&self) {
        let mut values = self.lock_values();
        for v in values.iter_mut() {
            *v = v.zeroed();
        }
    }

    /// Push the current buffer through the driver. No-op for dummies.
    pub fn apply(&self) -> Result<(), BusError> {
        let Some(driver) = &self.driver else {
            return Ok(());
        };
        let values = self.snapshot();
        let mut driver = match driver.lock() {
            Ok(d) => d,
            Err(poisoned) => poisoned.into_inner(),
        };
        driver.apply(&values)
    }

    /// Issue the driver's halt, if it has one. No-op for dummies.
    pub fn halt(&self) -> Result<(), BusError> {
        let Some(driver) = &self.driver else {
            return Ok(());
        };
        let mut driver = match driver.lock() {
            Ok(d) => d,
            Err(poisoned) => poisoned.into_inner(),
        };
        driver.halt()
    }

    fn lock_values(&self) -> std::sync::MutexGuard<'_, Vec<OutputValue>> {
        match self.values.lock() {
            Ok(v) => v,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_store_refreshes_activity() {
        let binding = InputBinding::new("A", 2, Duration::from_millis(1000));
        let before = binding.with_slot(|s| s.last_activity);
        let sink = binding.sink();
        sink.store(1, 42.0);
        assert_eq!(binding.value(1), Some(42.0));
        assert_eq!(binding.value(0), None);
        assert!(binding.with_slot(|s| s.last_activity) >= before);
    }

    #[test]
    fn sink_ignores_out_of_range_channel() {
        let binding = InputBinding::new("A", 2, Duration::from_millis(1000));
        let sink = binding.sink();
        sink.store(7, 1.0);
        assert_eq!(binding.value(7), None);
    }

    #[test]
    fn store_all_fills_every_channel() {
        let binding = InputBinding::new("A", 2, Duration::from_millis(1000));
        binding.sink().store_all(&[1.5, 2.5]);
        assert_eq!(binding.value(0), Some(1.5));
        assert_eq!(binding.value(1), Some(2.5));
    }

    #[test]
    fn dummy_input_reads_zero_and_is_operational() {
        let binding = InputBinding::dummy("D", 4);
        assert!(binding.dummy);
        assert!(binding.operational());
        assert_eq!(binding.value(3), Some(0.0));
    }

    #[test]
    fn output_value_zeroed_keeps_variant() {
        assert_eq!(OutputValue::Analog(3.5).zeroed(), OutputValue::Analog(0.0));
        assert_eq!(OutputValue::Digital(true).zeroed(), OutputValue::Digital(false));
    }

    #[test]
    fn dummy_output_holds_values() {
        let binding = OutputBinding::dummy("D", 2);
        binding.set(1, OutputValue::Analog(7.0));
        assert_eq!(binding.value(1), Some(OutputValue::Analog(7.0)));
        assert!(binding.apply().is_ok());
        binding.quiesce();
        assert_eq!(binding.value(1), Some(OutputValue::Analog(0.0)));
    }

    #[test]
    fn restore_requires_matching_channel_count() {
        let binding = OutputBinding::dummy("D", 2);
        binding.restore(&[OutputValue::Analog(1.0)]);
        assert_eq!(binding.value(0), Some(OutputValue::Analog(0.0)));
        binding.restore(&[OutputValue::Analog(1.0), OutputValue::Digital(true)]);
        assert_eq!(binding.value(1), Some(OutputValue::Digital(true)));
    }
}
