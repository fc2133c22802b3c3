//! Device registry and dynamic binder.
//!
//! Tracks every physical device observed on the bus and, for the UIDs the
//! validated configuration requires, owns the live input/output bindings.
//! A reconnect of a required UID re-invokes binding; previously commanded
//! output values are carried into the new binding so the reconnect is
//! invisible to downstream consumers.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use rig_common::config::{BindArg, DEFAULT_INPUT_TIMEOUT, ValidatedConfig};

use crate::binding::{InputBinding, OutputBinding, OutputValue};
use crate::bus::{Bus, BusError, BusEvent, Presence};
use crate::drivers::{self, BindError, Constructor, device_name};

/// Channel count of a simulated stand-in device.
const DUMMY_CHANNEL_COUNT: usize = 4;

/// How the engine treats hardware that is not there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    /// Missing required devices abort startup.
    Normal,
    /// Missing required devices become zero-valued dummy bindings.
    Simulation,
}

/// One device observed on the bus. Owned exclusively by the registry.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub uid: String,
    pub type_code: u16,
    /// `None` for the bus root node.
    pub parent_uid: Option<String>,
    pub present: bool,
}

/// Startup wiring failure. The process never starts partially wired.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("missing required device '{0}'")]
    MissingDevice(String),

    #[error("no module present on the bus; check the transport connection")]
    BusEmpty,

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Registry of observed devices and live bindings.
pub struct DeviceRegistry {
    bus: Arc<dyn Bus>,
    mode: OperatingMode,
    required_inputs: BTreeSet<String>,
    required_outputs: BTreeSet<String>,
    bind_args: BTreeMap<String, Vec<BindArg>>,
    input_timeouts: BTreeMap<String, Duration>,
    devices: Mutex<HashMap<String, DeviceDescriptor>>,
    inputs: RwLock<HashMap<String, InputBinding>>,
    outputs: RwLock<HashMap<String, OutputBinding>>,
}

impl DeviceRegistry {
    pub fn new(bus: Arc<dyn Bus>, mode: OperatingMode, config: &ValidatedConfig) -> Arc<Self> {
        Arc::new(Self {
            bus,
            mode,
            required_inputs: config.required_inputs.clone(),
            required_outputs: config.required_outputs.clone(),
            bind_args: config.bind_args.clone(),
            input_timeouts: config.input_timeouts.clone(),
            devices: Mutex::new(HashMap::new()),
            inputs: RwLock::new(HashMap::new()),
            outputs: RwLock::new(HashMap::new()),
        })
    }

    /// Route the bus's enumeration feed into this registry.
    pub fn install_listener(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.bus.set_event_listener(Box::new(move |event| {
            if let Some(registry) = weak.upgrade() {
                registry.handle_event(event);
            }
        }));
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn is_required(&self, uid: &str) -> bool {
        self.required_inputs.contains(uid) || self.required_outputs.contains(uid)
    }

    // ─── Event handling ─────────────────────────────────────────────

    /// Process one presence notification from the transport.
    pub fn handle_event(&self, event: BusEvent) {
        match event.kind {
            Presence::Discovered => self.handle_discovered(event),
            Presence::Disconnected => self.handle_disconnected(&event),
        }
    }

    fn handle_discovered(&self, event: BusEvent) {
        let needs_rebind = {
            let mut devices = lock(&self.devices);
            match devices.get_mut(&event.uid) {
                None => {
                    info!(
                        uid = %event.uid,
                        parent = ?event.parent_uid,
                        device = %device_name(event.type_code),
                        type_code = event.type_code,
                        "device discovered"
                    );
                    devices.insert(
                        event.uid.clone(),
                        DeviceDescriptor {
                            uid: event.uid.clone(),
                            type_code: event.type_code,
                            parent_uid: event.parent_uid.clone(),
                            present: true,
                        },
                    );
                    false
                }
                Some(descriptor) => {
                    info!(
                        uid = %event.uid,
                        device = %device_name(event.type_code),
                        "reconnect detected"
                    );
                    descriptor.type_code = event.type_code;
                    descriptor.parent_uid = event.parent_uid.clone();
                    descriptor.present = true;
                    self.is_required(&event.uid)
                }
            }
        };
        if needs_rebind {
            if let Err(e) = self.bind_device(&event.uid) {
                warn!(
                    uid = %event.uid,
                    error = %e,
                    "rebind failed; device left unbound until the next notification"
                );
            }
        }
    }

    fn handle_disconnected(&self, event: &BusEvent) {
        let mut devices = lock(&self.devices);
        let (is_root, type_code) = match devices.get_mut(&event.uid) {
            Some(descriptor) => {
                descriptor.present = false;
                (descriptor.parent_uid.is_none(), descriptor.type_code)
            }
            None => return,
        };
        if is_root {
            // Umbrella disconnect: all children are lost as a group. Nothing
            // is purged, so later presence notifications about them are
            // handled as reconnects.
            warn!(uid = %event.uid, "disconnect from bus root; child modules considered lost");
            for descriptor in devices.values_mut() {
                if descriptor.parent_uid.as_deref() == Some(event.uid.as_str()) {
                    descriptor.present = false;
                }
            }
        } else {
            warn!(
                uid = %event.uid,
                device = %device_name(type_code),
                "disconnect detected"
            );
        }
    }

    // ─── Binding ────────────────────────────────────────────────────

    /// Instantiate the driver for a present device and expose its binding.
    pub fn bind_device(&self, uid: &str) -> Result<(), BindError> {
        let descriptor = lock(&self.devices).get(uid).cloned();
        let Some(descriptor) = descriptor.filter(|d| d.present) else {
            if self.mode == OperatingMode::Simulation {
                self.bind_dummy(uid);
                return Ok(());
            }
            return Err(BindError::NotPresent {
                uid: uid.to_string(),
            });
        };

        let spec = drivers::driver_for(descriptor.type_code).ok_or_else(|| {
            BindError::UnknownTypeCode {
                uid: uid.to_string(),
                type_code: descriptor.type_code,
            }
        })?;
        let args = self.bind_args.get(uid).cloned().unwrap_or_default();

        match &spec.construct {
            Constructor::Input(ctor) => {
                let timeout = self
                    .input_timeouts
                    .get(uid)
                    .copied()
                    .unwrap_or(DEFAULT_INPUT_TIMEOUT);
                let binding = InputBinding::new(uid, spec.channels, timeout);
                ctor(uid, &self.bus, &args, binding.sink())?;
                write(&self.inputs).insert(uid.to_string(), binding);
            }
            Constructor::Output(ctor) => {
                let previous = read(&self.outputs).get(uid).map(|b| b.snapshot());
                let (driver, initial) = ctor(uid, Arc::clone(&self.bus), &args)?;
                let binding = OutputBinding::new(uid, driver, initial);
                if let Some(previous) = previous {
                    binding.restore(&previous);
                }
                write(&self.outputs).insert(uid.to_string(), binding);
            }
        }
        info!(uid = %uid, driver = %spec.name, "device bound");
        Ok(())
    }

    fn bind_dummy(&self, uid: &str) {
        if self.required_inputs.contains(uid) {
            info!(uid = %uid, "binding simulated input");
            write(&self.inputs)
                .insert(uid.to_string(), InputBinding::dummy(uid, DUMMY_CHANNEL_COUNT));
        }
        if self.required_outputs.contains(uid) {
            info!(uid = %uid, "binding simulated output");
            write(&self.outputs)
                .insert(uid.to_string(), OutputBinding::dummy(uid, DUMMY_CHANNEL_COUNT));
        }
    }

    /// Enumerate the bus, wait for answers, then bind every required UID.
    ///
    /// Fatal if a required device is absent (Normal mode), its type has no
    /// driver, or its construction fails — the engine never starts with a
    /// partially wired configuration.
    pub fn startup(&self, settle: Duration) -> Result<(), StartupError> {
        self.bus.enumerate()?;
        if !settle.is_zero() {
            thread::sleep(settle);
        }

        if self.mode == OperatingMode::Normal && lock(&self.devices).is_empty() {
            return Err(StartupError::BusEmpty);
        }

        for uid in self.required_inputs.union(&self.required_outputs) {
            let present = lock(&self.devices)
                .get(uid.as_str())
                .map(|d| d.present)
                .unwrap_or(false);
            if present {
                self.bind_device(uid)?;
            } else {
                match self.mode {
                    OperatingMode::Simulation => {
                        warn!(uid = %uid, "required device absent, substituting dummy binding");
                        self.bind_dummy(uid);
                    }
                    OperatingMode::Normal => {
                        return Err(StartupError::MissingDevice(uid.clone()));
                    }
                }
            }
        }

        info!(
            inputs = read(&self.inputs).len(),
            outputs = read(&self.outputs).len(),
            "startup binding complete"
        );
        Ok(())
    }

    // ─── Runtime access ─────────────────────────────────────────────

    pub fn descriptor(&self, uid: &str) -> Option<DeviceDescriptor> {
        lock(&self.devices).get(uid).cloned()
    }

    pub fn has_input(&self, uid: &str) -> bool {
        read(&self.inputs).contains_key(uid)
    }

    pub fn has_output(&self, uid: &str) -> bool {
        read(&self.outputs).contains_key(uid)
    }

    pub fn input_operational(&self, uid: &str) -> Option<bool> {
        read(&self.inputs).get(uid).map(|b| b.operational())
    }

    /// Current reading of one input channel; `None` while the value is
    /// invalid or the device unbound.
    pub fn input_value(&self, uid: &str, channel: u16) -> Option<f64> {
        read(&self.inputs)
            .get(uid)
            .and_then(|b| b.value(channel as usize))
    }

    pub fn output_value(&self, uid: &str, channel: u16) -> Option<OutputValue> {
        read(&self.outputs)
            .get(uid)
            .and_then(|b| b.value(channel as usize))
    }

    pub fn output_snapshot(&self, uid: &str) -> Option<Vec<OutputValue>> {
        read(&self.outputs).get(uid).map(|b| b.snapshot())
    }

    /// Record an evaluator's output intent. Silently ignored for unbound
    /// devices — the claim tables guarantee this only happens while a
    /// device is between disconnect and rebind.
    pub fn set_output(&self, uid: &str, channel: u16, value: OutputValue) {
        match read(&self.outputs).get(uid) {
            Some(binding) => binding.set(channel as usize, value),
            None => debug!(uid = %uid, "output intent for unbound device dropped"),
        }
    }

    pub fn visit_inputs(&self, mut f: impl FnMut(&InputBinding)) {
        for binding in read(&self.inputs).values() {
            f(binding);
        }
    }

    pub fn visit_outputs(&self, mut f: impl FnMut(&OutputBinding)) {
        for binding in read(&self.outputs).values() {
            f(binding);
        }
    }

    /// Push every output binding's buffer to its device. A failed push is
    /// logged and never affects the other UIDs.
    pub fn apply_outputs(&self) {
        for (uid, binding) in read(&self.outputs).iter() {
            if let Err(e) = binding.apply() {
                warn!(uid = %uid, error = %e, "output push failed; retrying next tick");
            }
        }
    }

    /// Command every output to its quiescent state and halt drivers that
    /// need it. Used by the engine's shutdown pass.
    pub fn quiesce_outputs(&self) {
        for (uid, binding) in read(&self.outputs).iter() {
            binding.quiesce();
            if let Err(e) = binding.apply() {
                warn!(uid = %uid, error = %e, "quiescent push failed");
            }
            if let Err(e) = binding.halt() {
                warn!(uid = %uid, error = %e, "halt failed");
            }
        }
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read<'a, T>(rwlock: &'a RwLock<T>) -> RwLockReadGuard<'a, T> {
    match rwlock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<'a, T>(rwlock: &'a RwLock<T>) -> std::sync::RwLockWriteGuard<'a, T> {
    match rwlock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
