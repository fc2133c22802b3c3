//! In-tree transports without hardware behind them.
//!
//! [`SimBus`] is the transport used under `--simulate`: it never announces
//! a module, so every required device becomes a zero-valued dummy binding
//! and the engine still runs its full three-phase loop.
//!
//! [`RecordingBus`] is a scriptable transport for tests and integration
//! work: modules are announced on demand, subscriptions capture their
//! sinks so readings can be injected, and writes are recorded per UID and
//! can be made to fail.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

use crate::binding::ValueSink;
use crate::bus::{Bus, BusError, BusEvent, ChannelSetting, EventListener, Presence, WriteCommand};

// ─── SimBus ─────────────────────────────────────────────────────────

/// Transport with no modules behind it.
#[derive(Default)]
pub struct SimBus {
    listener: Mutex<Option<EventListener>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Bus for SimBus {
    fn set_event_listener(&self, listener: EventListener) {
        *lock(&self.listener) = Some(listener);
    }

    fn enumerate(&self) -> Result<(), BusError> {
        debug!("simulated bus has no modules to enumerate");
        Ok(())
    }

    fn subscribe(&self, uid: &str, _period: Duration, _sink: ValueSink) -> Result<(), BusError> {
        debug!(%uid, "simulated subscribe");
        Ok(())
    }

    fn configure(&self, uid: &str, setting: ChannelSetting) -> Result<(), BusError> {
        debug!(%uid, ?setting, "simulated configure");
        Ok(())
    }

    fn write(&self, uid: &str, command: WriteCommand) -> Result<(), BusError> {
        debug!(%uid, ?command, "simulated write");
        Ok(())
    }
}

// ─── RecordingBus ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Module {
    parent_uid: Option<String>,
    type_code: u16,
}

/// Scriptable transport that records every interaction.
#[derive(Default)]
pub struct RecordingBus {
    listener: Mutex<Option<EventListener>>,
    modules: Mutex<HashMap<String, Module>>,
    subscriptions: Mutex<HashMap<String, Vec<(Duration, ValueSink)>>>,
    configures: Mutex<HashMap<String, Vec<ChannelSetting>>>,
    writes: Mutex<HashMap<String, Vec<WriteCommand>>>,
    failing: Mutex<Vec<String>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a module; it is announced on the next `enumerate()`.
    pub fn add_module(&self, uid: &str, parent_uid: Option<&str>, type_code: u16) {
        lock(&self.modules).insert(
            uid.to_string(),
            Module {
                parent_uid: parent_uid.map(str::to_string),
                type_code,
            },
        );
    }

    /// Deliver one event through the installed listener.
    pub fn fire(&self, event: BusEvent) {
        if let Some(listener) = lock(&self.listener).as_ref() {
            listener(event);
        }
    }

    /// Announce one scripted module as (re)discovered.
    pub fn announce(&self, uid: &str) {
        let module = lock(&self.modules).get(uid).cloned();
        if let Some(module) = module {
            self.fire(BusEvent {
                uid: uid.to_string(),
                parent_uid: module.parent_uid.clone(),
                type_code: module.type_code,
                kind: Presence::Discovered,
            });
        }
    }

    /// Report one scripted module as disconnected.
    pub fn drop_module(&self, uid: &str) {
        let module = lock(&self.modules).get(uid).cloned();
        if let Some(module) = module {
            self.fire(BusEvent {
                uid: uid.to_string(),
                parent_uid: module.parent_uid.clone(),
                type_code: module.type_code,
                kind: Presence::Disconnected,
            });
        }
    }

    /// Inject readings into every sink subscribed on `uid`.
    pub fn push_values(&self, uid: &str, values: &[f64]) {
        if let Some(subs) = lock(&self.subscriptions).get(uid) {
            for (_, sink) in subs {
                sink.store_all(values);
            }
        }
    }

    /// Make every subsequent write to `uid` fail with a timeout.
    pub fn fail_writes(&self, uid: &str) {
        lock(&self.failing).push(uid.to_string());
    }

    pub fn subscriptions(&self, uid: &str) -> Vec<Duration> {
        lock(&self.subscriptions)
            .get(uid)
            .map(|subs| subs.iter().map(|(period, _)| *period).collect())
            .unwrap_or_default()
    }

    pub fn configured(&self, uid: &str) -> Vec<ChannelSetting> {
        lock(&self.configures).get(uid).cloned().unwrap_or_default()
    }

    pub fn writes(&self, uid: &str) -> Vec<WriteCommand> {
        lock(&self.writes).get(uid).cloned().unwrap_or_default()
    }

    pub fn clear_writes(&self, uid: &str) {
        lock(&self.writes).remove(uid);
    }
}

impl Bus for RecordingBus {
    fn set_event_listener(&self, listener: EventListener) {
        *lock(&self.listener) = Some(listener);
    }

    fn enumerate(&self) -> Result<(), BusError> {
        let modules: Vec<(String, Module)> = lock(&self.modules)
            .iter()
            .map(|(uid, m)| (uid.clone(), m.clone()))
            .collect();
        for (uid, module) in modules {
            self.fire(BusEvent {
                uid,
                parent_uid: module.parent_uid,
                type_code: module.type_code,
                kind: Presence::Discovered,
            });
        }
        Ok(())
    }

    fn subscribe(&self, uid: &str, period: Duration, sink: ValueSink) -> Result<(), BusError> {
        lock(&self.subscriptions)
            .entry(uid.to_string())
            .or_default()
            .push((period, sink));
        Ok(())
    }

    fn configure(&self, uid: &str, setting: ChannelSetting) -> Result<(), BusError> {
        lock(&self.configures)
            .entry(uid.to_string())
            .or_default()
            .push(setting);
        Ok(())
    }

    fn write(&self, uid: &str, command: WriteCommand) -> Result<(), BusError> {
        if lock(&self.failing).iter().any(|u| u == uid) {
            return Err(BusError::Timeout {
                uid: uid.to_string(),
                timeout_ms: 0,
            });
        }
        lock(&self.writes)
            .entry(uid.to_string())
            .or_default()
            .push(command);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_announces_scripted_modules() {
        let bus = RecordingBus::new();
        bus.add_module("M", None, 13);
        bus.add_module("A", Some("M"), 2121);

        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        bus.set_event_listener(Box::new(move |event| {
            lock(&sink).push(event.uid);
        }));
        bus.enumerate().unwrap();

        let mut uids = lock(&seen).clone();
        uids.sort();
        assert_eq!(uids, ["A", "M"]);
    }

    #[test]
    fn failing_write_reports_timeout() {
        let bus = RecordingBus::new();
        bus.fail_writes("R1");
        let err = bus.write("R1", WriteCommand::Halt).unwrap_err();
        assert!(matches!(err, BusError::Timeout { .. }));
        assert!(bus.writes("R1").is_empty());
    }
}
