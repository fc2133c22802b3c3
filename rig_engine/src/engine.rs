//! Control-loop scheduler.
//!
//! One recurring tick runs three phases strictly in order: input-timeout
//! sweep, control evaluation in configuration order, output application.
//! Ticks never overlap; an overrun delays the next tick instead of
//! skipping or parallelising it. Stopping drains the in-flight tick and
//! then commands every output to its quiescent state — a safety shutdown,
//! not merely a loop exit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use rig_common::capability::ControlKind;
use rig_common::config::ControlPoint;
use rig_common::control::{
    DeviationOutcome, PiGains, RuntimeState, deviation_step, linear_scale, pi_step,
};

use crate::binding::OutputValue;
use crate::failsafe;
use crate::registry::DeviceRegistry;

/// Execute one full tick: sweep, evaluate, apply.
pub fn run_tick(
    registry: &DeviceRegistry,
    points: &[ControlPoint],
    states: &mut BTreeMap<String, RuntimeState>,
    now: Instant,
) {
    failsafe::sweep(registry, now);
    for point in points {
        let Some(state) = states.get_mut(&point.name) else {
            continue;
        };
        evaluate_point(registry, point, state, now);
    }
    registry.apply_outputs();
}

fn evaluate_point(
    registry: &DeviceRegistry,
    point: &ControlPoint,
    state: &mut RuntimeState,
    now: Instant,
) {
    let input = match point.kind {
        // Monitors expose their readings, actuators hold externally
        // commanded values; neither has a per-tick rule. External types
        // never pass validation into the point list.
        ControlKind::Monitor | ControlKind::Actuate | ControlKind::External => return,
        _ => match &point.input {
            Some(input) => input,
            None => return,
        },
    };

    if registry.input_operational(&input.uid) != Some(true) {
        failsafe_hook(point);
        return;
    }
    // An invalid sentinel is treated as non-operational for this tick,
    // never propagated arithmetically.
    let Some(reading) = registry.input_value(&input.uid, input.channel) else {
        failsafe_hook(point);
        return;
    };

    match point.kind {
        ControlKind::Linear => {
            let scaled = linear_scale(reading, point.params.gradient, point.params.offset);
            if let Some(output) = &point.output {
                registry.set_output(&output.uid, output.channel, OutputValue::Analog(scaled));
            }
        }
        ControlKind::Deviation => {
            let Some(output) = &point.output else {
                return;
            };
            let Some(commanded) = registry.output_value(&output.uid, output.channel) else {
                return;
            };
            let outcome = deviation_step(
                state,
                reading,
                commanded.as_f64(),
                point.params.permissible_deviation,
                point.params.reference_setpoint,
                now,
            );
            if outcome == DeviationOutcome::SustainedWarning {
                warn!(
                    point = %point.name,
                    reading,
                    "deviating more than the permissible amount"
                );
            }
        }
        ControlKind::PiHeater => {
            let gains = PiGains {
                kp: point.params.kp,
                ki: point.params.ki,
                setpoint: point.params.setpoint,
            };
            let duty = pi_step(state, &gains, reading, now);
            if let Some(output) = &point.output {
                registry.set_output(&output.uid, output.channel, OutputValue::Analog(duty));
            }
        }
        ControlKind::Monitor | ControlKind::Actuate | ControlKind::External => {}
    }
}

/// Escalation hook for a control point whose input went dark. The point's
/// output retains its last commanded value for the tick. Intentionally
/// empty.
fn failsafe_hook(point: &ControlPoint) {
    debug!(point = %point.name, "input not operational, control point skipped");
}

// ─── Engine ─────────────────────────────────────────────────────────

/// The running control loop. Construction starts the tick thread; `stop`
/// drains it and quiesces every output.
pub struct Engine {
    registry: Arc<DeviceRegistry>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Spawn the tick thread and enter the Running state.
    pub fn start(
        registry: Arc<DeviceRegistry>,
        points: Vec<ControlPoint>,
        mut states: BTreeMap<String, RuntimeState>,
        period: Duration,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let loop_flag = Arc::clone(&running);
        let loop_registry = Arc::clone(&registry);
        let handle = thread::Builder::new()
            .name("rig-tick".to_string())
            .spawn(move || {
                info!(
                    period_ms = period.as_millis() as u64,
                    points = points.len(),
                    "control loop running"
                );
                while loop_flag.load(Ordering::SeqCst) {
                    let tick_start = Instant::now();
                    run_tick(&loop_registry, &points, &mut states, tick_start);
                    let elapsed = tick_start.elapsed();
                    if elapsed < period {
                        thread::sleep(period - elapsed);
                    } else {
                        debug!(
                            elapsed_ms = elapsed.as_millis() as u64,
                            "tick overran its period; next tick delayed"
                        );
                    }
                }
                info!("control loop drained");
            })?;
        Ok(Self {
            registry,
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the loop: drain the in-flight tick, then command all outputs
    /// to their quiescent state. Idempotent — repeated calls are no-ops.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        info!("quiescing outputs");
        self.registry.quiesce_outputs();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::WriteCommand;
    use crate::drivers::{
        TYPE_ANALOG_OUT, TYPE_DUAL_ANALOG_IN, TYPE_DUAL_RELAY, TYPE_MASTER,
    };
    use crate::registry::OperatingMode;
    use crate::sim::RecordingBus;
    use rig_common::config::{ValidatedConfig, from_toml, validate};

    fn setup(
        config_toml: &str,
        mode: OperatingMode,
        modules: &[(&str, u16)],
    ) -> (
        Arc<RecordingBus>,
        Arc<DeviceRegistry>,
        ValidatedConfig,
        BTreeMap<String, RuntimeState>,
    ) {
        let config = validate(&from_toml(config_toml).unwrap()).unwrap();
        let bus = Arc::new(RecordingBus::new());
        bus.add_module("M", None, TYPE_MASTER);
        for (uid, type_code) in modules {
            bus.add_module(uid, Some("M"), *type_code);
        }
        let registry = DeviceRegistry::new(bus.clone(), mode, &config);
        registry.install_listener();
        registry.startup(Duration::ZERO).unwrap();
        let states = config.runtime_states();
        (bus, registry, config, states)
    }

    const FLOW_TOML: &str = r#"
[flow_a]
type = "linear"
input_device = "A"
input_channel = 0
output_device = "B"
output_channel = 1
gradient = 0.2
offset = 50.0
"#;

    #[test]
    fn linear_point_scales_into_output_channel() {
        let (bus, registry, config, mut states) = setup(
            FLOW_TOML,
            OperatingMode::Normal,
            &[("A", TYPE_DUAL_ANALOG_IN), ("B", TYPE_ANALOG_OUT)],
        );
        bus.push_values("A", &[100.0, 0.0]);
        bus.clear_writes("B");

        run_tick(&registry, &config.points, &mut states, Instant::now());

        assert_eq!(
            registry.output_value("B", 1),
            Some(OutputValue::Analog(10.0))
        );
        assert!(bus.writes("B").contains(&WriteCommand::Analog {
            channel: 1,
            value: 10.0
        }));
    }

    #[test]
    fn non_operational_input_keeps_last_commanded_output() {
        let (bus, registry, config, mut states) = setup(
            FLOW_TOML,
            OperatingMode::Normal,
            &[("A", TYPE_DUAL_ANALOG_IN), ("B", TYPE_ANALOG_OUT)],
        );
        bus.push_values("A", &[100.0, 0.0]);
        run_tick(&registry, &config.points, &mut states, Instant::now());
        assert_eq!(
            registry.output_value("B", 1),
            Some(OutputValue::Analog(10.0))
        );

        // The input goes silent past its timeout; the point is skipped and
        // the output holds.
        let mut last_activity = Instant::now();
        registry.visit_inputs(|b| last_activity = b.with_slot(|s| s.last_activity));
        run_tick(
            &registry,
            &config.points,
            &mut states,
            last_activity + Duration::from_secs(30),
        );
        assert_eq!(registry.input_operational("A"), Some(false));
        assert_eq!(
            registry.output_value("B", 1),
            Some(OutputValue::Analog(10.0))
        );
    }

    #[test]
    fn push_failure_is_isolated_per_device() {
        let (bus, registry, config, mut states) = setup(
            r#"
[flow_a]
type = "linear"
input_device = "A"
input_channel = 0
output_device = "B"
output_channel = 1

[valve_x]
type = "valve"
output_device = "R"
output_channel = 0
"#,
            OperatingMode::Normal,
            &[
                ("A", TYPE_DUAL_ANALOG_IN),
                ("B", TYPE_ANALOG_OUT),
                ("R", TYPE_DUAL_RELAY),
            ],
        );
        bus.push_values("A", &[3.0, 0.0]);
        bus.fail_writes("B");
        bus.clear_writes("R");

        // The failing push on B must not keep R from being applied.
        run_tick(&registry, &config.points, &mut states, Instant::now());
        assert_eq!(bus.writes("R").len(), 1);
    }

    #[test]
    fn deviation_point_warns_once_per_episode() {
        let (bus, registry, config, mut states) = setup(
            r#"
[mfc_watch]
type = "deviation_alarm"
input_device = "A"
input_channel = 0
output_device = "B"
output_channel = 0
permissible_deviation = 0.1
reference_setpoint = 1000.0
timeout_ms = 120000
"#,
            OperatingMode::Normal,
            &[("A", TYPE_DUAL_ANALOG_IN), ("B", TYPE_ANALOG_OUT)],
        );
        registry.set_output("B", 0, OutputValue::Analog(1000.0));
        bus.push_values("A", &[1200.0, 0.0]);

        let t0 = Instant::now();
        run_tick(&registry, &config.points, &mut states, t0);
        let state = states["mfc_watch"];
        assert!(state.last_deviation.is_some());
        assert!(!state.deviation_warned);

        // Keep the reading fresh so only the deviation clock advances.
        bus.push_values("A", &[1200.0, 0.0]);
        run_tick(
            &registry,
            &config.points,
            &mut states,
            t0 + Duration::from_secs(31),
        );
        assert!(states["mfc_watch"].deviation_warned);

        // Deviation evaluation never overwrites the commanded value.
        assert_eq!(
            registry.output_value("B", 0),
            Some(OutputValue::Analog(1000.0))
        );
    }

    #[test]
    fn pi_point_writes_duty_cycle() {
        let (bus, registry, config, mut states) = setup(
            r#"
[oven]
type = "pi_heater"
input_device = "T"
input_channel = 0
output_device = "B"
output_channel = 1
setpoint = 230.0
kp = 0.018
ki = 0.000013
"#,
            OperatingMode::Normal,
            &[("T", TYPE_DUAL_ANALOG_IN), ("B", TYPE_ANALOG_OUT)],
        );
        bus.push_values("T", &[220.0, 0.0]);
        run_tick(&registry, &config.points, &mut states, Instant::now());

        // error 10 → p = 0.18, first evaluation has no integral.
        match registry.output_value("B", 1) {
            Some(OutputValue::Analog(duty)) => assert!((duty - 0.18).abs() < 1e-12),
            other => panic!("unexpected output value: {other:?}"),
        }
    }

    #[test]
    fn simulation_mode_runs_ticks_against_dummies() {
        let (_bus, registry, config, mut states) =
            setup(FLOW_TOML, OperatingMode::Simulation, &[]);
        run_tick(&registry, &config.points, &mut states, Instant::now());
        // Dummy input reads 0 → scaled = (0 - 50) * 0.2 = -10.
        assert_eq!(
            registry.output_value("B", 1),
            Some(OutputValue::Analog(-10.0))
        );
    }
}
