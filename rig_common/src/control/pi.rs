//! PI heater control.
//!
//! Produces a PWM duty cycle in `[0, 1]`. Anti-windup clamps the integral
//! to the saturation point instead of merely freezing it: when the combined
//! output saturates high, the integral is rolled back to `1 - p`, so the
//! controller leaves saturation as soon as the error allows.

use std::time::Instant;

use super::RuntimeState;

/// Gains and target of a PI heater control point.
#[derive(Debug, Clone, Copy)]
pub struct PiGains {
    pub kp: f64,
    pub ki: f64,
    pub setpoint: f64,
}

/// Compute one PI cycle, returning the duty cycle to command.
///
/// The integral accumulates over the wall-clock time elapsed since the
/// previous evaluation; the first evaluation contributes no integral. A
/// stopped controller (`state.pi_running == false`) forces duty 0 regardless
/// of error and accumulates nothing.
pub fn pi_step(state: &mut RuntimeState, gains: &PiGains, measured: f64, now: Instant) -> f64 {
    let dt = state
        .last_eval
        .map(|t| now.saturating_duration_since(t).as_secs_f64())
        .unwrap_or(0.0);
    state.last_eval = Some(now);

    if !state.pi_running {
        return 0.0;
    }

    let error = gains.setpoint - measured;
    let p = gains.kp * error;
    state.integral += error * gains.ki * dt;

    let mut duty = p + state.integral;
    if duty > 1.0 {
        state.integral = 1.0 - p;
        duty = 1.0;
    } else if duty < 0.0 {
        duty = 0.0;
        if state.integral < 0.0 {
            state.integral = 0.0;
        }
    }
    duty
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const GAINS: PiGains = PiGains {
        kp: 0.018,
        ki: 0.000013,
        setpoint: 230.0,
    };

    #[test]
    fn first_evaluation_is_proportional_only() {
        let mut state = RuntimeState::seed();
        // error = 230 - 220 = 10 → p = 0.18, no integral on the first pass.
        let duty = pi_step(&mut state, &GAINS, 220.0, Instant::now());
        assert!((duty - 0.18).abs() < 1e-12);
        assert_eq!(state.integral, 0.0);
    }

    #[test]
    fn integral_accumulates_over_elapsed_time() {
        let mut state = RuntimeState::seed();
        let t0 = Instant::now();
        pi_step(&mut state, &GAINS, 220.0, t0);
        // 10 s at error 10 → integral = 10 * 0.000013 * 10 = 0.0013
        let duty = pi_step(&mut state, &GAINS, 220.0, t0 + Duration::from_secs(10));
        assert!((state.integral - 0.0013).abs() < 1e-12);
        assert!((duty - (0.18 + 0.0013)).abs() < 1e-12);
    }

    #[test]
    fn anti_windup_clamps_integral_to_saturation_point() {
        let mut state = RuntimeState::seed();
        let t0 = Instant::now();
        // Sustained error of 30 → p = 0.54; one-minute evaluation spacing
        // accumulates 30 * 0.000013 * 60 ≈ 0.0234 per step, so the raw
        // integral would eventually push duty far past 1.
        let measured = GAINS.setpoint - 30.0;
        let mut duty = 0.0;
        for i in 0..60u64 {
            duty = pi_step(&mut state, &GAINS, measured, t0 + Duration::from_secs(60 * i));
        }
        let p = GAINS.kp * 30.0;
        assert_eq!(duty, 1.0);
        assert_eq!(state.integral, 1.0 - p);
    }

    #[test]
    fn low_clamp_floors_duty_and_integral_at_zero() {
        let mut state = RuntimeState::seed();
        let t0 = Instant::now();
        // Measured far above setpoint → negative error.
        let measured = GAINS.setpoint + 100.0;
        pi_step(&mut state, &GAINS, measured, t0);
        let duty = pi_step(&mut state, &GAINS, measured, t0 + Duration::from_secs(600));
        assert_eq!(duty, 0.0);
        assert_eq!(state.integral, 0.0);
    }

    #[test]
    fn stopped_controller_forces_zero_duty() {
        let mut state = RuntimeState::seed();
        state.pi_running = false;
        let duty = pi_step(&mut state, &GAINS, 0.0, Instant::now());
        assert_eq!(duty, 0.0);
        assert_eq!(state.integral, 0.0);
    }

    #[test]
    fn recovers_from_saturation_when_error_drops() {
        let mut state = RuntimeState::seed();
        let t0 = Instant::now();
        let mut now = t0;
        for _ in 0..60u64 {
            now += Duration::from_secs(60);
            pi_step(&mut state, &GAINS, GAINS.setpoint - 30.0, now);
        }
        // Error collapses; with the integral held at the saturation point
        // the duty must leave 1.0 immediately.
        now += Duration::from_secs(60);
        let duty = pi_step(&mut state, &GAINS, GAINS.setpoint, now);
        assert!(duty < 1.0);
    }
}
