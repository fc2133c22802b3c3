//! Deviation-alarm monitoring.
//!
//! Compares an input reading against the value currently commanded on the
//! paired output channel. A deviation beyond the permissible band starts an
//! episode; if the episode outlasts the debounce window, one warning is due
//! for the whole episode. Returning within tolerance ends the episode.

use std::time::{Duration, Instant};

use super::RuntimeState;

/// A deviation episode must persist this long before the warning fires.
pub const DEVIATION_DEBOUNCE: Duration = Duration::from_secs(30);

/// What the caller should do after a deviation evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviationOutcome {
    /// Delta within the permissible band; episode (if any) ended.
    InTolerance,
    /// Delta out of band, episode running, no warning due.
    Deviating,
    /// Episode outlasted the debounce; emit the warning — once.
    SustainedWarning,
}

/// Evaluate one deviation check.
///
/// `measured` is the input reading, `commanded` the value currently held on
/// the paired output channel. The threshold is relative:
/// `permissible * reference`.
pub fn deviation_step(
    state: &mut RuntimeState,
    measured: f64,
    commanded: f64,
    permissible: f64,
    reference: f64,
    now: Instant,
) -> DeviationOutcome {
    let delta = (measured - commanded).abs();
    if delta > permissible * reference {
        match state.last_deviation {
            None => {
                state.last_deviation = Some(now);
                state.deviation_warned = false;
                DeviationOutcome::Deviating
            }
            Some(since) => {
                if now.duration_since(since) > DEVIATION_DEBOUNCE && !state.deviation_warned {
                    state.deviation_warned = true;
                    DeviationOutcome::SustainedWarning
                } else {
                    DeviationOutcome::Deviating
                }
            }
        }
    } else {
        state.last_deviation = None;
        state.deviation_warned = false;
        DeviationOutcome::InTolerance
    }
}
