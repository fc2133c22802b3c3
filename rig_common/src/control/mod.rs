//! Control-point evaluators.
//!
//! Each evaluator is a pure transformation of (input value, previous runtime
//! state, parameters) into (output intent, new runtime state). The engine
//! owns the dispatch; nothing in here touches a device.

pub mod deviation;
pub mod linear;
pub mod pi;

pub use deviation::{DeviationOutcome, deviation_step};
pub use linear::linear_scale;
pub use pi::{PiGains, pi_step};

use std::time::Instant;

/// Per-control-point mutable state, seeded at validation time and mutated
/// only by that point's evaluator.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeState {
    /// Start of the current deviation episode, if one is active.
    pub last_deviation: Option<Instant>,
    /// The sustained-deviation warning for the current episode was emitted.
    pub deviation_warned: bool,
    /// PI integral accumulator.
    pub integral: f64,
    /// Timestamp of the previous PI evaluation.
    pub last_eval: Option<Instant>,
    /// PI run sub-state; a stopped controller forces its duty to zero.
    pub pi_running: bool,
}

impl RuntimeState {
    /// Initial state: no prior deviation, zero integral, controller running.
    pub fn seed() -> Self {
        Self {
            last_deviation: None,
            deviation_warned: false,
            integral: 0.0,
            last_eval: None,
            pi_running: true,
        }
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::seed()
    }
}
