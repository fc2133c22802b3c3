//! Input timeout sweep.
//!
//! Values are written by the transport's callbacks; this sweep only judges
//! freshness. An input whose last activity is older than its timeout is
//! marked non-operational and its channels are forced to the invalid
//! sentinel — distinct from zero, which is a legitimate reading. Recovery
//! needs no event of its own: the next good read refreshes the timestamp
//! and the following sweep flips the device back to operational.

use std::time::Instant;

use tracing::warn;

use crate::registry::DeviceRegistry;

/// Sweep every bound input once. Simulated stand-ins are exempt and stay
/// operational.
pub fn sweep(registry: &DeviceRegistry, now: Instant) {
    registry.visit_inputs(|binding| {
        if binding.dummy {
            return;
        }
        binding.with_slot(|slot| {
            let elapsed = now.saturating_duration_since(slot.last_activity);
            if elapsed > binding.timeout {
                if slot.operational {
                    warn!(
                        uid = %binding.uid,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "timeout detected, invalidating readings"
                    );
                }
                slot.operational = false;
                for value in &mut slot.values {
                    *value = None;
                }
            } else {
                slot.operational = true;
            }
        });
    });
}
