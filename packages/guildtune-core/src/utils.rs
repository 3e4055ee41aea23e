//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::{MAX_VOLUME, MIN_VOLUME};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Volume
// ─────────────────────────────────────────────────────────────────────────────

/// Clamps a requested volume into the supported gain range.
///
/// Non-finite input falls back to the lower bound.
#[must_use]
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(MIN_VOLUME, MAX_VOLUME)
    } else {
        MIN_VOLUME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn clamp_volume_bounds() {
        assert_eq!(clamp_volume(0.5), 0.5);
        assert_eq!(clamp_volume(-1.0), 0.0);
        assert_eq!(clamp_volume(3.5), 2.0);
        assert_eq!(clamp_volume(f32::NAN), 0.0);
    }
}
