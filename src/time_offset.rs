// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process-wide time-offset anchor, grounded on the
//! original's `MEF_globals`-held `recording_time_offset`/`GMT_offset`
//! pair: a single process-wide value rather than per-channel state,
//! because every channel in a recording must agree on the same anchor.
//! Modeled here with `OnceLock` instead of a raw global so the single-set
//! invariant is enforced by the type rather than by convention.

use crate::config::TimeOffsetMode;
use std::sync::OnceLock;

/// The anchor, once established, applies to every channel for the life of
/// the process. `anchor = first_time - gmt_offset_hours * 3_600_000_000`.
#[derive(Debug, Clone, Copy)]
pub struct TimeOffsetAnchor {
    pub mode: TimeOffsetMode,
    pub anchor_us: i64,
    pub gmt_offset_hours: f32,
}

static ANCHOR: OnceLock<TimeOffsetAnchor> = OnceLock::new();

/// Establishes the process-wide anchor from the first timestamp seen by
/// the first channel to open, if it has not already been set. Subsequent
/// calls are no-ops: the anchor is a single-setter value, matching the
/// original's "first writer wins" global.
pub fn establish(mode: TimeOffsetMode, first_time_us: i64, gmt_offset_hours: f32) -> TimeOffsetAnchor {
    *ANCHOR.get_or_init(|| {
        let anchor_us = if mode.offsets_are_applied() {
            first_time_us - (gmt_offset_hours as f64 * 3_600_000_000.0) as i64
        } else {
            0
        };
        TimeOffsetAnchor {
            mode,
            anchor_us,
            gmt_offset_hours,
        }
    })
}

pub fn current() -> Option<TimeOffsetAnchor> {
    ANCHOR.get().copied()
}

/// Applies the anchor to a raw timestamp for on-disk storage, per the
/// channel's time-offset mode. `Ignore` and `ApplyOnOutput` both leave
/// in-memory state untouched; only `Apply` subtracts eagerly.
pub fn apply_for_storage(mode: TimeOffsetMode, anchor: Option<TimeOffsetAnchor>, time_us: i64) -> i64 {
    match mode {
        TimeOffsetMode::Ignore => time_us,
        TimeOffsetMode::Apply => time_us - anchor.map(|a| a.anchor_us).unwrap_or(0),
        TimeOffsetMode::ApplyOnOutput => time_us,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Anchor is a process-wide OnceLock: only the first test to run in
    // this process observes an uninitialized `current()`. Tests here
    // exercise the pure helper functions instead of the global directly
    // to stay independent of test execution order.

    #[test]
    fn ignore_mode_leaves_time_untouched() {
        let anchor = TimeOffsetAnchor {
            mode: TimeOffsetMode::Ignore,
            anchor_us: 123,
            gmt_offset_hours: -6.0,
        };
        assert_eq!(
            apply_for_storage(TimeOffsetMode::Ignore, Some(anchor), 1_000_000),
            1_000_000
        );
    }

    #[test]
    fn apply_mode_subtracts_anchor() {
        let anchor = TimeOffsetAnchor {
            mode: TimeOffsetMode::Apply,
            anchor_us: 500,
            gmt_offset_hours: 0.0,
        };
        assert_eq!(
            apply_for_storage(TimeOffsetMode::Apply, Some(anchor), 1_000_000),
            999_500
        );
    }

    #[test]
    fn apply_on_output_does_not_mutate_stored_value() {
        let anchor = TimeOffsetAnchor {
            mode: TimeOffsetMode::ApplyOnOutput,
            anchor_us: 500,
            gmt_offset_hours: 0.0,
        };
        assert_eq!(
            apply_for_storage(TimeOffsetMode::ApplyOnOutput, Some(anchor), 1_000_000),
            1_000_000
        );
    }

    #[test]
    fn anchor_formula_accounts_for_gmt_offset() {
        let anchor = establish(TimeOffsetMode::Apply, 10_000_000, -6.0);
        assert_eq!(anchor.anchor_us, 10_000_000 - (-6.0 * 3_600_000_000.0) as i64);
    }
}
