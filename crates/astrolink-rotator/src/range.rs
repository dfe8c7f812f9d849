//! Angle normalization and allowed-range mapping.
//!
//! A rotator with restricted cabling or a protruding camera cannot use its
//! full mechanical circle. The range policy folds any requested angle into
//! the configured sub-range by adding a multiple of `360 / segments`
//! degrees, so the optical result is equivalent while the mechanics stay
//! inside the allowed arc.

use serde::{Deserialize, Serialize};

/// Fold an angle into `[0, 360)` (Euclidean modulus: never negative).
pub fn normalize_degrees(value: f64) -> f64 {
    value.rem_euclid(360.0)
}

/// Shortest angular distance between two angles, in `[0, 180]`.
pub fn angular_separation(a: f64, b: f64) -> f64 {
    let diff = normalize_degrees(a - b);
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Which part of the mechanical circle a target may fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePolicy {
    /// Whole circle; targets pass through unchanged.
    #[default]
    Full,
    /// Half circle starting at the configured range start.
    Half,
    /// Quarter circle starting at the configured range start.
    Quarter,
}

/// Map a requested mechanical angle onto the policy's allowed sub-range.
///
/// The distance from `range_start` is always read as a forward offset, and
/// the additive offset per quadrant for [`RangePolicy::Quarter`] is the
/// table `{<90 → 0, <180 → 270, <270 → 180, else → 90}`. The table is part
/// of the device contract and must not be "simplified" to
/// `90 * floor(distance / 90)`.
pub fn target_mechanical_position(position: f64, policy: RangePolicy, range_start: f64) -> f64 {
    let position = normalize_degrees(position);
    let range_start_distance = normalize_degrees(position - normalize_degrees(range_start) + 360.0);

    let offset = match policy {
        RangePolicy::Full => 0.0,
        RangePolicy::Half => {
            if range_start_distance < 180.0 {
                0.0
            } else {
                180.0
            }
        }
        RangePolicy::Quarter => {
            if range_start_distance < 90.0 {
                0.0
            } else if range_start_distance < 180.0 {
                270.0
            } else if range_start_distance < 270.0 {
                180.0
            } else {
                90.0
            }
        }
    };

    normalize_degrees(position + offset)
}
