//! Failure-adaptive verification thresholds.
//!
//! Repeated face-stage failures widen the embedding distance ceiling (a
//! retrying genuine user gets slightly more slack against bad lighting or
//! angle) while the pose windows narrow. The opposing directions are
//! inherited behavior and are preserved exactly.

use crate::pose::PoseTolerances;
use crate::record::MAX_FAILED_ATTEMPTS;

/// Embedding distance ceiling at zero failures.
const DISTANCE_BASE: f32 = 0.45;
/// Widening per failure.
const DISTANCE_STEP: f32 = 0.03;
/// Hard ceiling regardless of failures.
const DISTANCE_CEILING: f32 = 0.55;

const XY_BASE: f64 = 0.10;
const XY_STEP: f64 = 0.01;
const XY_FLOOR: f64 = 0.05;

const SCALE_BASE: f64 = 0.15;
const SCALE_STEP: f64 = 0.01;
const SCALE_FLOOR: f64 = 0.08;

const ANGLE_BASE: f64 = 15.0;
const ANGLE_STEP: f64 = 1.0;
const ANGLE_FLOOR: f64 = 8.0;

const DIST_BASE: f64 = 0.22;
const DIST_STEP: f64 = 0.02;
const DIST_FLOOR: f64 = 0.12;

/// Thresholds the collection matchers apply for a given failure count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThresholds {
    /// Euclidean distance ceiling for collection embedding matching.
    pub distance: f32,
    /// Pose tolerance windows for collection pose matching.
    pub pose: PoseTolerances,
}

/// Derive thresholds from a user's consecutive-failure count. Inputs
/// beyond [`MAX_FAILED_ATTEMPTS`] are clamped.
pub fn thresholds_for(failed_attempts: u8) -> MatchThresholds {
    let attempts = failed_attempts.min(MAX_FAILED_ATTEMPTS);
    let a32 = attempts as f32;
    let a64 = attempts as f64;

    MatchThresholds {
        distance: (DISTANCE_BASE + a32 * DISTANCE_STEP).min(DISTANCE_CEILING),
        pose: PoseTolerances {
            xy: (XY_BASE - a64 * XY_STEP).max(XY_FLOOR),
            scale: (SCALE_BASE - a64 * SCALE_STEP).max(SCALE_FLOOR),
            angle: (ANGLE_BASE - a64 * ANGLE_STEP).max(ANGLE_FLOOR),
            dist: (DIST_BASE - a64 * DIST_STEP).max(DIST_FLOOR),
        },
    }
}
