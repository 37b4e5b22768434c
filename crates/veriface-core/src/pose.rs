//! Head pose samples and tolerance-window matching.
//!
//! Two wire schemas exist: planar `{x, y, scale}` (normalized frame
//! position plus face scale) and angular `{roll, pitch, yaw, dist}`
//! (orientation in degrees plus camera distance). The schema is fixed at
//! deserialization; a payload satisfying neither fails to parse, and the
//! two schemas are never compared against each other.

use serde::{Deserialize, Serialize};

/// One head pose capture. A payload carrying both key sets parses as
/// planar (first schema wins).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PoseSample {
    Planar { x: f64, y: f64, scale: f64 },
    Angular { roll: f64, pitch: f64, yaw: f64, dist: f64 },
}

impl PoseSample {
    /// Parse a raw JSON payload, sniffing the schema from its keys.
    /// Returns `None` for payloads satisfying neither schema; such a
    /// sample matches nothing.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Tolerance windows applied by [`pose_matches`]. Planar samples consume
/// `xy`/`scale`, angular samples consume `angle`/`dist`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseTolerances {
    pub xy: f64,
    pub scale: f64,
    pub angle: f64,
    pub dist: f64,
}

/// Fixed windows for the single-sample check that predates collections.
pub const LEGACY_POSE_TOLERANCES: PoseTolerances = PoseTolerances {
    xy: 0.12,
    scale: 0.20,
    angle: 15.0,
    dist: 0.25,
};

/// Compare a stored pose against a live capture under the given windows.
/// All component comparisons are inclusive. Mixed schemas never match;
/// non-finite components fail the comparison they appear in.
pub fn pose_matches(stored: &PoseSample, live: &PoseSample, tol: &PoseTolerances) -> bool {
    match (stored, live) {
        (
            PoseSample::Planar { x, y, scale },
            PoseSample::Planar {
                x: lx,
                y: ly,
                scale: lscale,
            },
        ) => {
            (x - lx).abs() <= tol.xy && (y - ly).abs() <= tol.xy && (scale - lscale).abs() <= tol.scale
        }
        (
            PoseSample::Angular {
                roll,
                pitch,
                yaw,
                dist,
            },
            PoseSample::Angular {
                roll: lroll,
                pitch: lpitch,
                yaw: lyaw,
                dist: ldist,
            },
        ) => {
            (roll - lroll).abs() <= tol.angle
                && (pitch - lpitch).abs() <= tol.angle
                && (yaw - lyaw).abs() <= tol.angle
                && (dist - ldist).abs() <= tol.dist
        }
        _ => false,
    }
}

/// Non-adaptive single-sample check retained for records enrolled before
/// collections existed.
pub fn pose_matches_legacy(stored: &PoseSample, live: &PoseSample) -> bool {
    pose_matches(stored, live, &LEGACY_POSE_TOLERANCES)
}
