//! Veriface decision engine: embedding and pose matching against per-user
//! enrollment collections, with failure-adaptive thresholds.
//!
//! This crate is pure decision logic — no I/O, no persistence, no
//! transport. The login flow, session handling, and storage live in
//! `veriface-auth`.

pub mod embedding;
pub mod extractor;
pub mod matcher;
pub mod policy;
pub mod pose;
pub mod record;

pub use embedding::{embedding_matches, Embedding, EmbeddingKind, MatchFault, METRIC_DIM};
pub use extractor::{EmbeddingExtractor, ExtractError, PixelFingerprint};
pub use matcher::{match_collection, match_pose_collection, CollectionMatch};
pub use policy::{thresholds_for, MatchThresholds};
pub use pose::{
    pose_matches, pose_matches_legacy, PoseSample, PoseTolerances, LEGACY_POSE_TOLERANCES,
};
pub use record::{BiometricRecord, EnrollmentSample, MAX_FAILED_ATTEMPTS};
