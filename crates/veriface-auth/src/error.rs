use thiserror::Error;

use crate::store::StoreError;

/// Login-flow errors surfaced to callers.
///
/// Every kind carries a stable machine-readable code for transport layers.
/// Matcher-internal numeric faults never appear here — they collapse to a
/// non-match inside the decision engine. `Internal` is the only kind worth
/// alerting on; the rest are ordinary user-facing rejections.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("login flow out of order; restart from credentials")]
    FlowOrderViolation,

    #[error("unknown user")]
    UserNotFound,

    #[error("no face detected in the submitted frame")]
    FaceNotDetected,

    #[error("face did not match any enrolled sample")]
    FaceMismatch,

    #[error("head position did not match any enrolled sample")]
    PositionMismatch,

    #[error("secondary identifier or code rejected")]
    SecondaryFactorInvalid,

    #[error("request is missing required fields")]
    MalformedInput,

    #[error("internal failure: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Stable code reported alongside (or instead of) the display message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::FlowOrderViolation => "flow_order_violation",
            Self::UserNotFound => "user_not_found",
            Self::FaceNotDetected => "face_not_detected",
            Self::FaceMismatch => "face_mismatch",
            Self::PositionMismatch => "position_mismatch",
            Self::SecondaryFactorInvalid => "secondary_factor_invalid",
            Self::MalformedInput => "malformed_input",
            Self::Internal(_) => "internal_failure",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.into())
    }
}
