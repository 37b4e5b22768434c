//! The multi-stage login flow.
//!
//! Credentials, then face + pose, then the secondary knowledge factor.
//! Stage order is enforced through the session registry: a session is
//! minted by stage 1, advanced by stage 2, and destroyed by stage 3. Each
//! stage call is an independent unit of work; the only cross-call mutable
//! state besides the session itself is the per-user failure counter, whose
//! read-modify-write is serialized through a per-user advisory lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use veriface_core::{
    match_collection, match_pose_collection, EmbeddingExtractor, PoseSample, MAX_FAILED_ATTEMPTS,
};

use crate::codes::CodeIssuer;
use crate::error::AuthError;
use crate::session::{SessionStore, Stage};
use crate::store::RecordStore;

/// Verifies a primary credential pair. Password storage and hashing live
/// with the account system, not here.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, identifier: &str, secret: &str) -> Result<bool, anyhow::Error>;
}

/// Mints the opaque credential handed out after the full flow succeeds.
pub trait CredentialIssuer: Send + Sync {
    fn issue(&self, identifier: &str) -> Result<String, anyhow::Error>;
}

/// Verifies the stage-3 one-time code.
pub trait CodeVerifier: Send + Sync {
    fn verify(&self, identifier: &str, code: &str) -> bool;
}

impl CodeVerifier for CodeIssuer {
    fn verify(&self, identifier: &str, code: &str) -> bool {
        CodeIssuer::verify(self, identifier, code)
    }
}

/// Stage 1 input.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsRequest {
    pub identifier: String,
    pub secret: String,
}

/// Stage 2 input. The frame goes to the embedding extractor untouched;
/// the pose payload is schema-sniffed at ingestion.
#[derive(Debug, Clone, Deserialize)]
pub struct FaceRequest {
    pub session: String,
    pub frame: Vec<u8>,
    #[serde(default)]
    pub pose: Option<serde_json::Value>,
}

/// Stage 3 input.
#[derive(Debug, Clone, Deserialize)]
pub struct SecondaryFactorRequest {
    pub session: String,
    pub secondary_id: String,
    pub code: String,
}

/// What a successful stage call returns: the next stage to drive, or the
/// final credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResponse {
    PendingFace { session: String },
    PendingSecondaryFactor,
    Authenticated { token: String },
}

/// The login stage machine. One instance serves all users; per-session and
/// per-user state lives in the registry, the store, and the lock table.
pub struct LoginFlow {
    store: RecordStore,
    sessions: Mutex<SessionStore>,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    extractor: Arc<dyn EmbeddingExtractor>,
    credentials: Arc<dyn CredentialVerifier>,
    issuer: Arc<dyn CredentialIssuer>,
    codes: Arc<dyn CodeVerifier>,
}

impl LoginFlow {
    pub fn new(
        store: RecordStore,
        session_ttl: Duration,
        extractor: Arc<dyn EmbeddingExtractor>,
        credentials: Arc<dyn CredentialVerifier>,
        issuer: Arc<dyn CredentialIssuer>,
        codes: Arc<dyn CodeVerifier>,
    ) -> Self {
        Self {
            store,
            sessions: Mutex::new(SessionStore::new(session_ttl)),
            user_locks: Mutex::new(HashMap::new()),
            extractor,
            credentials,
            issuer,
            codes,
        }
    }

    /// Stage 1: primary credentials. A session is created only for a valid
    /// active account with a biometric record.
    pub async fn submit_credentials(
        &self,
        req: CredentialsRequest,
    ) -> Result<StageResponse, AuthError> {
        if req.identifier.is_empty() || req.secret.is_empty() {
            return Err(AuthError::MalformedInput);
        }

        if !self.credentials.verify(&req.identifier, &req.secret)? {
            tracing::info!(identifier = %req.identifier, "credentials rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let record = self
            .store
            .load_record(&req.identifier)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !record.active {
            tracing::info!(identifier = %req.identifier, "inactive account");
            return Err(AuthError::InvalidCredentials);
        }

        let session = self.sessions.lock().await.create(&req.identifier);
        tracing::info!(identifier = %req.identifier, "credentials accepted; awaiting face");
        Ok(StageResponse::PendingFace { session })
    }

    /// Stage 2: face and pose verification against the enrolled record.
    pub async fn submit_face(&self, req: FaceRequest) -> Result<StageResponse, AuthError> {
        let user = self.session_user(&req.session, Stage::AwaitingFace).await?;

        let live = match self.extractor.extract(&req.frame) {
            Ok(Some(embedding)) => embedding,
            Ok(None) => {
                // Not a mismatch: the counter is left untouched.
                tracing::info!(user = %user, "no face detected in frame");
                return Err(AuthError::FaceNotDetected);
            }
            Err(err) => {
                tracing::error!(user = %user, error = %err, "embedding extraction failed");
                return Err(AuthError::Internal(err.into()));
            }
        };
        let live_pose = req.pose.as_ref().and_then(PoseSample::from_json);

        // Serialize the counter read-modify-write per user.
        let lock = self.user_lock(&user).await;
        let _guard = lock.lock().await;

        let record = self
            .store
            .load_record(&user)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let face = match_collection(&record, &live);
        let pose_ok = match_pose_collection(&record, live_pose.as_ref());

        if face.matched && pose_ok {
            self.store.set_failed_attempts(&user, 0).await?;
            if !self.sessions.lock().await.advance(&req.session) {
                // Session expired while we were matching.
                return Err(AuthError::FlowOrderViolation);
            }
            tracing::info!(
                user = %user,
                best_distance = ?face.best_distance,
                sample = ?face.sample_index,
                "face stage passed"
            );
            Ok(StageResponse::PendingSecondaryFactor)
        } else {
            let attempts = record
                .failed_attempts()
                .saturating_add(1)
                .min(MAX_FAILED_ATTEMPTS);
            self.store.set_failed_attempts(&user, attempts).await?;
            tracing::info!(
                user = %user,
                face = face.matched,
                pose = pose_ok,
                failed_attempts = attempts,
                "face stage rejected"
            );
            Err(if face.matched {
                AuthError::PositionMismatch
            } else {
                AuthError::FaceMismatch
            })
        }
    }

    /// Stage 3: secondary identifier plus one-time code. No counter
    /// interaction here; the session survives failures for retry.
    pub async fn submit_secondary_factor(
        &self,
        req: SecondaryFactorRequest,
    ) -> Result<StageResponse, AuthError> {
        let user = self
            .session_user(&req.session, Stage::AwaitingSecondaryFactor)
            .await?;

        if req.secondary_id.is_empty() || req.code.is_empty() {
            return Err(AuthError::MalformedInput);
        }

        let record = self
            .store
            .load_record(&user)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        // Check the identifier first so a wrong one cannot burn the code.
        let accepted = record.secondary_id == req.secondary_id && self.codes.verify(&user, &req.code);
        if !accepted {
            tracing::info!(user = %user, "secondary factor rejected");
            return Err(AuthError::SecondaryFactorInvalid);
        }

        let token = self.issuer.issue(&user)?;
        self.sessions.lock().await.remove(&req.session);
        tracing::info!(user = %user, "login complete");
        Ok(StageResponse::Authenticated { token })
    }

    /// Resolve a session id, enforcing the expected stage. A session at the
    /// wrong stage is discarded — the caller restarts from credentials.
    async fn session_user(&self, session_id: &str, expected: Stage) -> Result<String, AuthError> {
        let mut sessions = self.sessions.lock().await;
        let found = sessions
            .get(session_id)
            .map(|session| (session.user.clone(), session.stage));
        match found {
            Some((user, stage)) if stage == expected => Ok(user),
            Some(_) => {
                tracing::warn!("session presented out of order; discarding");
                sessions.remove(session_id);
                Err(AuthError::FlowOrderViolation)
            }
            None => Err(AuthError::FlowOrderViolation),
        }
    }

    async fn user_lock(&self, user: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
