//! Veriface login service: the stage machine, session registry, one-time
//! codes, and storage wrapped around the decision engine in
//! `veriface-core`.
//!
//! Transport is the host's concern — an HTTP or IPC layer maps one request
//! type to each stage call and serializes [`flow::StageResponse`] or the
//! [`error::AuthError`] code back to the client.

pub mod codes;
pub mod config;
pub mod error;
pub mod flow;
pub mod session;
pub mod store;

pub use codes::CodeIssuer;
pub use config::{Config, ExtractorKind};
pub use error::AuthError;
pub use flow::{
    CodeVerifier, CredentialIssuer, CredentialVerifier, CredentialsRequest, FaceRequest,
    LoginFlow, SecondaryFactorRequest, StageResponse,
};
pub use session::{LoginSession, SessionStore, Stage};
pub use store::{RecordStore, StoreError};

/// Initialize structured logging from `RUST_LOG`. Safe to call more than
/// once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
