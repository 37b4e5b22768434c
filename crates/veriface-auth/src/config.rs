use std::path::PathBuf;
use std::time::Duration;

/// Which embedding extractor the host wires in at startup. The
/// model-backed extractor lives with the host; the pixel fingerprint is
/// the built-in fallback for deployments without a recognition model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    Model,
    PixelFingerprint,
}

/// Service configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// How long a login session may sit between stages before it expires.
    pub session_ttl: Duration,
    /// Lifetime of an issued secondary-factor code.
    pub code_ttl: Duration,
    /// Extractor implementation selected at startup.
    pub extractor: ExtractorKind,
}

impl Config {
    /// Load configuration from `VERIFACE_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("veriface");

        let db_path = std::env::var("VERIFACE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("users.db"));

        let extractor = match std::env::var("VERIFACE_EXTRACTOR").as_deref() {
            Ok("pixel") => ExtractorKind::PixelFingerprint,
            _ => ExtractorKind::Model,
        };

        Self {
            db_path,
            session_ttl: Duration::from_secs(env_u64("VERIFACE_SESSION_TTL_SECS", 120)),
            code_ttl: Duration::from_secs(env_u64("VERIFACE_CODE_TTL_SECS", 300)),
            extractor,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
