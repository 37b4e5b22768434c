use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;
use veriface_core::{BiometricRecord, Embedding, EnrollmentSample, PoseSample};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("embedding encryption failed")]
    EncryptionFailed,
    #[error("embedding decryption failed — key mismatch or corrupted data")]
    DecryptionFailed,
    #[error("invalid embedding blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error("invalid embedding value (NaN/Inf)")]
    InvalidEmbeddingValue,
    #[error("pose serialization error: {0}")]
    Pose(#[from] serde_json::Error),
    #[error("encryption key I/O error: {0}")]
    KeyIo(#[source] std::io::Error),
}

/// SQLite-backed user record storage.
///
/// Collection embeddings are encrypted with AES-256-GCM before storage; a
/// per-installation 32-byte key is generated at first use and stored at
/// `{db_dir}/.key` (mode 0600). The legacy single-embedding column keeps
/// its inherited plaintext f32-LE format so pre-collection records load
/// losslessly.
#[derive(Clone)]
pub struct RecordStore {
    conn: Connection,
    enc_key: [u8; 32],
}

impl RecordStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let enc_key = if db_path == Path::new(":memory:") {
            // In-memory DB (tests): use a fixed all-zeros key
            [0u8; 32]
        } else {
            let key_path = db_path
                .parent()
                .unwrap_or(Path::new("/var/lib/veriface"))
                .join(".key");
            load_or_generate_key(&key_path)?
        };

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 CREATE TABLE IF NOT EXISTS users (
                     identifier TEXT PRIMARY KEY,
                     secondary_id TEXT NOT NULL,
                     active INTEGER NOT NULL DEFAULT 1,
                     failed_attempts INTEGER NOT NULL DEFAULT 0,
                     legacy_embedding BLOB,
                     legacy_pose TEXT,
                     created_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS samples (
                     id TEXT PRIMARY KEY,
                     user TEXT NOT NULL REFERENCES users(identifier) ON DELETE CASCADE,
                     embedding BLOB NOT NULL,
                     pose TEXT NOT NULL,
                     created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_samples_user ON samples(user);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, enc_key })
    }

    /// Create a user row, or update the secondary identifier of an
    /// existing one. Enrollment samples and the failure counter are left
    /// untouched.
    pub async fn upsert_user(
        &self,
        identifier: &str,
        secondary_id: &str,
    ) -> Result<(), StoreError> {
        let identifier = identifier.to_string();
        let secondary_id = secondary_id.to_string();
        let created_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (identifier, secondary_id, created_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(identifier)
                     DO UPDATE SET secondary_id = excluded.secondary_id",
                    rusqlite::params![identifier, secondary_id, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    /// Flip the account-active flag. Returns false for unknown users.
    pub async fn set_active(&self, identifier: &str, active: bool) -> Result<bool, StoreError> {
        let identifier = identifier.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute(
                    "UPDATE users SET active = ?1 WHERE identifier = ?2",
                    rusqlite::params![active as i64, identifier],
                )?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Write the pre-collection compatibility fields: the raw f32-LE
    /// embedding buffer and the single stored pose.
    pub async fn set_legacy_profile(
        &self,
        identifier: &str,
        embedding: Option<&[u8]>,
        pose: Option<&PoseSample>,
    ) -> Result<bool, StoreError> {
        let identifier = identifier.to_string();
        let embedding = embedding.map(|b| b.to_vec());
        let pose = pose.map(serde_json::to_string).transpose()?;

        self.conn
            .call(move |conn| {
                let affected = conn.execute(
                    "UPDATE users SET legacy_embedding = ?1, legacy_pose = ?2
                     WHERE identifier = ?3",
                    rusqlite::params![embedding, pose, identifier],
                )?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Append one enrollment sample. Returns the generated sample UUID.
    pub async fn append_sample(
        &self,
        identifier: &str,
        embedding: &Embedding,
        pose: &PoseSample,
    ) -> Result<String, StoreError> {
        validate_embedding_values(embedding.values())?;
        let blob = self.encrypt_embedding(embedding.values())?;
        let pose_json = serde_json::to_string(pose)?;

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now().to_rfc3339();
        let id_clone = id.clone();
        let identifier = identifier.to_string();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO samples (id, user, embedding, pose, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![id_clone, identifier, blob, pose_json, created_at],
                )?;
                Ok(())
            })
            .await?;

        Ok(id)
    }

    /// Replace the user's entire collection in one transaction
    /// (re-enrollment).
    pub async fn replace_collection(
        &self,
        identifier: &str,
        samples: &[EnrollmentSample],
    ) -> Result<(), StoreError> {
        // Encrypt outside the blocking closure
        let mut rows = Vec::with_capacity(samples.len());
        for sample in samples {
            validate_embedding_values(sample.embedding.values())?;
            rows.push((
                uuid::Uuid::new_v4().to_string(),
                self.encrypt_embedding(sample.embedding.values())?,
                serde_json::to_string(&sample.pose)?,
                chrono::Utc::now().to_rfc3339(),
            ));
        }
        let identifier = identifier.to_string();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM samples WHERE user = ?1", [&identifier])?;
                for (id, blob, pose_json, created_at) in rows {
                    tx.execute(
                        "INSERT INTO samples (id, user, embedding, pose, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![id, identifier, blob, pose_json, created_at],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    /// Persist the failure counter as a single atomic update. Values
    /// beyond the ceiling are clamped before they reach the row.
    pub async fn set_failed_attempts(
        &self,
        identifier: &str,
        value: u8,
    ) -> Result<bool, StoreError> {
        let clamped = value.min(veriface_core::MAX_FAILED_ATTEMPTS);
        let identifier = identifier.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute(
                    "UPDATE users SET failed_attempts = ?1 WHERE identifier = ?2",
                    rusqlite::params![clamped as i64, identifier],
                )?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Load the full biometric record for a user, or `None` for unknown
    /// identifiers. Corrupted collection rows are skipped with a warning
    /// rather than failing the whole load.
    pub async fn load_record(
        &self,
        identifier: &str,
    ) -> Result<Option<BiometricRecord>, StoreError> {
        let ident = identifier.to_string();

        let user_row: Option<(String, i64, i64, Option<Vec<u8>>, Option<String>)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT secondary_id, active, failed_attempts, legacy_embedding, legacy_pose
                     FROM users WHERE identifier = ?1",
                )?;
                let mut rows = stmt.query_map([&ident], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<Vec<u8>>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?;
                Ok(rows.next().transpose()?)
            })
            .await?;

        let Some((secondary_id, active, failed_attempts, legacy_blob, legacy_pose_json)) = user_row
        else {
            return Ok(None);
        };

        let ident = identifier.to_string();
        let sample_rows: Vec<(String, Vec<u8>, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, embedding, pose FROM samples
                     WHERE user = ?1 ORDER BY rowid",
                )?;
                let rows = stmt.query_map([&ident], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut record = BiometricRecord::new(identifier, secondary_id);
        record.active = active != 0;
        record.set_failed_attempts(
            failed_attempts.clamp(0, veriface_core::MAX_FAILED_ATTEMPTS as i64) as u8,
        );
        record.legacy_embedding = legacy_blob
            .as_deref()
            .map(Embedding::from_legacy_bytes)
            .filter(|e| !e.is_empty());
        record.legacy_pose = legacy_pose_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok());

        for (id, blob, pose_json) in sample_rows {
            let values = match self.decrypt_embedding(&blob) {
                Ok(values) => values,
                Err(err) => {
                    tracing::warn!(sample = %id, error = %err, "skipping undecryptable sample");
                    continue;
                }
            };
            let pose: PoseSample = match serde_json::from_str(&pose_json) {
                Ok(pose) => pose,
                Err(err) => {
                    tracing::warn!(sample = %id, error = %err, "skipping sample with bad pose");
                    continue;
                }
            };
            record.samples.push(EnrollmentSample {
                embedding: Embedding::from_values(values),
                pose,
            });
        }

        Ok(Some(record))
    }

    /// Count registered users.
    pub async fn count_users(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Encryption helpers ────────────────────────────────────────────────────

    /// Encrypt embedding values with AES-256-GCM.
    ///
    /// Output: 12-byte random nonce || ciphertext || 16-byte GCM tag.
    fn encrypt_embedding(&self, values: &[f32]) -> Result<Vec<u8>, StoreError> {
        let plaintext = embedding_to_bytes(values);

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| StoreError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(12 + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a collection embedding blob (12-byte nonce + ciphertext +
    /// 16-byte GCM tag) back into validated floats.
    fn decrypt_embedding(&self, blob: &[u8]) -> Result<Vec<f32>, StoreError> {
        const NONCE_LEN: usize = 12;

        if blob.len() <= NONCE_LEN {
            return Err(StoreError::InvalidBlob(blob.len()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)?;

        bytes_to_embedding_strict(&plaintext)
    }
}

// ── Key management ────────────────────────────────────────────────────────────

/// Load the encryption key from disk, or generate and persist a new one.
/// Written with mode 0600 (owner-readable only).
fn load_or_generate_key(key_path: &Path) -> Result<[u8; 32], StoreError> {
    if key_path.exists() {
        let bytes = std::fs::read(key_path).map_err(StoreError::KeyIo)?;
        if bytes.len() != 32 {
            return Err(StoreError::KeyIo(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "encryption key file has wrong length ({} bytes, expected 32)",
                    bytes.len()
                ),
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        tracing::debug!(path = %key_path.display(), "loaded encryption key");
        Ok(key)
    } else {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);

        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(key_path)
            .map_err(StoreError::KeyIo)?;
        f.write_all(&key).map_err(StoreError::KeyIo)?;

        tracing::info!(path = %key_path.display(), "generated new AES-256 encryption key");
        Ok(key)
    }
}

// ── Serialization helpers ─────────────────────────────────────────────────────

fn embedding_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn bytes_to_embedding_strict(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }

    let mut values = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = chunk
            .try_into()
            .map_err(|_| StoreError::InvalidBlob(bytes.len()))?;
        let v = f32::from_le_bytes(arr);
        if !v.is_finite() {
            return Err(StoreError::InvalidEmbeddingValue);
        }
        values.push(v);
    }

    Ok(values)
}

fn validate_embedding_values(values: &[f32]) -> Result<(), StoreError> {
    if values.is_empty() {
        return Err(StoreError::InvalidBlob(0));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidEmbeddingValue);
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn metric_embedding(scale: f32) -> Embedding {
        Embedding::from_values((0..128).map(|i| i as f32 * scale / 128.0).collect())
    }

    fn frontal_pose() -> PoseSample {
        PoseSample::Planar {
            x: 0.5,
            y: 0.5,
            scale: 1.0,
        }
    }

    async fn open_memory() -> RecordStore {
        RecordStore::open(Path::new(":memory:")).await.unwrap()
    }

    #[tokio::test]
    async fn unknown_user_loads_none() {
        let store = open_memory().await;
        assert!(store.load_record("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn user_roundtrip_without_samples() {
        let store = open_memory().await;
        store.upsert_user("alice", "12345678").await.unwrap();

        let record = store.load_record("alice").await.unwrap().unwrap();
        assert_eq!(record.identifier, "alice");
        assert_eq!(record.secondary_id, "12345678");
        assert!(record.active);
        assert_eq!(record.failed_attempts(), 0);
        assert!(record.samples.is_empty());
        assert!(record.legacy_embedding.is_none());
        assert!(record.legacy_pose.is_none());
    }

    #[tokio::test]
    async fn sample_roundtrip_bit_exact() {
        let store = open_memory().await;
        store.upsert_user("alice", "12345678").await.unwrap();

        let embedding = metric_embedding(1.0);
        let pose = PoseSample::Angular {
            roll: 3.5,
            pitch: -2.0,
            yaw: 11.0,
            dist: 0.55,
        };
        let id = store.append_sample("alice", &embedding, &pose).await.unwrap();
        assert!(!id.is_empty());

        let record = store.load_record("alice").await.unwrap().unwrap();
        assert_eq!(record.samples.len(), 1);
        assert_eq!(record.samples[0].pose, pose);
        for (orig, rec) in embedding
            .values()
            .iter()
            .zip(record.samples[0].embedding.values())
        {
            assert_eq!(orig.to_bits(), rec.to_bits());
        }
    }

    #[tokio::test]
    async fn legacy_profile_roundtrip() {
        let store = open_memory().await;
        store.upsert_user("alice", "12345678").await.unwrap();

        let embedding = metric_embedding(0.5);
        let updated = store
            .set_legacy_profile("alice", Some(&embedding.to_le_bytes()), Some(&frontal_pose()))
            .await
            .unwrap();
        assert!(updated);

        let record = store.load_record("alice").await.unwrap().unwrap();
        assert_eq!(record.legacy_embedding.as_ref(), Some(&embedding));
        assert_eq!(record.legacy_pose, Some(frontal_pose()));
        assert!(record.samples.is_empty());
    }

    #[tokio::test]
    async fn failed_attempts_persist_and_clamp() {
        let store = open_memory().await;
        store.upsert_user("alice", "12345678").await.unwrap();

        assert!(store.set_failed_attempts("alice", 3).await.unwrap());
        let record = store.load_record("alice").await.unwrap().unwrap();
        assert_eq!(record.failed_attempts(), 3);

        assert!(store.set_failed_attempts("alice", 200).await.unwrap());
        let record = store.load_record("alice").await.unwrap().unwrap();
        assert_eq!(record.failed_attempts(), veriface_core::MAX_FAILED_ATTEMPTS);

        assert!(!store.set_failed_attempts("nobody", 1).await.unwrap());
    }

    #[tokio::test]
    async fn upsert_preserves_counter_and_samples() {
        let store = open_memory().await;
        store.upsert_user("alice", "12345678").await.unwrap();
        store
            .append_sample("alice", &metric_embedding(1.0), &frontal_pose())
            .await
            .unwrap();
        store.set_failed_attempts("alice", 2).await.unwrap();

        // Re-registering with a new secondary id must not reset anything else.
        store.upsert_user("alice", "87654321").await.unwrap();
        let record = store.load_record("alice").await.unwrap().unwrap();
        assert_eq!(record.secondary_id, "87654321");
        assert_eq!(record.failed_attempts(), 2);
        assert_eq!(record.samples.len(), 1);
    }

    #[tokio::test]
    async fn replace_collection_swaps_samples() {
        let store = open_memory().await;
        store.upsert_user("alice", "12345678").await.unwrap();
        store
            .append_sample("alice", &metric_embedding(1.0), &frontal_pose())
            .await
            .unwrap();

        let replacement = vec![
            EnrollmentSample {
                embedding: metric_embedding(2.0),
                pose: frontal_pose(),
            },
            EnrollmentSample {
                embedding: metric_embedding(3.0),
                pose: frontal_pose(),
            },
        ];
        store.replace_collection("alice", &replacement).await.unwrap();

        let record = store.load_record("alice").await.unwrap().unwrap();
        assert_eq!(record.samples.len(), 2);
        assert_eq!(record.samples[0].embedding, replacement[0].embedding);
        assert_eq!(record.samples[1].embedding, replacement[1].embedding);
    }

    #[tokio::test]
    async fn set_active_flag() {
        let store = open_memory().await;
        store.upsert_user("alice", "12345678").await.unwrap();

        assert!(store.set_active("alice", false).await.unwrap());
        let record = store.load_record("alice").await.unwrap().unwrap();
        assert!(!record.active);

        assert!(!store.set_active("nobody", false).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_key_fails_decrypt() {
        let store1 = RecordStore {
            conn: Connection::open(Path::new(":memory:")).await.unwrap(),
            enc_key: [1u8; 32],
        };
        let store2 = RecordStore {
            conn: store1.conn.clone(),
            enc_key: [2u8; 32],
        };

        let values: Vec<f32> = (0..128).map(|i| i as f32 / 128.0).collect();
        let blob = store1.encrypt_embedding(&values).unwrap();
        assert!(store2.decrypt_embedding(&blob).is_err());
        assert_eq!(store1.decrypt_embedding(&blob).unwrap(), values);
    }

    #[tokio::test]
    async fn strict_decode_rejects_nan() {
        let mut values = vec![0.5f32; 128];
        values[42] = f32::NAN;
        let bytes = embedding_to_bytes(&values);
        let err = bytes_to_embedding_strict(&bytes).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEmbeddingValue));
    }

    #[tokio::test]
    async fn count_users_counts() {
        let store = open_memory().await;
        store.upsert_user("alice", "1").await.unwrap();
        store.upsert_user("bob", "2").await.unwrap();
        assert_eq!(store.count_users().await.unwrap(), 2);
    }
}
