//! One-time secondary-factor codes.
//!
//! Codes are issued out of band (the host delivers them), stored only as
//! SHA-256 digests with an expiry, and consumed on first successful
//! verification.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use sha2::{Digest, Sha256};

const CODE_LEN: usize = 8;
// Uppercase alphanumerics minus the lookalikes (0/O, 1/I).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

struct IssuedCode {
    digest: [u8; 32],
    expires: Instant,
}

/// Issues and verifies one-time codes, keyed by user identifier.
pub struct CodeIssuer {
    ttl: Duration,
    codes: Mutex<HashMap<String, IssuedCode>>,
}

impl CodeIssuer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            codes: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh code for the user, replacing any outstanding one.
    /// The plaintext is returned once for delivery and never stored.
    pub fn issue(&self, identifier: &str) -> String {
        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();

        self.codes.lock().expect("code table poisoned").insert(
            identifier.to_string(),
            IssuedCode {
                digest: digest(&code),
                expires: Instant::now() + self.ttl,
            },
        );
        tracing::debug!(identifier, "one-time code issued");
        code
    }

    /// Verify and consume. Wrong, expired, and absent codes all fail;
    /// only a successful verification consumes the stored digest.
    pub fn verify(&self, identifier: &str, code: &str) -> bool {
        let mut codes = self.codes.lock().expect("code table poisoned");
        let valid = codes
            .get(identifier)
            .map(|issued| Instant::now() < issued.expires && issued.digest == digest(code))
            .unwrap_or(false);
        if valid {
            codes.remove(identifier);
        }
        valid
    }
}

fn digest(code: &str) -> [u8; 32] {
    Sha256::digest(code.as_bytes()).into()
}
