// common/src/models/session.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthMode;

/// Public facts about the running session, safe to hand to the UI.
/// Omits the shared secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Distinguishes runs in logs; regenerated each process start
    pub session_id: Uuid,
    /// SHA-256 fingerprint of the loopback certificate, lowercase hex
    pub fingerprint: String,
    /// SHA-256 fingerprint of the certificate's public key, lowercase hex
    pub public_key_fingerprint: String,
    pub auth_mode: AuthMode,
    pub started_at: DateTime<Utc>,
    pub dev_mode: bool,
}

impl SessionInfo {
    pub fn new(
        fingerprint: String,
        public_key_fingerprint: String,
        auth_mode: AuthMode,
        dev_mode: bool,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            fingerprint,
            public_key_fingerprint,
            auth_mode,
            started_at: Utc::now(),
            dev_mode,
        }
    }
}
