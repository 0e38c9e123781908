// common/src/errors.rs
use thiserror::Error;

/// Failures the shell can run into, from startup through per-request auth.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Key pair generation or certificate signing failed.
    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    /// The transient key store could not be written, read or decrypted.
    #[error("key store failure: {0}")]
    KeyStoreFailure(String),

    /// The loopback server could not bind its listening socket.
    #[error("failed to bind {addr}: {reason}")]
    BindFailure { addr: String, reason: String },

    /// A request presented no secret, or the wrong one.
    #[error("request rejected on {channel} channel")]
    AuthRejected { channel: String },

    /// The engine was offered a certificate other than the pinned one.
    #[error("certificate presented by {host} does not match the pinned certificate")]
    CertificateMismatch { host: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("invalid state transition from {from} to {to}")]
    InvalidState { from: String, to: String },
}

impl ShellError {
    /// Whether the error must abort the whole process rather than a single
    /// request or connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShellError::CryptoFailure(_)
                | ShellError::KeyStoreFailure(_)
                | ShellError::BindFailure { .. }
                | ShellError::Config(_)
                | ShellError::InvalidState { .. }
        )
    }
}
