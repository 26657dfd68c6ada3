// Типы ошибок

use thiserror::Error;

/// Every failure the secure-channel core can report.
///
/// Each variant is a distinct kind so the messaging layer can decide
/// retry/skip/report per kind instead of seeing an undifferentiated failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Failed to fetch DH parameters: {0}")]
    ParameterFetchError(String),

    #[error("Invalid DH parameters: {0}")]
    InvalidParameters(String),

    #[error("Malformed key: {0}")]
    MalformedKey(String),

    #[error("Key agreement failed: {0}")]
    KeyAgreementError(String),

    #[error("No session with peer {0}")]
    UnknownPeer(String),

    #[error("No key retained for message {sequence} from peer {peer_id}")]
    KeyNotFound { peer_id: String, sequence: u64 },

    /// Intentionally carries no detail: wrong key, corruption and forged
    /// tags are indistinguishable to the caller.
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Peer {0} has not published a public key")]
    PeerKeyNotFound(String),

    #[error("Failed to publish public key: {0}")]
    PublishError(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationError(String),

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Serialization failed: {0}")]
    SerializationError(String),

    #[error("Secure channel is not initialized")]
    NotInitialized,

    #[error("Secure channel was reset while the operation was in flight")]
    ChannelReset,
}

impl ChannelError {
    /// Transient failures worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChannelError::ParameterFetchError(_)
                | ChannelError::PublishError(_)
                | ChannelError::ChannelReset
        )
    }

    /// Failures scoped to a single message; the session itself stays usable.
    pub fn is_message_level(&self) -> bool {
        matches!(
            self,
            ChannelError::DecryptionFailed | ChannelError::KeyNotFound { .. }
        )
    }
}

impl From<hkdf::InvalidLength> for ChannelError {
    fn from(err: hkdf::InvalidLength) -> Self {
        ChannelError::KeyDerivationError(err.to_string())
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::MalformedKey(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
