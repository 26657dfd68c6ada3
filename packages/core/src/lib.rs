// Whisper Core
// Pairwise end-to-end encryption: Diffie-Hellman key agreement, HKDF key
// rotation and AES-256-GCM message encryption.

#![warn(clippy::all)]

// Модули
pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod utils;

// Re-exports для удобства
pub use api::{SealedMessage, SecureChannel};
pub use config::{Config, RotationSalt};
pub use error::{ChannelError, Result};
pub use protocol::{Envelope, KeyDirectory, ParameterSource, ParametersWire};
pub use session::SessionInfo;
