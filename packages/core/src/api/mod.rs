// Публичный API ядра

pub mod channel;

pub use channel::{SealedMessage, SecureChannel};
