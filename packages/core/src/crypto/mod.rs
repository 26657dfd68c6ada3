//! Криптографический модуль
//!
//! # Архитектура
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  SecureChannel (api::channel)               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┴─────────────┐
//!                ▼                           ▼
//! ┌───────────────────────────┐  ┌──────────────────────────┐
//! │   Key agreement           │  │  Message encryption      │
//! │  - DhParameters, KeyPair  │  │  - AES-256-GCM           │
//! │  - shared secret + HKDF   │  │  - base64(nonce || ct)   │
//! └───────────────────────────┘  └──────────────────────────┘
//!                │                           │
//!                └─────────────┬─────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Primitives                           │
//! │  - modular exponentiation, Miller-Rabin                     │
//! │  - HKDF-SHA256 ("handshake data", "key-rotation")           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Модули
//!
//! - [`modular`]: square-and-multiply и Montgomery ladder
//! - [`primality`]: проверка DH параметров (safe prime)
//! - [`dh`]: параметры группы и ключевая пара
//! - [`shared_secret`]: DH -> симметричный ключ сессии
//! - [`kdf`]: HKDF-SHA256 helpers
//! - [`keys`]: [`SymmetricKey`] (zeroize on drop)
//! - [`aead`]: формат зашифрованного сообщения

pub mod aead;
pub mod dh;
pub mod kdf;
pub mod keys;
pub mod modular;
pub mod primality;
pub mod shared_secret;

pub use dh::{DhParameters, KeyPair};
pub use keys::SymmetricKey;
