//! External collaborators
//!
//! The channel talks to two services it does not own: a source of DH domain
//! parameters and a directory of public values keyed by user. Both are async
//! and may fail with network-level errors, which implementations map onto
//! [`ChannelError::ParameterFetchError`], [`ChannelError::PublishError`] and
//! [`ChannelError::PeerKeyNotFound`].
//!
//! [`ChannelError::ParameterFetchError`]: crate::error::ChannelError::ParameterFetchError
//! [`ChannelError::PublishError`]: crate::error::ChannelError::PublishError
//! [`ChannelError::PeerKeyNotFound`]: crate::error::ChannelError::PeerKeyNotFound

use crate::error::Result;
use crate::protocol::wire::ParametersWire;
use async_trait::async_trait;

/// Serves the shared DH group.
#[async_trait]
pub trait ParameterSource: Send + Sync {
    /// Fails with `ParameterFetchError` when the source is unreachable.
    async fn fetch_parameters(&self) -> Result<ParametersWire>;
}

/// Stores and serves serialized public values (`{"y_hex": ...}`).
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Publish the caller's public value under the identity behind `token`.
    async fn publish_public_key(&self, token: &str, serialized_public_value: &str) -> Result<()>;

    /// Fails with `PeerKeyNotFound` when the peer never published a key.
    async fn fetch_peer_public_key(&self, peer_id: &str) -> Result<String>;
}
