//! Peer sessions
//!
//! - [`peer`]: one [`PeerSession`] per remote peer and the key rotation engine
//! - [`registry`]: [`SessionRegistry`], the only owner of sessions

pub mod peer;
pub mod registry;

pub use peer::{OutgoingKey, PeerSession, RotationPolicy, SessionInfo};
pub use registry::SessionRegistry;
