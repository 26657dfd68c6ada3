//! Session Registry
//!
//! Sole owner of every [`PeerSession`]. Callers never hold a session across
//! operations; they go through the registry, which serializes work per peer.
//!
//! ## Locking
//!
//! ```text
//! SessionRegistry
//!   ├── slots: Mutex<HashMap<peer_id, Arc<AsyncMutex<Option<PeerSession>>>>>
//!   │            short, never held across .await
//!   └── generation: AtomicU64   bumped by clear()
//! ```
//!
//! Each peer has its own async mutex, so establishing a session with one peer
//! (which awaits the key directory) never blocks traffic with another.
//!
//! `clear()` drops every slot and bumps the generation. An establishment that
//! started before the clear finishes against an orphaned slot and its result
//! is discarded with [`ChannelError::ChannelReset`].

use crate::error::{ChannelError, Result};
use crate::crypto::keys::SymmetricKey;
use crate::session::peer::{OutgoingKey, PeerSession, RotationPolicy, SessionInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

type Slot = Arc<AsyncMutex<Option<PeerSession>>>;

/// Per-peer sessions with per-peer exclusive access
#[derive(Default)]
pub struct SessionRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current reset generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Establish a session with `peer_id` unless one exists.
    ///
    /// `derive` runs under the peer's lock, at most once per concurrent burst
    /// of callers, and only when the session is `Absent`. `generation` is the
    /// value of [`generation`](Self::generation) observed together with the
    /// inputs `derive` captured; if a `clear()` happened since, the result is
    /// discarded. Failure leaves no trace in the registry. Returns `true` when
    /// a new session was created.
    pub async fn ensure_session<F, Fut>(
        &self,
        peer_id: &str,
        generation: u64,
        policy: RotationPolicy,
        derive: F,
    ) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SymmetricKey>>,
    {
        use tracing::{debug, info};

        let slot = self.slot(peer_id);
        let mut guard = slot.lock().await;

        if guard.is_some() {
            return Ok(false);
        }

        let outcome = if self.generation() != generation {
            Err(ChannelError::ChannelReset)
        } else {
            match derive().await {
                _ if self.generation() != generation => {
                    debug!(
                        target: "session::registry",
                        peer_id = %peer_id,
                        "Discarding session derived before reset"
                    );
                    Err(ChannelError::ChannelReset)
                }
                other => other,
            }
        };

        match outcome {
            Ok(shared_secret) => {
                *guard = Some(PeerSession::establish(peer_id.to_string(), shared_secret, policy));
                info!(target: "session::registry", peer_id = %peer_id, "Session established");
                Ok(true)
            }
            Err(e) => {
                drop(guard);
                self.release_if_vacant(peer_id, &slot);
                Err(e)
            }
        }
    }

    /// Advance the peer's counter and return the key for the next message.
    pub async fn record_outgoing(&self, peer_id: &str) -> Result<OutgoingKey> {
        let slot = self.existing_slot(peer_id)?;
        let mut guard = slot.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| ChannelError::UnknownPeer(peer_id.to_string()))?;
        session.record_outgoing()
    }

    /// Key for message `sequence` from `peer_id`, or the current key.
    pub async fn resolve_decryption_key(
        &self,
        peer_id: &str,
        sequence: Option<u64>,
    ) -> Result<SymmetricKey> {
        let slot = self.existing_slot(peer_id)?;
        let guard = slot.lock().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| ChannelError::UnknownPeer(peer_id.to_string()))?;
        session.resolve_decryption_key(sequence)
    }

    /// Open an incoming message from `peer_id` under the peer's lock.
    ///
    /// `open` receives the key for `sequence`; the session only changes if it
    /// succeeds. See [`PeerSession::open_incoming`].
    pub async fn open<T, F>(&self, peer_id: &str, sequence: Option<u64>, open: F) -> Result<T>
    where
        F: FnOnce(&SymmetricKey) -> Result<T>,
    {
        let slot = self.existing_slot(peer_id)?;
        let mut guard = slot.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| ChannelError::UnknownPeer(peer_id.to_string()))?;
        session.open_incoming(sequence, open)
    }

    /// Evict all but the newest `keep` epochs (and the current one) of one session.
    pub async fn prune(&self, peer_id: &str, keep: usize) -> Result<usize> {
        let slot = self.existing_slot(peer_id)?;
        let mut guard = slot.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| ChannelError::UnknownPeer(peer_id.to_string()))?;
        Ok(session.prune(keep))
    }

    pub async fn has_session(&self, peer_id: &str) -> bool {
        match self.existing_slot(peer_id) {
            Ok(slot) => slot.lock().await.is_some(),
            Err(_) => false,
        }
    }

    pub async fn session_info(&self, peer_id: &str) -> Option<SessionInfo> {
        let slot = self.existing_slot(peer_id).ok()?;
        let guard = slot.lock().await;
        guard.as_ref().map(PeerSession::info)
    }

    /// Number of slots; includes establishments still in flight.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Drop every session (logout). In-flight establishments are discarded.
    pub fn clear(&self) {
        use tracing::info;

        let mut slots = self.slots.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let dropped = slots.len();
        slots.clear();
        if dropped > 0 {
            info!(target: "session::registry", sessions = dropped, "Session registry cleared");
        }
    }

    fn slot(&self, peer_id: &str) -> Slot {
        self.slots
            .lock()
            .entry(peer_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    fn existing_slot(&self, peer_id: &str) -> Result<Slot> {
        self.slots
            .lock()
            .get(peer_id)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownPeer(peer_id.to_string()))
    }

    /// Remove an empty slot nobody else is waiting on.
    fn release_if_vacant(&self, peer_id: &str, slot: &Slot) {
        let mut slots = self.slots.lock();
        let Some(current) = slots.get(peer_id) else {
            return;
        };
        // Clones only happen under the map lock, so the count is stable here:
        // one reference in the map, one held by the caller.
        if Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2 {
            if let Ok(inner) = slot.try_lock() {
                if inner.is_none() {
                    drop(inner);
                    slots.remove(peer_id);
                }
            }
        }
    }
}
