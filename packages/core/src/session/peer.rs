//! Per-peer session state and the key rotation engine.
//!
//! ## Epochs
//!
//! An epoch is named by the message counter value at which its key took
//! effect. Epoch 0 holds the key from the DH handshake. Every
//! `rotation_threshold` outgoing messages a successor key is derived:
//!
//! ```text
//! key(0)  = HKDF(DH secret, "handshake data")
//! key(e)  = HKDF(salt(e), key(e - threshold), "key-rotation")
//! ```
//!
//! Message `n` (1-based) is encrypted under the epoch `floor(n / threshold) * threshold`,
//! so with a threshold of 10 messages 1..=9 use epoch 0 and message 10 is the
//! first one under epoch 10.
//!
//! With [`RotationSalt::EpochBound`] the chain is the same on both ends and a
//! receiver extends it forward on demand. With [`RotationSalt::Random`] the
//! history is local to the sender.

use crate::config::{Config, RotationSalt};
use crate::crypto::kdf::{derive_rotation_key, epoch_salt};
use crate::crypto::keys::SymmetricKey;
use crate::error::{ChannelError, Result};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand_core::RngCore;
use serde::Serialize;
use std::collections::BTreeMap;

/// Rotation settings captured from [`Config`] when a session is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub threshold: u64,
    pub salt: RotationSalt,
    pub salt_length: usize,
    pub max_retained_epochs: Option<usize>,
    pub max_epoch_skip: u64,
}

impl RotationPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.rotation_threshold.max(1),
            salt: config.rotation_salt,
            salt_length: config.rotation_salt_length,
            max_retained_epochs: config.max_retained_epochs,
            max_epoch_skip: config.max_epoch_skip,
        }
    }

    /// Epoch whose key encrypts message `sequence`
    pub fn epoch_of(&self, sequence: u64) -> u64 {
        sequence - sequence % self.threshold
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Key handed out for one outgoing message
#[derive(Debug, Clone)]
pub struct OutgoingKey {
    /// Value of the message counter after this message, i.e. its sequence number
    pub sequence: u64,
    pub epoch: u64,
    pub key: SymmetricKey,
    pub rotated: bool,
}

/// Read-only view of a session, safe to log or display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub peer_id: String,
    pub epoch: u64,
    pub message_counter: u64,
    pub retained_epochs: Vec<u64>,
    pub established_at: DateTime<Utc>,
}

/// Decryption key not yet committed to the history
struct StagedKey {
    key: SymmetricKey,
    extension: Vec<(u64, SymmetricKey)>,
}

/// Session with one remote peer
pub struct PeerSession {
    peer_id: String,
    current_key: SymmetricKey,
    current_epoch: u64,
    message_counter: u64,
    key_history: BTreeMap<u64, SymmetricKey>,
    policy: RotationPolicy,
    established_at: DateTime<Utc>,
}

impl PeerSession {
    /// `Absent -> Established`: counter 0, history `{0: shared_secret}`
    pub fn establish(peer_id: String, shared_secret: SymmetricKey, policy: RotationPolicy) -> Self {
        let mut key_history = BTreeMap::new();
        key_history.insert(0, shared_secret.clone());
        Self {
            peer_id,
            current_key: shared_secret,
            current_epoch: 0,
            message_counter: 0,
            key_history,
            policy,
            established_at: Utc::now(),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn current_key(&self) -> &SymmetricKey {
        &self.current_key
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    pub fn message_counter(&self) -> u64 {
        self.message_counter
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Advance the counter for one outgoing message, rotating on the threshold.
    pub fn record_outgoing(&mut self) -> Result<OutgoingKey> {
        use tracing::debug;

        let sequence = self
            .message_counter
            .checked_add(1)
            .ok_or_else(|| ChannelError::KeyDerivationError("message counter exhausted".into()))?;

        let rotated = sequence % self.policy.threshold == 0;
        if rotated {
            // Rotating(epoch) -> Established(epoch + 1)
            let successor = match self.key_history.get(&sequence) {
                // Already derived while decrypting a peer's message
                Some(existing) if self.policy.salt == RotationSalt::EpochBound => existing.clone(),
                _ => self.derive_successor(&self.current_key, sequence)?,
            };
            self.key_history.insert(sequence, successor.clone());
            self.current_key = successor;
            self.current_epoch = sequence;
            self.enforce_retention();

            debug!(
                target: "session::rotation",
                peer_id = %self.peer_id,
                epoch = sequence,
                "Session key rotated"
            );
        }
        self.message_counter = sequence;

        Ok(OutgoingKey {
            sequence,
            epoch: self.current_epoch,
            key: self.current_key.clone(),
            rotated,
        })
    }

    /// Key for decrypting message `sequence`, or the current key when `None`.
    ///
    /// With epoch-bound salts this is the key of `sequence`'s own epoch; epochs
    /// past the newest retained one are derived on the fly but not stored (see
    /// [`open_incoming`](Self::open_incoming)). With random salts it is the
    /// nearest retained epoch not greater than `sequence`.
    pub fn resolve_decryption_key(&self, sequence: Option<u64>) -> Result<SymmetricKey> {
        self.stage(sequence).map(|staged| staged.key)
    }

    /// Run `open` with the key for message `sequence`.
    ///
    /// Epochs derived to reach `sequence` are stored (and retention applied)
    /// only when `open` succeeds, so an unauthenticated sequence number can
    /// neither grow nor prune the history.
    pub fn open_incoming<T, F>(&mut self, sequence: Option<u64>, open: F) -> Result<T>
    where
        F: FnOnce(&SymmetricKey) -> Result<T>,
    {
        use tracing::trace;

        let staged = self.stage(sequence)?;
        let value = open(&staged.key)?;

        let range = staged
            .extension
            .first()
            .zip(staged.extension.last())
            .map(|((from, _), (to, _))| (*from, *to));
        if let Some((from, to)) = range {
            self.key_history.extend(staged.extension);
            self.enforce_retention();
            trace!(
                target: "session::rotation",
                peer_id = %self.peer_id,
                from,
                to,
                "Extended key chain for incoming message"
            );
        }
        Ok(value)
    }

    /// Keep only the newest `keep` epochs (at least one) plus the current one.
    /// Returns how many were evicted.
    pub fn prune(&mut self, keep: usize) -> usize {
        let newest: Vec<u64> = self.key_history.keys().rev().take(keep.max(1)).copied().collect();
        let current = self.current_epoch;
        let before = self.key_history.len();
        self.key_history
            .retain(|epoch, _| *epoch == current || newest.contains(epoch));
        before - self.key_history.len()
    }

    pub fn retained_epochs(&self) -> Vec<u64> {
        self.key_history.keys().copied().collect()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            peer_id: self.peer_id.clone(),
            epoch: self.current_epoch,
            message_counter: self.message_counter,
            retained_epochs: self.retained_epochs(),
            established_at: self.established_at,
        }
    }

    fn derive_successor(&self, current: &SymmetricKey, epoch: u64) -> Result<SymmetricKey> {
        match self.policy.salt {
            RotationSalt::EpochBound => derive_rotation_key(current, &epoch_salt(epoch)),
            RotationSalt::Random => {
                let mut salt = vec![0u8; self.policy.salt_length];
                OsRng.fill_bytes(&mut salt);
                derive_rotation_key(current, &salt)
            }
        }
    }

    /// Key for `sequence` plus the epochs that would have to be derived for it.
    fn stage(&self, sequence: Option<u64>) -> Result<StagedKey> {
        let Some(sequence) = sequence else {
            return Ok(StagedKey {
                key: self.current_key.clone(),
                extension: Vec::new(),
            });
        };

        if self.policy.salt == RotationSalt::EpochBound {
            let target = self.policy.epoch_of(sequence);
            let Some((&latest, latest_key)) = self.key_history.last_key_value() else {
                return Err(self.key_not_found(sequence));
            };
            if target > latest {
                let steps = (target - latest) / self.policy.threshold;
                if steps > self.policy.max_epoch_skip {
                    return Err(self.key_not_found(sequence));
                }

                let mut extension = Vec::new();
                let mut key = latest_key.clone();
                let mut epoch = latest;
                while epoch < target {
                    epoch += self.policy.threshold;
                    key = self.derive_successor(&key, epoch)?;
                    extension.push((epoch, key.clone()));
                }
                return Ok(StagedKey { key, extension });
            }
            // Keys are per epoch on both ends; an older neighbour is never right
            return self
                .key_history
                .get(&target)
                .map(|key| StagedKey {
                    key: key.clone(),
                    extension: Vec::new(),
                })
                .ok_or_else(|| self.key_not_found(sequence));
        }

        self.key_history
            .range(..=sequence)
            .next_back()
            .map(|(_, key)| StagedKey {
                key: key.clone(),
                extension: Vec::new(),
            })
            .ok_or_else(|| self.key_not_found(sequence))
    }

    fn enforce_retention(&mut self) {
        if let Some(max) = self.policy.max_retained_epochs {
            self.prune(max);
        }
    }

    fn key_not_found(&self, sequence: u64) -> ChannelError {
        ChannelError::KeyNotFound {
            peer_id: self.peer_id.clone(),
            sequence,
        }
    }
}
