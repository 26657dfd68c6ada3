//! Secure Channel - high-level interface for pairwise encryption
//!
//! Объединяет локальную идентичность (DH параметры + ключевая пара) и реестр
//! сессий с пирами в единый API.
//!
//! ## Архитектура
//!
//! ```text
//! SecureChannel
//!   ├── ParameterSource     - откуда берутся DH параметры
//!   ├── KeyDirectory        - где публикуются и ищутся публичные значения
//!   ├── LocalState          - параметры + ключевая пара (пишутся один раз)
//!   └── SessionRegistry     - сессии с пирами, блокировка на пира
//! ```
//!
//! ## Типичный сценарий
//!
//! ```text
//! 1. channel.initialize(token)          fetch params, generate keys, publish
//! 2. sealed = channel.encrypt_for_peer("bob", b"hi")
//! 3. transport: (alice -> bob, sealed.sequence, sealed.blob)
//! 4. bob.ensure_channel("alice"); bob.decrypt_from_peer("alice", blob, Some(seq))
//! 5. channel.reset()                    logout
//! ```
//!
//! ## Не отвечает за
//!
//! - Доставку, повторы и порядок сообщений (transport layer)
//! - Хранение приватного ключа между запусками (см. [`SecureChannel::export_private_key`])

use crate::config::Config;
use crate::crypto::aead;
use crate::crypto::dh::{deserialize_public_value, DhParameters, KeyPair};
use crate::crypto::shared_secret::derive_shared_secret;
use crate::error::{ChannelError, Result};
use crate::protocol::directory::{KeyDirectory, ParameterSource};
use crate::protocol::messages::Envelope;
use crate::protocol::wire::ParametersWire;
use crate::session::peer::{RotationPolicy, SessionInfo};
use crate::session::registry::SessionRegistry;
use crate::utils::{uuid, validation};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Result of [`SecureChannel::encrypt_for_peer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    /// Sender-side message number; lets the receiver pick the right epoch key
    pub sequence: u64,
    /// `base64(nonce || ciphertext + tag)`
    pub blob: String,
}

/// Written once by `initialize`, read-only until `reset`
#[derive(Default)]
struct LocalState {
    params: Option<DhParameters>,
    key_pair: Option<Arc<KeyPair>>,
    token: Option<String>,
}

/// Pairwise end-to-end encryption for one local user
///
/// ## Generics
///
/// - `S`: ParameterSource - источник DH параметров
/// - `D`: KeyDirectory - каталог публичных ключей
pub struct SecureChannel<S: ParameterSource, D: KeyDirectory> {
    config: Config,
    policy: RotationPolicy,
    parameter_source: S,
    key_directory: D,

    /// Локальная идентичность. Guard никогда не держится через `.await`.
    local: RwLock<LocalState>,

    /// Сериализует конкурентные `initialize`
    init_lock: AsyncMutex<()>,

    /// Токен последнего initialize: ensure_channel повторяет инициализацию с ним
    pending_token: Mutex<Option<String>>,

    sessions: SessionRegistry,
}

impl<S: ParameterSource, D: KeyDirectory> SecureChannel<S, D> {
    /// Channel configured from [`Config::global`]
    pub fn new(parameter_source: S, key_directory: D) -> Self {
        Self::with_config(parameter_source, key_directory, Config::global().clone())
    }

    pub fn with_config(parameter_source: S, key_directory: D, config: Config) -> Self {
        let policy = RotationPolicy::from_config(&config);
        Self {
            config,
            policy,
            parameter_source,
            key_directory,
            local: RwLock::new(LocalState::default()),
            init_lock: AsyncMutex::new(()),
            pending_token: Mutex::new(None),
            sessions: SessionRegistry::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load parameters, generate the local key pair and publish its public value.
    ///
    /// Returns `true` when this call created the local identity and `false`
    /// when it already existed. Concurrent calls are serialized; parameters
    /// fetched by a failed attempt are reused by the next one.
    pub async fn initialize(&self, token: &str) -> Result<bool> {
        self.bootstrap(token, None, true, KeyPair::generate).await
    }

    /// Install a persisted identity (see [`export_private_key`](Self::export_private_key))
    /// instead of generating a new one. The public value is republished.
    ///
    /// A failed restore leaves no token behind, so `ensure_channel` keeps
    /// failing with `NotInitialized` instead of minting a new identity.
    pub async fn restore(
        &self,
        token: &str,
        parameters: &ParametersWire,
        private_key_json: &str,
    ) -> Result<bool> {
        self.bootstrap(token, Some(parameters.clone()), false, |params| {
            KeyPair::import_private(private_key_json, params)
        })
        .await
    }

    async fn bootstrap<F>(
        &self,
        token: &str,
        supplied: Option<ParametersWire>,
        remember_token: bool,
        make_key_pair: F,
    ) -> Result<bool>
    where
        F: FnOnce(&DhParameters) -> Result<KeyPair> + Send,
    {
        use tracing::{debug, info};

        let _init = self.init_lock.lock().await;

        let (generation, cached_params) = {
            let local = self.local.read();
            if local.key_pair.is_some() {
                return Ok(false);
            }
            // Only a retry of `initialize` may generate a fresh identity later
            if remember_token {
                *self.pending_token.lock() = Some(token.to_string());
            }
            (self.sessions.generation(), local.params.clone())
        };

        let params = match (supplied, cached_params) {
            (Some(wire), _) => self.accept_parameters(&wire, generation)?,
            (None, Some(params)) => params,
            (None, None) => {
                let wire = self.parameter_source.fetch_parameters().await?;
                self.accept_parameters(&wire, generation)?
            }
        };

        let key_pair = make_key_pair(&params)?;
        let serialized = key_pair.serialize_public_value()?;
        debug!(
            target: "channel",
            fingerprint = %key_pair.fingerprint(),
            "Publishing local public value"
        );
        self.key_directory.publish_public_key(token, &serialized).await?;

        let mut local = self.local.write();
        if self.sessions.generation() != generation {
            return Err(ChannelError::ChannelReset);
        }
        local.key_pair = Some(Arc::new(key_pair));
        local.token = Some(token.to_string());

        info!(
            target: "channel",
            modulus_bits = params.modulus().bits(),
            "Local identity initialized"
        );
        Ok(true)
    }

    /// Validate parameters and cache them unless a reset happened meanwhile.
    fn accept_parameters(&self, wire: &ParametersWire, generation: u64) -> Result<DhParameters> {
        let params = DhParameters::from_wire(wire)?;
        params.validate(&self.config)?;

        let mut local = self.local.write();
        if self.sessions.generation() != generation {
            return Err(ChannelError::ChannelReset);
        }
        local.params = Some(params.clone());
        Ok(params)
    }

    /// Make sure a session with `peer_id` exists, initializing the local
    /// identity first if a token is known. Returns `true` when a new session
    /// was established by this call.
    pub async fn ensure_channel(&self, peer_id: &str) -> Result<bool> {
        use tracing::debug;

        check_peer_id(peer_id)?;

        let (key_pair, generation) = match self.identity_snapshot() {
            Some(snapshot) => snapshot,
            None => {
                let token = self.pending_token.lock().clone();
                let token = token.ok_or(ChannelError::NotInitialized)?;
                debug!(target: "channel", "Local keys missing, initializing first");
                self.initialize(&token).await?;
                self.identity_snapshot().ok_or(ChannelError::NotInitialized)?
            }
        };

        let directory = &self.key_directory;
        self.sessions
            .ensure_session(peer_id, generation, self.policy, || async move {
                let serialized = directory.fetch_peer_public_key(peer_id).await?;
                let peer_public = deserialize_public_value(&serialized, key_pair.params())?;
                derive_shared_secret(&key_pair, &peer_public)
            })
            .await
    }

    /// Encrypt `plaintext` for `peer_id`, establishing the session if needed.
    pub async fn encrypt_for_peer(&self, peer_id: &str, plaintext: &[u8]) -> Result<SealedMessage> {
        use tracing::debug;

        self.ensure_channel(peer_id).await?;
        let outgoing = self.sessions.record_outgoing(peer_id).await?;
        let blob = aead::encrypt(&outgoing.key, plaintext)?;

        debug!(
            target: "channel",
            peer_id = %peer_id,
            sequence = outgoing.sequence,
            epoch = outgoing.epoch,
            "Message encrypted"
        );
        Ok(SealedMessage {
            sequence: outgoing.sequence,
            blob,
        })
    }

    /// Decrypt a blob from `peer_id`.
    ///
    /// `sequence` is the sender's message number when the transport carries
    /// it; without it the current key is used. Fails with `UnknownPeer` when
    /// no session exists; this call never establishes one.
    pub async fn decrypt_from_peer(
        &self,
        peer_id: &str,
        blob: &str,
        sequence: Option<u64>,
    ) -> Result<Vec<u8>> {
        use tracing::warn;

        check_peer_id(peer_id)?;
        self.sessions
            .open(peer_id, sequence, |key| aead::decrypt(key, blob))
            .await
            .map_err(|e| {
                if e == ChannelError::DecryptionFailed {
                    warn!(target: "channel", peer_id = %peer_id, ?sequence, "Decryption failed");
                }
                e
            })
    }

    /// [`decrypt_from_peer`](Self::decrypt_from_peer) for UTF-8 text
    pub async fn decrypt_text(
        &self,
        peer_id: &str,
        blob: &str,
        sequence: Option<u64>,
    ) -> Result<String> {
        let plaintext = self.decrypt_from_peer(peer_id, blob, sequence).await?;
        String::from_utf8(plaintext).map_err(|_| ChannelError::DecryptionFailed)
    }

    /// Encrypt for `to` and wrap the result in a transport envelope.
    pub async fn seal_envelope(&self, from: &str, to: &str, plaintext: &[u8]) -> Result<Envelope> {
        let sealed = self.encrypt_for_peer(to, plaintext).await?;
        Ok(Envelope {
            id: uuid::generate_v4(),
            from: from.to_string(),
            to: to.to_string(),
            sequence: Some(sealed.sequence),
            timestamp: Utc::now(),
            ciphertext: sealed.blob,
        })
    }

    /// Decrypt an envelope received from `envelope.from`.
    pub async fn open_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        self.decrypt_from_peer(&envelope.from, &envelope.ciphertext, envelope.sequence)
            .await
    }

    /// Drop local keys and every peer session (logout).
    ///
    /// Safe while other operations are in flight: their results are discarded
    /// with `ChannelReset`. A fresh `initialize` is required afterwards.
    pub fn reset(&self) {
        use tracing::info;

        let mut local = self.local.write();
        self.sessions.clear();
        *local = LocalState::default();
        *self.pending_token.lock() = None;

        info!(target: "channel", "Secure channel reset");
    }

    // === Состояние ===

    pub fn has_parameters(&self) -> bool {
        self.local.read().params.is_some()
    }

    pub fn has_keys(&self) -> bool {
        self.local.read().key_pair.is_some()
    }

    /// Token the local identity was initialized with
    pub fn identity_token(&self) -> Option<String> {
        self.local.read().token.clone()
    }

    pub async fn has_session(&self, peer_id: &str) -> bool {
        self.sessions.has_session(peer_id).await
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub async fn session_info(&self, peer_id: &str) -> Option<SessionInfo> {
        self.sessions.session_info(peer_id).await
    }

    /// Evict all but the newest `keep` epoch keys of one session.
    pub async fn prune_session(&self, peer_id: &str, keep: usize) -> Result<usize> {
        self.sessions.prune(peer_id, keep).await
    }

    pub fn parameters(&self) -> Option<ParametersWire> {
        self.local.read().params.as_ref().map(DhParameters::to_wire)
    }

    pub fn local_fingerprint(&self) -> Option<String> {
        self.local.read().key_pair.as_ref().map(|kp| kp.fingerprint())
    }

    /// `{"y_hex": ...}` of the local key pair
    pub fn serialized_public_value(&self) -> Result<String> {
        let key_pair = self.local.read().key_pair.clone();
        key_pair
            .ok_or(ChannelError::NotInitialized)?
            .serialize_public_value()
    }

    /// `{"x_hex": ...}` of the local key pair, for [`restore`](Self::restore)
    pub fn export_private_key(&self) -> Result<String> {
        let key_pair = self.local.read().key_pair.clone();
        key_pair.ok_or(ChannelError::NotInitialized)?.export_private()
    }

    fn identity_snapshot(&self) -> Option<(Arc<KeyPair>, u64)> {
        let local = self.local.read();
        let key_pair = local.key_pair.clone()?;
        Some((key_pair, self.sessions.generation()))
    }
}

fn check_peer_id(peer_id: &str) -> Result<()> {
    if validation::is_valid_peer_id(peer_id) {
        Ok(())
    } else {
        Err(ChannelError::UnknownPeer(peer_id.to_string()))
    }
}
