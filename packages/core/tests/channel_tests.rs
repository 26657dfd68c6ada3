//! End-to-end tests for SecureChannel
//!
//! Two (or three) channels share one in-memory key directory, the way two
//! clients share one server.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use whisper_core::crypto::aead;
use whisper_core::crypto::keys::{SymmetricKey, KEY_LEN};
use whisper_core::storage::{MemoryKeyDirectory, StaticParameterSource};
use whisper_core::{
    ChannelError, Config, Envelope, KeyDirectory, ParameterSource, ParametersWire, Result,
    SecureChannel,
};

/// 256-bit safe prime, generator 2
const P_HEX: &str = "c998ff967972196995c8de6284b5bf11a36ae4d26bd3767468e33bd0e61a5a7f";

/// Prime, but (p - 1) / 2 is not
const NOT_SAFE_P_HEX: &str = "b6af43a255b59b3143bea989181a418c981d808552560d0ca74010c7e7b7b8c9";

fn wire(p_hex: &str) -> ParametersWire {
    ParametersWire {
        p_hex: p_hex.to_string(),
        g_hex: "2".to_string(),
    }
}

fn source() -> StaticParameterSource {
    StaticParameterSource::new(wire(P_HEX))
}

fn channel<D: KeyDirectory>(directory: D) -> SecureChannel<StaticParameterSource, D> {
    SecureChannel::with_config(source(), directory, Config::default())
}

async fn pair() -> (
    SecureChannel<StaticParameterSource, MemoryKeyDirectory>,
    SecureChannel<StaticParameterSource, MemoryKeyDirectory>,
) {
    let directory = MemoryKeyDirectory::new();
    let alice = channel(directory.clone());
    let bob = channel(directory);
    alice.initialize("alice").await.unwrap();
    bob.initialize("bob").await.unwrap();
    (alice, bob)
}

// ============================================================================
// Test collaborators
// ============================================================================

struct UnreachableSource;

#[async_trait]
impl ParameterSource for UnreachableSource {
    async fn fetch_parameters(&self) -> Result<ParametersWire> {
        Err(ChannelError::ParameterFetchError("connection refused".to_string()))
    }
}

/// Counts fetches
#[derive(Clone, Default)]
struct CountingSource {
    fetches: Arc<AtomicUsize>,
}

#[async_trait]
impl ParameterSource for CountingSource {
    async fn fetch_parameters(&self) -> Result<ParametersWire> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(wire(P_HEX))
    }
}

/// Fails the next publish when armed
#[derive(Clone, Default)]
struct FlakyDirectory {
    inner: MemoryKeyDirectory,
    fail_next_publish: Arc<AtomicBool>,
}

#[async_trait]
impl KeyDirectory for FlakyDirectory {
    async fn publish_public_key(&self, token: &str, serialized: &str) -> Result<()> {
        if self.fail_next_publish.swap(false, Ordering::SeqCst) {
            return Err(ChannelError::PublishError("503".to_string()));
        }
        self.inner.publish_public_key(token, serialized).await
    }

    async fn fetch_peer_public_key(&self, peer_id: &str) -> Result<String> {
        self.inner.fetch_peer_public_key(peer_id).await
    }
}

/// Holds peer key lookups until released
#[derive(Clone, Default)]
struct GatedDirectory {
    inner: MemoryKeyDirectory,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl KeyDirectory for GatedDirectory {
    async fn publish_public_key(&self, token: &str, serialized: &str) -> Result<()> {
        self.inner.publish_public_key(token, serialized).await
    }

    async fn fetch_peer_public_key(&self, peer_id: &str) -> Result<String> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.fetch_peer_public_key(peer_id).await
    }
}

// ============================================================================
// Initialization
// ============================================================================

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let directory = MemoryKeyDirectory::new();
    let alice = channel(directory.clone());

    assert!(!alice.has_parameters());
    assert!(!alice.has_keys());

    assert!(alice.initialize("alice").await.unwrap());
    let fingerprint = alice.local_fingerprint().unwrap();

    assert!(!alice.initialize("alice").await.unwrap());
    assert_eq!(alice.local_fingerprint().unwrap(), fingerprint);
    assert!(alice.has_parameters());
    assert!(alice.has_keys());
    assert_eq!(alice.identity_token().as_deref(), Some("alice"));
    assert_eq!(
        directory.fetch_peer_public_key("alice").await.unwrap(),
        alice.serialized_public_value().unwrap()
    );
}

#[tokio::test]
async fn test_concurrent_initialize_creates_one_identity() {
    let alice = channel(MemoryKeyDirectory::new());
    let (a, b) = tokio::join!(alice.initialize("alice"), alice.initialize("alice"));
    let created = [a.unwrap(), b.unwrap()];
    assert_eq!(created.iter().filter(|c| **c).count(), 1);
}

#[tokio::test]
async fn test_parameter_fetch_error_propagates() {
    let alice = SecureChannel::with_config(
        UnreachableSource,
        MemoryKeyDirectory::new(),
        Config::default(),
    );
    let err = alice.initialize("alice").await.unwrap_err();
    assert!(matches!(err, ChannelError::ParameterFetchError(_)));
    assert!(err.is_retryable());
    assert!(!alice.has_parameters());
    assert!(!alice.has_keys());
}

#[tokio::test]
async fn test_invalid_parameters_rejected() {
    for p_hex in [NOT_SAFE_P_HEX, "17"] {
        let alice = SecureChannel::with_config(
            StaticParameterSource::new(wire(p_hex)),
            MemoryKeyDirectory::new(),
            Config::default(),
        );
        let err = alice.initialize("alice").await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidParameters(_)), "{p_hex}: {err:?}");
        assert!(!alice.has_parameters());
    }

    let garbage = SecureChannel::with_config(
        StaticParameterSource::new(ParametersWire {
            p_hex: "zz".to_string(),
            g_hex: "2".to_string(),
        }),
        MemoryKeyDirectory::new(),
        Config::default(),
    );
    assert!(matches!(
        garbage.initialize("alice").await,
        Err(ChannelError::InvalidParameters(_))
    ));
}

#[tokio::test]
async fn test_failed_publish_keeps_parameters_and_retries_on_ensure() {
    let source = CountingSource::default();
    let directory = FlakyDirectory::default();
    let alice = SecureChannel::with_config(source.clone(), directory.clone(), Config::default());
    let bob = channel(directory.inner.clone());
    bob.initialize("bob").await.unwrap();

    directory.fail_next_publish.store(true, Ordering::SeqCst);
    let err = alice.initialize("alice").await.unwrap_err();
    assert!(matches!(err, ChannelError::PublishError(_)));
    assert!(alice.has_parameters());
    assert!(!alice.has_keys());

    // ensure_channel initializes first, with the token from the failed attempt
    assert!(alice.ensure_channel("bob").await.unwrap());
    assert!(alice.has_keys());
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ensure_before_initialize() {
    let alice = channel(MemoryKeyDirectory::new());
    assert_eq!(
        alice.ensure_channel("bob").await,
        Err(ChannelError::NotInitialized)
    );
    assert_eq!(alice.session_count(), 0);
}

// ============================================================================
// Messaging
// ============================================================================

#[tokio::test]
async fn test_two_party_exchange_with_rotation() {
    let (alice, bob) = pair().await;

    let mut sealed = Vec::new();
    for i in 1..=10 {
        let message = alice
            .encrypt_for_peer("bob", format!("message {i}").as_bytes())
            .await
            .unwrap();
        assert_eq!(message.sequence, i);
        sealed.push(message);
    }

    let info = alice.session_info("bob").await.unwrap();
    assert_eq!(info.message_counter, 10);
    assert_eq!(info.epoch, 10);
    assert_eq!(info.retained_epochs, vec![0, 10]);

    assert!(bob.ensure_channel("alice").await.unwrap());
    assert!(!bob.ensure_channel("alice").await.unwrap());

    // #1 under the epoch-0 key, #10 under the rotated key
    assert_eq!(
        bob.decrypt_text("alice", &sealed[0].blob, Some(1)).await.unwrap(),
        "message 1"
    );
    assert_eq!(
        bob.decrypt_text("alice", &sealed[9].blob, Some(10)).await.unwrap(),
        "message 10"
    );
    assert_eq!(
        bob.decrypt_from_peer("alice", &sealed[9].blob, Some(9)).await,
        Err(ChannelError::DecryptionFailed)
    );

    // Out of order and without a hint
    assert_eq!(
        bob.decrypt_text("alice", &sealed[4].blob, Some(5)).await.unwrap(),
        "message 5"
    );
    assert_eq!(
        bob.decrypt_text("alice", &sealed[2].blob, None).await.unwrap(),
        "message 3"
    );
}

#[tokio::test]
async fn test_reply_direction() {
    let (alice, bob) = pair().await;

    let hello = alice.encrypt_for_peer("bob", b"hello").await.unwrap();
    let reply = bob.encrypt_for_peer("alice", b"hi alice").await.unwrap();
    assert_eq!(reply.sequence, 1);

    assert_eq!(
        bob.decrypt_from_peer("alice", &hello.blob, Some(hello.sequence)).await.unwrap(),
        b"hello"
    );
    assert_eq!(
        alice.decrypt_from_peer("bob", &reply.blob, Some(reply.sequence)).await.unwrap(),
        b"hi alice"
    );
}

#[tokio::test]
async fn test_unknown_peer_leaves_no_session() {
    let (alice, _bob) = pair().await;

    let err = alice.encrypt_for_peer("carol", b"hi").await.unwrap_err();
    assert_eq!(err, ChannelError::PeerKeyNotFound("carol".to_string()));
    assert!(!alice.has_session("carol").await);
    assert_eq!(alice.session_count(), 0);
}

#[tokio::test]
async fn test_decrypt_without_session() {
    let (alice, bob) = pair().await;
    let sealed = alice.encrypt_for_peer("bob", b"hi").await.unwrap();

    assert_eq!(
        bob.decrypt_from_peer("alice", &sealed.blob, Some(1)).await,
        Err(ChannelError::UnknownPeer("alice".to_string()))
    );
    assert!(!bob.has_session("alice").await);
}

#[tokio::test]
async fn test_invalid_peer_id() {
    let (alice, _bob) = pair().await;
    assert_eq!(
        alice.ensure_channel("").await,
        Err(ChannelError::UnknownPeer(String::new()))
    );
    let long = "x".repeat(whisper_core::utils::validation::MAX_PEER_ID_LENGTH + 1);
    assert!(matches!(
        alice.encrypt_for_peer(&long, b"hi").await,
        Err(ChannelError::UnknownPeer(_))
    ));
}

#[tokio::test]
async fn test_tampered_blob_does_not_poison_session() {
    let (alice, bob) = pair().await;
    bob.ensure_channel("alice").await.unwrap();

    let sealed = alice.encrypt_for_peer("bob", b"original").await.unwrap();
    let mut tampered = sealed.blob.clone();
    let replacement = if &tampered[20..21] == "A" { "B" } else { "A" };
    tampered.replace_range(20..21, replacement);

    let err = bob.decrypt_from_peer("alice", &tampered, Some(1)).await.unwrap_err();
    assert_eq!(err, ChannelError::DecryptionFailed);
    assert!(err.is_message_level());

    assert_eq!(
        bob.decrypt_from_peer("alice", &sealed.blob, Some(1)).await.unwrap(),
        b"original"
    );
}

#[tokio::test]
async fn test_envelope_round_trip() {
    let (alice, bob) = pair().await;
    bob.ensure_channel("alice").await.unwrap();

    let envelope = alice.seal_envelope("alice", "bob", b"over the wire").await.unwrap();
    assert_eq!(envelope.sequence, Some(1));

    let received = Envelope::from_json(&envelope.to_json().unwrap()).unwrap();
    assert_eq!(bob.open_envelope(&received).await.unwrap(), b"over the wire");
}

#[tokio::test]
async fn test_concurrent_peers_are_independent() {
    let directory = MemoryKeyDirectory::new();
    let alice = channel(directory.clone());
    let bob = channel(directory.clone());
    let carol = channel(directory);
    alice.initialize("alice").await.unwrap();
    bob.initialize("bob").await.unwrap();
    carol.initialize("carol").await.unwrap();

    let (to_bob, to_carol) = tokio::join!(
        alice.encrypt_for_peer("bob", b"for bob"),
        alice.encrypt_for_peer("carol", b"for carol"),
    );
    let (to_bob, to_carol) = (to_bob.unwrap(), to_carol.unwrap());
    assert_eq!(alice.session_count(), 2);

    bob.ensure_channel("alice").await.unwrap();
    carol.ensure_channel("alice").await.unwrap();
    assert_eq!(
        bob.decrypt_from_peer("alice", &to_bob.blob, Some(1)).await.unwrap(),
        b"for bob"
    );
    assert_eq!(
        carol.decrypt_from_peer("alice", &to_carol.blob, Some(1)).await.unwrap(),
        b"for carol"
    );
    assert_eq!(
        carol.decrypt_from_peer("alice", &to_bob.blob, Some(1)).await,
        Err(ChannelError::DecryptionFailed)
    );
}

#[tokio::test]
async fn test_concurrent_ensure_same_peer() {
    let (alice, _bob) = pair().await;
    let results = tokio::join!(
        alice.ensure_channel("bob"),
        alice.ensure_channel("bob"),
        alice.ensure_channel("bob"),
    );
    let created = [results.0.unwrap(), results.1.unwrap(), results.2.unwrap()];
    assert_eq!(created.iter().filter(|c| **c).count(), 1);
    assert_eq!(alice.session_info("bob").await.unwrap().retained_epochs, vec![0]);
}

#[tokio::test]
async fn test_retention_bound() {
    let config = Config {
        max_retained_epochs: Some(2),
        ..Config::default()
    };
    let directory = MemoryKeyDirectory::new();
    let alice = SecureChannel::with_config(source(), directory.clone(), config.clone());
    let bob = SecureChannel::with_config(source(), directory, config);
    alice.initialize("alice").await.unwrap();
    bob.initialize("bob").await.unwrap();
    bob.ensure_channel("alice").await.unwrap();

    let mut sealed = Vec::new();
    for i in 0..30 {
        sealed.push(alice.encrypt_for_peer("bob", &[i]).await.unwrap());
    }
    assert_eq!(
        alice.session_info("bob").await.unwrap().retained_epochs,
        vec![20, 30]
    );

    assert_eq!(
        bob.decrypt_from_peer("alice", &sealed[29].blob, Some(30)).await.unwrap(),
        vec![29]
    );
    // Bob still sends under epoch 0, so it survives the bound
    assert_eq!(
        bob.session_info("alice").await.unwrap().retained_epochs,
        vec![0, 20, 30]
    );
    assert_eq!(
        bob.decrypt_from_peer("alice", &sealed[4].blob, Some(5)).await.unwrap(),
        vec![4]
    );
    assert_eq!(
        bob.decrypt_from_peer("alice", &sealed[14].blob, Some(15)).await,
        Err(ChannelError::KeyNotFound {
            peer_id: "alice".to_string(),
            sequence: 15,
        })
    );

    assert_eq!(bob.prune_session("alice", 1).await.unwrap(), 1);
    assert_eq!(bob.session_info("alice").await.unwrap().retained_epochs, vec![0, 30]);
}

#[tokio::test]
async fn test_forged_sequence_keeps_history() {
    let config = Config {
        max_retained_epochs: Some(2),
        ..Config::default()
    };
    let directory = MemoryKeyDirectory::new();
    let alice = SecureChannel::with_config(source(), directory.clone(), config.clone());
    let bob = SecureChannel::with_config(source(), directory, config);
    alice.initialize("alice").await.unwrap();
    bob.initialize("bob").await.unwrap();
    bob.ensure_channel("alice").await.unwrap();

    let first = alice.encrypt_for_peer("bob", b"first").await.unwrap();

    // Attacker-chosen sequence with a blob that does not authenticate
    let forged = aead::encrypt(&SymmetricKey::from_bytes([9; KEY_LEN]), b"junk").unwrap();
    assert_eq!(
        bob.decrypt_from_peer("alice", &forged, Some(100)).await,
        Err(ChannelError::DecryptionFailed)
    );
    assert_eq!(bob.session_info("alice").await.unwrap().retained_epochs, vec![0]);

    assert_eq!(
        bob.decrypt_from_peer("alice", &first.blob, Some(first.sequence)).await.unwrap(),
        b"first"
    );
}

#[tokio::test]
async fn test_forged_sequences_do_not_grow_history() {
    let (alice, bob) = pair().await;
    bob.ensure_channel("alice").await.unwrap();
    let sealed = alice.encrypt_for_peer("bob", b"real").await.unwrap();

    for sequence in [1_000, 2_000, 3_000, 4_000, 5_000] {
        assert!(bob.decrypt_from_peer("alice", &sealed.blob, Some(sequence)).await.is_err());
    }
    assert_eq!(bob.session_info("alice").await.unwrap().retained_epochs, vec![0]);

    // An authenticated message past the gap is still accepted and committed
    for _ in 1..20 {
        alice.encrypt_for_peer("bob", b"filler").await.unwrap();
    }
    let later = alice.encrypt_for_peer("bob", b"later").await.unwrap();
    assert_eq!(later.sequence, 21);
    assert_eq!(
        bob.decrypt_from_peer("alice", &later.blob, Some(later.sequence)).await.unwrap(),
        b"later"
    );
    assert_eq!(
        bob.session_info("alice").await.unwrap().retained_epochs,
        vec![0, 10, 20]
    );
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_restore_keeps_identity() {
    let (alice, bob) = pair().await;
    let parameters = alice.parameters().unwrap();
    let private_key = alice.export_private_key().unwrap();
    let fingerprint = alice.local_fingerprint().unwrap();
    bob.ensure_channel("alice").await.unwrap();

    // Same user on a new device/process, same directory
    let directory = MemoryKeyDirectory::new();
    directory
        .publish_public_key("bob", &bob.serialized_public_value().unwrap())
        .await
        .unwrap();
    let restored = SecureChannel::with_config(UnreachableSource, directory, Config::default());
    assert!(restored.restore("alice", &parameters, &private_key).await.unwrap());
    assert_eq!(restored.local_fingerprint().unwrap(), fingerprint);

    let sealed = restored.encrypt_for_peer("bob", b"still me").await.unwrap();
    assert_eq!(
        bob.decrypt_from_peer("alice", &sealed.blob, Some(sealed.sequence)).await.unwrap(),
        b"still me"
    );
}

#[tokio::test]
async fn test_restore_rejects_malformed_key() {
    let alice = channel(MemoryKeyDirectory::new());
    assert!(matches!(
        alice.restore("alice", &wire(P_HEX), r#"{"nope":1}"#).await,
        Err(ChannelError::MalformedKey(_))
    ));
    assert!(!alice.has_keys());
}

#[tokio::test]
async fn test_failed_restore_does_not_mint_identity() {
    let directory = MemoryKeyDirectory::new();
    let alice = channel(directory.clone());
    assert!(alice.restore("alice", &wire(P_HEX), r#"{"nope":1}"#).await.is_err());

    assert_eq!(alice.ensure_channel("bob").await, Err(ChannelError::NotInitialized));
    assert!(!alice.has_keys());
    assert!(alice.identity_token().is_none());
    assert!(directory.fetch_peer_public_key("alice").await.is_err());
}

// ============================================================================
// Reset
// ============================================================================

#[tokio::test]
async fn test_reset_is_terminal_and_idempotent() {
    let (alice, _bob) = pair().await;
    alice.encrypt_for_peer("bob", b"hi").await.unwrap();
    let old_fingerprint = alice.local_fingerprint().unwrap();

    alice.reset();
    alice.reset();

    assert!(!alice.has_parameters());
    assert!(!alice.has_keys());
    assert_eq!(alice.session_count(), 0);
    assert!(alice.identity_token().is_none());
    assert_eq!(
        alice.ensure_channel("bob").await,
        Err(ChannelError::NotInitialized)
    );
    assert_eq!(
        alice.serialized_public_value(),
        Err(ChannelError::NotInitialized)
    );

    assert!(alice.initialize("alice").await.unwrap());
    assert_ne!(alice.local_fingerprint().unwrap(), old_fingerprint);
}

#[tokio::test]
async fn test_reset_during_ensure_discards_session() {
    let gated = GatedDirectory::default();
    let bob = channel(gated.inner.clone());
    bob.initialize("bob").await.unwrap();

    let alice = Arc::new(channel(gated.clone()));
    alice.initialize("alice").await.unwrap();

    let task = {
        let alice = alice.clone();
        tokio::spawn(async move { alice.ensure_channel("bob").await })
    };

    gated.entered.notified().await;
    alice.reset();
    gated.release.notify_one();

    assert_eq!(task.await.unwrap(), Err(ChannelError::ChannelReset));
    assert!(!alice.has_session("bob").await);
    assert_eq!(alice.session_count(), 0);
    assert!(!alice.has_keys());
}
