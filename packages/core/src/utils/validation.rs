// Валидация входных данных

/// Максимальная длина идентификатора пира
pub const MAX_PEER_ID_LENGTH: usize = 128;

/// Peer IDs key the session registry and appear in logs, so they must be
/// non-empty, bounded and free of control characters.
pub fn is_valid_peer_id(peer_id: &str) -> bool {
    !peer_id.is_empty()
        && peer_id.len() <= MAX_PEER_ID_LENGTH
        && !peer_id.chars().any(char::is_control)
}
