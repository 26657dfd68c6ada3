// In-memory реализации внешних сервисов для тестов и однопроцессных сборок

use crate::error::{ChannelError, Result};
use crate::protocol::directory::{KeyDirectory, ParameterSource};
use crate::protocol::wire::ParametersWire;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Always serves the same parameters
#[derive(Debug, Clone)]
pub struct StaticParameterSource {
    parameters: ParametersWire,
}

impl StaticParameterSource {
    pub fn new(parameters: ParametersWire) -> Self {
        Self { parameters }
    }
}

#[async_trait]
impl ParameterSource for StaticParameterSource {
    async fn fetch_parameters(&self) -> Result<ParametersWire> {
        Ok(self.parameters.clone())
    }
}

/// In-memory key directory
///
/// Токен идентичности считается идентификатором пользователя. Клоны делят
/// одно хранилище, так что несколько каналов в одном процессе видят ключи
/// друг друга.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyDirectory {
    keys: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_key(&self, user_id: &str) -> bool {
        self.keys.lock().contains_key(user_id)
    }

    /// Forget a user's published key; returns the removed value.
    pub fn remove(&self, user_id: &str) -> Option<String> {
        self.keys.lock().remove(user_id)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

#[async_trait]
impl KeyDirectory for MemoryKeyDirectory {
    async fn publish_public_key(&self, token: &str, serialized_public_value: &str) -> Result<()> {
        if token.is_empty() {
            return Err(ChannelError::PublishError("Empty identity token".to_string()));
        }
        self.keys
            .lock()
            .insert(token.to_string(), serialized_public_value.to_string());
        Ok(())
    }

    async fn fetch_peer_public_key(&self, peer_id: &str) -> Result<String> {
        self.keys
            .lock()
            .get(peer_id)
            .cloned()
            .ok_or_else(|| ChannelError::PeerKeyNotFound(peer_id.to_string()))
    }
}
