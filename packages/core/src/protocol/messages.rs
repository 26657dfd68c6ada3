// Транспортный конверт
// Ядро не доставляет сообщения, только описывает, что транспорт должен передать.

use crate::error::{ChannelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Зашифрованное сообщение между двумя пользователями
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// UUID v4 идентификатор сообщения
    pub id: String,
    /// Отправитель
    pub from: String,
    /// Получатель
    pub to: String,
    /// Номер сообщения у отправителя (выбор ключа на стороне получателя)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    pub timestamp: DateTime<Utc>,
    /// base64(nonce || ciphertext + tag)
    pub ciphertext: String,
}

impl Envelope {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(serialization_error)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|_| ChannelError::DecryptionFailed)
    }
}

fn serialization_error(err: serde_json::Error) -> ChannelError {
    ChannelError::SerializationError(err.to_string())
}
