// Wire format (JSON)
// Структуры, которыми ядро обменивается с сервером параметров и каталогом ключей.
// Поля и их имена стабильны: от них зависит совместимость с другими клиентами.

use crate::error::{ChannelError, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// DH domain parameters as served by the parameter source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParametersWire {
    pub p_hex: String,
    pub g_hex: String,
}

/// Serialized public value: `{"y_hex": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicValueWire {
    pub y_hex: String,
}

/// Serialized private exponent for local persistence only: `{"x_hex": "..."}`
#[derive(Clone, Serialize, Deserialize)]
pub struct PrivateValueWire {
    pub x_hex: String,
}

/// Lowercase hex without `0x` prefix or padding
pub fn encode_hex_uint(value: &BigUint) -> String {
    value.to_str_radix(16)
}

/// Parse unpadded (possibly odd-length) hex, with an optional `0x` prefix.
/// Returns `None` for empty or non-hex input.
pub fn decode_hex_uint(text: &str) -> Option<BigUint> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    BigUint::parse_bytes(digits.as_bytes(), 16)
}

/// Распаковать `{"y_hex": ...}`
pub fn parse_public_value(serialized: &str) -> Result<BigUint> {
    let wire: PublicValueWire = serde_json::from_str(serialized)
        .map_err(|e| ChannelError::MalformedKey(format!("missing y_hex: {}", e)))?;
    decode_hex_uint(&wire.y_hex)
        .ok_or_else(|| ChannelError::MalformedKey("y_hex is not valid hexadecimal".to_string()))
}

/// Упаковать публичное значение в `{"y_hex": ...}`
pub fn pack_public_value(y: &BigUint) -> Result<String> {
    let wire = PublicValueWire {
        y_hex: encode_hex_uint(y),
    };
    serde_json::to_string(&wire).map_err(ChannelError::from)
}
