//! Hub payload codec: base64 → DEFLATE → JSON → expanded keys.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::keys::expand_keys;
use crate::error::ProtocolError;

/// Decode one compressed hub argument into expanded JSON.
///
/// Payloads are raw DEFLATE streams; a zlib-wrapped stream is accepted as a
/// fallback.
pub fn decode_payload(encoded: &str) -> Result<Value, ProtocolError> {
    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ProtocolError::InvalidBase64(e.to_string()))?;

    let inflated = inflate(&compressed)?;

    let value: Value = serde_json::from_slice(&inflated)
        .map_err(|e| ProtocolError::InvalidFrame(format!("payload is not JSON: {}", e)))?;

    Ok(expand_keys(value))
}

/// Decode one compressed hub argument straight into a typed message.
pub fn decode_typed<T: DeserializeOwned>(encoded: &str, method: &str) -> Result<T, ProtocolError> {
    let value = decode_payload(encoded)?;
    serde_json::from_value(value).map_err(|e| ProtocolError::UnexpectedPayload {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

/// Compress and encode a (minified) JSON payload the way the hub does.
pub fn encode_payload(value: &Value) -> Result<String, ProtocolError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| ProtocolError::InvalidFrame(e.to_string()))?;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| ProtocolError::Decompress(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| ProtocolError::Decompress(e.to_string()))?;

    Ok(STANDARD.encode(compressed))
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut raw = Vec::new();
    match DeflateDecoder::new(compressed).read_to_end(&mut raw) {
        Ok(_) => Ok(raw),
        Err(raw_err) => {
            let mut wrapped = Vec::new();
            ZlibDecoder::new(compressed)
                .read_to_end(&mut wrapped)
                .map_err(|e| {
                    ProtocolError::Decompress(format!("raw: {}, zlib: {}", raw_err, e))
                })?;
            Ok(wrapped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decodes_raw_deflate_payload() {
        let encoded = encode_payload(&json!({"M": "BTC-ETH", "N": 7})).unwrap();

        let decoded = decode_payload(&encoded).unwrap();

        assert_eq!(decoded, json!({"market_name": "BTC-ETH", "nonce": 7}));
    }

    #[test]
    fn falls_back_to_zlib() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"N": 12}"#).unwrap();
        let encoded = STANDARD.encode(encoder.finish().unwrap());

        assert_eq!(decode_payload(&encoded).unwrap(), json!({"nonce": 12}));
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(matches!(
            decode_payload("not base64!"),
            Err(ProtocolError::InvalidBase64(_))
        ));
    }

    #[test]
    fn rejects_garbage_after_inflate() {
        let encoded = STANDARD.encode(b"plain bytes, not deflate");
        assert!(decode_payload(&encoded).is_err());
    }
}
