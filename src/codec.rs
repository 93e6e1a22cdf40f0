//! Payload codecs
//!
//! Message bodies are the codec's bytes with no extra framing. JSON is the
//! default; MessagePack is available for binary-heavy payloads.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::types::{GatherError, Result};

/// Encodes request/response values to message bodies and back
pub trait Codec: Clone + Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Serialize a value into a message body
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes>;

    /// Deserialize a message body into a value
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;
}

/// JSON codec (serde_json)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| GatherError::Encode(format!("JSON error: {}", e)))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        serde_json::from_slice(data).map_err(|e| GatherError::Decode(format!("JSON error: {}", e)))
    }
}

/// MessagePack codec (rmp-serde, struct fields encoded by name)
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        Ok(rmp_serde::to_vec_named(value)?.into())
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Converted {
        currency: String,
        amount: f64,
    }

    #[test]
    fn test_json_round_trip() {
        let codec = JsonCodec;
        let value = Converted {
            currency: "EUR".to_string(),
            amount: 0.88,
        };
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(&bytes[..], br#"{"currency":"EUR","amount":0.88}"#);
        let decoded: Converted = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_json_type_mismatch_is_decode_error() {
        let err = JsonCodec.decode::<i64>(br#""three""#).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn test_json_nested_sequences() {
        let codec = JsonCodec;
        let bytes = codec.encode(&vec![vec![1, 2], vec![], vec![3]]).unwrap();
        let decoded: Vec<Vec<i32>> = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, vec![vec![1, 2], vec![], vec![3]]);
    }

    #[test]
    fn test_msgpack_round_trip() {
        let codec = MsgPackCodec;
        let value = vec![
            Converted {
                currency: "JPY".to_string(),
                amount: 111.12,
            },
            Converted {
                currency: "GBP".to_string(),
                amount: 0.77,
            },
        ];
        let bytes = codec.encode(&value).unwrap();
        let decoded: Vec<Converted> = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_msgpack_garbage_is_decode_error() {
        let err = MsgPackCodec.decode::<Converted>(&[0xc1]).unwrap_err();
        assert!(err.is_decode());
    }
}
