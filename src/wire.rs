//! Encoding of frames and logical messages on the wire.
//!
//! Every record crossing the peer link is self-describing. JSON is the
//! default and matches peers that exchange base64 byte strings; bincode (in
//! serde mode) trades readability for compactness. Both sides of a link must
//! agree on the format.

use bincode::config;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Serialization formats supported for frames and logical messages.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WireFormat {
    /// Self-describing JSON with base64-encoded byte fields.
    #[default]
    Json,
    /// `bincode` with its standard configuration and raw byte fields.
    Bincode,
}

/// Errors raised while encoding or decoding wire records.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON serialization or deserialization failed.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),
    /// Bincode serialization failed.
    #[error("bincode encode error: {0}")]
    BincodeEncode(#[from] bincode::error::EncodeError),
    /// Bincode deserialization failed.
    #[error("bincode decode error: {0}")]
    BincodeDecode(#[from] bincode::error::DecodeError),
    /// Bincode decoding left unread bytes behind.
    #[error("{remaining} trailing bytes after record")]
    TrailingBytes { remaining: usize },
}

impl WireFormat {
    /// Serialize `value` into a byte vector.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] if serialization fails.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, WireError> {
        match self {
            WireFormat::Json => Ok(serde_json::to_vec(value)?),
            WireFormat::Bincode => Ok(bincode::serde::encode_to_vec(value, config::standard())?),
        }
    }

    /// Deserialize a record from `bytes`, rejecting trailing garbage.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] if the bytes do not hold exactly one record of
    /// type `T`.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, WireError> {
        match self {
            WireFormat::Json => Ok(serde_json::from_slice(bytes)?),
            WireFormat::Bincode => {
                let (value, consumed) =
                    bincode::serde::decode_from_slice(bytes, config::standard())?;
                if consumed != bytes.len() {
                    return Err(WireError::TrailingBytes {
                        remaining: bytes.len() - consumed,
                    });
                }
                Ok(value)
            }
        }
    }

    /// Short lowercase name used in logs and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::Bincode => "bincode",
        }
    }
}

/// Serde adapter for byte fields.
///
/// Human-readable formats carry bytes as standard base64 strings; binary
/// formats carry them raw.
pub mod byte_field {
    use std::fmt;

    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{
        Deserializer,
        Serializer,
        de::{self, Visitor},
    };

    /// Serialize `bytes` as base64 or raw bytes depending on the format.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&STANDARD.encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    /// Deserialize a byte field written by [`serialize`].
    ///
    /// `null` is accepted as an empty buffer because JSON peers emit it for
    /// nil byte slices.
    ///
    /// # Errors
    ///
    /// Returns a deserializer error for malformed base64 or unexpected types.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(Base64Visitor)
        } else {
            deserializer.deserialize_byte_buf(RawVisitor)
        }
    }

    struct Base64Visitor;

    impl<'de> Visitor<'de> for Base64Visitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a base64 string or null")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            STANDARD.decode(value).map_err(E::custom)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> { Ok(Vec::new()) }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> { Ok(Vec::new()) }
    }

    struct RawVisitor;

    impl<'de> Visitor<'de> for RawVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte buffer")
        }

        fn visit_bytes<E: de::Error>(self, value: &[u8]) -> Result<Self::Value, E> {
            Ok(value.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, value: Vec<u8>) -> Result<Self::Value, E> {
            Ok(value)
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                out.push(byte);
            }
            Ok(out)
        }
    }
}
