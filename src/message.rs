//! Logical messages carried inside reassembled payloads.
//!
//! A [`ForwardedRequest`] describes one HTTP call entering the tunnel and a
//! [`ForwardedResponse`] describes its answer. Both travel as a single
//! encoded record that the splitter slices into frames.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    fragment::MessageId,
    wire::{WireError, WireFormat, byte_field},
};

/// Header name to every value sent under that name.
pub type HeaderMultimap = BTreeMap<String, Vec<String>>;

/// An HTTP request captured at the initiator, to be replayed by the
/// responder.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedRequest {
    pub id: MessageId,
    pub method: String,
    pub path: String,
    /// Raw query string without the leading `?`; empty when absent.
    #[serde(default)]
    pub query: String,
    #[serde(default, deserialize_with = "nullable_headers")]
    pub headers: HeaderMultimap,
    #[serde(with = "byte_field", default)]
    pub body: Vec<u8>,
}

/// The outcome of replaying a [`ForwardedRequest`] downstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedResponse {
    pub id: MessageId,
    pub status_code: u16,
    #[serde(default, deserialize_with = "nullable_headers")]
    pub headers: HeaderMultimap,
    #[serde(with = "byte_field", default)]
    pub body: Vec<u8>,
}

impl ForwardedRequest {
    /// Path plus `?query` when a query string is present.
    #[must_use]
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }

    /// Encode the request for splitting.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] if serialization fails.
    pub fn encode(&self, format: WireFormat) -> Result<Vec<u8>, WireError> { format.encode(self) }

    /// Decode a reassembled request payload.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] when the payload is not a request record.
    pub fn decode(format: WireFormat, bytes: &[u8]) -> Result<Self, WireError> {
        format.decode(bytes)
    }
}

impl ForwardedResponse {
    /// A plain-text response produced locally instead of by the downstream
    /// target.
    #[must_use]
    pub fn error(id: MessageId, status_code: u16, message: impl Into<String>) -> Self {
        let mut headers = HeaderMultimap::new();
        headers.insert("Content-Type".to_owned(), vec!["text/plain".to_owned()]);
        Self {
            id,
            status_code,
            headers,
            body: message.into().into_bytes(),
        }
    }

    /// Encode the response for splitting.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] if serialization fails.
    pub fn encode(&self, format: WireFormat) -> Result<Vec<u8>, WireError> { format.encode(self) }

    /// Decode a reassembled response payload.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] when the payload is not a response record.
    pub fn decode(format: WireFormat, bytes: &[u8]) -> Result<Self, WireError> {
        format.decode(bytes)
    }
}

/// JSON peers encode an absent header map as `null`.
fn nullable_headers<'de, D>(deserializer: D) -> Result<HeaderMultimap, D::Error>
where
    D: serde::Deserializer<'de>,
{
    if deserializer.is_human_readable() {
        Ok(Option::<HeaderMultimap>::deserialize(deserializer)?.unwrap_or_default())
    } else {
        HeaderMultimap::deserialize(deserializer)
    }
}
