use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier shared by every frame of one logical message and by the
/// response that answers it.
///
/// Identifiers are opaque strings on the wire. Locally generated ids are
/// random UUIDs, which keeps them unique across all concurrently in-flight
/// calls.
///
/// # Examples
///
/// ```
/// use tunnelwire::fragment::MessageId;
/// let id = MessageId::new("req-1");
/// assert_eq!(id.as_str(), "req-1");
/// assert_ne!(MessageId::generate(), MessageId::generate());
/// ```
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
)]
#[serde(transparent)]
#[display("{_0}")]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self { Self(Uuid::new_v4().to_string()) }

    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str { self.0.as_str() }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}
