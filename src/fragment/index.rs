//! Zero-based frame positioning within logical messages.
//!
//! Provides [`Sequence`], a type-safe wrapper around `u32` that offers
//! overflow-safe increment operations for tracking frame order.

use std::num::TryFromIntError;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Zero-based ordinal describing a frame's position within its message.
///
/// # Examples
///
/// ```
/// use tunnelwire::fragment::Sequence;
/// let sequence = Sequence::new(3);
/// assert_eq!(sequence.get(), 3);
/// assert!(sequence.checked_increment().is_some());
/// ```
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
)]
#[serde(transparent)]
#[display("{_0}")]
pub struct Sequence(u32);

impl Sequence {
    /// Construct a sequence number from a `u32` value.
    #[must_use]
    pub const fn new(value: u32) -> Self { Self(value) }

    /// Return the first valid sequence number.
    #[must_use]
    pub const fn zero() -> Self { Self(0) }

    /// Return the underlying numeric value.
    #[must_use]
    pub const fn get(self) -> u32 { self.0 }

    /// Increment the sequence number, returning `None` on overflow.
    #[must_use]
    pub fn checked_increment(self) -> Option<Self> { self.0.checked_add(1).map(Self) }

    /// Number of frames in a message whose terminal frame carries `self`.
    #[must_use]
    pub fn frame_count(self) -> usize {
        usize::try_from(self.0).map_or(usize::MAX, |value| value.saturating_add(1))
    }
}

impl TryFrom<usize> for Sequence {
    type Error = TryFromIntError;

    fn try_from(value: usize) -> Result<Self, Self::Error> { u32::try_from(value).map(Self) }
}

impl From<Sequence> for u32 {
    fn from(value: Sequence) -> Self { value.0 }
}
