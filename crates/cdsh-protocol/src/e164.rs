use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ProtocolError;

/// A phone number in E.164 format.
///
/// Stored as the numeric value without the leading `+`, which is also how it travels on the wire
/// (8 bytes, big-endian). Ordering is numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct E164(u64);

impl E164 {
    /// Wrap an already numeric phone number
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The numeric value of the number
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Wire representation
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Read a number from its wire representation
    pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

/// Parses `+` followed by the digits of the number. Input without the leading `+` is rejected.
impl FromStr for E164 {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(digits) = s.strip_prefix('+') else {
            return Err(ProtocolError::InvalidE164(s.to_owned()));
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidE164(s.to_owned()));
        }

        digits
            .parse::<u64>()
            .map(E164)
            .map_err(|_| ProtocolError::InvalidE164(s.to_owned()))
    }
}

impl fmt::Display for E164 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.0)
    }
}

impl From<u64> for E164 {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for E164 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for E164 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
