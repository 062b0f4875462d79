//! Strongly-typed identifiers for tree entities.

use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fmt;
use uuid::Uuid;

/// Unique 128-bit identifier of a link.
///
/// The id is immutable for a link's lifetime. Its hyphenated string form is
/// the link's *home id*: the name of the local event group and the stem of
/// the link's file in a tree archive. Stored as raw big-endian bytes for
/// compact hashing and binary serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId {
    bytes: [u8; 16],
}

impl LinkId {
    /// Create a new random link id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: *Uuid::new_v4().as_bytes(),
        }
    }

    /// The reserved nil id.
    #[must_use]
    pub const fn nil() -> Self {
        Self { bytes: [0u8; 16] }
    }

    /// Whether this is the reserved nil id.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.bytes == [0u8; 16]
    }

    /// Create a link id from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            bytes: *uuid.as_bytes(),
        }
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.bytes)
    }

    /// Raw big-endian bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// Rebuild an id from raw big-endian bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// Parse an id from its string (home-id) form.
    ///
    /// Returns `None` if the string is not a valid UUID.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self::from_uuid)
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_uuid())
    }
}

impl From<Uuid> for LinkId {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl SerdeSerialize for LinkId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.as_uuid().serialize(serializer)
    }
}

impl<'de> SerdeDeserialize<'de> for LinkId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let uuid = Uuid::deserialize(deserializer)?;
        Ok(Self::from_uuid(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = LinkId::new();
        let b = LinkId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn nil_is_reserved() {
        assert!(LinkId::nil().is_nil());
        assert!(!LinkId::new().is_nil());
    }

    #[test]
    fn string_round_trip() {
        let id = LinkId::new();
        let s = id.to_string();
        assert_eq!(LinkId::parse(&s), Some(id));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(LinkId::parse("not-a-uuid"), None);
    }

    #[test]
    fn serde_round_trip() {
        let id = LinkId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: LinkId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
