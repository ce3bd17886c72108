//! Asset and position identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for an asset held by the vault.
///
/// An `AssetId` names either a plain token balance or the ledger entry of an
/// external position. Identifiers are opaque to the engine; uniqueness within
/// a vault is the only requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    /// Create an asset identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AssetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier for an externally-held position (e.g. a concentrated-liquidity
/// position managed by a collaborator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(Uuid);

impl PositionId {
    /// Generate a fresh position identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_id_display_and_eq() {
        let a = AssetId::new("WBNB");
        let b = AssetId::from("WBNB");
        assert_eq!(a, b);
        assert_eq!(format!("{a}"), "WBNB");
        assert_eq!(a.as_str(), "WBNB");
    }

    #[test]
    fn asset_id_ordering_is_lexicographic() {
        let a = AssetId::new("AAA");
        let b = AssetId::new("BBB");
        assert!(a < b);
    }

    #[test]
    fn position_id_roundtrip() {
        let id = PositionId::random();
        let again = PositionId::from_uuid(id.as_uuid());
        assert_eq!(id, again);
    }

    #[test]
    fn asset_id_serde_is_transparent() {
        let a = AssetId::new("ETH");
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"ETH\"");
        let back: AssetId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
