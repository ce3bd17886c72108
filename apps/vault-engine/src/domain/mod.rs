//! Domain value objects and the vault ledger.

pub mod amount;
pub mod asset;
pub mod vault;

pub use amount::{Amount, BasisPoints, Value, BPS_DENOMINATOR};
pub use asset::{AssetId, PositionId};
pub use vault::{AssetEntry, AssetKind, VaultLedger, VaultState};
