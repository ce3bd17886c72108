//! Asset valuation capabilities and NAV computation.
//!
//! The engine never knows prices itself. Plain balances are valued through
//! the [`AssetValuer`] capability; external positions are read through the
//! per-position-type [`PositionValuer`], which must expose current underlying
//! amounts without mutating state. A valuer that cannot produce a current
//! value fails the whole operation; a stale value is never silently
//! substituted.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::amount::{Amount, Value};
use crate::domain::asset::{AssetId, PositionId};
use crate::domain::vault::{AssetKind, VaultLedger};
use crate::error::EngineError;

/// Failure to produce a current valuation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValuationError {
    /// The price feed for an asset is stale.
    #[error("stale price for {asset}")]
    StalePrice {
        /// Asset identifier.
        asset: AssetId,
    },
    /// The valuer does not know the asset.
    #[error("unknown asset {asset}")]
    UnknownAsset {
        /// Asset identifier.
        asset: AssetId,
    },
    /// The position valuer does not know the position.
    #[error("unknown position {position}")]
    UnknownPosition {
        /// Position identifier.
        position: PositionId,
    },
}

impl From<ValuationError> for EngineError {
    fn from(err: ValuationError) -> Self {
        let subject = match &err {
            ValuationError::StalePrice { asset } | ValuationError::UnknownAsset { asset } => {
                asset.to_string()
            }
            ValuationError::UnknownPosition { position } => position.to_string(),
        };
        Self::StaleOrMissingValuation {
            subject,
            message: err.to_string(),
        }
    }
}

/// Prices plain assets in the vault's common valuation unit.
pub trait AssetValuer {
    /// Current value of one unit of `asset`.
    fn unit_price(&self, asset: &AssetId) -> Result<Value, ValuationError>;

    /// Current value of `amount` units of `asset`.
    fn value_of(&self, asset: &AssetId, amount: Amount) -> Result<Value, ValuationError> {
        let price = self.unit_price(asset)?;
        Ok(Value::new(price.amount() * amount.units()))
    }
}

/// Current underlying token amounts backing the vault's holding of a
/// position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionAmounts {
    /// First underlying asset.
    pub asset_a: AssetId,
    /// Amount of the first underlying.
    pub amount_a: Amount,
    /// Second underlying asset.
    pub asset_b: AssetId,
    /// Amount of the second underlying.
    pub amount_b: Amount,
}

/// Reads external positions without mutating them.
pub trait PositionValuer {
    /// Underlying amounts backing the vault-held units of `position`.
    fn underlying_amounts(&self, position: &PositionId) -> Result<PositionAmounts, ValuationError>;
}

/// Value of a position's underlying amounts via the asset valuer.
pub fn position_value<V: AssetValuer + ?Sized>(
    valuer: &V,
    amounts: &PositionAmounts,
) -> Result<Value, ValuationError> {
    let a = valuer.value_of(&amounts.asset_a, amounts.amount_a)?;
    let b = valuer.value_of(&amounts.asset_b, amounts.amount_b)?;
    Ok(a + b)
}

/// Total value of every vault asset in the common unit.
///
/// Zero-balance entries contribute zero without consulting the valuer, so a
/// dust entry with a dead price feed cannot block operations.
pub fn nav<V, P>(ledger: &VaultLedger, valuer: &V, positions: &P) -> Result<Value, EngineError>
where
    V: AssetValuer + ?Sized,
    P: PositionValuer + ?Sized,
{
    let mut total = Value::ZERO;
    for entry in ledger.entries() {
        if entry.balance.is_zero() {
            continue;
        }
        match &entry.kind {
            AssetKind::Plain => {
                total += valuer.value_of(&entry.asset, entry.balance)?;
            }
            AssetKind::External { position_id, .. } => {
                let amounts = positions.underlying_amounts(position_id)?;
                total += position_value(valuer, &amounts)?;
            }
        }
    }
    Ok(total)
}

/// Share price given a NAV and supply; `None` when the supply is zero.
#[must_use]
pub fn share_price(nav: Value, supply: Decimal) -> Option<Value> {
    if supply <= Decimal::ZERO {
        None
    } else {
        Some(Value::new(nav.amount() / supply))
    }
}
