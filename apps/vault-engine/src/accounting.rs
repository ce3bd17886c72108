//! Share accounting: deposit-to-share and share-to-withdrawal conversions.
//!
//! The engine never needs absolute asset prices to price a deposit into a
//! non-empty vault. A multi-asset deposit is accepted at the *scarcest*
//! relative contribution: for each funded vault asset, the ratio of the
//! declared amount to the vault balance is computed, and the minimum ratio
//! across all assets bounds the whole deposit. Shares minted equal
//! `supply * min_ratio`, so the deposit executes exactly at the
//! pre-operation share price and cannot dilute existing holders.
//!
//! Withdrawal is the symmetric pro-rata slice of every vault asset,
//! including external positions (expressed as underlying token amounts
//! unless position-token passthrough is requested).

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::domain::amount::Amount;
use crate::domain::asset::{AssetId, PositionId};
use crate::domain::vault::{AssetKind, VaultLedger};
use crate::error::EngineError;
use crate::valuation::PositionValuer;

/// Outcome of pricing a multi-asset deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositQuote {
    /// Per-asset amounts actually accepted, in ledger order. Anything the
    /// caller declared above these amounts is left with the caller.
    pub accepted: Vec<(AssetId, Amount)>,
    /// Shares to mint, before entry fees.
    pub shares_to_mint: Decimal,
}

/// Price a deposit declaration against the current ledger.
///
/// For a non-empty vault this applies the scarcest-ratio algorithm; assets
/// with a zero vault balance are ignored in the minimum but must not carry a
/// declared amount. When `supply` is zero this is a bootstrap deposit: the
/// declared amounts are accepted exactly and `initial_share_supply` shares
/// are minted.
///
/// # Errors
///
/// - `AssetNotRecognized` if a declared asset is not part of the vault.
/// - `InsufficientBalance` if a zero-balance vault asset carries a declared
///   amount.
/// - `InvalidDeposit` if a bootstrap deposit is missing a positive amount
///   for a vault asset.
pub fn compute_shares_for_deposit(
    ledger: &VaultLedger,
    supply: Decimal,
    declared: &BTreeMap<AssetId, Amount>,
    initial_share_supply: Decimal,
) -> Result<DepositQuote, EngineError> {
    for asset in declared.keys() {
        if !ledger.contains(asset) {
            return Err(EngineError::AssetNotRecognized {
                asset: asset.to_string(),
            });
        }
    }

    if supply <= Decimal::ZERO {
        return bootstrap_quote(ledger, declared, initial_share_supply);
    }

    // Scarcest-resource ratio across every funded vault asset. A vault asset
    // the caller did not declare contributes a zero ratio, bounding the
    // whole deposit to zero.
    let mut min_ratio: Option<Decimal> = None;
    for entry in ledger.entries() {
        let declared_amount = declared.get(&entry.asset).copied().unwrap_or(Amount::ZERO);
        if entry.balance.is_zero() {
            if declared_amount.is_positive() {
                return Err(EngineError::InsufficientBalance {
                    asset: entry.asset.to_string(),
                    requested: declared_amount.units(),
                    available: Decimal::ZERO,
                });
            }
            continue;
        }
        // Balance checked positive above.
        let ratio = declared_amount.ratio_to(entry.balance).unwrap_or_default();
        min_ratio = Some(min_ratio.map_or(ratio, |m| m.min(ratio)));
    }
    let ratio = min_ratio.unwrap_or_default();

    let mut accepted = Vec::new();
    for entry in ledger.entries() {
        if entry.balance.is_zero() {
            continue;
        }
        let declared_amount = declared.get(&entry.asset).copied().unwrap_or(Amount::ZERO);
        // The division above may round up in the last digit; clamp so the
        // accepted amount never exceeds what the caller declared.
        let amount = (entry.balance * ratio).min(declared_amount);
        if amount.is_positive() {
            accepted.push((entry.asset.clone(), amount));
        }
    }

    Ok(DepositQuote {
        accepted,
        shares_to_mint: supply * ratio,
    })
}

fn bootstrap_quote(
    ledger: &VaultLedger,
    declared: &BTreeMap<AssetId, Amount>,
    initial_share_supply: Decimal,
) -> Result<DepositQuote, EngineError> {
    let mut accepted = Vec::new();
    for entry in ledger.entries() {
        let amount = declared.get(&entry.asset).copied().unwrap_or(Amount::ZERO);
        if !amount.is_positive() {
            return Err(EngineError::InvalidDeposit {
                asset: entry.asset.to_string(),
                message: "bootstrap deposit requires a positive amount for every vault asset"
                    .to_string(),
            });
        }
        accepted.push((entry.asset.clone(), amount));
    }
    Ok(DepositQuote {
        accepted,
        shares_to_mint: initial_share_supply,
    })
}

/// One leg of a withdrawal entitlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalLeg {
    /// Pro-rata slice of a plain balance.
    Plain {
        /// Asset identifier.
        asset: AssetId,
        /// Token units owed.
        amount: Amount,
    },
    /// Pro-rata slice of an external position, expressed as underlying
    /// token amounts. The position must be decreased by `units` before the
    /// underlying amounts can be delivered.
    Position {
        /// Ledger entry identifier of the position.
        entry_asset: AssetId,
        /// Collaborator-side position handle.
        position_id: PositionId,
        /// Position units to unwind.
        units: Amount,
        /// First underlying asset and amount owed.
        underlying_a: (AssetId, Amount),
        /// Second underlying asset and amount owed.
        underlying_b: (AssetId, Amount),
    },
    /// Position units delivered as-is, without unwinding.
    PositionPassthrough {
        /// Ledger entry identifier of the position.
        entry_asset: AssetId,
        /// Collaborator-side position handle.
        position_id: PositionId,
        /// Position units owed.
        units: Amount,
    },
}

/// Compute the per-asset entitlement for burning `shares`.
///
/// Every funded vault asset contributes `balance * shares / supply`.
/// External positions are read through the position valuer and expressed as
/// underlying amounts, unless `passthrough` requests the position units
/// themselves.
///
/// # Errors
///
/// - `InsufficientBalance` when `shares` is non-positive or exceeds the
///   supply.
/// - `StaleOrMissingValuation` when a position cannot be read.
pub fn compute_withdrawal_amounts<P: PositionValuer + ?Sized>(
    ledger: &VaultLedger,
    supply: Decimal,
    shares: Decimal,
    positions: &P,
    passthrough: bool,
) -> Result<Vec<WithdrawalLeg>, EngineError> {
    if shares <= Decimal::ZERO || shares > supply {
        return Err(EngineError::InsufficientBalance {
            asset: "shares".to_string(),
            requested: shares,
            available: supply,
        });
    }
    let fraction = shares / supply;

    let mut legs = Vec::new();
    for entry in ledger.entries() {
        if entry.balance.is_zero() {
            continue;
        }
        // Clamp against the balance: a full burn must drain exactly.
        let slice = (entry.balance * fraction).min(entry.balance);
        match &entry.kind {
            AssetKind::Plain => legs.push(WithdrawalLeg::Plain {
                asset: entry.asset.clone(),
                amount: slice,
            }),
            AssetKind::External { position_id, .. } => {
                if passthrough {
                    legs.push(WithdrawalLeg::PositionPassthrough {
                        entry_asset: entry.asset.clone(),
                        position_id: *position_id,
                        units: slice,
                    });
                } else {
                    let amounts = positions.underlying_amounts(position_id)?;
                    legs.push(WithdrawalLeg::Position {
                        entry_asset: entry.asset.clone(),
                        position_id: *position_id,
                        units: slice,
                        underlying_a: (amounts.asset_a, amounts.amount_a * fraction),
                        underlying_b: (amounts.asset_b, amounts.amount_b * fraction),
                    });
                }
            }
        }
    }
    Ok(legs)
}
