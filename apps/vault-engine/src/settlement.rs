//! Withdrawal settlement: position unwind, flash-borrow repayment, and
//! optional consolidation into a single payout asset.
//!
//! Settlement starts from the pro-rata entitlement computed by the share
//! accounting and turns it into deliverable token amounts. External
//! positions are decreased through the [`PositionCapability`] collaborator;
//! a leveraged position may require a flash borrow to clear its debt first,
//! and the borrow must be repaid from the unwind proceeds in the same
//! operation or the whole withdrawal aborts. When the withdrawer asks for a
//! single target asset, every other payout leg is routed through the swap
//! collaborator leg by leg, each under its own minimum output.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::accounting::{compute_withdrawal_amounts, WithdrawalLeg};
use crate::domain::amount::Amount;
use crate::domain::asset::{AssetId, PositionId};
use crate::domain::vault::VaultState;
use crate::error::EngineError;
use crate::fees::{apply_exit_fee, FeeConfig};
use crate::rebalance::{RoutingPayload, SolverError, SwapCapability};
use crate::valuation::PositionValuer;

/// A flash borrow taken to clear a position's debt before unwinding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashBorrow {
    /// Borrowed asset.
    pub asset: AssetId,
    /// Borrowed principal.
    pub amount: Amount,
}

/// Per-position unwind parameters supplied by the withdrawer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnwindParams {
    /// Minimum acceptable proceeds in the first underlying.
    pub min_amount_a: Amount,
    /// Minimum acceptable proceeds in the second underlying.
    pub min_amount_b: Amount,
    /// Borrow to clear position debt with; repaid from proceeds.
    pub flash_borrow: Option<FlashBorrow>,
}

/// One source-asset leg of a target consolidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSwapLeg {
    /// Payout asset this leg swaps away.
    pub asset_in: AssetId,
    /// Opaque routing for the swap collaborator.
    pub routing: RoutingPayload,
    /// Minimum acceptable output in the target asset for this leg.
    pub min_out: Amount,
}

/// Consolidate the payout into one asset via the swap collaborator.
///
/// Every non-target payout asset needs its own leg, and each leg's minimum
/// is enforced on its own output, so one badly slipped swap cannot hide
/// behind the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSwap {
    /// Asset every other payout leg is swapped into.
    pub asset: AssetId,
    /// Per-source-asset swap legs.
    pub legs: Vec<TargetSwapLeg>,
}

/// One withdrawal, as submitted by a share holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRequest {
    /// Gross shares the holder redeems, exit fee included.
    pub shares_to_burn: Decimal,
    /// Deliver position units as-is instead of unwinding.
    pub position_passthrough: bool,
    /// Unwind parameters keyed by the position's ledger entry.
    pub unwind: BTreeMap<AssetId, UnwindParams>,
    /// Optional consolidation into a single asset.
    pub target: Option<TargetSwap>,
}

impl WithdrawalRequest {
    /// Plain redemption: unwind positions with no minimums, pay out in kind.
    #[must_use]
    pub fn in_kind(shares_to_burn: Decimal) -> Self {
        Self {
            shares_to_burn,
            position_passthrough: false,
            unwind: BTreeMap::new(),
            target: None,
        }
    }
}

/// Underlying amounts realized by decreasing a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionProceeds {
    /// First underlying asset.
    pub asset_a: AssetId,
    /// Realized amount of the first underlying.
    pub amount_a: Amount,
    /// Second underlying asset.
    pub asset_b: AssetId,
    /// Realized amount of the second underlying.
    pub amount_b: Amount,
}

/// Decreases external positions and returns the realized proceeds.
pub trait PositionCapability {
    /// Decrease `position` by `units`. When `repay` is given, the borrowed
    /// amount is available to the collaborator for clearing position debt
    /// before the decrease.
    fn decrease(
        &mut self,
        position: &PositionId,
        units: Amount,
        repay: Option<&FlashBorrow>,
    ) -> Result<PositionProceeds, SolverError>;
}

/// Provides flash liquidity repaid within the same operation.
pub trait FlashLender {
    /// Fee charged on a borrow of `amount` units of `asset`.
    fn fee(&self, asset: &AssetId, amount: Amount) -> Amount;

    /// Take out a borrow.
    fn borrow(&mut self, asset: &AssetId, amount: Amount) -> Result<(), SolverError>;

    /// Repay principal plus fee.
    fn repay(&mut self, asset: &AssetId, amount: Amount) -> Result<(), SolverError>;
}

/// Outcome of a settled withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledWithdrawal {
    /// Shares removed from the supply.
    pub shares_burned: Decimal,
    /// Shares transferred to the treasury as the exit fee.
    pub exit_fee_shares: Decimal,
    /// Token payouts owed to the withdrawer.
    pub payout: Vec<(AssetId, Amount)>,
    /// Position units delivered as-is under passthrough.
    pub position_units: Vec<(AssetId, PositionId, Amount)>,
}

/// Settle a withdrawal against a working state copy.
///
/// The exit fee is carved out of the redeemed shares and transferred to the
/// treasury; only the net part is burned, so the entitlement is computed on
/// the net shares and the fee stays invested. On error the caller discards
/// `state`; nothing is ever partially delivered. Collaborator calls are
/// outside that guarantee: a borrow taken or a position decreased before a
/// later check fails is not undone here, the collaborator settles its own
/// books.
pub fn settle_withdrawal<P, O, L, S>(
    state: &mut VaultState,
    fee_config: &FeeConfig,
    positions: &P,
    ops: &mut O,
    lender: &mut L,
    solver: &mut S,
    request: &WithdrawalRequest,
    now: DateTime<Utc>,
) -> Result<SettledWithdrawal, EngineError>
where
    P: PositionValuer + ?Sized,
    O: PositionCapability + ?Sized,
    L: FlashLender + ?Sized,
    S: SwapCapability + ?Sized,
{
    let split = apply_exit_fee(request.shares_to_burn, fee_config);
    let legs = compute_withdrawal_amounts(
        &state.ledger,
        state.share_supply,
        split.net,
        positions,
        request.position_passthrough,
    )?;

    let mut payout: BTreeMap<AssetId, Amount> = BTreeMap::new();
    let mut position_units = Vec::new();

    for leg in legs {
        match leg {
            WithdrawalLeg::Plain { asset, amount } => {
                state.ledger.debit(&asset, amount, now)?;
                *payout.entry(asset).or_insert(Amount::ZERO) += amount;
            }
            WithdrawalLeg::Position {
                entry_asset,
                position_id,
                units,
                ..
            } => {
                state.ledger.debit(&entry_asset, units, now)?;
                let params = request.unwind.get(&entry_asset).cloned().unwrap_or_default();
                let proceeds =
                    unwind_position(ops, lender, &position_id, units, &params)?;
                if proceeds.amount_a.is_positive() {
                    *payout.entry(proceeds.asset_a).or_insert(Amount::ZERO) += proceeds.amount_a;
                }
                if proceeds.amount_b.is_positive() {
                    *payout.entry(proceeds.asset_b).or_insert(Amount::ZERO) += proceeds.amount_b;
                }
            }
            WithdrawalLeg::PositionPassthrough {
                entry_asset,
                position_id,
                units,
            } => {
                state.ledger.debit(&entry_asset, units, now)?;
                position_units.push((entry_asset, position_id, units));
            }
        }
    }

    if let Some(target) = &request.target {
        payout = consolidate_payout(solver, payout, target)?;
    }

    state.share_supply -= split.net;
    state.fee_state.treasury_shares += split.fee;

    tracing::info!(
        shares_burned = %split.net,
        exit_fee_shares = %split.fee,
        payout_legs = payout.len(),
        "withdrawal settled"
    );

    Ok(SettledWithdrawal {
        shares_burned: split.net,
        exit_fee_shares: split.fee,
        payout: payout.into_iter().collect(),
        position_units,
    })
}

/// Decrease one position, honoring per-leg minimums and repaying any flash
/// borrow from the realized proceeds.
///
/// The borrow and the decrease necessarily run before the repayment check,
/// since the proceeds are what repays the borrow. When the check fails the
/// engine aborts and its working state is discarded, but both collaborator
/// movements have already happened on the collaborator side.
fn unwind_position<O, L>(
    ops: &mut O,
    lender: &mut L,
    position: &PositionId,
    units: Amount,
    params: &UnwindParams,
) -> Result<PositionProceeds, EngineError>
where
    O: PositionCapability + ?Sized,
    L: FlashLender + ?Sized,
{
    if let Some(borrow) = &params.flash_borrow {
        lender.borrow(&borrow.asset, borrow.amount)?;
    }
    let mut proceeds = ops.decrease(position, units, params.flash_borrow.as_ref())?;

    if let Some(borrow) = &params.flash_borrow {
        let owed = borrow.amount + lender.fee(&borrow.asset, borrow.amount);
        let available = if proceeds.asset_a == borrow.asset {
            &mut proceeds.amount_a
        } else if proceeds.asset_b == borrow.asset {
            &mut proceeds.amount_b
        } else {
            tracing::warn!(
                asset = %borrow.asset,
                owed = %owed,
                "flash borrow unrepayable, position already decreased collaborator-side"
            );
            return Err(EngineError::BorrowNotRepaid {
                asset: borrow.asset.to_string(),
                owed: owed.units(),
                available: Decimal::ZERO,
            });
        };
        match available.checked_sub(owed) {
            Some(rest) => *available = rest,
            None => {
                tracing::warn!(
                    asset = %borrow.asset,
                    owed = %owed,
                    available = %available,
                    "flash borrow unrepayable, position already decreased collaborator-side"
                );
                return Err(EngineError::BorrowNotRepaid {
                    asset: borrow.asset.to_string(),
                    owed: owed.units(),
                    available: available.units(),
                });
            }
        }
        lender.repay(&borrow.asset, owed)?;
    }

    if proceeds.amount_a < params.min_amount_a {
        return Err(EngineError::InsufficientOutput {
            leg: proceeds.asset_a.to_string(),
            minimum: params.min_amount_a.units(),
            actual: proceeds.amount_a.units(),
        });
    }
    if proceeds.amount_b < params.min_amount_b {
        return Err(EngineError::InsufficientOutput {
            leg: proceeds.asset_b.to_string(),
            minimum: params.min_amount_b.units(),
            actual: proceeds.amount_b.units(),
        });
    }
    Ok(proceeds)
}

/// Swap every non-target payout leg into the target asset, enforcing each
/// leg's minimum output on its own.
fn consolidate_payout<S>(
    solver: &mut S,
    payout: BTreeMap<AssetId, Amount>,
    target: &TargetSwap,
) -> Result<BTreeMap<AssetId, Amount>, EngineError>
where
    S: SwapCapability + ?Sized,
{
    let mut total = payout.get(&target.asset).copied().unwrap_or(Amount::ZERO);
    for asset in payout.keys().filter(|asset| *asset != &target.asset) {
        let leg = target
            .legs
            .iter()
            .find(|leg| &leg.asset_in == asset)
            .ok_or_else(|| EngineError::AssetNotRecognized {
                asset: format!("{asset} (no swap leg to {})", target.asset),
            })?;
        let fills = solver.execute(&leg.routing)?;
        let mut received = Amount::ZERO;
        for fill in fills {
            if fill.asset != target.asset {
                return Err(EngineError::AssetNotRecognized {
                    asset: format!("{} (undeclared fill)", fill.asset),
                });
            }
            received += fill.amount;
        }
        if received < leg.min_out {
            return Err(EngineError::InsufficientOutput {
                leg: asset.to_string(),
                minimum: leg.min_out.units(),
                actual: received.units(),
            });
        }
        total += received;
    }
    Ok(BTreeMap::from([(target.asset.clone(), total)]))
}
