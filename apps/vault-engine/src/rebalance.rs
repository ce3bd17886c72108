//! Manager-authored rebalancing under a NAV deviation guard.
//!
//! A rebalance runs the state machine
//! `Idle -> Snapshot(before) -> Execute -> Snapshot(after) -> DeviationCheck
//! -> {Commit | Abort}`. Execution is delegated to a [`SwapCapability`]
//! collaborator through an opaque routing payload; the engine never
//! interprets the payload, it only debits the declared sells, credits the
//! reported fills, and verifies the declared minimums and the total-value
//! deviation bound. Both snapshots are taken inside the same atomic
//! operation; no valuation is ever reused from a prior call.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::amount::{Amount, Value, BPS_DENOMINATOR};
use crate::domain::asset::AssetId;
use crate::domain::vault::{AssetKind, VaultState};
use crate::error::EngineError;
use crate::valuation::{nav, position_value, AssetValuer, PositionValuer, ValuationError};

/// Opaque routing instructions for the swap collaborator.
///
/// The engine never reads the contents; only the collaborator that produced
/// the payload can interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingPayload(pub Vec<u8>);

/// One asset amount delivered by the swap collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFill {
    /// Delivered asset.
    pub asset: AssetId,
    /// Delivered amount.
    pub amount: Amount,
}

/// Failure reported by a swap/position collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SolverError(pub String);

impl From<SolverError> for EngineError {
    fn from(err: SolverError) -> Self {
        Self::SolverFailure { message: err.0 }
    }
}

/// Executes opaque routing payloads and reports the delivered amounts.
pub trait SwapCapability {
    /// Execute the routed token movement and return the actual outputs.
    fn execute(&mut self, routing: &RoutingPayload) -> Result<Vec<AssetFill>, SolverError>;
}

/// Declares that a position buy leg was funded from a single input asset.
///
/// The check reads the full position holding after execution, so it applies
/// to freshly opened positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCheck {
    /// Asset the position entry was funded from.
    pub input_asset: AssetId,
    /// Input amount spent on the leg, before the split.
    pub input_amount: Amount,
}

/// One asset the rebalance intends to acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyLeg {
    /// Ledger identifier the fills are credited to.
    pub asset: AssetId,
    /// Entry kind, so new positions can be added to the ledger.
    pub kind: AssetKind,
    /// Minimum acceptable fill for this leg.
    pub min_amount: Amount,
    /// Set when the leg was funded single-sided; the position's implied
    /// value is then checked against the input value post-execution.
    pub entry_check: Option<EntryCheck>,
}

/// Manager-authored reallocation intent. Consumed atomically, never
/// persisted beyond the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceIntent {
    /// Assets to sell and the amounts to release.
    pub sell: Vec<(AssetId, Amount)>,
    /// Assets to acquire with per-leg minimums.
    pub buy: Vec<BuyLeg>,
    /// Opaque routing for the swap collaborator.
    pub routing: RoutingPayload,
}

/// Engine-side rules a rebalance is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceRules {
    /// Minimum spacing between rebalances, in seconds.
    pub cooldown_secs: u64,
    /// Maximum NAV deviation attributable to one rebalance.
    pub max_deviation_bps: u32,
    /// Assets the manager may acquire.
    pub allow_list: BTreeSet<AssetId>,
    /// Grace window before zero-balance entries are removed, in seconds.
    pub dust_grace_secs: u64,
}

/// Committed rebalance outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rebalanced {
    /// Observed NAV deviation in basis points.
    pub deviation_bps: Decimal,
    /// Total vault value after the rebalance.
    pub nav_after: Value,
    /// Entries removed by the dust sweep at commit.
    pub removed_assets: Vec<AssetId>,
}

/// Relative NAV change in basis points.
///
/// A move from zero to a positive value counts as fully deviated.
#[must_use]
pub fn deviation_bps(before: Value, after: Value) -> Decimal {
    if before.is_zero() {
        if after.is_zero() {
            Decimal::ZERO
        } else {
            Decimal::from(BPS_DENOMINATOR)
        }
    } else {
        before.abs_diff(after).amount() / before.amount() * Decimal::from(BPS_DENOMINATOR)
    }
}

/// Execute a rebalance against a working state copy.
///
/// On error the caller discards `state`; no partial reallocation is ever
/// observable.
pub fn execute_rebalance<V, P, S>(
    state: &mut VaultState,
    rules: &RebalanceRules,
    valuer: &V,
    positions: &P,
    solver: &mut S,
    intent: &RebalanceIntent,
    now: DateTime<Utc>,
) -> Result<Rebalanced, EngineError>
where
    V: AssetValuer + ?Sized,
    P: PositionValuer + ?Sized,
    S: SwapCapability + ?Sized,
{
    // Cooldown: the sole inter-operation ordering guarantee.
    if let Some(last) = state.last_rebalance_at {
        let elapsed = (now - last).num_seconds();
        let cooldown = i64::try_from(rules.cooldown_secs).unwrap_or(i64::MAX);
        if elapsed < cooldown {
            return Err(EngineError::CooldownActive {
                remaining_secs: cooldown - elapsed,
            });
        }
    }

    // Preconditions before anything moves.
    for leg in &intent.buy {
        if !rules.allow_list.contains(&leg.asset) {
            return Err(EngineError::AssetNotRecognized {
                asset: leg.asset.to_string(),
            });
        }
    }
    for (asset, amount) in &intent.sell {
        let available = state
            .ledger
            .balance_of(asset)
            .ok_or_else(|| EngineError::AssetNotRecognized {
                asset: asset.to_string(),
            })?;
        if available < *amount {
            return Err(EngineError::InsufficientBalance {
                asset: asset.to_string(),
                requested: amount.units(),
                available: available.units(),
            });
        }
    }

    let nav_before = nav(&state.ledger, valuer, positions)?;

    // Execute: release the sells, let the collaborator move value, credit
    // what it reports back.
    for (asset, amount) in &intent.sell {
        state.ledger.debit(asset, *amount, now)?;
    }
    let fills = solver.execute(&intent.routing)?;

    for fill in &fills {
        if !intent.buy.iter().any(|leg| leg.asset == fill.asset) {
            return Err(EngineError::AssetNotRecognized {
                asset: format!("{} (undeclared fill)", fill.asset),
            });
        }
    }
    for leg in &intent.buy {
        let filled = fills
            .iter()
            .filter(|f| f.asset == leg.asset)
            .fold(Amount::ZERO, |acc, f| acc + f.amount);
        if filled < leg.min_amount {
            return Err(EngineError::InsufficientOutput {
                leg: leg.asset.to_string(),
                minimum: leg.min_amount.units(),
                actual: filled.units(),
            });
        }
        state.ledger.ensure_entry(&leg.asset, &leg.kind, now)?;
        if filled.is_positive() {
            state.ledger.credit(&leg.asset, filled)?;
        }
    }

    // Single-sided entries: the opened position must be worth what went in,
    // even when returned change keeps the overall NAV balanced.
    for leg in &intent.buy {
        let Some(check) = &leg.entry_check else {
            continue;
        };
        let AssetKind::External { position_id, .. } = &leg.kind else {
            return Err(EngineError::ConfigurationInvalid {
                field: "entry_check".to_string(),
                message: "single-sided entry checks apply to position legs only".to_string(),
            });
        };
        let value_in = valuer.value_of(&check.input_asset, check.input_amount)?;
        let amounts = positions.underlying_amounts(position_id)?;
        let implied = position_value(valuer, &amounts)?;
        verify_position_entry(value_in, implied, rules.max_deviation_bps)?;
    }

    let nav_after = nav(&state.ledger, valuer, positions)?;
    let deviation = deviation_bps(nav_before, nav_after);
    if deviation > Decimal::from(rules.max_deviation_bps) {
        return Err(EngineError::DeviationExceeded {
            deviation_bps: deviation,
            max_bps: rules.max_deviation_bps,
        });
    }

    let grace = Duration::seconds(i64::try_from(rules.dust_grace_secs).unwrap_or(i64::MAX));
    let removed_assets = state.ledger.sweep_dust(now, grace);
    state.last_rebalance_at = Some(now);

    tracing::info!(
        deviation_bps = %deviation,
        nav_after = %nav_after,
        sells = intent.sell.len(),
        buys = intent.buy.len(),
        "rebalance committed"
    );

    Ok(Rebalanced {
        deviation_bps: deviation,
        nav_after,
        removed_assets,
    })
}

/// How to split a single-sided amount before opening a two-asset position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleSidedSplit {
    /// Portion to swap into the paired asset.
    pub swap_amount: Amount,
    /// Portion deposited directly.
    pub keep_amount: Amount,
}

/// Split a single-sided entry amount between "swap to the paired asset" and
/// "deposit directly".
///
/// The split follows the position's current underlying value mix
/// `(value_same_side, value_paired_side)`; an empty position splits 50/50.
/// The result is a policy choice, not an exact formula: callers must verify
/// the resulting position value post-hoc against the deviation bound.
#[must_use]
pub fn single_sided_split(amount_in: Amount, mix: Option<(Value, Value)>) -> SingleSidedSplit {
    let swap_fraction = match mix {
        Some((same, paired)) if (same + paired).is_positive() => {
            paired.amount() / (same + paired).amount()
        }
        _ => Decimal::new(5, 1), // 0.5
    };
    let swap_amount = amount_in * swap_fraction;
    SingleSidedSplit {
        swap_amount,
        keep_amount: amount_in - swap_amount,
    }
}

/// Plan how much of a single-sided input to swap before funding a two-asset
/// position.
///
/// The split follows the position's current underlying value mix; a
/// position the valuer does not know yet (a fresh one) splits 50/50. The
/// caller turns the split into routing and declares an [`EntryCheck`] on
/// the buy leg so the opened position's value is verified post-execution.
///
/// # Errors
///
/// Returns `ConfigurationInvalid` when `kind` is not a position or when
/// `input_asset` is not one of its underlyings; valuation failures
/// propagate.
pub fn plan_single_sided_entry<V, P>(
    valuer: &V,
    positions: &P,
    kind: &AssetKind,
    input_asset: &AssetId,
    input_amount: Amount,
) -> Result<SingleSidedSplit, EngineError>
where
    V: AssetValuer + ?Sized,
    P: PositionValuer + ?Sized,
{
    let AssetKind::External {
        position_id,
        underlying_a,
        underlying_b,
    } = kind
    else {
        return Err(EngineError::ConfigurationInvalid {
            field: "kind".to_string(),
            message: "single-sided entries fund position legs only".to_string(),
        });
    };
    if input_asset != underlying_a && input_asset != underlying_b {
        return Err(EngineError::ConfigurationInvalid {
            field: "input_asset".to_string(),
            message: format!("{input_asset} is not an underlying of the position"),
        });
    }
    let mix = match positions.underlying_amounts(position_id) {
        Ok(amounts) => {
            let value_a = valuer.value_of(&amounts.asset_a, amounts.amount_a)?;
            let value_b = valuer.value_of(&amounts.asset_b, amounts.amount_b)?;
            if input_asset == &amounts.asset_a {
                Some((value_a, value_b))
            } else {
                Some((value_b, value_a))
            }
        }
        Err(ValuationError::UnknownPosition { .. }) => None,
        Err(err) => return Err(err.into()),
    };
    Ok(single_sided_split(input_amount, mix))
}

/// Verify that a freshly opened position's implied value matches the input
/// value within the deviation bound.
///
/// # Errors
///
/// Returns `DeviationExceeded` when the implied value strays too far.
pub fn verify_position_entry(
    value_in: Value,
    implied_value: Value,
    max_deviation_bps: u32,
) -> Result<(), EngineError> {
    let deviation = deviation_bps(value_in, implied_value);
    if deviation > Decimal::from(max_deviation_bps) {
        return Err(EngineError::DeviationExceeded {
            deviation_bps: deviation,
            max_bps: max_deviation_bps,
        });
    }
    Ok(())
}
