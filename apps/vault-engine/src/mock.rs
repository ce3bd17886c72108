//! In-memory market and collaborator mocks.
//!
//! A [`MarketState`] holds prices and external positions behind an
//! `Rc<RefCell<..>>` handle so the valuer, solver, position operator, and
//! flash lender all observe the same world. The solver interprets routing
//! payloads as JSON-encoded [`SolverInstruction`] lists and applies a
//! configurable slippage, which makes deviation-bound tests deterministic.
//!
//! Used by the integration tests and by demo binaries; not a trading
//! simulation.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::amount::{Amount, BasisPoints, Value};
use crate::domain::asset::{AssetId, PositionId};
use crate::rebalance::{AssetFill, RoutingPayload, SolverError, SwapCapability};
use crate::settlement::{FlashBorrow, FlashLender, PositionCapability, PositionProceeds};
use crate::valuation::{AssetValuer, PositionAmounts, PositionValuer, ValuationError};

/// One external position held by the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPosition {
    /// First underlying asset.
    pub asset_a: AssetId,
    /// Vault-attributable amount of the first underlying.
    pub amount_a: Amount,
    /// Second underlying asset.
    pub asset_b: AssetId,
    /// Vault-attributable amount of the second underlying.
    pub amount_b: Amount,
    /// Outstanding debt that must be cleared before collateral is released.
    pub debt: Option<(AssetId, Amount)>,
    /// Total position units issued to the vault.
    pub total_units: Amount,
}

/// Prices and positions shared by every mock collaborator.
#[derive(Debug, Default)]
pub struct MarketState {
    prices: BTreeMap<AssetId, Decimal>,
    stale: BTreeSet<AssetId>,
    positions: BTreeMap<PositionId, MockPosition>,
}

impl MarketState {
    /// Empty market.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle for wiring into collaborators.
    #[must_use]
    pub fn shared(self) -> SharedMarket {
        Rc::new(RefCell::new(self))
    }

    /// Set the unit price of an asset.
    pub fn set_price(&mut self, asset: impl Into<AssetId>, price: Decimal) {
        let asset = asset.into();
        self.stale.remove(&asset);
        self.prices.insert(asset, price);
    }

    /// Mark an asset's price feed stale.
    pub fn mark_stale(&mut self, asset: impl Into<AssetId>) {
        self.stale.insert(asset.into());
    }

    /// Register an external position and return its handle.
    pub fn insert_position(&mut self, position: MockPosition) -> PositionId {
        let id = PositionId::random();
        self.positions.insert(id, position);
        id
    }

    /// Inspect a position.
    #[must_use]
    pub fn position(&self, id: &PositionId) -> Option<&MockPosition> {
        self.positions.get(id)
    }

    /// Attach debt to a position, turning it into a leveraged one.
    pub fn set_debt(&mut self, id: &PositionId, asset: impl Into<AssetId>, amount: Amount) {
        if let Some(p) = self.positions.get_mut(id) {
            p.debt = Some((asset.into(), amount));
        }
    }

    /// Scale a position's underlying amounts in place, simulating market
    /// drift of the pooled assets.
    pub fn scale_position(&mut self, id: &PositionId, factor_a: Decimal, factor_b: Decimal) {
        if let Some(p) = self.positions.get_mut(id) {
            p.amount_a = p.amount_a * factor_a;
            p.amount_b = p.amount_b * factor_b;
        }
    }
}

/// Shared handle to a [`MarketState`].
pub type SharedMarket = Rc<RefCell<MarketState>>;

/// Values assets and positions straight from the shared market.
#[derive(Debug, Clone)]
pub struct MockValuer {
    market: SharedMarket,
}

impl MockValuer {
    /// Valuer over `market`.
    #[must_use]
    pub fn new(market: SharedMarket) -> Self {
        Self { market }
    }
}

impl AssetValuer for MockValuer {
    fn unit_price(&self, asset: &AssetId) -> Result<Value, ValuationError> {
        let market = self.market.borrow();
        if market.stale.contains(asset) {
            return Err(ValuationError::StalePrice {
                asset: asset.clone(),
            });
        }
        market
            .prices
            .get(asset)
            .map(|p| Value::new(*p))
            .ok_or_else(|| ValuationError::UnknownAsset {
                asset: asset.clone(),
            })
    }
}

impl PositionValuer for MockValuer {
    fn underlying_amounts(&self, position: &PositionId) -> Result<PositionAmounts, ValuationError> {
        let market = self.market.borrow();
        market
            .positions
            .get(position)
            .map(|p| PositionAmounts {
                asset_a: p.asset_a.clone(),
                amount_a: p.amount_a,
                asset_b: p.asset_b.clone(),
                amount_b: p.amount_b,
            })
            .ok_or(ValuationError::UnknownPosition {
                position: *position,
            })
    }
}

/// One step of a mock routing payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SolverInstruction {
    /// Swap `amount_in` of one asset into another at market price, less
    /// slippage.
    Swap {
        /// Asset sold.
        asset_in: AssetId,
        /// Asset bought.
        asset_out: AssetId,
        /// Amount sold.
        amount_in: Amount,
    },
    /// Open (or top up) an external position from underlying amounts.
    OpenPosition {
        /// Ledger entry the position units are credited to.
        entry_asset: AssetId,
        /// Position handle, pre-registered or fresh.
        position_id: PositionId,
        /// First underlying asset.
        asset_a: AssetId,
        /// Contributed amount of the first underlying.
        amount_a: Amount,
        /// Second underlying asset.
        asset_b: AssetId,
        /// Contributed amount of the second underlying.
        amount_b: Amount,
        /// Position units issued for the contribution.
        units: Amount,
    },
}

/// Encode instructions into a routing payload.
///
/// # Panics
///
/// Panics if JSON serialization fails, which it cannot for these types.
#[must_use]
#[allow(clippy::expect_used)]
pub fn encode_instructions(instructions: &[SolverInstruction]) -> RoutingPayload {
    RoutingPayload(serde_json::to_vec(instructions).expect("instructions serialize"))
}

/// Executes JSON routing payloads against the shared market.
#[derive(Debug, Clone)]
pub struct MockSolver {
    market: SharedMarket,
    slippage_bps: BasisPoints,
}

impl MockSolver {
    /// Solver over `market`, losing `slippage_bps` on every swap.
    #[must_use]
    pub fn new(market: SharedMarket, slippage_bps: BasisPoints) -> Self {
        Self {
            market,
            slippage_bps,
        }
    }

    fn swap_output(
        &self,
        asset_in: &AssetId,
        asset_out: &AssetId,
        amount_in: Amount,
    ) -> Result<Amount, SolverError> {
        let market = self.market.borrow();
        let price_in = market
            .prices
            .get(asset_in)
            .ok_or_else(|| SolverError(format!("no market for {asset_in}")))?;
        let price_out = market
            .prices
            .get(asset_out)
            .ok_or_else(|| SolverError(format!("no market for {asset_out}")))?;
        if *price_out <= Decimal::ZERO {
            return Err(SolverError(format!("bad price for {asset_out}")));
        }
        let gross = amount_in.units() * price_in / price_out;
        let net = gross * (Decimal::ONE - self.slippage_bps.as_fraction());
        Ok(Amount::new(net))
    }
}

impl SwapCapability for MockSolver {
    fn execute(&mut self, routing: &RoutingPayload) -> Result<Vec<AssetFill>, SolverError> {
        let instructions: Vec<SolverInstruction> = serde_json::from_slice(&routing.0)
            .map_err(|e| SolverError(format!("malformed routing payload: {e}")))?;

        let mut fills = Vec::new();
        for instruction in instructions {
            match instruction {
                SolverInstruction::Swap {
                    asset_in,
                    asset_out,
                    amount_in,
                } => {
                    let out = self.swap_output(&asset_in, &asset_out, amount_in)?;
                    fills.push(AssetFill {
                        asset: asset_out,
                        amount: out,
                    });
                }
                SolverInstruction::OpenPosition {
                    entry_asset,
                    position_id,
                    asset_a,
                    amount_a,
                    asset_b,
                    amount_b,
                    units,
                } => {
                    let mut market = self.market.borrow_mut();
                    let position = market.positions.entry(position_id).or_insert(MockPosition {
                        asset_a: asset_a.clone(),
                        amount_a: Amount::ZERO,
                        asset_b: asset_b.clone(),
                        amount_b: Amount::ZERO,
                        debt: None,
                        total_units: Amount::ZERO,
                    });
                    if position.asset_a != asset_a || position.asset_b != asset_b {
                        return Err(SolverError(format!(
                            "position {position_id} underlying mismatch"
                        )));
                    }
                    position.amount_a += amount_a;
                    position.amount_b += amount_b;
                    position.total_units += units;
                    fills.push(AssetFill {
                        asset: entry_asset,
                        amount: units,
                    });
                }
            }
        }
        Ok(fills)
    }
}

/// Decreases market positions, releasing collateral pro-rata.
#[derive(Debug, Clone)]
pub struct MockPositionOps {
    market: SharedMarket,
}

impl MockPositionOps {
    /// Operator over `market`.
    #[must_use]
    pub fn new(market: SharedMarket) -> Self {
        Self { market }
    }
}

impl PositionCapability for MockPositionOps {
    fn decrease(
        &mut self,
        position: &PositionId,
        units: Amount,
        repay: Option<&FlashBorrow>,
    ) -> Result<PositionProceeds, SolverError> {
        let mut market = self.market.borrow_mut();
        let p = market
            .positions
            .get_mut(position)
            .ok_or_else(|| SolverError(format!("unknown position {position}")))?;
        if units > p.total_units || !p.total_units.is_positive() {
            return Err(SolverError(format!(
                "position {position} has only {} units",
                p.total_units
            )));
        }
        let fraction = units.units() / p.total_units.units();

        // Debt must be cleared (pro-rata) before collateral is released.
        if let Some((debt_asset, debt_amount)) = &p.debt {
            let owed = *debt_amount * fraction;
            let covered = repay
                .is_some_and(|b| &b.asset == debt_asset && b.amount >= owed);
            if !covered {
                return Err(SolverError(format!(
                    "position debt of {owed} {debt_asset} not cleared"
                )));
            }
            p.debt = Some((debt_asset.clone(), *debt_amount - owed));
        }

        let out_a = p.amount_a * fraction;
        let out_b = p.amount_b * fraction;
        p.amount_a -= out_a;
        p.amount_b -= out_b;
        p.total_units -= units;

        Ok(PositionProceeds {
            asset_a: p.asset_a.clone(),
            amount_a: out_a,
            asset_b: p.asset_b.clone(),
            amount_b: out_b,
        })
    }
}

/// Flash lender with a flat fee and unlimited liquidity.
#[derive(Debug, Default)]
pub struct MockFlashLender {
    fee_bps: u32,
    /// Outstanding borrows, drained by repayment.
    pub outstanding: Vec<(AssetId, Amount)>,
}

impl MockFlashLender {
    /// Lender charging `fee_bps` on every borrow.
    #[must_use]
    pub fn new(fee_bps: u32) -> Self {
        Self {
            fee_bps,
            outstanding: Vec::new(),
        }
    }
}

impl FlashLender for MockFlashLender {
    fn fee(&self, _asset: &AssetId, amount: Amount) -> Amount {
        amount * BasisPoints::new(self.fee_bps).as_fraction()
    }

    fn borrow(&mut self, asset: &AssetId, amount: Amount) -> Result<(), SolverError> {
        self.outstanding.push((asset.clone(), amount));
        Ok(())
    }

    fn repay(&mut self, asset: &AssetId, amount: Amount) -> Result<(), SolverError> {
        let Some(index) = self.outstanding.iter().position(|(a, _)| a == asset) else {
            return Err(SolverError(format!("no outstanding borrow of {asset}")));
        };
        let (_, principal) = self.outstanding[index];
        let owed = principal + self.fee(asset, principal);
        if amount < owed {
            return Err(SolverError(format!(
                "repayment of {amount} {asset} below owed {owed}"
            )));
        }
        self.outstanding.remove(index);
        Ok(())
    }
}
