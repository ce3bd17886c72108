//! Top-level vault operations: deposit, withdraw, rebalance, fee accrual.
//!
//! The engine owns the live [`VaultState`] and the collaborator stack.
//! Every operation clones the state, runs all stages against the working
//! copy, and commits only when every invariant check passed; an error
//! leaves the live state untouched. Each operation begins with a fee
//! accrual touch point so management and performance fees are settled at
//! pre-operation prices.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::accounting::compute_shares_for_deposit;
use crate::config::EngineConfig;
use crate::domain::amount::{Amount, Value};
use crate::domain::asset::AssetId;
use crate::domain::vault::{AssetKind, VaultState};
use crate::error::EngineError;
use crate::fees::{apply_entry_fee, touch, AccrualOutcome};
use crate::rebalance::{execute_rebalance, RebalanceIntent, RebalanceRules, Rebalanced,
    SwapCapability};
use crate::settlement::{settle_withdrawal, FlashLender, PositionCapability, SettledWithdrawal,
    WithdrawalRequest};
use crate::valuation::{nav, share_price, AssetValuer, PositionValuer};

/// Outcome of a committed deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositReceipt {
    /// Per-asset amounts actually taken from the depositor.
    pub accepted: Vec<(AssetId, Amount)>,
    /// Shares minted to the depositor, net of the entry fee.
    pub shares_minted: Decimal,
    /// Shares diverted to the treasury as the entry fee.
    pub entry_fee_shares: Decimal,
    /// Share price after the deposit committed.
    pub share_price: Option<Value>,
}

/// The vault engine: live state plus the collaborator stack.
///
/// Single-threaded by design; operations are strictly sequential and each
/// one is atomic against the live state.
#[derive(Debug)]
pub struct VaultEngine<V, P, S, O, L> {
    config: EngineConfig,
    rules: RebalanceRules,
    state: VaultState,
    valuer: V,
    positions: P,
    solver: S,
    position_ops: O,
    lender: L,
}

impl<V, P, S, O, L> VaultEngine<V, P, S, O, L>
where
    V: AssetValuer,
    P: PositionValuer,
    S: SwapCapability,
    O: PositionCapability,
    L: FlashLender,
{
    /// Build an engine with a fresh empty vault.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` when fee rates exceed protocol maxima.
    pub fn new(
        config: EngineConfig,
        valuer: V,
        positions: P,
        solver: S,
        position_ops: O,
        lender: L,
        created_at: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        config.fees.validate()?;
        let rules = config.rebalance_rules();
        Ok(Self {
            config,
            rules,
            state: VaultState::new(created_at),
            valuer,
            positions,
            solver,
            position_ops,
            lender,
        })
    }

    /// Live vault state.
    #[must_use]
    pub const fn state(&self) -> &VaultState {
        &self.state
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current total vault value.
    pub fn nav(&self) -> Result<Value, EngineError> {
        nav(&self.state.ledger, &self.valuer, &self.positions)
    }

    /// Current share price; `None` before the bootstrap deposit.
    pub fn share_price(&self) -> Result<Option<Value>, EngineError> {
        Ok(share_price(self.nav()?, self.state.share_supply))
    }

    /// Add an asset to the vault's ledger with a zero balance. The entry
    /// starts its dust grace window at `now`.
    ///
    /// # Errors
    ///
    /// Returns `AssetNotRecognized` when the asset is not on the allow-list
    /// or already present.
    pub fn add_asset(
        &mut self,
        asset: AssetId,
        kind: AssetKind,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if !self.rules.allow_list.contains(&asset) {
            return Err(EngineError::AssetNotRecognized {
                asset: asset.to_string(),
            });
        }
        self.state.ledger.add_entry(asset, kind, now)
    }

    /// Accept a multi-asset deposit and mint shares at the pre-operation
    /// price.
    ///
    /// `declared` lists the maximum amounts the depositor offers; the
    /// accepted amounts never exceed them. The operation aborts when the
    /// net minted shares fall below `min_shares_out`.
    pub fn deposit(
        &mut self,
        declared: &BTreeMap<AssetId, Amount>,
        min_shares_out: Decimal,
        now: DateTime<Utc>,
    ) -> Result<DepositReceipt, EngineError> {
        let mut work = self.state.clone();
        self.accrue_on(&mut work, now)?;

        let quote = compute_shares_for_deposit(
            &work.ledger,
            work.share_supply,
            declared,
            self.config.vault.initial_share_supply,
        )?;
        let split = apply_entry_fee(quote.shares_to_mint, &self.config.fees);
        if split.net < min_shares_out {
            return Err(EngineError::InsufficientOutput {
                leg: "shares".to_string(),
                minimum: min_shares_out,
                actual: split.net,
            });
        }

        for (asset, amount) in &quote.accepted {
            work.ledger.credit(asset, *amount)?;
        }
        work.share_supply += quote.shares_to_mint;
        work.fee_state.treasury_shares += split.fee;

        let nav_after = nav(&work.ledger, &self.valuer, &self.positions)?;
        let price = share_price(nav_after, work.share_supply);
        // The bootstrap deposit establishes the performance high-water mark.
        if work.fee_state.high_water_mark_share_price.is_zero() {
            if let Some(price) = price {
                work.fee_state.high_water_mark_share_price = price;
            }
        }

        self.state = work;
        tracing::info!(
            shares_minted = %split.net,
            entry_fee_shares = %split.fee,
            supply = %self.state.share_supply,
            "deposit committed"
        );
        Ok(DepositReceipt {
            accepted: quote.accepted,
            shares_minted: split.net,
            entry_fee_shares: split.fee,
            share_price: price,
        })
    }

    /// Redeem shares for the pro-rata slice of the vault.
    pub fn withdraw(
        &mut self,
        request: &WithdrawalRequest,
        now: DateTime<Utc>,
    ) -> Result<SettledWithdrawal, EngineError> {
        let mut work = self.state.clone();
        self.accrue_on(&mut work, now)?;

        let settled = settle_withdrawal(
            &mut work,
            &self.config.fees,
            &self.positions,
            &mut self.position_ops,
            &mut self.lender,
            &mut self.solver,
            request,
            now,
        )?;

        self.state = work;
        Ok(settled)
    }

    /// Execute a manager rebalance under the deviation guard.
    pub fn rebalance(
        &mut self,
        intent: &RebalanceIntent,
        now: DateTime<Utc>,
    ) -> Result<Rebalanced, EngineError> {
        let mut work = self.state.clone();
        self.accrue_on(&mut work, now)?;

        let outcome = execute_rebalance(
            &mut work,
            &self.rules,
            &self.valuer,
            &self.positions,
            &mut self.solver,
            intent,
            now,
        )?;

        self.state = work;
        Ok(outcome)
    }

    /// Settle accrued fees without any other state change.
    pub fn accrue_fees(&mut self, now: DateTime<Utc>) -> Result<AccrualOutcome, EngineError> {
        let mut work = self.state.clone();
        let outcome = self.accrue_on(&mut work, now)?;
        self.state = work;
        Ok(outcome)
    }

    /// Run a fee accrual touch point against a working copy.
    fn accrue_on(
        &self,
        work: &mut VaultState,
        now: DateTime<Utc>,
    ) -> Result<AccrualOutcome, EngineError> {
        let current_nav = nav(&work.ledger, &self.valuer, &self.positions)?;
        let outcome = touch(
            &mut work.fee_state,
            &self.config.fees,
            work.share_supply,
            current_nav,
            now,
        );
        work.share_supply += outcome.total();
        Ok(outcome)
    }
}
