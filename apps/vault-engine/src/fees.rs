//! Fee accrual: streaming management/performance fees and flat entry/exit
//! fees.
//!
//! Two independent streams:
//!
//! - **Management fee**: time-based, accrued continuously as a pure supply
//!   dilution. On every touch point the engine mints
//!   `supply * rate * elapsed / year` shares to the manager recipient.
//! - **Performance fee**: charged on share-price gains above the high-water
//!   mark. Minted so the recipient holds exactly the fee value after
//!   dilution, then the mark is raised.
//!
//! Entry and exit fees are flat percentages applied at deposit/withdrawal
//! time and credited to a separate treasury recipient.
//!
//! Fee parameters are validated at configuration time only; accrual itself
//! cannot fail. Zero or negative elapsed time is a no-op, not an error.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::amount::{BasisPoints, Value};
use crate::error::EngineError;

/// Seconds in the fee accrual year (365 days).
pub const SECONDS_PER_YEAR: i64 = 31_536_000;

/// Maximum management fee: 10% annually.
pub const MAX_MANAGEMENT_FEE_BPS: u32 = 1_000;
/// Maximum performance fee: 50% of gains.
pub const MAX_PERFORMANCE_FEE_BPS: u32 = 5_000;
/// Maximum entry fee: 5%.
pub const MAX_ENTRY_FEE_BPS: u32 = 500;
/// Maximum exit fee: 5%.
pub const MAX_EXIT_FEE_BPS: u32 = 500;

/// Fee rates for one vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Annualized management fee in basis points.
    #[serde(default)]
    pub management_fee_annual_bps: BasisPoints,
    /// Performance fee on gains above the high-water mark, in basis points.
    #[serde(default)]
    pub performance_fee_bps: BasisPoints,
    /// Flat fee deducted from minted shares on deposit.
    #[serde(default)]
    pub entry_fee_bps: BasisPoints,
    /// Flat fee added to burned shares on withdrawal.
    #[serde(default)]
    pub exit_fee_bps: BasisPoints,
}

impl FeeConfig {
    /// All-zero fees.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            management_fee_annual_bps: BasisPoints::ZERO,
            performance_fee_bps: BasisPoints::ZERO,
            entry_fee_bps: BasisPoints::ZERO,
            exit_fee_bps: BasisPoints::ZERO,
        }
    }

    /// Validate rates against protocol maxima.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` naming the offending field.
    pub fn validate(&self) -> Result<(), EngineError> {
        let checks = [
            (
                "management_fee_annual_bps",
                self.management_fee_annual_bps,
                MAX_MANAGEMENT_FEE_BPS,
            ),
            (
                "performance_fee_bps",
                self.performance_fee_bps,
                MAX_PERFORMANCE_FEE_BPS,
            ),
            ("entry_fee_bps", self.entry_fee_bps, MAX_ENTRY_FEE_BPS),
            ("exit_fee_bps", self.exit_fee_bps, MAX_EXIT_FEE_BPS),
        ];
        for (field, rate, max) in checks {
            if rate.bps() > max {
                return Err(EngineError::ConfigurationInvalid {
                    field: field.to_string(),
                    message: format!("{rate} exceeds maximum of {max} bps"),
                });
            }
        }
        Ok(())
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self::zero()
    }
}

/// Per-vault fee accrual cursor and recipient share counters.
///
/// Created at vault initialization, never destroyed, mutated only by the
/// accrual functions in this module (and by entry/exit fee application).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeState {
    /// Timestamp of the last accrual touch point.
    pub last_accrual_at: DateTime<Utc>,
    /// Highest share price at which performance fees were last charged.
    pub high_water_mark_share_price: Value,
    /// Shares streamed by accrual but not yet minted into the supply.
    /// Only ever non-zero transiently inside an operation.
    pub pending_fee_shares: Decimal,
    /// Shares held by the manager recipient (management + performance fees).
    pub manager_shares: Decimal,
    /// Shares held by the treasury recipient (entry + exit fees).
    pub treasury_shares: Decimal,
}

impl FeeState {
    /// Fresh cursor, starting accrual at `created_at`.
    #[must_use]
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            last_accrual_at: created_at,
            high_water_mark_share_price: Value::ZERO,
            pending_fee_shares: Decimal::ZERO,
            manager_shares: Decimal::ZERO,
            treasury_shares: Decimal::ZERO,
        }
    }
}

/// Shares minted by one accrual touch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccrualOutcome {
    /// Management-fee shares minted to the manager recipient.
    pub management_shares: Decimal,
    /// Performance-fee shares minted to the manager recipient.
    pub performance_shares: Decimal,
}

impl AccrualOutcome {
    /// Total shares minted by this touch point.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.management_shares + self.performance_shares
    }
}

/// Accrue both fee streams and mint the result to the manager recipient.
///
/// `supply` is the share supply before accrual and `nav` the current total
/// vault value. The caller must add `outcome.total()` to the supply.
/// Accrual never fails: zero/negative elapsed time and zero supply are
/// no-ops that still advance the cursor.
pub fn touch(
    state: &mut FeeState,
    config: &FeeConfig,
    supply: Decimal,
    nav: Value,
    now: DateTime<Utc>,
) -> AccrualOutcome {
    let elapsed = (now - state.last_accrual_at).num_seconds();
    state.last_accrual_at = now;
    if elapsed <= 0 || supply <= Decimal::ZERO {
        return AccrualOutcome::default();
    }

    // Stream 1: time-based management fee, pure supply dilution.
    let year_fraction = Decimal::from(elapsed) / Decimal::from(SECONDS_PER_YEAR);
    let management = supply * config.management_fee_annual_bps.as_fraction() * year_fraction;
    state.pending_fee_shares += management;
    let supply_after_management = supply + management;

    // Stream 2: performance fee against the high-water mark.
    let mut performance = Decimal::ZERO;
    if nav.is_positive() {
        let price = Value::new(nav.amount() / supply_after_management);
        if state.high_water_mark_share_price.is_zero() {
            // First priced touch: establish the mark without charging.
            state.high_water_mark_share_price = price;
        } else if price > state.high_water_mark_share_price {
            let gain_per_share = price.amount() - state.high_water_mark_share_price.amount();
            let fee_value =
                gain_per_share * supply_after_management * config.performance_fee_bps.as_fraction();
            if fee_value > Decimal::ZERO && fee_value < nav.amount() {
                // Mint at the diluted price so the recipient holds exactly
                // fee_value afterwards.
                performance = fee_value * supply_after_management / (nav.amount() - fee_value);
                state.pending_fee_shares += performance;
            }
            state.high_water_mark_share_price = price;
        }
    }

    // Mint: move the streamed shares to the manager recipient.
    let minted = state.pending_fee_shares;
    state.manager_shares += minted;
    state.pending_fee_shares = Decimal::ZERO;
    debug_assert_eq!(minted, management + performance);

    if minted > Decimal::ZERO {
        tracing::debug!(
            management = %management,
            performance = %performance,
            elapsed_secs = elapsed,
            "fee accrual minted shares"
        );
    }

    AccrualOutcome {
        management_shares: management,
        performance_shares: performance,
    }
}

/// Split of a gross share quantity into the caller's net part and a fee part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    /// Shares the caller keeps (entry) or that are burned (exit).
    pub net: Decimal,
    /// Shares credited to the treasury recipient.
    pub fee: Decimal,
}

/// Deduct the entry fee from shares about to be minted to a depositor.
#[must_use]
pub fn apply_entry_fee(gross_shares: Decimal, config: &FeeConfig) -> FeeSplit {
    let fee = gross_shares * config.entry_fee_bps.as_fraction();
    FeeSplit {
        net: gross_shares - fee,
        fee,
    }
}

/// Carve the exit fee out of shares being redeemed; the fee part is
/// transferred to the treasury instead of burned.
#[must_use]
pub fn apply_exit_fee(shares_to_burn: Decimal, config: &FeeConfig) -> FeeSplit {
    let fee = shares_to_burn * config.exit_fee_bps.as_fraction();
    FeeSplit {
        net: shares_to_burn - fee,
        fee,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    fn config(mgmt: u32, perf: u32) -> FeeConfig {
        FeeConfig {
            management_fee_annual_bps: BasisPoints::new(mgmt),
            performance_fee_bps: BasisPoints::new(perf),
            entry_fee_bps: BasisPoints::ZERO,
            exit_fee_bps: BasisPoints::ZERO,
        }
    }

    #[test_case(MAX_MANAGEMENT_FEE_BPS + 1, 0, 0, 0, "management_fee_annual_bps")]
    #[test_case(0, MAX_PERFORMANCE_FEE_BPS + 1, 0, 0, "performance_fee_bps")]
    #[test_case(0, 0, MAX_ENTRY_FEE_BPS + 1, 0, "entry_fee_bps")]
    #[test_case(0, 0, 0, MAX_EXIT_FEE_BPS + 1, "exit_fee_bps")]
    fn out_of_bounds_rates_rejected(mgmt: u32, perf: u32, entry: u32, exit: u32, field: &str) {
        let cfg = FeeConfig {
            management_fee_annual_bps: BasisPoints::new(mgmt),
            performance_fee_bps: BasisPoints::new(perf),
            entry_fee_bps: BasisPoints::new(entry),
            exit_fee_bps: BasisPoints::new(exit),
        };
        match cfg.validate().unwrap_err() {
            EngineError::ConfigurationInvalid { field: f, .. } => assert_eq!(f, field),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn maximum_rates_accepted() {
        let cfg = FeeConfig {
            management_fee_annual_bps: BasisPoints::new(MAX_MANAGEMENT_FEE_BPS),
            performance_fee_bps: BasisPoints::new(MAX_PERFORMANCE_FEE_BPS),
            entry_fee_bps: BasisPoints::new(MAX_ENTRY_FEE_BPS),
            exit_fee_bps: BasisPoints::new(MAX_EXIT_FEE_BPS),
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_elapsed_is_noop() {
        let cfg = config(200, 2_500);
        let mut state = FeeState::new(ts(0));
        state.high_water_mark_share_price = Value::new(dec!(1));

        let outcome = touch(&mut state, &cfg, dec!(100), Value::new(dec!(100)), ts(0));
        assert_eq!(outcome.total(), Decimal::ZERO);
        assert_eq!(state.manager_shares, Decimal::ZERO);
    }

    #[test]
    fn management_fee_dilutes_over_one_year() {
        // 200 bps over a full year on a supply of 100 mints 2 shares.
        let cfg = config(200, 0);
        let mut state = FeeState::new(ts(0));
        state.high_water_mark_share_price = Value::new(dec!(1));

        let outcome = touch(
            &mut state,
            &cfg,
            dec!(100),
            Value::new(dec!(100)),
            ts(SECONDS_PER_YEAR),
        );
        assert_eq!(outcome.management_shares, dec!(2));
        assert_eq!(outcome.performance_shares, Decimal::ZERO);
        assert_eq!(state.manager_shares, dec!(2));
        assert_eq!(state.pending_fee_shares, Decimal::ZERO);
    }

    #[test]
    fn performance_fee_only_above_high_water_mark() {
        let cfg = config(0, 2_500);
        let mut state = FeeState::new(ts(0));
        state.high_water_mark_share_price = Value::new(dec!(1));

        // Price at the mark: nothing charged, mark unchanged.
        let outcome = touch(&mut state, &cfg, dec!(100), Value::new(dec!(100)), ts(10));
        assert_eq!(outcome.performance_shares, Decimal::ZERO);
        assert_eq!(state.high_water_mark_share_price, Value::new(dec!(1)));

        // Price doubles: fee on the gain, mark raised.
        let outcome = touch(&mut state, &cfg, dec!(100), Value::new(dec!(200)), ts(20));
        assert!(outcome.performance_shares > Decimal::ZERO);
        assert_eq!(state.high_water_mark_share_price, Value::new(dec!(2)));

        // Recipient holds exactly the fee value after dilution:
        // gain 100, fee value 25, price after mint = 200 / (100 + s).
        let s = outcome.performance_shares;
        let price_after = dec!(200) / (dec!(100) + s);
        let recipient_value = s * price_after;
        assert!((recipient_value - dec!(25)).abs() < dec!(0.000001));
    }

    #[test]
    fn price_below_mark_charges_nothing_and_keeps_mark() {
        let cfg = config(0, 2_500);
        let mut state = FeeState::new(ts(0));
        state.high_water_mark_share_price = Value::new(dec!(2));

        let outcome = touch(&mut state, &cfg, dec!(100), Value::new(dec!(150)), ts(10));
        assert_eq!(outcome.performance_shares, Decimal::ZERO);
        assert_eq!(state.high_water_mark_share_price, Value::new(dec!(2)));
    }

    #[test]
    fn first_priced_touch_establishes_mark_without_charging() {
        let cfg = config(0, 2_500);
        let mut state = FeeState::new(ts(0));
        assert!(state.high_water_mark_share_price.is_zero());

        let outcome = touch(&mut state, &cfg, dec!(100), Value::new(dec!(150)), ts(10));
        assert_eq!(outcome.performance_shares, Decimal::ZERO);
        assert_eq!(state.high_water_mark_share_price, Value::new(dec!(1.5)));
    }

    #[test]
    fn zero_supply_only_advances_cursor() {
        let cfg = config(200, 2_500);
        let mut state = FeeState::new(ts(0));
        let outcome = touch(&mut state, &cfg, Decimal::ZERO, Value::ZERO, ts(100));
        assert_eq!(outcome.total(), Decimal::ZERO);
        assert_eq!(state.last_accrual_at, ts(100));
    }

    #[test]
    fn entry_and_exit_fee_splits() {
        let cfg = FeeConfig {
            management_fee_annual_bps: BasisPoints::ZERO,
            performance_fee_bps: BasisPoints::ZERO,
            entry_fee_bps: BasisPoints::new(100),
            exit_fee_bps: BasisPoints::new(50),
        };
        let entry = apply_entry_fee(dec!(100), &cfg);
        assert_eq!(entry.net, dec!(99));
        assert_eq!(entry.fee, dec!(1));

        let exit = apply_exit_fee(dec!(100), &cfg);
        assert_eq!(exit.net, dec!(99.5));
        assert_eq!(exit.fee, dec!(0.5));
    }

    #[test]
    fn zero_fee_split_is_identity() {
        let split = apply_entry_fee(dec!(42), &FeeConfig::zero());
        assert_eq!(split.net, dec!(42));
        assert_eq!(split.fee, Decimal::ZERO);
    }

    proptest! {
        // The high-water mark is non-decreasing across any sequence of
        // accruals, and performance shares are minted only when the price
        // exceeds the previous mark.
        #[test]
        fn high_water_mark_is_monotonic(navs in prop::collection::vec(1u64..1_000_000, 1..20)) {
            let cfg = config(0, 2_500);
            let mut state = FeeState::new(ts(0));
            state.high_water_mark_share_price = Value::new(dec!(1));
            let supply = dec!(100);

            let mut clock = 0i64;
            for nav in navs {
                clock += 60;
                let mark_before = state.high_water_mark_share_price;
                let outcome = touch(
                    &mut state,
                    &cfg,
                    supply,
                    Value::new(Decimal::from(nav)),
                    ts(clock),
                );
                prop_assert!(state.high_water_mark_share_price >= mark_before);
                if outcome.performance_shares > Decimal::ZERO {
                    prop_assert!(state.high_water_mark_share_price > mark_before);
                }
            }
        }
    }
}
