//! Vault ledger and state record.
//!
//! The [`VaultLedger`] is the authoritative list of assets currently part of
//! the vault (plain balances and external position handles) with their live
//! balances. [`VaultState`] bundles the ledger with the share supply, the fee
//! accrual cursor, and the rebalance cooldown cursor; it is the single record
//! a top-level operation clones, mutates, and commits back atomically.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::amount::Amount;
use crate::domain::asset::{AssetId, PositionId};
use crate::error::EngineError;
use crate::fees::FeeState;

/// How a ledger entry is valued and settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetKind {
    /// A plain token balance, valued directly by the asset valuer.
    Plain,
    /// An externally-held position. The ledger balance counts position units;
    /// valuation is delegated to the per-position-type valuer.
    External {
        /// Collaborator-side position handle.
        position_id: PositionId,
        /// First underlying asset.
        underlying_a: AssetId,
        /// Second underlying asset.
        underlying_b: AssetId,
    },
}

/// One asset currently part of the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Ledger identifier of the entry.
    pub asset: AssetId,
    /// Plain balance or external position.
    pub kind: AssetKind,
    /// Live balance (token units or position units).
    pub balance: Amount,
    /// When the balance last reached zero; entries past the grace window are
    /// eligible for removal.
    pub zero_since: Option<DateTime<Utc>>,
}

/// Ordered set of [`AssetEntry`], unique per asset identifier.
///
/// Order is significant only for deterministic iteration, not for
/// correctness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultLedger {
    entries: Vec<AssetEntry>,
}

impl VaultLedger {
    /// Create an empty ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Number of entries, including zero-balance ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the ledger has no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in ledger order.
    #[must_use]
    pub fn entries(&self) -> &[AssetEntry] {
        &self.entries
    }

    /// Look up an entry by asset identifier.
    #[must_use]
    pub fn entry(&self, asset: &AssetId) -> Option<&AssetEntry> {
        self.entries.iter().find(|e| &e.asset == asset)
    }

    /// Returns true if the asset is part of the vault.
    #[must_use]
    pub fn contains(&self, asset: &AssetId) -> bool {
        self.entry(asset).is_some()
    }

    /// Current balance of an asset, if it is part of the vault.
    #[must_use]
    pub fn balance_of(&self, asset: &AssetId) -> Option<Amount> {
        self.entry(asset).map(|e| e.balance)
    }

    /// Add a new zero-balance entry, stamped as zeroed at `now` so a
    /// never-funded entry still ages toward the dust sweep. The first credit
    /// clears the stamp.
    ///
    /// # Errors
    ///
    /// Returns `AssetNotRecognized` if the asset is already present (a
    /// duplicate entry would corrupt accounting).
    pub fn add_entry(
        &mut self,
        asset: AssetId,
        kind: AssetKind,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if self.contains(&asset) {
            return Err(EngineError::AssetNotRecognized {
                asset: format!("{asset} (duplicate entry)"),
            });
        }
        self.entries.push(AssetEntry {
            asset,
            kind,
            balance: Amount::ZERO,
            zero_since: Some(now),
        });
        Ok(())
    }

    /// Ensure an entry exists, adding it with zero balance if absent.
    ///
    /// # Errors
    ///
    /// Returns `AssetNotRecognized` if the asset exists with a different
    /// kind than requested.
    pub fn ensure_entry(
        &mut self,
        asset: &AssetId,
        kind: &AssetKind,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        match self.entry(asset) {
            Some(existing) if &existing.kind == kind => Ok(()),
            Some(_) => Err(EngineError::AssetNotRecognized {
                asset: format!("{asset} (kind mismatch)"),
            }),
            None => self.add_entry(asset.clone(), kind.clone(), now),
        }
    }

    /// Credit units to an existing entry.
    ///
    /// # Errors
    ///
    /// Returns `AssetNotRecognized` if the asset is not part of the vault.
    pub fn credit(&mut self, asset: &AssetId, amount: Amount) -> Result<(), EngineError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| &e.asset == asset)
            .ok_or_else(|| EngineError::AssetNotRecognized {
                asset: asset.to_string(),
            })?;
        entry.balance += amount;
        if entry.balance.is_positive() {
            entry.zero_since = None;
        }
        Ok(())
    }

    /// Debit units from an existing entry, stamping `zero_since` when the
    /// balance reaches zero.
    ///
    /// # Errors
    ///
    /// Returns `AssetNotRecognized` for unknown assets and
    /// `InsufficientBalance` when the holding is below `amount`.
    pub fn debit(
        &mut self,
        asset: &AssetId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| &e.asset == asset)
            .ok_or_else(|| EngineError::AssetNotRecognized {
                asset: asset.to_string(),
            })?;
        entry.balance = entry.balance.checked_sub(amount).ok_or_else(|| {
            EngineError::InsufficientBalance {
                asset: asset.to_string(),
                requested: amount.units(),
                available: entry.balance.units(),
            }
        })?;
        if entry.balance.is_zero() && entry.zero_since.is_none() {
            entry.zero_since = Some(now);
        }
        Ok(())
    }

    /// Remove entries whose balance has been zero for longer than `grace`.
    ///
    /// Returns the removed asset identifiers.
    pub fn sweep_dust(&mut self, now: DateTime<Utc>, grace: Duration) -> Vec<AssetId> {
        let mut removed = Vec::new();
        self.entries.retain(|e| {
            let expired = e.balance.is_zero()
                && e.zero_since.is_some_and(|since| now - since >= grace);
            if expired {
                removed.push(e.asset.clone());
            }
            !expired
        });
        removed
    }
}

/// The complete mutable state of one vault.
///
/// Top-level operations clone this record, mutate the working copy, and
/// commit it back only when every stage and every invariant check succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultState {
    /// Asset entries and balances.
    pub ledger: VaultLedger,
    /// Total issued shares. Mutated only by mint/burn.
    pub share_supply: Decimal,
    /// Fee accrual cursor and recipient counters.
    pub fee_state: FeeState,
    /// When the last rebalance committed; `None` before the first one.
    pub last_rebalance_at: Option<DateTime<Utc>>,
}

impl VaultState {
    /// Fresh state with an empty ledger and zero supply.
    #[must_use]
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            ledger: VaultLedger::new(),
            share_supply: Decimal::ZERO,
            fee_state: FeeState::new(created_at),
            last_rebalance_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    fn wbnb() -> AssetId {
        AssetId::new("WBNB")
    }

    #[test]
    fn add_credit_debit_roundtrip() {
        let mut ledger = VaultLedger::new();
        ledger.add_entry(wbnb(), AssetKind::Plain, ts(0)).unwrap();
        ledger.credit(&wbnb(), Amount::new(dec!(100))).unwrap();
        assert_eq!(ledger.balance_of(&wbnb()), Some(Amount::new(dec!(100))));

        ledger.debit(&wbnb(), Amount::new(dec!(40)), ts(0)).unwrap();
        assert_eq!(ledger.balance_of(&wbnb()), Some(Amount::new(dec!(60))));
    }

    #[test]
    fn duplicate_entry_rejected() {
        let mut ledger = VaultLedger::new();
        ledger.add_entry(wbnb(), AssetKind::Plain, ts(0)).unwrap();
        let err = ledger.add_entry(wbnb(), AssetKind::Plain, ts(0)).unwrap_err();
        assert_eq!(err.reason(), "ASSET_NOT_RECOGNIZED");
    }

    #[test]
    fn debit_unknown_asset_fails() {
        let mut ledger = VaultLedger::new();
        let err = ledger
            .debit(&wbnb(), Amount::new(dec!(1)), ts(0))
            .unwrap_err();
        assert_eq!(err.reason(), "ASSET_NOT_RECOGNIZED");
    }

    #[test]
    fn overdraw_fails_and_leaves_balance() {
        let mut ledger = VaultLedger::new();
        ledger.add_entry(wbnb(), AssetKind::Plain, ts(0)).unwrap();
        ledger.credit(&wbnb(), Amount::new(dec!(10))).unwrap();

        let err = ledger
            .debit(&wbnb(), Amount::new(dec!(11)), ts(0))
            .unwrap_err();
        assert_eq!(err.reason(), "INSUFFICIENT_BALANCE");
        assert_eq!(ledger.balance_of(&wbnb()), Some(Amount::new(dec!(10))));
    }

    #[test]
    fn zero_since_stamped_and_cleared() {
        let mut ledger = VaultLedger::new();
        ledger.add_entry(wbnb(), AssetKind::Plain, ts(0)).unwrap();
        // Creation stamps the entry; the first credit clears it.
        assert_eq!(ledger.entry(&wbnb()).unwrap().zero_since, Some(ts(0)));
        ledger.credit(&wbnb(), Amount::new(dec!(5))).unwrap();
        assert_eq!(ledger.entry(&wbnb()).unwrap().zero_since, None);
        ledger.debit(&wbnb(), Amount::new(dec!(5)), ts(10)).unwrap();
        assert_eq!(ledger.entry(&wbnb()).unwrap().zero_since, Some(ts(10)));

        // A later credit clears the stamp.
        ledger.credit(&wbnb(), Amount::new(dec!(1))).unwrap();
        assert_eq!(ledger.entry(&wbnb()).unwrap().zero_since, None);
    }

    #[test]
    fn sweep_dust_respects_grace_window() {
        let mut ledger = VaultLedger::new();
        ledger.add_entry(wbnb(), AssetKind::Plain, ts(0)).unwrap();
        ledger
            .add_entry(AssetId::new("ETH"), AssetKind::Plain, ts(0))
            .unwrap();
        ledger.credit(&wbnb(), Amount::new(dec!(5))).unwrap();
        ledger.credit(&AssetId::new("ETH"), Amount::new(dec!(2))).unwrap();
        ledger.debit(&wbnb(), Amount::new(dec!(5)), ts(0)).unwrap();

        // Within the window: nothing removed.
        let removed = ledger.sweep_dust(ts(50), Duration::seconds(100));
        assert!(removed.is_empty());
        assert_eq!(ledger.len(), 2);

        // Past the window: the zeroed entry goes, the funded one stays.
        let removed = ledger.sweep_dust(ts(100), Duration::seconds(100));
        assert_eq!(removed, vec![wbnb()]);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains(&AssetId::new("ETH")));
    }

    #[test]
    fn never_funded_entry_swept_after_grace() {
        let mut ledger = VaultLedger::new();
        ledger.add_entry(wbnb(), AssetKind::Plain, ts(0)).unwrap();

        let removed = ledger.sweep_dust(ts(50), Duration::seconds(100));
        assert!(removed.is_empty());

        let removed = ledger.sweep_dust(ts(100), Duration::seconds(100));
        assert_eq!(removed, vec![wbnb()]);
        assert!(ledger.is_empty());
    }

    #[test]
    fn ensure_entry_kind_mismatch_fails() {
        let mut ledger = VaultLedger::new();
        ledger.add_entry(wbnb(), AssetKind::Plain, ts(0)).unwrap();
        let external = AssetKind::External {
            position_id: PositionId::random(),
            underlying_a: AssetId::new("WBNB"),
            underlying_b: AssetId::new("ETH"),
        };
        let err = ledger.ensure_entry(&wbnb(), &external, ts(0)).unwrap_err();
        assert_eq!(err.reason(), "ASSET_NOT_RECOGNIZED");
    }

    #[test]
    fn ensure_entry_adds_missing() {
        let mut ledger = VaultLedger::new();
        ledger.ensure_entry(&wbnb(), &AssetKind::Plain, ts(0)).unwrap();
        assert!(ledger.contains(&wbnb()));
        // Idempotent for the same kind.
        ledger.ensure_entry(&wbnb(), &AssetKind::Plain, ts(0)).unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn fresh_state_is_empty() {
        let state = VaultState::new(ts(0));
        assert!(state.ledger.is_empty());
        assert_eq!(state.share_supply, Decimal::ZERO);
        assert!(state.last_rebalance_at.is_none());
    }
}
