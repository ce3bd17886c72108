//! Error taxonomy for the vault engine.
//!
//! Every error is detected and surfaced at the boundary of a top-level
//! operation (deposit, withdraw, rebalance). The engine never recovers
//! mid-operation: the atomicity model makes partial recovery meaningless, so
//! the only recovery is full rollback, and a returned error always means the
//! operation had zero observable effect.
//!
//! | Variant | Meaning |
//! |---------|---------|
//! | `ConfigurationInvalid` | Fee/deviation parameters outside allowed bounds |
//! | `AssetNotRecognized` | Asset not in the vault or allow-list |
//! | `InsufficientBalance` | Vault holding below a requested amount |
//! | `InsufficientOutput` | Computed shares/amounts below a declared minimum |
//! | `DeviationExceeded` | Post-rebalance NAV moved beyond the bound |
//! | `StaleOrMissingValuation` | A valuer could not produce a current value |
//! | `CooldownActive` | Rebalance attempted before the timer elapsed |
//! | `BorrowNotRepaid` | Flash-borrow could not be repaid from proceeds |
//! | `SolverFailure` | The swap/position collaborator reported an error |

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by vault engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Fee or deviation parameters outside allowed bounds. Rejected at
    /// configuration time; never reaches the core operations.
    #[error("invalid configuration for '{field}': {message}")]
    ConfigurationInvalid {
        /// Offending configuration field.
        field: String,
        /// What was wrong with it.
        message: String,
    },

    /// An operation referenced an asset that is not part of the vault or not
    /// on the allow-list.
    #[error("asset not recognized: {asset}")]
    AssetNotRecognized {
        /// The unrecognized asset identifier.
        asset: String,
    },

    /// A vault holding is below the amount an operation requires.
    #[error("insufficient balance of {asset}: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Asset identifier.
        asset: String,
        /// Amount the operation required.
        requested: Decimal,
        /// Amount actually held.
        available: Decimal,
    },

    /// A deposit declaration is malformed: a bootstrap deposit missing a
    /// positive amount for a vault asset.
    #[error("invalid deposit for {asset}: {message}")]
    InvalidDeposit {
        /// Asset identifier.
        asset: String,
        /// What was wrong with the declaration.
        message: String,
    },

    /// Computed shares or output amounts fell below a caller-declared minimum.
    #[error("insufficient output on {leg}: expected at least {minimum}, got {actual}")]
    InsufficientOutput {
        /// Which leg failed (asset id, position id, or "shares").
        leg: String,
        /// Caller-declared floor.
        minimum: Decimal,
        /// Computed outcome.
        actual: Decimal,
    },

    /// Post-rebalance total value moved beyond the configured bound.
    #[error("NAV deviation {deviation_bps} bps exceeds bound of {max_bps} bps")]
    DeviationExceeded {
        /// Observed deviation in basis points.
        deviation_bps: Decimal,
        /// Configured maximum in basis points.
        max_bps: u32,
    },

    /// A valuer could not produce a current value. Never silently substituted
    /// with a cached value.
    #[error("stale or missing valuation for {subject}: {message}")]
    StaleOrMissingValuation {
        /// Asset or position identifier.
        subject: String,
        /// Valuer-reported reason.
        message: String,
    },

    /// Rebalance attempted before the cooldown timer elapsed.
    #[error("rebalance cooldown active: {remaining_secs}s remaining")]
    CooldownActive {
        /// Seconds until the next rebalance is permitted.
        remaining_secs: i64,
    },

    /// A flash-borrow taken to unwind a position could not be repaid from the
    /// realized proceeds.
    #[error("flash borrow of {asset} not repaid: owed {owed}, proceeds {available}")]
    BorrowNotRepaid {
        /// Borrowed asset.
        asset: String,
        /// Amount owed (principal plus fee).
        owed: Decimal,
        /// Proceeds available for repayment.
        available: Decimal,
    },

    /// The swap/position collaborator failed to execute.
    #[error("solver failure: {message}")]
    SolverFailure {
        /// Collaborator-reported message.
        message: String,
    },
}

impl EngineError {
    /// Stable machine-readable code for this error kind.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::ConfigurationInvalid { .. } => "CONFIGURATION_INVALID",
            Self::AssetNotRecognized { .. } => "ASSET_NOT_RECOGNIZED",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::InvalidDeposit { .. } => "INVALID_DEPOSIT",
            Self::InsufficientOutput { .. } => "INSUFFICIENT_OUTPUT",
            Self::DeviationExceeded { .. } => "DEVIATION_EXCEEDED",
            Self::StaleOrMissingValuation { .. } => "STALE_OR_MISSING_VALUATION",
            Self::CooldownActive { .. } => "COOLDOWN_ACTIVE",
            Self::BorrowNotRepaid { .. } => "BORROW_NOT_REPAID",
            Self::SolverFailure { .. } => "SOLVER_FAILURE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn reason_codes_are_stable() {
        let err = EngineError::CooldownActive { remaining_secs: 30 };
        assert_eq!(err.reason(), "COOLDOWN_ACTIVE");

        let err = EngineError::DeviationExceeded {
            deviation_bps: dec!(150),
            max_bps: 100,
        };
        assert_eq!(err.reason(), "DEVIATION_EXCEEDED");
    }

    #[test]
    fn display_includes_context() {
        let err = EngineError::InsufficientBalance {
            asset: "WBNB".to_string(),
            requested: dec!(50),
            available: dec!(20),
        };
        let msg = err.to_string();
        assert!(msg.contains("WBNB"));
        assert!(msg.contains("50"));
        assert!(msg.contains("20"));
    }

    #[test]
    fn insufficient_output_display() {
        let err = EngineError::InsufficientOutput {
            leg: "shares".to_string(),
            minimum: dec!(10),
            actual: dec!(9.5),
        };
        assert!(err.to_string().contains("shares"));
    }

    #[test]
    fn errors_are_comparable() {
        let a = EngineError::AssetNotRecognized {
            asset: "DOGE".to_string(),
        };
        let b = EngineError::AssetNotRecognized {
            asset: "DOGE".to_string(),
        };
        assert_eq!(a, b);
    }
}
