//! Deterministic share accounting and rebalancing engine for pooled
//! multi-asset vaults.
//!
//! Depositors put multiple assets into a shared vault and receive fungible
//! shares priced by the scarcest-ratio rule; withdrawals redeem shares for
//! the pro-rata slice of every holding, unwinding external positions when
//! needed. A manager reallocates the vault through opaque routing payloads
//! under a NAV deviation guard, and management/performance/entry/exit fees
//! accrue as share mints.
//!
//! Market access is abstracted behind capability traits ([`valuation::AssetValuer`],
//! [`rebalance::SwapCapability`], [`settlement::PositionCapability`],
//! [`settlement::FlashLender`]); the [`mock`] module provides an in-memory
//! implementation of the full stack.

pub mod accounting;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fees;
pub mod mock;
pub mod rebalance;
pub mod settlement;
pub mod telemetry;
pub mod valuation;

pub use config::{load_config, EngineConfig};
pub use domain::{Amount, AssetId, AssetKind, BasisPoints, PositionId, Value, VaultState};
pub use engine::{DepositReceipt, VaultEngine};
pub use error::EngineError;
pub use rebalance::{BuyLeg, EntryCheck, RebalanceIntent, RoutingPayload};
pub use settlement::{SettledWithdrawal, WithdrawalRequest};
