// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Reward settlement: the engine, balance reads and background reconciliation.

pub mod balance;
pub mod engine;
pub mod error;
pub mod reconciler;

pub use balance::{BalanceReader, UserBalance};
pub use engine::{RewardSettlementEngine, SettlementConfig, SettlementReceipt};
pub use error::SettlementError;
pub use reconciler::{Reconciler, DEFAULT_RECONCILE_INTERVAL};
