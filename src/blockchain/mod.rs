// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger integration.
//!
//! This module provides:
//! - The [`LedgerClient`] adapter trait and its finality polling
//! - An EVM implementation over JSON-RPC (alloy)
//! - An in-process ledger for tests and the `dev` feature

pub mod client;
pub mod evm;
#[cfg(any(test, feature = "dev"))]
pub mod memory;
pub mod reward_token;
pub mod signing;
pub mod types;

pub use client::{LedgerClient, LedgerError, SubmissionJournal};
pub use evm::{EvmLedgerClient, EvmLedgerConfig};
#[cfg(any(test, feature = "dev"))]
pub use memory::{InMemoryLedger, LedgerOp};
pub use types::*;
