// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger types and network defaults.

use std::time::Duration;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// EVM network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: String,
    /// Chain ID
    pub chain_id: u64,
    /// RPC endpoint URL
    pub rpc_url: String,
    /// Block explorer URL
    pub explorer_url: String,
}

/// Avalanche Fuji Testnet, the default deployment target.
pub const FUJI_NAME: &str = "Avalanche Fuji Testnet";
pub const FUJI_CHAIN_ID: u64 = 43113;
pub const FUJI_RPC_URL: &str = "https://api.avax-test.network/ext/bc/C/rpc";
pub const FUJI_EXPLORER_URL: &str = "https://testnet.snowtrace.io";

impl NetworkConfig {
    pub fn fuji() -> Self {
        Self {
            name: FUJI_NAME.to_string(),
            chain_id: FUJI_CHAIN_ID,
            rpc_url: FUJI_RPC_URL.to_string(),
            explorer_url: FUJI_EXPLORER_URL.to_string(),
        }
    }

    /// Explorer link for a transaction.
    pub fn tx_url(&self, tx_id: &str) -> String {
        format!("{}/tx/{}", self.explorer_url.trim_end_matches('/'), tx_id)
    }
}

/// Result of submitting an account-creation transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTx {
    pub tx_id: String,
    /// Ledger address of the new account
    pub address: String,
}

/// A transaction signed locally but not necessarily broadcast yet.
///
/// The id is the transaction hash, known before anything leaves the
/// process. `payload` is the encoded signed transaction; broadcasting it
/// again can never produce a second, different transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub tx_id: String,
    pub payload: String,
}

/// Point-in-time status of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// The node has never seen the transaction
    NotFound,
    /// Known to the node, not yet included
    Pending,
    Confirmed { block_number: u64 },
    Reverted { block_number: u64 },
}

/// Outcome of waiting for a transaction to become final.
///
/// `Unknown` means the deadline passed without a definitive answer. It is
/// never a success and never a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FinalityOutcome {
    Confirmed { block_number: u64 },
    Reverted { block_number: u64 },
    Unknown,
}

impl FinalityOutcome {
    pub fn from_status(status: TxStatus) -> Option<Self> {
        match status {
            TxStatus::NotFound | TxStatus::Pending => None,
            TxStatus::Confirmed { block_number } => Some(Self::Confirmed { block_number }),
            TxStatus::Reverted { block_number } => Some(Self::Reverted { block_number }),
        }
    }
}

/// How long to wait for finality and how often to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalityPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for FinalityPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(45),
            poll_interval: Duration::from_millis(1500),
        }
    }
}

/// Result of a vault balance query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceReading {
    /// The account verifiably has no token vault
    NoVault,
    /// Vault balance in token base units
    Balance(U256),
}

impl BalanceReading {
    /// Balance in base units; an account without a vault holds nothing.
    pub fn amount(&self) -> U256 {
        match self {
            BalanceReading::NoVault => U256::ZERO,
            BalanceReading::Balance(amount) => *amount,
        }
    }
}
