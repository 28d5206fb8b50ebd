// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Vault balance reads.

use std::sync::Arc;

use tracing::debug;

use super::error::SettlementError;
use crate::blockchain::LedgerClient;
use crate::models::{TokenAmount, UserId};
use crate::storage::{BalanceCache, RewardDatabase};

/// Balance of a user's vault together with the account it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserBalance {
    /// `None` when the user has no custodial account yet
    pub address: Option<String>,
    pub balance: TokenAmount,
}

pub struct BalanceReader {
    db: Arc<RewardDatabase>,
    ledger: Arc<dyn LedgerClient>,
    cache: BalanceCache,
}

impl BalanceReader {
    pub fn new(db: Arc<RewardDatabase>, ledger: Arc<dyn LedgerClient>, cache: BalanceCache) -> Self {
        Self { db, ledger, cache }
    }

    /// Balance of a user. A user without an account holds zero; a failed
    /// ledger read is an error, never zero.
    pub async fn get_balance(&self, user_id: &UserId) -> Result<UserBalance, SettlementError> {
        let Some(account) = self.db.get_account(user_id)? else {
            return Ok(UserBalance {
                address: None,
                balance: TokenAmount::ZERO,
            });
        };

        let balance = self.balance_of_address(&account.address).await?;
        Ok(UserBalance {
            address: Some(account.address),
            balance,
        })
    }

    /// Cached balance of an address, read from the ledger on a miss.
    pub async fn balance_of_address(&self, address: &str) -> Result<TokenAmount, SettlementError> {
        if let Some(balance) = self.cache.get(address) {
            debug!(address = %address, "Balance cache hit");
            return Ok(balance);
        }

        let reading = self
            .ledger
            .query_balance(address)
            .await
            .map_err(|e| SettlementError::BalanceUnavailable(e.to_string()))?;
        let balance = TokenAmount::from_base_units(reading.amount());
        self.cache.put(address, balance);
        Ok(balance)
    }

    pub fn invalidate(&self, address: &str) {
        self.cache.invalidate(address);
    }
}
