// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custodial account records.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable, ReadableTableMetadata};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{DbError, DbResult, RewardDatabase, ACCOUNTS};
use crate::blockchain::SignedTx;
use crate::custody::KeyMaterial;
use crate::models::UserId;

/// Provisioning progress of a custodial account.
///
/// A user without a record is implicitly `Absent`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    /// Key sealed and funding transaction signed; funding not final yet
    Funding,
    /// Account exists on the ledger; its token vault is not open yet
    AccountCreated,
    /// Account and vault are both ready to receive rewards
    VaultReady,
}

/// Custodial account held on behalf of a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustodialAccount {
    pub user_id: UserId,
    /// Ledger address (immutable once assigned)
    pub address: String,
    /// Public key and encrypted private key
    pub key_material: KeyMaterial,
    pub state: ProvisioningState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Transaction that created (funded) the account
    pub funding_tx_id: String,
    /// Signed funding transaction, kept until funding is final
    #[serde(default)]
    pub funding_payload: Option<String>,
    /// Transaction that opened the vault
    #[serde(default)]
    pub vault_tx_id: Option<String>,
}

impl CustodialAccount {
    /// Record for a key whose funding transaction is signed but not final.
    pub fn funding(
        user_id: UserId,
        address: String,
        key_material: KeyMaterial,
        signed: &SignedTx,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            address,
            key_material,
            state: ProvisioningState::Funding,
            created_at: now,
            updated_at: now,
            funding_tx_id: signed.tx_id.clone(),
            funding_payload: Some(signed.payload.clone()),
            vault_tx_id: None,
        }
    }

    pub fn vault_initialized(&self) -> bool {
        self.state == ProvisioningState::VaultReady
    }
}

impl RewardDatabase {
    pub fn get_account(&self, user_id: &UserId) -> DbResult<Option<CustodialAccount>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS)?;
        match table.get(user_id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Insert the account unless the user already has one.
    ///
    /// Returns the stored record: the new one, or the existing one untouched.
    pub fn insert_account_if_absent(
        &self,
        account: &CustodialAccount,
    ) -> DbResult<CustodialAccount> {
        let write_txn = self.db.begin_write()?;
        let existing = {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            let existing_bytes = table
                .get(account.user_id.as_str())?
                .map(|v| v.value().to_vec());
            match existing_bytes {
                Some(bytes) => Some(serde_json::from_slice::<CustodialAccount>(&bytes)?),
                None => {
                    let json = serde_json::to_vec(account)?;
                    table.insert(account.user_id.as_str(), json.as_slice())?;
                    None
                }
            }
        };

        match existing {
            Some(stored) => {
                write_txn.abort()?;
                Ok(stored)
            }
            None => {
                write_txn.commit()?;
                Ok(account.clone())
            }
        }
    }

    /// Read-modify-write one account. `apply` returns whether it changed
    /// anything; unchanged records are not rewritten.
    fn update_account<F>(&self, user_id: &UserId, apply: F) -> DbResult<CustodialAccount>
    where
        F: FnOnce(&mut CustodialAccount) -> DbResult<bool>,
    {
        let write_txn = self.db.begin_write()?;
        let account = {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            let existing_bytes = table
                .get(user_id.as_str())?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| DbError::NotFound(format!("Account for {user_id}")))?;

            let mut account: CustodialAccount = serde_json::from_slice(&existing_bytes)?;
            if apply(&mut account)? {
                account.updated_at = Utc::now();
                let json = serde_json::to_vec(&account)?;
                table.insert(user_id.as_str(), json.as_slice())?;
            }
            account
        };
        write_txn.commit()?;
        Ok(account)
    }

    /// Move a funding account to `AccountCreated` once `tx_id` is final.
    /// Idempotent for accounts that are already past funding.
    pub fn mark_account_funded(&self, user_id: &UserId, tx_id: &str) -> DbResult<CustodialAccount> {
        self.update_account(user_id, |account| {
            if account.state != ProvisioningState::Funding {
                return Ok(false);
            }
            if account.funding_tx_id != tx_id {
                return Err(DbError::InvalidState(format!(
                    "Account of {} is funded by {}, not {tx_id}",
                    account.user_id, account.funding_tx_id
                )));
            }
            account.state = ProvisioningState::AccountCreated;
            account.funding_payload = None;
            Ok(true)
        })
    }

    /// Journal a new funding transaction for the same key, replacing one
    /// that never landed. Only valid while funding.
    pub fn replace_funding_tx(&self, user_id: &UserId, signed: &SignedTx) -> DbResult<CustodialAccount> {
        self.update_account(user_id, |account| {
            if account.state != ProvisioningState::Funding {
                return Err(DbError::InvalidState(format!(
                    "Account of {} is {:?}, funding is settled",
                    account.user_id, account.state
                )));
            }
            account.funding_tx_id = signed.tx_id.clone();
            account.funding_payload = Some(signed.payload.clone());
            Ok(true)
        })
    }

    /// Move an account to `VaultReady`. Idempotent.
    ///
    /// `vault_tx_id` is `None` when the vault was observed on the ledger
    /// rather than opened by a transaction we tracked.
    pub fn mark_vault_ready(
        &self,
        user_id: &UserId,
        vault_tx_id: Option<&str>,
    ) -> DbResult<CustodialAccount> {
        self.update_account(user_id, |account| match account.state {
            ProvisioningState::VaultReady => Ok(false),
            ProvisioningState::Funding => Err(DbError::InvalidState(format!(
                "Account of {} is not funded yet",
                account.user_id
            ))),
            ProvisioningState::AccountCreated => {
                account.state = ProvisioningState::VaultReady;
                account.vault_tx_id = vault_tx_id.map(str::to_string);
                Ok(true)
            }
        })
    }

    pub fn count_accounts(&self) -> DbResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS)?;
        Ok(table.len()?)
    }
}
