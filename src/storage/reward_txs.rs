// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Reward (mint) transaction records.
//!
//! Each record belongs to exactly one completion. Recording a submission and
//! resolving it update both rows in one write transaction.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::completions::{update_completion_in, CompletionStatus, TaskCompletion};
use super::database::{DbError, DbResult, RewardDatabase, REWARD_TRANSACTIONS};
use crate::models::{TokenAmount, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RewardOutcome {
    /// Accepted by the node, not yet final
    Submitted,
    Confirmed,
    Reverted,
    /// Finality could not be determined before the deadline
    Unknown,
    /// Signed and journaled, but the ledger never received it
    Dropped,
}

/// A mint transaction, recorded once signed and before it is broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct RewardTransaction {
    pub transaction_id: String,
    pub user_id: UserId,
    pub completion_id: String,
    /// Recipient account
    pub address: String,
    pub amount: TokenAmount,
    pub submitted_at: DateTime<Utc>,
    /// Encoded signed transaction, kept so it can be broadcast again
    #[serde(default)]
    pub signed_payload: Option<String>,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
    pub outcome: RewardOutcome,
    #[serde(default)]
    pub block_number: Option<u64>,
}

impl RewardTransaction {
    pub fn submitted(
        completion: &TaskCompletion,
        transaction_id: String,
        address: String,
        signed_payload: Option<String>,
    ) -> Self {
        Self {
            transaction_id,
            user_id: completion.user_id.clone(),
            completion_id: completion.completion_id.clone(),
            address,
            amount: completion.reward_amount,
            submitted_at: Utc::now(),
            signed_payload,
            confirmed_at: None,
            outcome: RewardOutcome::Submitted,
            block_number: None,
        }
    }
}

impl RewardDatabase {
    /// Attach a signed transaction to its pending completion.
    pub fn record_submission(&self, reward_tx: &RewardTransaction) -> DbResult<TaskCompletion> {
        let write_txn = self.db.begin_write()?;
        let completion = update_completion_in(&write_txn, &reward_tx.completion_id, |c| {
            if c.status != CompletionStatus::Pending {
                return Err(DbError::InvalidState(format!(
                    "Completion {} is {:?}, cannot attach a transaction",
                    c.completion_id, c.status
                )));
            }
            if let Some(existing) = &c.transaction_id {
                if existing != &reward_tx.transaction_id {
                    return Err(DbError::InvalidState(format!(
                        "Completion {} already has transaction {existing}",
                        c.completion_id
                    )));
                }
            }
            c.transaction_id = Some(reward_tx.transaction_id.clone());
            Ok(())
        })?;
        {
            let mut table = write_txn.open_table(REWARD_TRANSACTIONS)?;
            let json = serde_json::to_vec(reward_tx)?;
            table.insert(reward_tx.transaction_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(completion)
    }

    /// Settle a completion and its transaction to their final states.
    ///
    /// `status` must be `Confirmed` or `Failed`; `Failed` frees the slot.
    /// A completion that is already final is left untouched and rejected.
    pub fn resolve_completion(
        &self,
        completion_id: &str,
        status: CompletionStatus,
        outcome: RewardOutcome,
        block_number: Option<u64>,
    ) -> DbResult<TaskCompletion> {
        if status == CompletionStatus::Pending {
            return Err(DbError::InvalidState(
                "Resolution status must be final".to_string(),
            ));
        }

        let now = Utc::now();
        let write_txn = self.db.begin_write()?;
        let completion = update_completion_in(&write_txn, completion_id, |c| {
            c.status = status;
            if status == CompletionStatus::Confirmed {
                c.completed_at = Some(now);
            }
            Ok(())
        })?;

        if let Some(tx_id) = &completion.transaction_id {
            let mut table = write_txn.open_table(REWARD_TRANSACTIONS)?;
            let existing_bytes = table.get(tx_id.as_str())?.map(|v| v.value().to_vec());
            if let Some(bytes) = existing_bytes {
                let mut reward_tx: RewardTransaction = serde_json::from_slice(&bytes)?;
                reward_tx.outcome = outcome;
                reward_tx.block_number = block_number;
                if outcome == RewardOutcome::Confirmed {
                    reward_tx.confirmed_at = Some(now);
                }
                let json = serde_json::to_vec(&reward_tx)?;
                table.insert(tx_id.as_str(), json.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(completion)
    }

    /// Record a non-final outcome (`Unknown`) for a transaction.
    pub fn mark_reward_outcome(&self, tx_id: &str, outcome: RewardOutcome) -> DbResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(REWARD_TRANSACTIONS)?;
            let existing_bytes = table
                .get(tx_id)?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| DbError::NotFound(format!("Reward transaction {tx_id}")))?;

            let mut reward_tx: RewardTransaction = serde_json::from_slice(&existing_bytes)?;
            reward_tx.outcome = outcome;
            let json = serde_json::to_vec(&reward_tx)?;
            table.insert(tx_id, json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_reward_tx(&self, tx_id: &str) -> DbResult<Option<RewardTransaction>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REWARD_TRANSACTIONS)?;
        match table.get(tx_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }
}
