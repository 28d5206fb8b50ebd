// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Task completion records and the per-day uniqueness constraint.
//!
//! A completion occupies its `(user, task, date)` slot in `active_slots`
//! from reservation until it is marked failed. The slot is claimed and
//! checked in the same write transaction, so two concurrent reservations
//! for one key cannot both succeed.

use chrono::{DateTime, NaiveDate, Utc};
use redb::{ReadableDatabase, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{
    user_index_key, user_prefix, user_prefix_end, DbError, DbResult, RewardDatabase,
    ACTIVE_SLOTS, COMPLETIONS, PENDING_COMPLETIONS, USER_COMPLETION_INDEX,
};
use crate::models::{TokenAmount, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// Reserved; reward not yet known to be final
    Pending,
    /// Reward minted and final
    Confirmed,
    /// Abandoned or reverted; the slot is free again
    Failed,
}

/// One attempt to complete a task on a given day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct TaskCompletion {
    pub completion_id: String,
    pub user_id: UserId,
    pub task_id: String,
    /// Ledger-local calendar day
    pub date: NaiveDate,
    pub reserved_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Reference to the evidence the verdict was based on
    pub proof_reference: String,
    /// Reward in token base units
    pub reward_amount: TokenAmount,
    /// Mint transaction, once submitted
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub status: CompletionStatus,
}

impl TaskCompletion {
    pub fn new_pending(
        user_id: UserId,
        task_id: String,
        date: NaiveDate,
        proof_reference: String,
        reward_amount: TokenAmount,
    ) -> Self {
        Self {
            completion_id: uuid::Uuid::new_v4().to_string(),
            user_id,
            task_id,
            date,
            reserved_at: Utc::now(),
            completed_at: None,
            proof_reference,
            reward_amount,
            transaction_id: None,
            status: CompletionStatus::Pending,
        }
    }

    pub(super) fn slot_key(&self) -> String {
        slot_key(&self.user_id, &self.task_id, self.date)
    }
}

/// Result of trying to claim a `(user, task, date)` slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotClaim {
    /// The slot was free; the pending completion has been stored
    Claimed(TaskCompletion),
    /// The slot is held by this existing pending or confirmed completion
    Occupied(TaskCompletion),
}

/// Task ids never contain `|`, so the key is unambiguous from the right.
pub(super) fn slot_key(user_id: &UserId, task_id: &str, date: NaiveDate) -> String {
    format!("{}|{}|{}", user_id, task_id, date.format("%Y-%m-%d"))
}

fn read_completion<T>(table: &T, completion_id: &str) -> DbResult<Option<TaskCompletion>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(completion_id)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

/// Read-modify-write one completion inside `write_txn`, keeping the slot and
/// pending indexes consistent with the new status. Only pending completions
/// can be changed; confirmed and failed rows are final.
pub(super) fn update_completion_in<F>(
    write_txn: &WriteTransaction,
    completion_id: &str,
    update: F,
) -> DbResult<TaskCompletion>
where
    F: FnOnce(&mut TaskCompletion) -> DbResult<()>,
{
    let mut rows = write_txn.open_table(COMPLETIONS)?;
    let mut completion = read_completion(&rows, completion_id)?
        .ok_or_else(|| DbError::NotFound(format!("Completion {completion_id}")))?;
    if completion.status != CompletionStatus::Pending {
        return Err(DbError::InvalidState(format!(
            "Completion {completion_id} is already {:?}",
            completion.status
        )));
    }

    update(&mut completion)?;

    if completion.status != CompletionStatus::Pending {
        let mut pending = write_txn.open_table(PENDING_COMPLETIONS)?;
        pending.remove(completion_id)?;

        if completion.status == CompletionStatus::Failed {
            let mut slots = write_txn.open_table(ACTIVE_SLOTS)?;
            let key = completion.slot_key();
            let holder = slots.get(key.as_str())?.map(|v| v.value().to_string());
            if holder.as_deref() == Some(completion_id) {
                slots.remove(key.as_str())?;
            }
        }
    }

    let json = serde_json::to_vec(&completion)?;
    rows.insert(completion_id, json.as_slice())?;
    Ok(completion)
}

impl RewardDatabase {
    /// Atomically claim the completion's slot, or report who holds it.
    pub fn claim_slot(&self, completion: &TaskCompletion) -> DbResult<SlotClaim> {
        let key = completion.slot_key();
        let write_txn = self.db.begin_write()?;
        let holder = {
            let mut slots = write_txn.open_table(ACTIVE_SLOTS)?;
            let mut rows = write_txn.open_table(COMPLETIONS)?;

            let existing_id = slots.get(key.as_str())?.map(|v| v.value().to_string());
            match existing_id {
                Some(id) => Some(read_completion(&rows, &id)?.ok_or_else(|| {
                    DbError::InvalidState(format!("Slot {key} points at missing completion {id}"))
                })?),
                None => {
                    let json = serde_json::to_vec(completion)?;
                    slots.insert(key.as_str(), completion.completion_id.as_str())?;
                    rows.insert(completion.completion_id.as_str(), json.as_slice())?;

                    let mut index = write_txn.open_table(USER_COMPLETION_INDEX)?;
                    let index_key = user_index_key(
                        completion.user_id.as_str(),
                        completion.reserved_at.timestamp_millis(),
                        &completion.completion_id,
                    );
                    index.insert(index_key.as_slice(), completion.completion_id.as_str())?;

                    let mut pending = write_txn.open_table(PENDING_COMPLETIONS)?;
                    pending.insert(
                        completion.completion_id.as_str(),
                        completion.reserved_at.timestamp_millis(),
                    )?;
                    None
                }
            }
        };

        match holder {
            Some(existing) => {
                write_txn.abort()?;
                Ok(SlotClaim::Occupied(existing))
            }
            None => {
                write_txn.commit()?;
                Ok(SlotClaim::Claimed(completion.clone()))
            }
        }
    }

    pub fn get_completion(&self, completion_id: &str) -> DbResult<Option<TaskCompletion>> {
        let read_txn = self.db.begin_read()?;
        let rows = read_txn.open_table(COMPLETIONS)?;
        read_completion(&rows, completion_id)
    }

    /// Apply `update` to a completion and persist it.
    pub fn update_completion<F>(&self, completion_id: &str, update: F) -> DbResult<TaskCompletion>
    where
        F: FnOnce(&mut TaskCompletion) -> DbResult<()>,
    {
        let write_txn = self.db.begin_write()?;
        let completion = update_completion_in(&write_txn, completion_id, update)?;
        write_txn.commit()?;
        Ok(completion)
    }

    /// All completions of a user, newest reservation first.
    pub fn list_user_completions(&self, user_id: &UserId) -> DbResult<Vec<TaskCompletion>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(USER_COMPLETION_INDEX)?;
        let rows = read_txn.open_table(COMPLETIONS)?;

        let prefix = user_prefix(user_id.as_str());
        let prefix_end = user_prefix_end(user_id.as_str());

        let mut results = Vec::new();
        for entry in index.range(prefix.as_slice()..prefix_end.as_slice())? {
            let (_, completion_id) = entry?;
            if let Some(completion) = read_completion(&rows, completion_id.value())? {
                // A user id containing `|` can share another user's prefix
                if &completion.user_id == user_id {
                    results.push(completion);
                }
            }
        }
        Ok(results)
    }

    /// Every pending completion, oldest reservation first.
    pub fn list_pending_completions(&self) -> DbResult<Vec<TaskCompletion>> {
        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(PENDING_COMPLETIONS)?;
        let rows = read_txn.open_table(COMPLETIONS)?;

        let mut results = Vec::new();
        for entry in pending.iter()? {
            let (completion_id, _) = entry?;
            if let Some(completion) = read_completion(&rows, completion_id.value())? {
                results.push(completion);
            }
        }
        results.sort_by_key(|c| c.reserved_at);
        Ok(results)
    }
}
