// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-day task completion ledger.
//!
//! Wraps the completion tables with the reservation lifecycle used by
//! settlement: reserve, journal the signed mint, then commit or release.
//! Every transition is a single redb write transaction.
//!
//! A reservation with a journaled transaction is never released by age. It
//! leaves the pending state only through the ledger: confirmed, reverted,
//! or found never to have been broadcast.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, info};

use crate::blockchain::SignedTx;
use crate::models::{TokenAmount, UserId};
use crate::storage::{
    AuditEvent, AuditEventType, CompletionStatus, DbError, DbResult, RewardDatabase,
    RewardOutcome, RewardTransaction, SlotClaim, TaskCompletion,
};

/// A held `(user, task, date)` slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub completion: TaskCompletion,
}

impl Reservation {
    pub fn completion_id(&self) -> &str {
        &self.completion.completion_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved(Reservation),
    /// The slot is held by a pending or confirmed completion.
    AlreadyCompleted {
        completion_id: String,
        status: CompletionStatus,
    },
}

#[derive(Clone)]
pub struct TaskLedger {
    db: Arc<RewardDatabase>,
    utc_offset: FixedOffset,
}

impl TaskLedger {
    pub fn new(db: Arc<RewardDatabase>, utc_offset: FixedOffset) -> Self {
        Self { db, utc_offset }
    }

    /// Current calendar day in the ledger's timezone.
    pub fn today(&self) -> NaiveDate {
        self.date_of(Utc::now())
    }

    pub fn date_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.utc_offset).date_naive()
    }

    pub fn try_reserve(
        &self,
        user_id: &UserId,
        task_id: &str,
        date: NaiveDate,
        proof_reference: &str,
        reward_amount: TokenAmount,
    ) -> DbResult<ReserveOutcome> {
        let completion = TaskCompletion::new_pending(
            user_id.clone(),
            task_id.to_string(),
            date,
            proof_reference.to_string(),
            reward_amount,
        );

        match self.db.claim_slot(&completion)? {
            SlotClaim::Claimed(completion) => {
                debug!(
                    user_id = %user_id,
                    task_id = %task_id,
                    completion_id = %completion.completion_id,
                    "Reserved task slot"
                );
                Ok(ReserveOutcome::Reserved(Reservation { completion }))
            }
            SlotClaim::Occupied(holder) => Ok(ReserveOutcome::AlreadyCompleted {
                completion_id: holder.completion_id,
                status: holder.status,
            }),
        }
    }

    /// Journal the signed mint on the reservation, before it is broadcast.
    ///
    /// Fails with `InvalidState` if the reservation was released meanwhile,
    /// in which case the mint must not be sent.
    pub fn attach_transaction(
        &self,
        reservation: &Reservation,
        signed: &SignedTx,
        address: &str,
    ) -> DbResult<RewardTransaction> {
        let tx_id = signed.tx_id.as_str();
        let reward_tx = RewardTransaction::submitted(
            &reservation.completion,
            tx_id.to_string(),
            address.to_string(),
            Some(signed.payload.clone()),
        );
        self.db.record_submission(&reward_tx)?;

        self.db.audit(
            AuditEvent::new(AuditEventType::RewardSubmitted)
                .with_user(reservation.completion.user_id.as_str())
                .with_resource("transaction", tx_id)
                .with_details(json!({
                    "completion_id": reservation.completion_id(),
                    "task_id": reservation.completion.task_id,
                    "amount": reward_tx.amount,
                })),
        );
        Ok(reward_tx)
    }

    /// Settle a submitted completion. `Confirmed` keeps the slot; `Failed`
    /// frees it and records the transaction as reverted.
    pub fn commit(
        &self,
        completion_id: &str,
        tx_id: &str,
        status: CompletionStatus,
        block_number: Option<u64>,
    ) -> DbResult<TaskCompletion> {
        let current = self
            .db
            .get_completion(completion_id)?
            .ok_or_else(|| DbError::NotFound(format!("Completion {completion_id}")))?;
        if current.transaction_id.as_deref() != Some(tx_id) {
            return Err(DbError::InvalidState(format!(
                "Completion {completion_id} is not bound to transaction {tx_id}"
            )));
        }

        let outcome = match status {
            CompletionStatus::Confirmed => RewardOutcome::Confirmed,
            _ => RewardOutcome::Reverted,
        };
        let completion = self
            .db
            .resolve_completion(completion_id, status, outcome, block_number)?;

        let event_type = if status == CompletionStatus::Confirmed {
            AuditEventType::RewardConfirmed
        } else {
            AuditEventType::RewardFailed
        };
        let mut event = AuditEvent::new(event_type)
            .with_user(completion.user_id.as_str())
            .with_resource("transaction", tx_id)
            .with_details(json!({
                "completion_id": completion_id,
                "task_id": completion.task_id,
                "block_number": block_number,
            }));
        if status != CompletionStatus::Confirmed {
            event = event.failed("Reward transaction reverted");
        }
        self.db.audit(event);

        Ok(completion)
    }

    /// Give up on a journaled mint the ledger never received. Frees the slot.
    pub fn drop_unbroadcast(
        &self,
        completion_id: &str,
        tx_id: &str,
        reason: &str,
    ) -> DbResult<TaskCompletion> {
        let current = self
            .db
            .get_completion(completion_id)?
            .ok_or_else(|| DbError::NotFound(format!("Completion {completion_id}")))?;
        if current.transaction_id.as_deref() != Some(tx_id) {
            return Err(DbError::InvalidState(format!(
                "Completion {completion_id} is not bound to transaction {tx_id}"
            )));
        }

        let completion = self.db.resolve_completion(
            completion_id,
            CompletionStatus::Failed,
            RewardOutcome::Dropped,
            None,
        )?;
        self.db.audit(
            AuditEvent::new(AuditEventType::RewardFailed)
                .with_user(completion.user_id.as_str())
                .with_resource("transaction", tx_id)
                .with_details(json!({
                    "completion_id": completion_id,
                    "task_id": completion.task_id,
                    "broadcast": false,
                }))
                .failed(reason),
        );
        Ok(completion)
    }

    /// Mark the transaction's finality as undetermined; the completion stays pending.
    pub fn mark_unknown(&self, completion: &TaskCompletion, tx_id: &str) -> DbResult<()> {
        self.db.mark_reward_outcome(tx_id, RewardOutcome::Unknown)?;
        self.db.audit(
            AuditEvent::new(AuditEventType::RewardUnknown)
                .with_user(completion.user_id.as_str())
                .with_resource("transaction", tx_id)
                .with_details(json!({ "completion_id": completion.completion_id })),
        );
        Ok(())
    }

    /// Abandon a reservation that never reached the ledger.
    pub fn release(&self, reservation: &Reservation, reason: &str) -> DbResult<TaskCompletion> {
        let completion = release_unsubmitted(&self.db, reservation.completion_id())?;
        self.db.audit(
            AuditEvent::new(AuditEventType::ReservationReleased)
                .with_user(completion.user_id.as_str())
                .with_resource("completion", completion.completion_id.as_str())
                .failed(reason),
        );
        Ok(completion)
    }

    /// Release pending reservations older than `max_age` that have no
    /// journaled transaction. Returns how many were released.
    pub fn sweep_stale(&self, max_age: Duration) -> DbResult<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| DbError::InvalidState(format!("Invalid sweep age: {e}")))?;
        let cutoff = Utc::now() - max_age;

        let mut released = 0;
        for completion in self.db.list_pending_completions()? {
            if completion.reserved_at > cutoff {
                // Oldest first
                break;
            }
            if completion.transaction_id.is_some() {
                continue;
            }

            match release_unsubmitted(&self.db, &completion.completion_id) {
                Ok(_) => {
                    released += 1;
                    self.db.audit(
                        AuditEvent::new(AuditEventType::ReservationSwept)
                            .with_user(completion.user_id.as_str())
                            .with_resource("completion", completion.completion_id.as_str())
                            .with_details(json!({
                                "task_id": completion.task_id,
                                "reserved_at": completion.reserved_at,
                            })),
                    );
                }
                // Submitted or settled since the scan
                Err(DbError::InvalidState(reason)) => {
                    debug!(completion_id = %completion.completion_id, %reason, "Skipping sweep");
                }
                Err(e) => return Err(e),
            }
        }

        if released > 0 {
            info!(released, "Released stale reservations");
        }
        Ok(released)
    }

    /// Pending completions with a journaled mint, oldest first.
    pub fn submitted_pending(&self) -> DbResult<Vec<TaskCompletion>> {
        Ok(self
            .db
            .list_pending_completions()?
            .into_iter()
            .filter(|c| c.transaction_id.is_some())
            .collect())
    }

    /// All completions of a user, newest first.
    pub fn history(&self, user_id: &UserId) -> DbResult<Vec<TaskCompletion>> {
        self.db.list_user_completions(user_id)
    }

    /// Completions of a user on one calendar day, newest first.
    pub fn completions_on(&self, user_id: &UserId, date: NaiveDate) -> DbResult<Vec<TaskCompletion>> {
        Ok(self
            .history(user_id)?
            .into_iter()
            .filter(|c| c.date == date)
            .collect())
    }

    pub fn get(&self, completion_id: &str) -> DbResult<Option<TaskCompletion>> {
        self.db.get_completion(completion_id)
    }

    /// Append an audit event; failures are logged, never returned.
    pub fn audit(&self, event: AuditEvent) {
        self.db.audit(event);
    }

    pub fn reward_transaction(&self, tx_id: &str) -> DbResult<Option<RewardTransaction>> {
        self.db.get_reward_tx(tx_id)
    }
}

fn release_unsubmitted(db: &RewardDatabase, completion_id: &str) -> DbResult<TaskCompletion> {
    db.update_completion(completion_id, |c| {
        if c.status != CompletionStatus::Pending {
            return Err(DbError::InvalidState(format!(
                "Completion {} is already {:?}",
                c.completion_id, c.status
            )));
        }
        if let Some(tx_id) = &c.transaction_id {
            return Err(DbError::InvalidState(format!(
                "Completion {} has submitted transaction {tx_id}",
                c.completion_id
            )));
        }
        c.status = CompletionStatus::Failed;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::temp_db;

    fn ledger() -> (TaskLedger, tempfile::TempDir) {
        let (db, dir) = temp_db();
        let utc = FixedOffset::east_opt(0).unwrap();
        (TaskLedger::new(Arc::new(db), utc), dir)
    }

    fn reserve(ledger: &TaskLedger, user: &str, task: &str, date: NaiveDate) -> ReserveOutcome {
        ledger
            .try_reserve(&UserId::from(user), task, date, "proof://x", TokenAmount::from(10u64))
            .unwrap()
    }

    fn signed(tx_id: &str) -> SignedTx {
        SignedTx {
            tx_id: tx_id.to_string(),
            payload: format!("raw-{tx_id}"),
        }
    }

    fn reserved(outcome: ReserveOutcome) -> Reservation {
        match outcome {
            ReserveOutcome::Reserved(r) => r,
            other => panic!("expected reservation, got {other:?}"),
        }
    }

    #[test]
    fn reserve_then_duplicate_is_already_completed() {
        let (ledger, _dir) = ledger();
        let today = ledger.today();
        let first = reserved(reserve(&ledger, "u1", "poll-survey", today));

        match reserve(&ledger, "u1", "poll-survey", today) {
            ReserveOutcome::AlreadyCompleted {
                completion_id,
                status,
            } => {
                assert_eq!(completion_id, first.completion_id());
                assert_eq!(status, CompletionStatus::Pending);
            }
            other => panic!("expected AlreadyCompleted, got {other:?}"),
        }
    }

    #[test]
    fn confirmed_commit_keeps_slot() {
        let (ledger, _dir) = ledger();
        let today = ledger.today();
        let r = reserved(reserve(&ledger, "u1", "poll-survey", today));
        ledger.attach_transaction(&r, &signed("0x01"), "0xabc").unwrap();

        let done = ledger
            .commit(r.completion_id(), "0x01", CompletionStatus::Confirmed, Some(7))
            .unwrap();
        assert_eq!(done.status, CompletionStatus::Confirmed);

        assert!(matches!(
            reserve(&ledger, "u1", "poll-survey", today),
            ReserveOutcome::AlreadyCompleted {
                status: CompletionStatus::Confirmed,
                ..
            }
        ));
        let tx = ledger.reward_transaction("0x01").unwrap().unwrap();
        assert_eq!(tx.outcome, RewardOutcome::Confirmed);
    }

    #[test]
    fn failed_commit_frees_slot() {
        let (ledger, _dir) = ledger();
        let today = ledger.today();
        let r = reserved(reserve(&ledger, "u1", "poll-survey", today));
        ledger.attach_transaction(&r, &signed("0x01"), "0xabc").unwrap();
        ledger
            .commit(r.completion_id(), "0x01", CompletionStatus::Failed, Some(7))
            .unwrap();

        assert!(matches!(
            reserve(&ledger, "u1", "poll-survey", today),
            ReserveOutcome::Reserved(_)
        ));
        assert_eq!(
            ledger.reward_transaction("0x01").unwrap().unwrap().outcome,
            RewardOutcome::Reverted
        );
    }

    #[test]
    fn second_commit_is_rejected() {
        let (ledger, _dir) = ledger();
        let r = reserved(reserve(&ledger, "u1", "poll-survey", ledger.today()));
        ledger.attach_transaction(&r, &signed("0x01"), "0xabc").unwrap();
        ledger
            .commit(r.completion_id(), "0x01", CompletionStatus::Confirmed, Some(7))
            .unwrap();

        let again = ledger.commit(r.completion_id(), "0x01", CompletionStatus::Confirmed, Some(7));
        assert!(matches!(again, Err(DbError::InvalidState(_))));
    }

    #[test]
    fn journaled_payload_is_kept_and_drop_frees_slot() {
        let (ledger, _dir) = ledger();
        let today = ledger.today();
        let r = reserved(reserve(&ledger, "u1", "poll-survey", today));
        ledger.attach_transaction(&r, &signed("0x01"), "0xabc").unwrap();
        assert_eq!(
            ledger.reward_transaction("0x01").unwrap().unwrap().signed_payload.as_deref(),
            Some("raw-0x01")
        );

        assert!(matches!(
            ledger.drop_unbroadcast(r.completion_id(), "0x02", "never sent"),
            Err(DbError::InvalidState(_))
        ));
        let dropped = ledger
            .drop_unbroadcast(r.completion_id(), "0x01", "never sent")
            .unwrap();
        assert_eq!(dropped.status, CompletionStatus::Failed);
        assert_eq!(
            ledger.reward_transaction("0x01").unwrap().unwrap().outcome,
            RewardOutcome::Dropped
        );
        assert!(matches!(
            reserve(&ledger, "u1", "poll-survey", today),
            ReserveOutcome::Reserved(_)
        ));
    }

    #[test]
    fn attach_after_release_is_refused() {
        let (ledger, _dir) = ledger();
        let r = reserved(reserve(&ledger, "u1", "poll-survey", ledger.today()));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(ledger.sweep_stale(Duration::ZERO).unwrap(), 1);

        let result = ledger.attach_transaction(&r, &signed("0x01"), "0xabc");
        assert!(matches!(result, Err(DbError::InvalidState(_))));
        assert!(ledger.reward_transaction("0x01").unwrap().is_none());
    }

    #[test]
    fn commit_requires_matching_transaction() {
        let (ledger, _dir) = ledger();
        let r = reserved(reserve(&ledger, "u1", "poll-survey", ledger.today()));
        let result = ledger.commit(r.completion_id(), "0x99", CompletionStatus::Confirmed, None);
        assert!(matches!(result, Err(DbError::InvalidState(_))));
    }

    #[test]
    fn release_refuses_submitted_reservation() {
        let (ledger, _dir) = ledger();
        let today = ledger.today();
        let r = reserved(reserve(&ledger, "u1", "poll-survey", today));
        ledger.attach_transaction(&r, &signed("0x01"), "0xabc").unwrap();

        assert!(matches!(
            ledger.release(&r, "test"),
            Err(DbError::InvalidState(_))
        ));

        let other = reserved(reserve(&ledger, "u1", "medium-blog", today));
        let released = ledger.release(&other, "provisioning failed").unwrap();
        assert_eq!(released.status, CompletionStatus::Failed);
    }

    #[test]
    fn sweep_releases_only_stale_unsubmitted() {
        let (ledger, _dir) = ledger();
        let today = ledger.today();
        let stale = reserved(reserve(&ledger, "u1", "poll-survey", today));
        let submitted = reserved(reserve(&ledger, "u1", "medium-blog", today));
        ledger.attach_transaction(&submitted, &signed("0x01"), "0xabc").unwrap();

        std::thread::sleep(Duration::from_millis(20));
        let fresh = reserved(reserve(&ledger, "u2", "poll-survey", today));

        let released = ledger.sweep_stale(Duration::from_millis(10)).unwrap();
        assert_eq!(released, 1);

        assert_eq!(
            ledger.get(stale.completion_id()).unwrap().unwrap().status,
            CompletionStatus::Failed
        );
        assert_eq!(
            ledger.get(submitted.completion_id()).unwrap().unwrap().status,
            CompletionStatus::Pending
        );
        assert_eq!(
            ledger.get(fresh.completion_id()).unwrap().unwrap().status,
            CompletionStatus::Pending
        );
        assert_eq!(ledger.submitted_pending().unwrap().len(), 1);
    }

    #[test]
    fn completions_on_filters_by_day() {
        let (ledger, _dir) = ledger();
        let today = ledger.today();
        let yesterday = today.pred_opt().unwrap();
        reserve(&ledger, "u1", "poll-survey", yesterday);
        reserve(&ledger, "u1", "poll-survey", today);

        let user = UserId::from("u1");
        assert_eq!(ledger.history(&user).unwrap().len(), 2);
        let todays = ledger.completions_on(&user, today).unwrap();
        assert_eq!(todays.len(), 1);
        assert_eq!(todays[0].date, today);
    }

    #[test]
    fn date_uses_configured_offset() {
        let (db, _dir) = temp_db();
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let ledger = TaskLedger::new(Arc::new(db), plus_two);

        let late_utc = DateTime::parse_from_rfc3339("2026-03-01T23:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            ledger.date_of(late_utc),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
        );
    }
}
