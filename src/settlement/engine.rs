// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Reward settlement orchestration.
//!
//! ```text
//! verify proof ─▶ reserve slot ─▶ ensure account ─▶ sign mint ─▶ journal tx ─▶ broadcast
//!                                                                               │
//!                     ┌──────────────────── await finality ◀────────────────────┘
//!                     ▼
//!   Confirmed: commit, refresh balance   Reverted: commit Failed (slot freed)
//!   Unknown:   leave pending for the reconciler
//! ```
//!
//! Every failure before the journal entry releases the reservation, and a
//! reservation released by the stale sweep refuses the journal entry, so
//! its mint is never sent. Once a transaction id is journaled the slot is
//! only freed by the ledger: a revert, or proof that the signed
//! transaction never reached it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::balance::{BalanceReader, UserBalance};
use super::error::SettlementError;
use crate::blockchain::{
    FinalityOutcome, FinalityPolicy, LedgerClient, LedgerError, SignedTx, TxStatus,
};
use crate::models::{
    DailyTaskView, DailyTasksResponse, DailyTotal, HistoryResponse, ReconcileResponse,
    TokenAmount, UserId,
};
use crate::provisioning::{AccountProvisioner, KeyedLocks};
use crate::storage::{
    AuditEvent, AuditEventType, CompletionStatus, CustodialAccount, DbError, TaskCompletion,
};
use crate::tasks::{ProofVerdict, Reservation, ReserveOutcome, TaskCatalog, TaskLedger};

/// Tunables of the settlement engine.
#[derive(Debug, Clone, Copy)]
pub struct SettlementConfig {
    /// Minimum proof confidence accepted
    pub acceptance_threshold: f64,
    pub finality: FinalityPolicy,
    /// Age after which an unsubmitted reservation is swept, and after which
    /// a journaled mint the ledger never received may be dropped
    pub reservation_timeout: Duration,
    /// Reward token decimals, for display strings
    pub token_decimals: u8,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: crate::tasks::DEFAULT_ACCEPTANCE_THRESHOLD,
            finality: FinalityPolicy::default(),
            reservation_timeout: Duration::from_secs(120),
            token_decimals: 18,
        }
    }
}

/// A confirmed reward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub completion_id: String,
    pub task_id: String,
    pub transaction_id: String,
    pub block_number: u64,
    pub reward_amount: TokenAmount,
    /// Balance re-read after confirmation; `None` if that read failed
    pub new_balance: Option<TokenAmount>,
    pub address: String,
}

/// What reconciliation did with a journaled mint the ledger does not know.
enum Recovery {
    Rebroadcast,
    Dropped,
    /// Left for a later pass
    Waiting,
}

pub struct RewardSettlementEngine {
    catalog: Arc<TaskCatalog>,
    tasks: TaskLedger,
    provisioner: Arc<AccountProvisioner>,
    ledger: Arc<dyn LedgerClient>,
    balances: Arc<BalanceReader>,
    config: SettlementConfig,
    /// Completions whose mint is being signed or broadcast right now
    in_flight: KeyedLocks<String>,
}

impl RewardSettlementEngine {
    pub fn new(
        catalog: Arc<TaskCatalog>,
        tasks: TaskLedger,
        provisioner: Arc<AccountProvisioner>,
        ledger: Arc<dyn LedgerClient>,
        balances: Arc<BalanceReader>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            catalog,
            tasks,
            provisioner,
            ledger,
            balances,
            config,
            in_flight: KeyedLocks::new(),
        }
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Settle a completed task into exactly one reward.
    ///
    /// Runs on its own task, so a caller that goes away (client disconnect)
    /// does not abandon a submitted mint halfway.
    pub async fn settle(
        self: &Arc<Self>,
        user_id: &UserId,
        task_id: &str,
        proof: ProofVerdict,
    ) -> Result<SettlementReceipt, SettlementError> {
        let engine = Arc::clone(self);
        let user_id = user_id.clone();
        let task_id = task_id.to_string();

        tokio::spawn(async move { engine.settle_inner(&user_id, &task_id, &proof).await })
            .await
            .map_err(|e| {
                error!(error = %e, "Settlement task aborted");
                SettlementError::Settlement(format!("Settlement task aborted: {e}"))
            })?
    }

    async fn settle_inner(
        &self,
        user_id: &UserId,
        task_id: &str,
        proof: &ProofVerdict,
    ) -> Result<SettlementReceipt, SettlementError> {
        let task = self
            .catalog
            .get(task_id)
            .ok_or_else(|| SettlementError::TaskNotFound(task_id.to_string()))?;
        proof
            .evaluate(self.config.acceptance_threshold)
            .map_err(SettlementError::ProofRejected)?;

        let date = self.tasks.today();
        let reservation = match self.tasks.try_reserve(
            user_id,
            task_id,
            date,
            &proof.reference,
            task.reward_amount,
        )? {
            ReserveOutcome::Reserved(reservation) => reservation,
            ReserveOutcome::AlreadyCompleted { status, .. } => {
                return Err(SettlementError::AlreadyCompleted {
                    task_id: task_id.to_string(),
                    date,
                    status,
                });
            }
        };

        let account = match self.provisioner.ensure_account(user_id).await {
            Ok(account) => account,
            Err(e) => {
                self.release(&reservation, &e.to_string());
                return Err(e.into());
            }
        };

        let tx_id = {
            let _in_flight = self.in_flight.lock(&reservation.completion.completion_id).await;
            self.submit_reward(&reservation, &account, task.reward_amount)
                .await?
        };
        info!(
            user_id = %user_id,
            task_id = %task_id,
            tx_id = %tx_id,
            amount = %task.reward_amount,
            "Reward mint submitted"
        );

        let outcome = self
            .ledger
            .await_finality(
                &tx_id,
                self.config.finality.timeout,
                self.config.finality.poll_interval,
            )
            .await;

        let (status, block_number) = match outcome {
            FinalityOutcome::Confirmed { block_number } => (CompletionStatus::Confirmed, block_number),
            FinalityOutcome::Reverted { block_number } => (CompletionStatus::Failed, block_number),
            FinalityOutcome::Unknown => {
                self.tasks.mark_unknown(&reservation.completion, &tx_id)?;
                warn!(
                    user_id = %user_id,
                    task_id = %task_id,
                    tx_id = %tx_id,
                    "Reward finality unknown, left for reconciliation"
                );
                return Err(SettlementError::Unknown {
                    transaction_id: tx_id,
                });
            }
        };

        let committed = self.commit_final(&reservation.completion, &tx_id, status, block_number)?;
        if committed.status != CompletionStatus::Confirmed {
            warn!(user_id = %user_id, task_id = %task_id, tx_id = %tx_id, "Reward mint reverted");
            return Err(SettlementError::Settlement(format!(
                "Reward transaction {tx_id} reverted"
            )));
        }

        let new_balance = self.refresh_balance(&account).await;
        info!(
            user_id = %user_id,
            task_id = %task_id,
            tx_id = %tx_id,
            block_number,
            "Reward confirmed"
        );
        Ok(SettlementReceipt {
            completion_id: reservation.completion_id().to_string(),
            task_id: task_id.to_string(),
            transaction_id: tx_id,
            block_number,
            reward_amount: task.reward_amount,
            new_balance,
            address: account.address,
        })
    }

    /// Sign, journal and broadcast the mint for a reservation. Must be
    /// called holding the reservation's in-flight lock.
    ///
    /// Returns the transaction id once the ledger has the transaction. After
    /// a failed broadcast the journaled id is looked up: a transaction the
    /// ledger never saw is dropped and the slot freed, one it knows goes on
    /// to finality.
    async fn submit_reward(
        &self,
        reservation: &Reservation,
        account: &CustodialAccount,
        amount: TokenAmount,
    ) -> Result<String, SettlementError> {
        let journal = |signed: &SignedTx| -> Result<(), LedgerError> {
            self.tasks
                .attach_transaction(reservation, signed, &account.address)
                .map(|_| ())
                .map_err(|e| LedgerError::Journal(e.to_string()))
        };
        let error = match self
            .ledger
            .mint(&account.address, amount.base_units(), &journal)
            .await
        {
            Ok(tx_id) => return Ok(tx_id),
            Err(e) => e,
        };

        let completion_id = reservation.completion_id();
        let current = self.tasks.get(completion_id)?;
        let journaled = current.as_ref().and_then(|c| c.transaction_id.clone());

        let Some(tx_id) = journaled else {
            // Nothing was broadcast
            if current.is_some_and(|c| c.status == CompletionStatus::Failed) {
                warn!(completion_id = %completion_id, "Reservation expired before the mint was sent");
                return Err(SettlementError::Settlement(
                    "Reservation expired before the reward was submitted".to_string(),
                ));
            }
            warn!(
                user_id = %reservation.completion.user_id,
                task_id = %reservation.completion.task_id,
                error = %error,
                "Reward mint submission failed"
            );
            self.release(reservation, &error.to_string());
            return Err(SettlementError::Settlement(error.to_string()));
        };

        warn!(tx_id = %tx_id, error = %error, "Mint broadcast failed, checking ledger");
        match self.ledger.transaction_status(&tx_id).await {
            Ok(TxStatus::NotFound) => {
                self.tasks
                    .drop_unbroadcast(completion_id, &tx_id, &error.to_string())?;
                Err(SettlementError::Settlement(error.to_string()))
            }
            Ok(_) => Ok(tx_id),
            Err(e) => {
                warn!(tx_id = %tx_id, error = %e, "Mint broadcast status unknown, left for reconciliation");
                self.tasks.mark_unknown(&reservation.completion, &tx_id)?;
                Err(SettlementError::Unknown {
                    transaction_id: tx_id,
                })
            }
        }
    }

    /// Commit a final status. A completion the reconciler already settled
    /// for the same transaction is returned as stored.
    fn commit_final(
        &self,
        completion: &TaskCompletion,
        tx_id: &str,
        status: CompletionStatus,
        block_number: u64,
    ) -> Result<TaskCompletion, SettlementError> {
        match self
            .tasks
            .commit(&completion.completion_id, tx_id, status, Some(block_number))
        {
            Ok(committed) => Ok(committed),
            Err(DbError::InvalidState(reason)) => {
                let stored = self
                    .tasks
                    .get(&completion.completion_id)?
                    .filter(|c| {
                        c.status != CompletionStatus::Pending
                            && c.transaction_id.as_deref() == Some(tx_id)
                    })
                    .ok_or(DbError::InvalidState(reason))?;
                debug!(tx_id = %tx_id, status = ?stored.status, "Already settled by reconciliation");
                Ok(stored)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn release(&self, reservation: &Reservation, reason: &str) {
        if let Err(e) = self.tasks.release(reservation, reason) {
            error!(
                completion_id = %reservation.completion_id(),
                error = %e,
                "Failed to release reservation"
            );
        }
    }

    async fn refresh_balance(&self, account: &CustodialAccount) -> Option<TokenAmount> {
        self.balances.invalidate(&account.address);
        match self.balances.balance_of_address(&account.address).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!(address = %account.address, error = %e, "Balance refresh failed");
                None
            }
        }
    }

    /// Poll every submitted pending reward once and settle the final ones.
    /// Never signs a new mint; a journaled one the ledger does not know is
    /// broadcast again with its original signature.
    pub async fn reconcile_pending(&self) -> Result<ReconcileResponse, SettlementError> {
        let mut report = ReconcileResponse::default();

        for completion in self.tasks.submitted_pending()? {
            let Some(tx_id) = completion.transaction_id.as_deref() else {
                continue;
            };

            let status = match self.ledger.transaction_status(tx_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(tx_id = %tx_id, error = %e, "Reconciliation status query failed");
                    report.errors += 1;
                    continue;
                }
            };

            let (final_status, block_number) = match status {
                TxStatus::Pending => {
                    report.still_pending += 1;
                    continue;
                }
                TxStatus::NotFound => {
                    match self.recover_unbroadcast(&completion, tx_id).await {
                        Ok(Recovery::Rebroadcast) => report.rebroadcast += 1,
                        Ok(Recovery::Dropped) => report.dropped += 1,
                        Ok(Recovery::Waiting) => report.still_pending += 1,
                        Err(e) => {
                            warn!(tx_id = %tx_id, error = %e, "Recovering unbroadcast reward failed");
                            report.errors += 1;
                        }
                    }
                    continue;
                }
                TxStatus::Confirmed { block_number } => (CompletionStatus::Confirmed, block_number),
                TxStatus::Reverted { block_number } => (CompletionStatus::Failed, block_number),
            };

            match self
                .tasks
                .commit(&completion.completion_id, tx_id, final_status, Some(block_number))
            {
                Ok(_) => {}
                // Settled concurrently by the request that submitted it
                Err(DbError::InvalidState(reason)) => {
                    warn!(tx_id = %tx_id, %reason, "Skipping reconciliation");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            if final_status == CompletionStatus::Confirmed {
                report.confirmed += 1;
                if let Some(reward_tx) = self.tasks.reward_transaction(tx_id)? {
                    self.balances.invalidate(&reward_tx.address);
                }
            } else {
                report.reverted += 1;
            }
            info!(
                user_id = %completion.user_id,
                tx_id = %tx_id,
                status = ?final_status,
                "Reconciled pending reward"
            );
        }

        Ok(report)
    }

    /// Broadcast a journaled mint the ledger does not know again. If the node
    /// refuses it and the journal entry is older than the reservation
    /// timeout, give up on it and free the slot. Skips completions whose
    /// settlement is still submitting.
    async fn recover_unbroadcast(
        &self,
        completion: &TaskCompletion,
        tx_id: &str,
    ) -> Result<Recovery, SettlementError> {
        let Some(_in_flight) = self.in_flight.try_lock(&completion.completion_id) else {
            return Ok(Recovery::Waiting);
        };
        let Some(reward_tx) = self.tasks.reward_transaction(tx_id)? else {
            return Ok(Recovery::Waiting);
        };
        let Some(payload) = reward_tx.signed_payload.clone() else {
            return Ok(Recovery::Waiting);
        };

        let signed = SignedTx {
            tx_id: tx_id.to_string(),
            payload,
        };
        let error = match self.ledger.rebroadcast(&signed).await {
            Ok(()) => {
                info!(tx_id = %tx_id, completion_id = %completion.completion_id, "Journaled reward broadcast again");
                return Ok(Recovery::Rebroadcast);
            }
            Err(e) => e,
        };

        let age = (Utc::now() - reward_tx.submitted_at)
            .to_std()
            .unwrap_or_default();
        if age < self.config.reservation_timeout {
            warn!(tx_id = %tx_id, error = %error, "Rebroadcast failed, will retry");
            return Ok(Recovery::Waiting);
        }

        self.tasks
            .drop_unbroadcast(&completion.completion_id, tx_id, &error.to_string())?;
        warn!(
            user_id = %completion.user_id,
            tx_id = %tx_id,
            error = %error,
            "Reward never reached the ledger, slot released"
        );
        Ok(Recovery::Dropped)
    }

    /// Sweep stale reservations, then reconcile submitted rewards.
    pub async fn reconcile(&self) -> Result<ReconcileResponse, SettlementError> {
        let swept = self.tasks.sweep_stale(self.config.reservation_timeout)?;
        let mut report = self.reconcile_pending().await?;
        report.swept_reservations = swept;

        self.tasks.audit(
            AuditEvent::new(AuditEventType::ReconciliationRun).with_details(json!({
                "swept_reservations": report.swept_reservations,
                "confirmed": report.confirmed,
                "reverted": report.reverted,
                "still_pending": report.still_pending,
                "rebroadcast": report.rebroadcast,
                "dropped": report.dropped,
                "errors": report.errors,
            })),
        );
        Ok(report)
    }

    /// Catalog with the user's status for the current day.
    pub fn daily_tasks(&self, user_id: &UserId) -> Result<DailyTasksResponse, SettlementError> {
        let decimals = self.config.token_decimals;
        let date = self.tasks.today();

        let active: HashMap<String, CompletionStatus> = self
            .tasks
            .completions_on(user_id, date)?
            .into_iter()
            .filter(|c| c.status != CompletionStatus::Failed)
            .map(|c| (c.task_id, c.status))
            .collect();

        let mut available = TokenAmount::ZERO;
        let mut earned = TokenAmount::ZERO;
        let tasks = self
            .catalog
            .tasks()
            .iter()
            .map(|task| {
                let status = active.get(&task.task_id).copied();
                match status {
                    None => available = available.saturating_add(task.reward_amount),
                    Some(CompletionStatus::Confirmed) => {
                        earned = earned.saturating_add(task.reward_amount)
                    }
                    Some(_) => {}
                }
                DailyTaskView {
                    task_id: task.task_id.clone(),
                    title: task.title.clone(),
                    description: task.description.clone(),
                    reward: task.reward_amount,
                    reward_formatted: task.reward_amount.format_units(decimals),
                    category: task.category.clone(),
                    platform: task.platform.clone(),
                    status,
                    completed: status == Some(CompletionStatus::Confirmed),
                }
            })
            .collect();

        Ok(DailyTasksResponse {
            date,
            tasks,
            available_rewards_formatted: available.format_units(decimals),
            earned_today_formatted: earned.format_units(decimals),
        })
    }

    /// Completion history, newest first, with confirmed totals per day.
    pub fn completion_history(&self, user_id: &UserId) -> Result<HistoryResponse, SettlementError> {
        let decimals = self.config.token_decimals;
        let completions = self.tasks.history(user_id)?;

        let mut per_day: BTreeMap<NaiveDate, (u32, TokenAmount)> = BTreeMap::new();
        for completion in completions
            .iter()
            .filter(|c| c.status == CompletionStatus::Confirmed)
        {
            let entry = per_day.entry(completion.date).or_default();
            entry.0 += 1;
            entry.1 = entry.1.saturating_add(completion.reward_amount);
        }

        let daily_totals = per_day
            .into_iter()
            .rev()
            .map(|(date, (tasks_completed, total))| DailyTotal {
                date,
                tasks_completed,
                total,
                total_formatted: total.format_units(decimals),
            })
            .collect();

        Ok(HistoryResponse {
            completions,
            daily_totals,
        })
    }

    pub async fn balance(&self, user_id: &UserId) -> Result<UserBalance, SettlementError> {
        self.balances.get_balance(user_id).await
    }

    /// Stored account of a user, if provisioned.
    pub fn account(&self, user_id: &UserId) -> Result<Option<CustodialAccount>, SettlementError> {
        Ok(self.provisioner.account(user_id)?)
    }
}
