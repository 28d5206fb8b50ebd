// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process ledger for tests and local development.
//!
//! Behaves like the reward token contract (mint requires an open vault,
//! opening a vault requires a funded account) and lets tests inject
//! submission failures, reverts and stuck transactions. Journaled writes
//! are signed first; a failed broadcast leaves the signed transaction
//! unknown to the ledger until it is broadcast again.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use alloy::primitives::U256;
use async_trait::async_trait;
use k256::{PublicKey, SecretKey};

use super::client::{LedgerClient, LedgerError, SubmissionJournal};
use super::types::{BalanceReading, SignedTx, SubmittedTx, TxStatus};
use crate::custody::derive_address;

/// Ledger operations that can be counted and failed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    CreateAccount,
    InitializeVault,
    Mint,
    /// Broadcast of an already signed transaction
    Rebroadcast,
    QueryBalance,
    TransactionStatus,
}

#[derive(Debug, Clone, Copy)]
enum Effect {
    Fund,
    OpenVault,
    Mint(U256),
}

#[derive(Debug, Clone)]
struct MemTx {
    address: String,
    effect: Effect,
    status: TxStatus,
    /// Forced revert, decided at submission time
    revert: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    block_number: u64,
    tx_counter: u64,
    /// Broadcast transactions, by id
    transactions: HashMap<String, MemTx>,
    /// Signed but never broadcast
    signed: HashMap<String, MemTx>,
    funded: HashSet<String>,
    vaults: HashSet<String>,
    balances: HashMap<String, U256>,
    calls: HashMap<LedgerOp, usize>,
    failures: HashMap<LedgerOp, usize>,
    reverts: HashMap<LedgerOp, usize>,
    hold_pending: bool,
    unreachable: bool,
}

impl LedgerState {
    fn take(counter: &mut HashMap<LedgerOp, usize>, op: LedgerOp) -> bool {
        match counter.get_mut(&op) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn fail(&mut self, op: LedgerOp) -> bool {
        self.unreachable || Self::take(&mut self.failures, op)
    }

    /// Move a signed transaction onto the ledger.
    fn broadcast(&mut self, tx_id: &str) -> bool {
        let Some(tx) = self.signed.remove(tx_id) else {
            return self.transactions.contains_key(tx_id);
        };
        self.transactions.insert(tx_id.to_string(), tx);
        if !self.hold_pending {
            self.finalize(tx_id);
        }
        true
    }

    /// Apply a transaction's effect and mark it final.
    fn finalize(&mut self, tx_id: &str) {
        let Some(tx) = self.transactions.get(tx_id).cloned() else {
            return;
        };
        if tx.status != TxStatus::Pending {
            return;
        }
        self.block_number += 1;
        let block_number = self.block_number;

        let applied = !tx.revert
            && match tx.effect {
                Effect::Fund => {
                    self.funded.insert(tx.address.clone());
                    true
                }
                Effect::OpenVault => {
                    self.funded.contains(&tx.address) && self.vaults.insert(tx.address.clone())
                }
                Effect::Mint(amount) => {
                    if self.vaults.contains(&tx.address) {
                        let balance = self.balances.entry(tx.address.clone()).or_default();
                        *balance += amount;
                        true
                    } else {
                        false
                    }
                }
            };

        let status = if applied {
            TxStatus::Confirmed { block_number }
        } else {
            TxStatus::Reverted { block_number }
        };
        if let Some(stored) = self.transactions.get_mut(tx_id) {
            stored.status = status;
        }
    }
}

/// Deterministic in-process ledger.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    latency: Option<Duration>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every submission by `latency` (widens race windows in tests).
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::default(),
            latency: Some(latency),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `times` submissions of `op` fail before reaching the ledger.
    pub fn fail_next(&self, op: LedgerOp, times: usize) {
        *self.lock().failures.entry(op).or_default() += times;
    }

    /// Make the next `times` accepted submissions of `op` revert on-chain.
    pub fn revert_next(&self, op: LedgerOp, times: usize) {
        *self.lock().reverts.entry(op).or_default() += times;
    }

    /// While enabled, new transactions stay pending until resolved explicitly.
    pub fn hold_pending(&self, hold: bool) {
        self.lock().hold_pending = hold;
    }

    /// Simulate a node that rejects every call.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Finalize every pending transaction, applying its effect.
    pub fn confirm_pending(&self) {
        let mut state = self.lock();
        let pending: Vec<String> = state
            .transactions
            .iter()
            .filter(|(_, tx)| tx.status == TxStatus::Pending)
            .map(|(id, _)| id.clone())
            .collect();
        for tx_id in pending {
            state.finalize(&tx_id);
        }
    }

    /// Revert every pending transaction without applying its effect.
    pub fn revert_pending(&self) {
        let mut state = self.lock();
        let pending: Vec<String> = state
            .transactions
            .iter()
            .filter(|(_, tx)| tx.status == TxStatus::Pending)
            .map(|(id, _)| id.clone())
            .collect();
        for tx_id in pending {
            if let Some(tx) = state.transactions.get_mut(&tx_id) {
                tx.revert = true;
            }
            state.finalize(&tx_id);
        }
    }

    pub fn call_count(&self, op: LedgerOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of mints that actually credited a vault.
    pub fn confirmed_mints(&self) -> usize {
        self.lock()
            .transactions
            .values()
            .filter(|tx| {
                matches!(tx.effect, Effect::Mint(_))
                    && matches!(tx.status, TxStatus::Confirmed { .. })
            })
            .count()
    }

    pub fn balance_of(&self, address: &str) -> U256 {
        self.lock().balances.get(address).copied().unwrap_or_default()
    }

    /// Number of signed transactions that were never broadcast.
    pub fn unbroadcast_count(&self) -> usize {
        self.lock().signed.len()
    }

    /// Sign, journal, then broadcast. Injected failures of `op` hit the
    /// broadcast, after the journal entry exists.
    async fn submit(
        &self,
        op: LedgerOp,
        address: &str,
        effect: Effect,
        journal: &dyn SubmissionJournal,
    ) -> Result<String, LedgerError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let signed = {
            let mut state = self.lock();
            *state.calls.entry(op).or_default() += 1;
            let revert = LedgerState::take(&mut state.reverts, op);
            state.tx_counter += 1;
            let tx_id = format!("0x{:064x}", state.tx_counter);
            state.signed.insert(
                tx_id.clone(),
                MemTx {
                    address: address.to_string(),
                    effect,
                    status: TxStatus::Pending,
                    revert,
                },
            );
            SignedTx {
                payload: tx_id.clone(),
                tx_id,
            }
        };

        if let Err(e) = journal.record(&signed) {
            self.lock().signed.remove(&signed.tx_id);
            return Err(e);
        }

        let mut state = self.lock();
        if state.fail(op) {
            return Err(LedgerError::Submission(format!("{op:?} rejected by node")));
        }
        state.broadcast(&signed.tx_id);
        Ok(signed.tx_id)
    }
}

fn unjournaled(_: &SignedTx) -> Result<(), LedgerError> {
    Ok(())
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn create_account(
        &self,
        public_key: &PublicKey,
        journal: &dyn SubmissionJournal,
    ) -> Result<SubmittedTx, LedgerError> {
        let address = derive_address(public_key);
        let tx_id = self
            .submit(LedgerOp::CreateAccount, &address, Effect::Fund, journal)
            .await?;
        Ok(SubmittedTx { tx_id, address })
    }

    async fn initialize_vault(
        &self,
        address: &str,
        signer_key: &SecretKey,
    ) -> Result<String, LedgerError> {
        if derive_address(&signer_key.public_key()) != address {
            return Err(LedgerError::InvalidInput(
                "Signing key does not control the account".to_string(),
            ));
        }
        self.submit(LedgerOp::InitializeVault, address, Effect::OpenVault, &unjournaled)
            .await
    }

    async fn mint(
        &self,
        address: &str,
        amount: U256,
        journal: &dyn SubmissionJournal,
    ) -> Result<String, LedgerError> {
        self.submit(LedgerOp::Mint, address, Effect::Mint(amount), journal)
            .await
    }

    async fn rebroadcast(&self, signed: &SignedTx) -> Result<(), LedgerError> {
        let mut state = self.lock();
        *state.calls.entry(LedgerOp::Rebroadcast).or_default() += 1;
        if state.fail(LedgerOp::Rebroadcast) {
            return Err(LedgerError::Submission("Rebroadcast rejected by node".to_string()));
        }
        if state.broadcast(&signed.payload) {
            Ok(())
        } else {
            Err(LedgerError::Submission(format!(
                "Unknown signed transaction {}",
                signed.tx_id
            )))
        }
    }

    async fn query_balance(&self, address: &str) -> Result<BalanceReading, LedgerError> {
        let mut state = self.lock();
        *state.calls.entry(LedgerOp::QueryBalance).or_default() += 1;
        if state.unreachable || LedgerState::take(&mut state.failures, LedgerOp::QueryBalance) {
            return Err(LedgerError::Query("node unreachable".to_string()));
        }
        if !state.vaults.contains(address) {
            return Ok(BalanceReading::NoVault);
        }
        Ok(BalanceReading::Balance(
            state.balances.get(address).copied().unwrap_or_default(),
        ))
    }

    async fn transaction_status(&self, tx_id: &str) -> Result<TxStatus, LedgerError> {
        let mut state = self.lock();
        if state.fail(LedgerOp::TransactionStatus) {
            return Err(LedgerError::Query("node unreachable".to_string()));
        }
        Ok(state
            .transactions
            .get(tx_id)
            .map(|tx| tx.status)
            .unwrap_or(TxStatus::NotFound))
    }

    async fn health(&self) -> Result<u64, LedgerError> {
        let state = self.lock();
        if state.unreachable {
            return Err(LedgerError::Query("node unreachable".to_string()));
        }
        Ok(state.block_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::FinalityOutcome;
    use crate::custody::KeyVault;

    async fn funded_account(ledger: &InMemoryLedger) -> (String, SecretKey) {
        let (public, secret) = KeyVault::generate_key_pair();
        let submitted = ledger.create_account(&public, &unjournaled).await.unwrap();
        (submitted.address, secret)
    }

    #[tokio::test]
    async fn mint_without_vault_reverts() {
        let ledger = InMemoryLedger::new();
        let (address, _) = funded_account(&ledger).await;

        let tx_id = ledger.mint(&address, U256::from(10u64), &unjournaled).await.unwrap();
        assert!(matches!(
            ledger.transaction_status(&tx_id).await.unwrap(),
            TxStatus::Reverted { .. }
        ));
        assert_eq!(ledger.query_balance(&address).await.unwrap(), BalanceReading::NoVault);
    }

    #[tokio::test]
    async fn vault_then_mint_credits_balance() {
        let ledger = InMemoryLedger::new();
        let (address, secret) = funded_account(&ledger).await;

        ledger.initialize_vault(&address, &secret).await.unwrap();
        let tx_id = ledger.mint(&address, U256::from(25u64), &unjournaled).await.unwrap();

        assert!(matches!(
            ledger.transaction_status(&tx_id).await.unwrap(),
            TxStatus::Confirmed { .. }
        ));
        assert_eq!(
            ledger.query_balance(&address).await.unwrap(),
            BalanceReading::Balance(U256::from(25u64))
        );
        assert_eq!(ledger.confirmed_mints(), 1);
    }

    #[tokio::test]
    async fn vault_init_requires_matching_key() {
        let ledger = InMemoryLedger::new();
        let (address, _) = funded_account(&ledger).await;
        let (_, other) = KeyVault::generate_key_pair();

        let result = ledger.initialize_vault(&address, &other).await;
        assert!(matches!(result, Err(LedgerError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn injected_failure_is_consumed_once() {
        let ledger = InMemoryLedger::new();
        ledger.fail_next(LedgerOp::Mint, 1);

        assert!(matches!(
            ledger.mint("0xabc", U256::from(1u64), &unjournaled).await,
            Err(LedgerError::Submission(_))
        ));
        assert!(ledger.mint("0xabc", U256::from(1u64), &unjournaled).await.is_ok());
        assert_eq!(ledger.call_count(LedgerOp::Mint), 2);
    }

    #[tokio::test]
    async fn held_transactions_time_out_as_unknown() {
        let ledger = InMemoryLedger::new();
        let (address, secret) = funded_account(&ledger).await;
        ledger.initialize_vault(&address, &secret).await.unwrap();

        ledger.hold_pending(true);
        let tx_id = ledger.mint(&address, U256::from(5u64), &unjournaled).await.unwrap();
        let outcome = ledger
            .await_finality(&tx_id, Duration::from_millis(50), Duration::from_millis(10))
            .await;
        assert_eq!(outcome, FinalityOutcome::Unknown);

        ledger.confirm_pending();
        let outcome = ledger
            .await_finality(&tx_id, Duration::from_millis(50), Duration::from_millis(10))
            .await;
        assert!(matches!(outcome, FinalityOutcome::Confirmed { .. }));
        assert_eq!(ledger.balance_of(&address), U256::from(5u64));
    }

    #[tokio::test]
    async fn revert_pending_leaves_balance_untouched() {
        let ledger = InMemoryLedger::new();
        let (address, secret) = funded_account(&ledger).await;
        ledger.initialize_vault(&address, &secret).await.unwrap();

        ledger.hold_pending(true);
        let tx_id = ledger.mint(&address, U256::from(5u64), &unjournaled).await.unwrap();
        ledger.revert_pending();

        assert!(matches!(
            ledger.transaction_status(&tx_id).await.unwrap(),
            TxStatus::Reverted { .. }
        ));
        assert_eq!(ledger.balance_of(&address), U256::ZERO);
    }

    #[tokio::test]
    async fn failed_broadcast_is_journaled_and_resendable() {
        let ledger = InMemoryLedger::new();
        let (address, secret) = funded_account(&ledger).await;
        ledger.initialize_vault(&address, &secret).await.unwrap();

        let journal = Mutex::new(Vec::new());
        let record = |signed: &SignedTx| -> Result<(), LedgerError> {
            journal.lock().unwrap().push(signed.clone());
            Ok(())
        };
        ledger.fail_next(LedgerOp::Mint, 1);
        assert!(ledger.mint(&address, U256::from(7u64), &record).await.is_err());

        let signed = journal.lock().unwrap().pop().unwrap();
        assert_eq!(
            ledger.transaction_status(&signed.tx_id).await.unwrap(),
            TxStatus::NotFound
        );
        assert_eq!(ledger.unbroadcast_count(), 1);

        ledger.rebroadcast(&signed).await.unwrap();
        assert!(matches!(
            ledger.transaction_status(&signed.tx_id).await.unwrap(),
            TxStatus::Confirmed { .. }
        ));
        // Sending it again is a no-op
        ledger.rebroadcast(&signed).await.unwrap();
        assert_eq!(ledger.balance_of(&address), U256::from(7u64));
        assert_eq!(ledger.confirmed_mints(), 1);
    }

    #[tokio::test]
    async fn journal_failure_broadcasts_nothing() {
        let ledger = InMemoryLedger::new();
        let refuse = |_: &SignedTx| -> Result<(), LedgerError> {
            Err(LedgerError::Journal("disk full".to_string()))
        };
        let result = ledger.mint("0xabc", U256::from(1u64), &refuse).await;
        assert!(matches!(result, Err(LedgerError::Journal(_))));
        assert_eq!(ledger.unbroadcast_count(), 0);
        assert_eq!(ledger.health().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unreachable_node_fails_reads() {
        let ledger = InMemoryLedger::new();
        ledger.set_unreachable(true);
        assert!(matches!(
            ledger.query_balance("0xabc").await,
            Err(LedgerError::Query(_))
        ));
        assert!(ledger.health().await.is_err());
    }
}
