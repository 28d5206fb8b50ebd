// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger adapter trait.
//!
//! A [`LedgerClient`] builds, signs, submits and polls transactions. It holds
//! no per-user state: the caller passes in the account address and, where
//! the account itself must sign, the decrypted key.
//!
//! Writes that must never be repeated (account funding, reward mints) are
//! signed first and handed to a [`SubmissionJournal`]. Only once the journal
//! has durably recorded the transaction id is the transaction broadcast, so
//! a crash or a lost response always leaves a known id to poll.

use std::time::Duration;

use alloy::primitives::U256;
use async_trait::async_trait;
use k256::{PublicKey, SecretKey};

use super::types::{BalanceReading, FinalityOutcome, SignedTx, SubmittedTx, TxStatus};

/// Errors returned by ledger adapters.
///
/// For a journaled write, `Journal` means nothing was broadcast. A
/// `Submission` error after a successful journal entry is ambiguous: the
/// node may or may not have the transaction, so callers check its status
/// before giving up on it.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Transaction submission failed: {0}")]
    Submission(String),

    #[error("Could not record signed transaction: {0}")]
    Journal(String),

    #[error("Ledger query failed: {0}")]
    Query(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Durable record of signed transactions, written before broadcast.
pub trait SubmissionJournal: Send + Sync {
    fn record(&self, signed: &SignedTx) -> Result<(), LedgerError>;
}

impl<F> SubmissionJournal for F
where
    F: Fn(&SignedTx) -> Result<(), LedgerError> + Send + Sync,
{
    fn record(&self, signed: &SignedTx) -> Result<(), LedgerError> {
        self(signed)
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Sign, journal, then submit the transaction that brings a new account
    /// into existence. Calling it again for the same key funds the same
    /// address.
    async fn create_account(
        &self,
        public_key: &PublicKey,
        journal: &dyn SubmissionJournal,
    ) -> Result<SubmittedTx, LedgerError>;

    /// Open the reward token vault, signed by the account's own key.
    async fn initialize_vault(
        &self,
        address: &str,
        signer_key: &SecretKey,
    ) -> Result<String, LedgerError>;

    /// Mint `amount` base units into the account's vault (minter-signed).
    /// The transaction is journaled before it is broadcast.
    async fn mint(
        &self,
        address: &str,
        amount: U256,
        journal: &dyn SubmissionJournal,
    ) -> Result<String, LedgerError>;

    /// Broadcast a previously journaled transaction again. Succeeds if the
    /// node already knows it.
    async fn rebroadcast(&self, signed: &SignedTx) -> Result<(), LedgerError>;

    async fn query_balance(&self, address: &str) -> Result<BalanceReading, LedgerError>;

    async fn transaction_status(&self, tx_id: &str) -> Result<TxStatus, LedgerError>;

    /// Cheap liveness probe; returns the latest block height.
    async fn health(&self) -> Result<u64, LedgerError>;

    /// Poll `transaction_status` until the transaction is final or the
    /// deadline passes. Query errors while polling are retried.
    async fn await_finality(
        &self,
        tx_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> FinalityOutcome {
        let poll = async {
            loop {
                match self.transaction_status(tx_id).await {
                    Ok(status) => {
                        if let Some(outcome) = FinalityOutcome::from_status(status) {
                            return outcome;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(tx_id = %tx_id, error = %e, "Finality poll failed, retrying");
                    }
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    tx_id = %tx_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Transaction not final before deadline"
                );
                FinalityOutcome::Unknown
            }
        }
    }
}
