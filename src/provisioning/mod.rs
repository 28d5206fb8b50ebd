// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Account Provisioning
//!
//! Every user gets exactly one custodial account with an open token vault
//! before the first reward is minted to it.
//!
//! ## Lifecycle
//!
//! ```text
//! Absent ──create_account──▶ Funding ──final──▶ AccountCreated ──initialize_vault──▶ VaultReady
//!                              │  ▲
//!                              └──┘ refund the same key if the funding never landed
//! ```
//!
//! The sealed key and the signed funding transaction are stored before the
//! transaction is broadcast, so an interrupted provisioning resumes with the
//! same key and address. The vault step is retried on its own if it fails.
//! Calls for the same user are serialized through [`KeyedLocks`]; calls for
//! different users run in parallel.

pub mod locks;

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::blockchain::{
    BalanceReading, FinalityOutcome, FinalityPolicy, LedgerClient, LedgerError, SignedTx,
    SubmittedTx, TxStatus,
};
use crate::custody::{derive_address, CryptoError, KeyVault};
use crate::models::UserId;
use crate::storage::{
    AuditEvent, AuditEventType, CustodialAccount, DbError, ProvisioningState, RewardDatabase,
};

pub use locks::{KeyedGuard, KeyedLocks};

/// Provisioning failures. All of them leave the user retryable.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Ledger error during provisioning: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Storage error during provisioning: {0}")]
    Storage(#[from] DbError),

    #[error("{step} transaction {tx_id} reverted")]
    Reverted { step: &'static str, tx_id: String },

    #[error("{step} transaction {tx_id} was not final before the deadline")]
    NotFinal { step: &'static str, tx_id: String },
}

pub struct AccountProvisioner {
    db: Arc<RewardDatabase>,
    vault: KeyVault,
    ledger: Arc<dyn LedgerClient>,
    finality: FinalityPolicy,
    locks: KeyedLocks<UserId>,
}

impl AccountProvisioner {
    pub fn new(
        db: Arc<RewardDatabase>,
        vault: KeyVault,
        ledger: Arc<dyn LedgerClient>,
        finality: FinalityPolicy,
    ) -> Self {
        Self {
            db,
            vault,
            ledger,
            finality,
            locks: KeyedLocks::new(),
        }
    }

    /// Stored account of a user, without provisioning anything.
    pub fn account(&self, user_id: &UserId) -> Result<Option<CustodialAccount>, DbError> {
        self.db.get_account(user_id)
    }

    /// Return the user's account, creating it and opening its vault first
    /// if needed. A ready account is returned without touching the ledger.
    pub async fn ensure_account(
        &self,
        user_id: &UserId,
    ) -> Result<CustodialAccount, ProvisioningError> {
        if let Some(account) = self.db.get_account(user_id)? {
            if account.vault_initialized() {
                return Ok(account);
            }
        }

        let _guard = self.locks.lock(user_id).await;

        // Re-read: another caller may have finished while we waited
        match self.db.get_account(user_id)? {
            Some(account) if account.vault_initialized() => Ok(account),
            Some(account) if account.state == ProvisioningState::Funding => {
                let account = self.resume_funding(account).await?;
                self.open_vault(account, false).await
            }
            Some(account) => self.open_vault(account, true).await,
            None => {
                let account = self.create_account(user_id).await?;
                self.open_vault(account, false).await
            }
        }
    }

    async fn create_account(&self, user_id: &UserId) -> Result<CustodialAccount, ProvisioningError> {
        let (key_material, address) = self.vault.generate_sealed()?;
        let public_key = KeyVault::public_key(&key_material)?;

        let journal = |signed: &SignedTx| -> Result<(), LedgerError> {
            let record = CustodialAccount::funding(
                user_id.clone(),
                address.clone(),
                key_material.clone(),
                signed,
            );
            let stored = self
                .db
                .insert_account_if_absent(&record)
                .map_err(|e| LedgerError::Journal(e.to_string()))?;
            if stored.address != address {
                return Err(LedgerError::Journal(format!(
                    "{user_id} already has account {}",
                    stored.address
                )));
            }
            Ok(())
        };
        let submitted = self.ledger.create_account(&public_key, &journal).await?;
        check_address(&submitted, &public_key)?;

        self.finish_funding(user_id, &submitted.tx_id).await
    }

    /// Continue a provisioning that stopped after its funding transaction
    /// was journaled.
    async fn resume_funding(
        &self,
        account: CustodialAccount,
    ) -> Result<CustodialAccount, ProvisioningError> {
        let user_id = account.user_id.clone();
        let tx_id = account.funding_tx_id.clone();

        match self.ledger.transaction_status(&tx_id).await? {
            TxStatus::Confirmed { .. } | TxStatus::Pending => {}
            TxStatus::Reverted { .. } => {
                warn!(user_id = %user_id, tx_id = %tx_id, "Funding reverted, funding the same key again");
                return self.refund(&account).await;
            }
            TxStatus::NotFound => {
                let Some(payload) = account.funding_payload.clone() else {
                    return self.refund(&account).await;
                };
                let signed = SignedTx {
                    tx_id: tx_id.clone(),
                    payload,
                };
                if let Err(e) = self.ledger.rebroadcast(&signed).await {
                    warn!(user_id = %user_id, tx_id = %tx_id, error = %e, "Funding never reached the ledger, funding again");
                    return self.refund(&account).await;
                }
                info!(user_id = %user_id, tx_id = %tx_id, "Journaled funding broadcast again");
            }
        }

        self.finish_funding(&user_id, &tx_id).await
    }

    /// Sign a new funding transaction for the key already on record.
    async fn refund(&self, account: &CustodialAccount) -> Result<CustodialAccount, ProvisioningError> {
        let public_key = KeyVault::public_key(&account.key_material)?;
        let journal = |signed: &SignedTx| -> Result<(), LedgerError> {
            self.db
                .replace_funding_tx(&account.user_id, signed)
                .map(|_| ())
                .map_err(|e| LedgerError::Journal(e.to_string()))
        };
        let submitted = self.ledger.create_account(&public_key, &journal).await?;
        check_address(&submitted, &public_key)?;

        self.finish_funding(&account.user_id, &submitted.tx_id).await
    }

    async fn finish_funding(
        &self,
        user_id: &UserId,
        tx_id: &str,
    ) -> Result<CustodialAccount, ProvisioningError> {
        self.await_step("Account creation", tx_id).await?;
        let account = self.db.mark_account_funded(user_id, tx_id)?;

        info!(user_id = %user_id, address = %account.address, "Custodial account created");
        self.db.audit(
            AuditEvent::new(AuditEventType::AccountCreated)
                .with_user(user_id.as_str())
                .with_resource("account", account.address.as_str())
                .with_details(json!({ "funding_tx_id": tx_id })),
        );
        Ok(account)
    }

    async fn open_vault(
        &self,
        account: CustodialAccount,
        retry: bool,
    ) -> Result<CustodialAccount, ProvisioningError> {
        let user_id = account.user_id.clone();

        // A previous attempt may have landed after we stopped waiting for it
        if retry {
            if let BalanceReading::Balance(_) = self.ledger.query_balance(&account.address).await? {
                info!(user_id = %user_id, "Vault already open on ledger");
                return Ok(self.db.mark_vault_ready(&user_id, None)?);
            }
        }

        let secret = self.vault.unseal(&account.key_material)?;
        let submitted = self.ledger.initialize_vault(&account.address, &secret).await;
        drop(secret);

        let tx_id = match submitted {
            Ok(tx_id) => tx_id,
            Err(e) => {
                self.audit_vault_failure(&account, &e.to_string());
                return Err(e.into());
            }
        };

        if let Err(e) = self.await_step("Vault initialization", &tx_id).await {
            self.audit_vault_failure(&account, &e.to_string());
            return Err(e);
        }

        let ready = self.db.mark_vault_ready(&user_id, Some(&tx_id))?;
        info!(user_id = %user_id, address = %ready.address, tx_id = %tx_id, "Vault initialized");
        self.db.audit(
            AuditEvent::new(AuditEventType::VaultInitialized)
                .with_user(user_id.as_str())
                .with_resource("transaction", tx_id.as_str()),
        );
        Ok(ready)
    }

    async fn await_step(&self, step: &'static str, tx_id: &str) -> Result<u64, ProvisioningError> {
        let outcome = self
            .ledger
            .await_finality(tx_id, self.finality.timeout, self.finality.poll_interval)
            .await;
        match outcome {
            FinalityOutcome::Confirmed { block_number } => Ok(block_number),
            FinalityOutcome::Reverted { .. } => Err(ProvisioningError::Reverted {
                step,
                tx_id: tx_id.to_string(),
            }),
            FinalityOutcome::Unknown => Err(ProvisioningError::NotFinal {
                step,
                tx_id: tx_id.to_string(),
            }),
        }
    }

    fn audit_vault_failure(&self, account: &CustodialAccount, error: &str) {
        warn!(user_id = %account.user_id, error = %error, "Vault initialization failed");
        self.db.audit(
            AuditEvent::new(AuditEventType::VaultInitialized)
                .with_user(account.user_id.as_str())
                .with_resource("account", account.address.as_str())
                .failed(error),
        );
    }
}

fn check_address(submitted: &SubmittedTx, public_key: &k256::PublicKey) -> Result<(), LedgerError> {
    if submitted.address != derive_address(public_key) {
        return Err(LedgerError::InvalidInput(format!(
            "Ledger returned address {} for a different key",
            submitted.address
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::blockchain::{InMemoryLedger, LedgerOp};
    use crate::custody::MasterKey;
    use crate::storage::database::temp_db;
    use crate::storage::ProvisioningState;

    fn fast_finality() -> FinalityPolicy {
        FinalityPolicy {
            timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn provisioner(ledger: Arc<InMemoryLedger>) -> (Arc<AccountProvisioner>, tempfile::TempDir) {
        let (db, dir) = temp_db();
        let vault = KeyVault::new(MasterKey::from_bytes([3u8; 32]));
        let provisioner = AccountProvisioner::new(Arc::new(db), vault, ledger, fast_finality());
        (Arc::new(provisioner), dir)
    }

    #[tokio::test]
    async fn new_user_gets_ready_account() {
        let ledger = Arc::new(InMemoryLedger::new());
        let (provisioner, _dir) = provisioner(ledger.clone());
        let user = UserId::from("user_1");

        let account = provisioner.ensure_account(&user).await.unwrap();
        assert_eq!(account.state, ProvisioningState::VaultReady);
        assert!(account.address.starts_with("0x"));
        assert!(account.vault_tx_id.is_some());

        // Ready accounts do not touch the ledger again
        let again = provisioner.ensure_account(&user).await.unwrap();
        assert_eq!(again.address, account.address);
        assert_eq!(ledger.call_count(LedgerOp::CreateAccount), 1);
        assert_eq!(ledger.call_count(LedgerOp::InitializeVault), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_account() {
        let ledger = Arc::new(InMemoryLedger::with_latency(Duration::from_millis(10)));
        let (provisioner, _dir) = provisioner(ledger.clone());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let provisioner = provisioner.clone();
            handles.push(tokio::spawn(async move {
                provisioner.ensure_account(&UserId::from("user_1")).await
            }));
        }

        let mut addresses = Vec::new();
        for handle in handles {
            addresses.push(handle.await.unwrap().unwrap().address);
        }
        addresses.dedup();
        assert_eq!(addresses.len(), 1);
        assert_eq!(ledger.call_count(LedgerOp::CreateAccount), 1);
        assert_eq!(ledger.call_count(LedgerOp::InitializeVault), 1);
    }

    #[tokio::test]
    async fn different_users_get_different_accounts() {
        let ledger = Arc::new(InMemoryLedger::new());
        let (provisioner, _dir) = provisioner(ledger.clone());

        let a = provisioner.ensure_account(&UserId::from("a")).await.unwrap();
        let b = provisioner.ensure_account(&UserId::from("b")).await.unwrap();
        assert_ne!(a.address, b.address);
    }

    #[tokio::test]
    async fn vault_failure_retries_only_vault_step() {
        let ledger = Arc::new(InMemoryLedger::new());
        let (provisioner, _dir) = provisioner(ledger.clone());
        let user = UserId::from("user_1");

        ledger.fail_next(LedgerOp::InitializeVault, 1);
        let err = provisioner.ensure_account(&user).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Ledger(LedgerError::Submission(_))));

        let partial = provisioner.account(&user).unwrap().unwrap();
        assert_eq!(partial.state, ProvisioningState::AccountCreated);

        let ready = provisioner.ensure_account(&user).await.unwrap();
        assert_eq!(ready.state, ProvisioningState::VaultReady);
        assert_eq!(ready.address, partial.address);
        assert_eq!(ledger.call_count(LedgerOp::CreateAccount), 1);
        assert_eq!(ledger.call_count(LedgerOp::InitializeVault), 2);
    }

    #[tokio::test]
    async fn vault_opened_late_is_detected_on_retry() {
        let ledger = Arc::new(InMemoryLedger::new());
        let (provisioner, _dir) = provisioner(ledger.clone());
        let user = UserId::from("user_1");

        // Account creation confirms, then the vault tx outlives the deadline
        provisioner.create_account(&user).await.unwrap();
        ledger.hold_pending(true);
        let err = provisioner.ensure_account(&user).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::NotFinal { .. }));

        ledger.hold_pending(false);
        ledger.confirm_pending();

        let ready = provisioner.ensure_account(&user).await.unwrap();
        assert_eq!(ready.state, ProvisioningState::VaultReady);
        assert_eq!(ready.vault_tx_id, None);
        assert_eq!(ledger.call_count(LedgerOp::InitializeVault), 1);
    }

    #[tokio::test]
    async fn reverted_funding_is_retried_for_same_key() {
        let ledger = Arc::new(InMemoryLedger::new());
        let (provisioner, _dir) = provisioner(ledger.clone());
        let user = UserId::from("user_1");

        ledger.revert_next(LedgerOp::CreateAccount, 1);
        let err = provisioner.ensure_account(&user).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Reverted { .. }));
        let funding = provisioner.account(&user).unwrap().unwrap();
        assert_eq!(funding.state, ProvisioningState::Funding);

        let ready = provisioner.ensure_account(&user).await.unwrap();
        assert_eq!(ready.address, funding.address);
        assert_eq!(ready.key_material, funding.key_material);
        assert_ne!(ready.funding_tx_id, funding.funding_tx_id);
        assert_eq!(ledger.call_count(LedgerOp::CreateAccount), 2);
    }

    #[tokio::test]
    async fn slow_funding_keeps_key_and_address() {
        let ledger = Arc::new(InMemoryLedger::new());
        let (provisioner, _dir) = provisioner(ledger.clone());
        let user = UserId::from("user_1");

        ledger.hold_pending(true);
        let err = provisioner.ensure_account(&user).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::NotFinal { .. }));

        let funding = provisioner.account(&user).unwrap().unwrap();
        assert_eq!(funding.state, ProvisioningState::Funding);
        assert!(funding.address.starts_with("0x"));

        ledger.hold_pending(false);
        ledger.confirm_pending();

        let ready = provisioner.ensure_account(&user).await.unwrap();
        assert_eq!(ready.state, ProvisioningState::VaultReady);
        assert_eq!(ready.address, funding.address);
        assert_eq!(ready.funding_tx_id, funding.funding_tx_id);
        assert_eq!(ready.funding_payload, None);
        assert_eq!(ledger.call_count(LedgerOp::CreateAccount), 1);
    }

    #[tokio::test]
    async fn unsent_funding_is_broadcast_again() {
        let ledger = Arc::new(InMemoryLedger::new());
        let (provisioner, _dir) = provisioner(ledger.clone());
        let user = UserId::from("user_1");

        ledger.fail_next(LedgerOp::CreateAccount, 1);
        let err = provisioner.ensure_account(&user).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Ledger(LedgerError::Submission(_))));
        let funding = provisioner.account(&user).unwrap().unwrap();
        assert_eq!(funding.state, ProvisioningState::Funding);
        assert_eq!(ledger.unbroadcast_count(), 1);

        let ready = provisioner.ensure_account(&user).await.unwrap();
        assert_eq!(ready.address, funding.address);
        assert_eq!(ready.funding_tx_id, funding.funding_tx_id);
        assert_eq!(ledger.call_count(LedgerOp::CreateAccount), 1);
        assert_eq!(ledger.call_count(LedgerOp::Rebroadcast), 1);
        assert_eq!(ledger.unbroadcast_count(), 0);
    }
}
