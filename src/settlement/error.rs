// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use chrono::NaiveDate;

use crate::custody::CryptoError;
use crate::provisioning::ProvisioningError;
use crate::storage::{CompletionStatus, DbError};

/// Errors returned by the settlement engine.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error(transparent)]
    Crypto(CryptoError),

    #[error("Account provisioning failed: {0}")]
    Provisioning(ProvisioningError),

    #[error("Task {task_id} is already {status:?} for {date}")]
    AlreadyCompleted {
        task_id: String,
        date: NaiveDate,
        status: CompletionStatus,
    },

    #[error("Proof rejected: {0}")]
    ProofRejected(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Submission failed or the mint reverted; the slot was released.
    #[error("Reward settlement failed: {0}")]
    Settlement(String),

    /// Finality could not be determined in time; the reward stays pending.
    #[error("Reward transaction {transaction_id} is not final yet")]
    Unknown { transaction_id: String },

    #[error("Balance unavailable: {0}")]
    BalanceUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}

impl From<ProvisioningError> for SettlementError {
    fn from(err: ProvisioningError) -> Self {
        match err {
            ProvisioningError::Crypto(e) => SettlementError::Crypto(e),
            other => SettlementError::Provisioning(other),
        }
    }
}

impl From<CryptoError> for SettlementError {
    fn from(err: CryptoError) -> Self {
        SettlementError::Crypto(err)
    }
}
