// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Persistent Storage
//!
//! All durable state lives in a single redb file under `DATA_DIR`. It is the
//! system of record for "has this task been rewarded": nothing upstream
//! caches that answer across requests or restarts.
//!
//! ## Storage Layout
//!
//! ```text
//! ${DATA_DIR}/
//!   rewards.redb
//!     accounts               user_id → CustodialAccount (key material encrypted)
//!     completions            completion_id → TaskCompletion (append-only rows)
//!     active_slots           user|task|date → completion_id
//!     user_completion_index  user|!reserved_at|completion_id → completion_id
//!     pending_completions    completion_id → reserved_at
//!     reward_transactions    tx_id → RewardTransaction
//!     audit_log              date|millis|event_id → AuditEvent
//! ```
//!
//! ## Important Notes
//!
//! - Private keys are only ever stored as AES-256-GCM ciphertext
//! - Completion rows are never deleted; only status, transaction id and
//!   completion time advance
//! - The balance cache is in-process only and safe to lose

pub mod accounts;
pub mod audit;
pub mod balance_cache;
pub mod completions;
pub mod database;
pub mod reward_txs;

pub use accounts::{CustodialAccount, ProvisioningState};
pub use audit::{AuditEvent, AuditEventType};
pub use balance_cache::BalanceCache;
pub use completions::{CompletionStatus, SlotClaim, TaskCompletion};
pub use database::{DbError, DbResult, RewardDatabase};
pub use reward_txs::{RewardOutcome, RewardTransaction};

/// File name of the reward database inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "rewards.redb";
