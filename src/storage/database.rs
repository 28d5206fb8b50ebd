// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded reward database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `accounts`: user_id → serialized CustodialAccount
//! - `completions`: completion_id → serialized TaskCompletion
//! - `active_slots`: `user|task|date` → completion_id of the one non-failed
//!   completion for that key (the uniqueness constraint)
//! - `user_completion_index`: `user|!reserved_at_be|completion_id` → completion_id
//! - `pending_completions`: completion_id → reserved_at (unix millis)
//! - `reward_transactions`: tx_id → serialized RewardTransaction
//! - `audit_log`: `date|millis|event_id` → serialized AuditEvent

use std::path::Path;

use redb::{Database, TableDefinition};

// =============================================================================
// Table Definitions
// =============================================================================

pub(super) const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");

pub(super) const COMPLETIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("completions");

pub(super) const ACTIVE_SLOTS: TableDefinition<&str, &str> = TableDefinition::new("active_slots");

/// Key format: `user_id | inverted_millis_be | completion_id` for newest-first scans.
pub(super) const USER_COMPLETION_INDEX: TableDefinition<&[u8], &str> =
    TableDefinition::new("user_completion_index");

pub(super) const PENDING_COMPLETIONS: TableDefinition<&str, i64> =
    TableDefinition::new("pending_completions");

pub(super) const REWARD_TRANSACTIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("reward_transactions");

pub(super) const AUDIT_LOG: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_log");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// RewardDatabase
// =============================================================================

/// Embedded ACID store for accounts, completions, reward transactions and
/// the audit log. Operations are split across the sibling modules.
pub struct RewardDatabase {
    pub(super) db: Database,
}

impl RewardDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ACCOUNTS)?;
            let _ = write_txn.open_table(COMPLETIONS)?;
            let _ = write_txn.open_table(ACTIVE_SLOTS)?;
            let _ = write_txn.open_table(USER_COMPLETION_INDEX)?;
            let _ = write_txn.open_table(PENDING_COMPLETIONS)?;
            let _ = write_txn.open_table(REWARD_TRANSACTIONS)?;
            let _ = write_txn.open_table(AUDIT_LOG)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "Reward database opened");
        Ok(Self { db })
    }

    /// Cheap read probe for readiness checks.
    pub fn ping(&self) -> DbResult<()> {
        use redb::ReadableDatabase;
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(ACCOUNTS)?;
        Ok(())
    }
}

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Prefix shared by every index key of one user.
pub(super) fn user_prefix(user_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(user_id.len() + 1);
    prefix.extend_from_slice(user_id.as_bytes());
    prefix.push(b'|');
    prefix
}

/// Upper bound for a range scan over one user's prefix.
pub(super) fn user_prefix_end(user_id: &str) -> Vec<u8> {
    let mut end = user_prefix(user_id);
    // Past any inverted timestamp and completion id with this prefix
    end.extend_from_slice(&[0xFF; 20]);
    end
}

/// Build a `user | !millis_be | id` key; newer entries sort first.
pub(super) fn user_index_key(user_id: &str, timestamp_millis: i64, id: &str) -> Vec<u8> {
    let mut key = user_prefix(user_id);
    key.extend_from_slice(&(!(timestamp_millis as u64)).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(id.as_bytes());
    key
}

#[cfg(test)]
pub(crate) fn temp_db() -> (RewardDatabase, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = RewardDatabase::open(&dir.path().join("test.redb")).unwrap();
    (db, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rewards.redb");
        let db = RewardDatabase::open(&path).unwrap();
        assert!(path.exists());
        db.ping().unwrap();
    }

    #[test]
    fn index_key_orders_newest_first() {
        let old = user_index_key("user", 1_000, "c1");
        let new = user_index_key("user", 2_000, "c2");
        assert!(new < old, "Newer timestamps should sort first");
    }

    #[test]
    fn index_keys_stay_within_user_range() {
        let key = user_index_key("user", 1_700_000_000_000, "3f1c2a7e-5a43-4a8e-bd0c-1d8f3a2b9c01");
        assert!(key.as_slice() >= user_prefix("user").as_slice());
        assert!(key.as_slice() < user_prefix_end("user").as_slice());
    }
}
