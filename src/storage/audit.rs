// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Account provisioning, reward settlement and reconciliation are recorded
//! in the `audit_log` table. Keys start with the UTC date so a day's events
//! are one range scan.

use chrono::{DateTime, NaiveDate, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{DbResult, RewardDatabase, AUDIT_LOG};

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Account events
    AccountCreated,
    VaultInitialized,

    // Reward events
    RewardSubmitted,
    RewardConfirmed,
    RewardFailed,
    RewardUnknown,

    // Reservation events
    ReservationReleased,
    ReservationSwept,

    // Admin events
    ReconciliationRun,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// User the event concerns (if any).
    pub user_id: Option<String>,
    /// Resource affected (completion_id, tx_id, address).
    pub resource_id: Option<String>,
    /// Resource type (completion, transaction, account).
    pub resource_type: Option<String>,
    /// Additional details as JSON.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            resource_id: None,
            resource_type: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    fn storage_key(&self) -> String {
        format!(
            "{}|{:020}|{}",
            self.timestamp.format("%Y-%m-%d"),
            self.timestamp.timestamp_millis(),
            self.event_id
        )
    }
}

impl RewardDatabase {
    /// Append an audit event.
    pub fn log_audit(&self, event: &AuditEvent) -> DbResult<()> {
        let json = serde_json::to_vec(event)?;
        let key = event.storage_key();

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_LOG)?;
            table.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Append an audit event; a failure is logged, never propagated.
    pub fn audit(&self, event: AuditEvent) {
        if let Err(e) = self.log_audit(&event) {
            tracing::warn!(
                event_type = ?event.event_type,
                error = %e,
                "Failed to write audit event"
            );
        }
    }

    /// Read audit events for a specific UTC date, oldest first.
    pub fn read_audit_events(&self, date: NaiveDate) -> DbResult<Vec<AuditEvent>> {
        let start = format!("{}|", date.format("%Y-%m-%d"));
        let end = format!("{}}}", date.format("%Y-%m-%d"));

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        let mut events = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            events.push(serde_json::from_slice(value.value())?);
        }
        Ok(events)
    }

    /// Audit events of one user on a given date.
    pub fn search_audit_by_user(&self, user_id: &str, date: NaiveDate) -> DbResult<Vec<AuditEvent>> {
        Ok(self
            .read_audit_events(date)?
            .into_iter()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::temp_db;

    #[test]
    fn create_audit_event() {
        let event = AuditEvent::new(AuditEventType::AccountCreated)
            .with_user("user_123")
            .with_resource("account", "0xabc");

        assert_eq!(event.event_type, AuditEventType::AccountCreated);
        assert_eq!(event.user_id, Some("user_123".to_string()));
        assert_eq!(event.resource_type, Some("account".to_string()));
        assert_eq!(event.resource_id, Some("0xabc".to_string()));
        assert!(event.success);
    }

    #[test]
    fn failed_event() {
        let event = AuditEvent::new(AuditEventType::RewardFailed)
            .with_user("user_123")
            .failed("Mint reverted");

        assert!(!event.success);
        assert_eq!(event.error, Some("Mint reverted".to_string()));
    }

    #[test]
    fn log_and_read_events_in_order() {
        let (db, _dir) = temp_db();

        let first = AuditEvent::new(AuditEventType::RewardSubmitted)
            .with_user("user_1")
            .with_resource("transaction", "0x01");
        let mut second = AuditEvent::new(AuditEventType::RewardConfirmed)
            .with_user("user_1")
            .with_resource("transaction", "0x01");
        second.timestamp = first.timestamp + chrono::Duration::milliseconds(5);

        db.log_audit(&second).unwrap();
        db.log_audit(&first).unwrap();

        let events = db.read_audit_events(first.timestamp.date_naive()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::RewardSubmitted);
        assert_eq!(events[1].event_type, AuditEventType::RewardConfirmed);
    }

    #[test]
    fn read_is_scoped_to_date() {
        let (db, _dir) = temp_db();
        let mut yesterday = AuditEvent::new(AuditEventType::ReconciliationRun);
        yesterday.timestamp = Utc::now() - chrono::Duration::days(1);
        db.log_audit(&yesterday).unwrap();
        db.log_audit(&AuditEvent::new(AuditEventType::ReconciliationRun))
            .unwrap();

        let today = db.read_audit_events(Utc::now().date_naive()).unwrap();
        assert_eq!(today.len(), 1);
    }

    #[test]
    fn search_by_user() {
        let (db, _dir) = temp_db();
        db.audit(AuditEvent::new(AuditEventType::AccountCreated).with_user("user_target"));
        db.audit(AuditEvent::new(AuditEventType::AccountCreated).with_user("user_other"));

        let events = db
            .search_audit_by_user("user_target", Utc::now().date_naive())
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, Some("user_target".to_string()));
    }
}
