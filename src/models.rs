// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Data Models
//!
//! Shared value types and the request/response structures of the REST API.
//! API types derive `Serialize`, `Deserialize`, and `ToSchema` for JSON
//! handling and OpenAPI documentation.
//!
//! ## Amounts
//!
//! [`TokenAmount`] carries token base units as a `U256` and always crosses
//! the wire as a decimal string, so no precision is lost in JSON clients.
//! The `*_formatted` fields next to it are display strings only.

use std::str::FromStr;

use alloy::primitives::U256;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;

use crate::storage::{CompletionStatus, CustodialAccount, ProvisioningState, TaskCompletion};
use crate::tasks::ProofVerdict;

// =============================================================================
// User Identity
// =============================================================================

/// Stable user identifier issued by the identity provider (`sub` claim).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        UserId(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_string())
    }
}

// =============================================================================
// Token Amounts
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Invalid amount format: {0}")]
    InvalidFormat(String),

    #[error("Too many decimal places (max {0})")]
    TooManyDecimals(u8),

    #[error("Amount overflow")]
    Overflow,
}

/// Non-negative token amount in base units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, ToSchema)]
#[schema(value_type = String, example = "10000000000000000000")]
pub struct TokenAmount(U256);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(U256::ZERO);

    pub fn from_base_units(units: U256) -> Self {
        Self(units)
    }

    pub fn base_units(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, other: TokenAmount) -> Option<TokenAmount> {
        self.0.checked_add(other.0).map(TokenAmount)
    }

    pub fn saturating_add(self, other: TokenAmount) -> TokenAmount {
        TokenAmount(self.0.saturating_add(other.0))
    }

    /// Parse a human-readable amount ("1.5") into base units.
    pub fn parse_units(amount: &str, decimals: u8) -> Result<Self, AmountError> {
        let amount = amount.trim();
        let (whole, fraction) = match amount.split_once('.') {
            Some((w, f)) => (w, f),
            None => (amount, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(AmountError::InvalidFormat(amount.to_string()));
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(AmountError::InvalidFormat(amount.to_string()));
        }
        if fraction.len() > decimals as usize {
            return Err(AmountError::TooManyDecimals(decimals));
        }

        let whole = if whole.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(whole, 10).map_err(|_| AmountError::Overflow)?
        };
        // Pad with zeros to match decimals
        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        let fraction = if padded.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(&padded, 10).map_err(|_| AmountError::Overflow)?
        };

        let multiplier = U256::from(10u64)
            .checked_pow(U256::from(decimals))
            .ok_or(AmountError::Overflow)?;
        let total = whole
            .checked_mul(multiplier)
            .and_then(|w| w.checked_add(fraction))
            .ok_or(AmountError::Overflow)?;

        Ok(Self(total))
    }

    /// Format base units as a human-readable amount, trimming trailing zeros.
    pub fn format_units(&self, decimals: u8) -> String {
        if self.0.is_zero() {
            return "0".to_string();
        }

        let divisor = U256::from(10u64).pow(U256::from(decimals));
        let whole = self.0 / divisor;
        let remainder = self.0 % divisor;

        if remainder.is_zero() {
            return whole.to_string();
        }
        let decimal_str = format!("{:0>width$}", remainder.to_string(), width = decimals as usize);
        format!("{}.{}", whole, decimal_str.trim_end_matches('0'))
    }
}

impl std::fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TokenAmount {
    type Err = AmountError;

    /// Parse a base-unit decimal string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(AmountError::InvalidFormat(s.to_string()));
        }
        U256::from_str_radix(s, 10)
            .map(TokenAmount)
            .map_err(|_| AmountError::Overflow)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(TokenAmount::from(n)),
        }
    }
}

// =============================================================================
// Task Models
// =============================================================================

/// Request to settle a completed task.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompleteTaskRequest {
    /// Catalog task identifier.
    pub task_id: String,
    /// Verdict of the proof analysis step.
    pub proof: ProofVerdict,
}

/// Receipt of a confirmed reward.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompleteTaskResponse {
    pub completion_id: String,
    pub task_id: String,
    /// Confirmed mint transaction.
    pub transaction_id: String,
    /// Explorer link for the mint transaction.
    pub explorer_url: String,
    /// Reward in token base units.
    pub reward: TokenAmount,
    pub reward_formatted: String,
    /// Vault balance after the reward, in base units. Absent when the
    /// ledger could not be read right after confirmation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<TokenAmount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance_formatted: Option<String>,
    /// Custodial account that received the reward.
    pub address: String,
}

/// A catalog task with the caller's status for today.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DailyTaskView {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub reward: TokenAmount,
    pub reward_formatted: String,
    pub category: String,
    pub platform: String,
    /// Status of today's completion, if one is pending or confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CompletionStatus>,
    /// Whether the reward for today has been confirmed.
    pub completed: bool,
}

/// Daily task board for the current ledger day.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DailyTasksResponse {
    pub date: NaiveDate,
    pub tasks: Vec<DailyTaskView>,
    /// Sum of rewards over all tasks still available today.
    pub available_rewards_formatted: String,
    /// Sum of confirmed rewards earned today.
    pub earned_today_formatted: String,
}

/// Confirmed rewards for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub tasks_completed: u32,
    pub total: TokenAmount,
    pub total_formatted: String,
}

/// Completion history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    pub completions: Vec<TaskCompletion>,
    /// Per-day confirmed totals, newest day first.
    pub daily_totals: Vec<DailyTotal>,
}

// =============================================================================
// User Models
// =============================================================================

/// Token balance of the caller's custodial vault.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    /// Balance in token base units.
    pub balance: TokenAmount,
    pub balance_formatted: String,
    /// Token symbol.
    pub currency: String,
    /// Custodial account address, if provisioned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub has_account: bool,
}

/// Public view of a custodial account. Never includes key material.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountResponse {
    pub user_id: UserId,
    pub address: String,
    pub state: ProvisioningState,
    pub vault_initialized: bool,
    pub created_at: DateTime<Utc>,
    pub funding_tx_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault_tx_id: Option<String>,
}

impl From<CustodialAccount> for AccountResponse {
    fn from(account: CustodialAccount) -> Self {
        Self {
            vault_initialized: account.vault_initialized(),
            user_id: account.user_id,
            address: account.address,
            state: account.state,
            created_at: account.created_at,
            funding_tx_id: account.funding_tx_id,
            vault_tx_id: account.vault_tx_id,
        }
    }
}

// =============================================================================
// Admin Models
// =============================================================================

/// Result of a sweep and reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReconcileResponse {
    /// Stale reservations (no transaction submitted) released.
    pub swept_reservations: usize,
    /// Pending rewards found confirmed on the ledger.
    pub confirmed: usize,
    /// Pending rewards found reverted; their slots were released.
    pub reverted: usize,
    /// Pending rewards still not final.
    pub still_pending: usize,
    /// Signed rewards the node did not know, broadcast again from the journal.
    pub rebroadcast: usize,
    /// Signed rewards that never reached the ledger; their slots were released.
    pub dropped: usize,
    /// Status queries that failed and will be retried.
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_from_and_display() {
        let from_str: UserId = "abc".into();
        assert_eq!(from_str.as_str(), "abc");

        let from_string: UserId = String::from("def").into();
        assert_eq!(from_string.to_string(), "def");
    }

    #[test]
    fn parse_units_whole_and_decimal() {
        assert_eq!(
            TokenAmount::parse_units("1", 18).unwrap(),
            TokenAmount::from(1_000_000_000_000_000_000u64)
        );
        assert_eq!(
            TokenAmount::parse_units("1.5", 18).unwrap(),
            TokenAmount::from(1_500_000_000_000_000_000u64)
        );
        assert_eq!(
            TokenAmount::parse_units("0.001", 6).unwrap(),
            TokenAmount::from(1_000u64)
        );
        assert_eq!(TokenAmount::parse_units(".5", 1).unwrap(), TokenAmount::from(5u64));
    }

    #[test]
    fn parse_units_rejects_bad_input() {
        assert!(matches!(
            TokenAmount::parse_units("1.0000001", 6),
            Err(AmountError::TooManyDecimals(6))
        ));
        assert!(matches!(
            TokenAmount::parse_units("-1", 6),
            Err(AmountError::InvalidFormat(_))
        ));
        assert!(matches!(
            TokenAmount::parse_units("1.2.3", 6),
            Err(AmountError::InvalidFormat(_))
        ));
        assert!(matches!(
            TokenAmount::parse_units("", 6),
            Err(AmountError::InvalidFormat(_))
        ));
    }

    #[test]
    fn format_units_trims_trailing_zeros() {
        assert_eq!(TokenAmount::from(1_000_000u64).format_units(6), "1");
        assert_eq!(TokenAmount::from(1_500_000u64).format_units(6), "1.5");
        assert_eq!(TokenAmount::from(1u64).format_units(6), "0.000001");
        assert_eq!(TokenAmount::ZERO.format_units(18), "0");
        assert_eq!(TokenAmount::from(42u64).format_units(0), "42");
    }

    #[test]
    fn amount_serializes_as_decimal_string() {
        let json = serde_json::to_string(&TokenAmount::from(1234u64)).unwrap();
        assert_eq!(json, r#""1234""#);

        let from_string: TokenAmount = serde_json::from_str(r#""1234""#).unwrap();
        let from_number: TokenAmount = serde_json::from_str("1234").unwrap();
        assert_eq!(from_string, from_number);

        assert!(serde_json::from_str::<TokenAmount>(r#""12.5""#).is_err());
    }
}
