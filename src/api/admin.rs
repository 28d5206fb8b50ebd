// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only API endpoints.
//!
//! These endpoints require the Admin role and provide:
//! - On-demand reconciliation of pending rewards
//! - System statistics
//! - Custodial account lookup for any user
//! - Audit log queries

use std::sync::LazyLock;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::AdminOnly,
    error::ApiError,
    models::{AccountResponse, ReconcileResponse, UserId},
    state::AppState,
    storage::{AuditEvent, AuditEventType},
};

/// Widest date range a single audit query may scan.
const MAX_AUDIT_RANGE_DAYS: i64 = 31;
const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1000;

static SERVER_START: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Pin the uptime origin; call once at startup.
pub fn init_server_start_time() {
    LazyLock::force(&SERVER_START);
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct SystemStatsResponse {
    /// Custodial accounts created.
    pub total_accounts: u64,
    /// Completions still pending (reserved or awaiting finality).
    pub pending_completions: usize,
    /// Pending completions with a submitted reward transaction.
    pub awaiting_finality: usize,
    /// Tasks in the catalog.
    pub catalog_tasks: usize,
    pub uptime_seconds: u64,
    pub timestamp: String,
}

/// Query parameters for audit log search.
#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditQueryParams {
    /// Start date (YYYY-MM-DD, UTC). Defaults to today.
    pub start_date: Option<String>,
    /// End date (YYYY-MM-DD, UTC). Defaults to start_date.
    pub end_date: Option<String>,
    pub user_id: Option<String>,
    /// Event type (snake_case, e.g. `reward_confirmed`).
    pub event_type: Option<String>,
    /// Maximum results (default 100, max 1000).
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    pub events: Vec<AuditEvent>,
    /// Matching events before pagination.
    pub total: usize,
    pub has_more: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Run a sweep and reconciliation pass now.
///
/// Releases stale unsubmitted reservations and polls every pending reward
/// transaction once. Admin only.
#[utoipa::path(
    post,
    path = "/v1/admin/reconcile",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Reconciliation report", body = ReconcileResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn reconcile(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    info!(admin = %admin.user_id, "Manual reconciliation requested");
    Ok(Json(state.engine.reconcile().await?))
}

#[utoipa::path(
    get,
    path = "/v1/admin/stats",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "System statistics", body = SystemStatsResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn get_system_stats(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
) -> Result<Json<SystemStatsResponse>, ApiError> {
    let pending = state.db.list_pending_completions()?;
    let awaiting_finality = pending.iter().filter(|c| c.transaction_id.is_some()).count();

    Ok(Json(SystemStatsResponse {
        total_accounts: state.db.count_accounts()?,
        pending_completions: pending.len(),
        awaiting_finality,
        catalog_tasks: state.engine.catalog().len(),
        uptime_seconds: SERVER_START.elapsed().as_secs(),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

/// Custodial account of any user. Admin only.
#[utoipa::path(
    get,
    path = "/v1/admin/accounts/{user_id}",
    tag = "Admin",
    params(("user_id" = String, Path, description = "User id (token subject)")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Custodial account", body = AccountResponse),
        (status = 404, description = "User has no account")
    )
)]
pub async fn get_user_account(
    AdminOnly(_admin): AdminOnly,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AccountResponse>, ApiError> {
    let user_id = UserId::from(user_id);
    state
        .engine
        .account(&user_id)?
        .map(|account| Json(AccountResponse::from(account)))
        .ok_or_else(|| ApiError::not_found(format!("No account for user {user_id}")))
}

/// Query audit logs.
///
/// Filters by date range, user id and event type. Admin only.
#[utoipa::path(
    get,
    path = "/v1/admin/audit/events",
    tag = "Admin",
    params(AuditQueryParams),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Audit events", body = AuditLogResponse),
        (status = 400, description = "Invalid query parameters"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn query_audit_logs(
    AdminOnly(_admin): AdminOnly,
    Query(params): Query<AuditQueryParams>,
    State(state): State<AppState>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    let start = match params.start_date.as_deref() {
        Some(raw) => parse_date(raw, "start_date")?,
        None => Utc::now().date_naive(),
    };
    let end = match params.end_date.as_deref() {
        Some(raw) => parse_date(raw, "end_date")?,
        None => start,
    };
    if end < start {
        return Err(ApiError::bad_request("end_date is before start_date"));
    }
    if (end - start).num_days() >= MAX_AUDIT_RANGE_DAYS {
        return Err(ApiError::bad_request(format!(
            "Date range may span at most {MAX_AUDIT_RANGE_DAYS} days"
        )));
    }

    let event_type = params
        .event_type
        .as_deref()
        .map(|raw| {
            serde_json::from_value::<AuditEventType>(serde_json::Value::String(raw.to_string()))
                .map_err(|_| ApiError::bad_request(format!("Unknown event_type {raw:?}")))
        })
        .transpose()?;

    let mut events = Vec::new();
    for date in start.iter_days().take_while(|d| *d <= end) {
        events.extend(state.db.read_audit_events(date)?);
    }

    if let Some(user_id) = &params.user_id {
        events.retain(|e| e.user_id.as_deref() == Some(user_id.as_str()));
    }
    if let Some(event_type) = &event_type {
        events.retain(|e| &e.event_type == event_type);
    }

    let total = events.len();
    let limit = params.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).min(MAX_AUDIT_LIMIT);
    let offset = params.offset.unwrap_or(0);
    let has_more = offset.saturating_add(limit) < total;
    let events = events.into_iter().skip(offset).take(limit).collect();

    Ok(Json(AuditLogResponse {
        events,
        total,
        has_more,
    }))
}

fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(format!("Invalid {field} format. Use YYYY-MM-DD.")))
}
