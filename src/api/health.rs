// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::time::Duration;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Upper bound on the ledger probe so a hung RPC endpoint cannot stall probes.
const LEDGER_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Health check response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    /// Individual health checks and their results.
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Reward database status.
    pub database: String,
    /// Ledger RPC status ("ok", "unavailable" or "timeout").
    pub ledger: String,
    /// Latest block height seen by the ledger probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_block: Option<u64>,
    /// Network the server settles rewards on.
    pub network: String,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

fn check_database(state: &AppState) -> String {
    match state.db.ping() {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            "unavailable".to_string()
        }
    }
}

async fn check_ledger(state: &AppState) -> (String, Option<u64>) {
    match tokio::time::timeout(LEDGER_PROBE_TIMEOUT, state.ledger.health()).await {
        Ok(Ok(block)) => ("ok".to_string(), Some(block)),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Ledger health check failed");
            ("unavailable".to_string(), None)
        }
        Err(_) => ("timeout".to_string(), None),
    }
}

/// Health check endpoint handler.
///
/// Returns 200 if all checks pass, 503 if any check fails.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse),
        (status = 503, description = "Service is unhealthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let database = check_database(&state);
    let (ledger, latest_block) = check_ledger(&state).await;
    let all_ok = database == "ok" && ledger == "ok";

    let response = ReadyResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            database,
            ledger,
            latest_block,
            network: state.network.name.clone(),
        },
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler. Same checks as `/health`.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(state: State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    health(state).await
}
