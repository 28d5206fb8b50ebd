// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use crate::{
    auth::Auth,
    error::{ApiError, ErrorBody},
    models::{CompleteTaskRequest, CompleteTaskResponse, DailyTasksResponse, HistoryResponse},
    state::AppState,
};

/// Settle a completed task: verify the proof verdict, then mint the reward
/// into the caller's custodial vault and wait for it to become final.
///
/// A task pays out at most once per user per ledger day. If finality cannot
/// be determined in time the call returns 202 with the transaction id and
/// the reward is settled by background reconciliation.
#[utoipa::path(
    post,
    path = "/v1/tasks/complete",
    tag = "Tasks",
    request_body = CompleteTaskRequest,
    responses(
        (status = 200, description = "Reward confirmed", body = CompleteTaskResponse),
        (status = 202, description = "Reward submitted, finality not yet known", body = ErrorBody),
        (status = 400, description = "Malformed request", body = ErrorBody),
        (status = 404, description = "Unknown task", body = ErrorBody),
        (status = 409, description = "Task already completed today", body = ErrorBody),
        (status = 422, description = "Proof rejected", body = ErrorBody),
        (status = 502, description = "Reward transaction failed", body = ErrorBody),
        (status = 503, description = "Account provisioning unavailable", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn complete_task(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<CompleteTaskRequest>,
) -> Result<Json<CompleteTaskResponse>, ApiError> {
    let task_id = request.task_id.trim();
    if task_id.is_empty() {
        return Err(ApiError::bad_request("task_id is required"));
    }

    let receipt = state
        .engine
        .settle(&user.user_id, task_id, request.proof)
        .await?;

    let decimals = state.token_decimals();
    Ok(Json(CompleteTaskResponse {
        explorer_url: state.network.tx_url(&receipt.transaction_id),
        reward_formatted: receipt.reward_amount.format_units(decimals),
        new_balance_formatted: receipt.new_balance.map(|b| b.format_units(decimals)),
        completion_id: receipt.completion_id,
        task_id: receipt.task_id,
        transaction_id: receipt.transaction_id,
        reward: receipt.reward_amount,
        new_balance: receipt.new_balance,
        address: receipt.address,
    }))
}

/// Today's task board for the caller.
#[utoipa::path(
    get,
    path = "/v1/tasks/daily",
    tag = "Tasks",
    responses(
        (status = 200, description = "Catalog tasks with today's status", body = DailyTasksResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn daily_tasks(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<DailyTasksResponse>, ApiError> {
    Ok(Json(state.engine.daily_tasks(&user.user_id)?))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/history",
    tag = "Tasks",
    responses(
        (status = 200, description = "Completion history, newest first", body = HistoryResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn completion_history(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<HistoryResponse>, ApiError> {
    Ok(Json(state.engine.completion_history(&user.user_id)?))
}
