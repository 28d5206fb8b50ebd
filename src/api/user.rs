// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use crate::{
    auth::Auth,
    error::{ApiError, ErrorBody},
    models::{AccountResponse, BalanceResponse},
    state::AppState,
};

/// Reward token balance of the caller's vault.
///
/// A caller without a custodial account has a zero balance. An unreachable
/// ledger is reported as 503, never as zero.
#[utoipa::path(
    get,
    path = "/v1/user/balance",
    tag = "User",
    responses(
        (status = 200, description = "Vault balance", body = BalanceResponse),
        (status = 503, description = "Ledger unavailable", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_balance(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.engine.balance(&user.user_id).await?;

    Ok(Json(BalanceResponse {
        balance_formatted: balance.balance.format_units(state.token_decimals()),
        balance: balance.balance,
        currency: state.token_symbol.clone(),
        has_account: balance.address.is_some(),
        address: balance.address,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/user/account",
    tag = "User",
    responses(
        (status = 200, description = "Custodial account", body = AccountResponse),
        (status = 404, description = "No account yet; one is created with the first reward", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_account(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<AccountResponse>, ApiError> {
    state
        .engine
        .account(&user.user_id)?
        .map(|account| Json(AccountResponse::from(account)))
        .ok_or_else(|| ApiError::not_found("No custodial account yet"))
}
