// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::settlement::SettlementError;
use crate::storage::DbError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error_code: &'static str,
    /// Set while a reward transaction is still awaiting finality
    pub transaction_id: Option<String>,
}

/// JSON body of every error response.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, error_code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error_code,
            transaction_id: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "unprocessable", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::ProofRejected(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "proof_rejected", err.to_string())
            }
            SettlementError::AlreadyCompleted { .. } => {
                Self::new(StatusCode::CONFLICT, "already_completed", err.to_string())
            }
            SettlementError::TaskNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "task_not_found", err.to_string())
            }
            SettlementError::Unknown { ref transaction_id } => Self {
                status: StatusCode::ACCEPTED,
                message: err.to_string(),
                error_code: "settlement_pending",
                transaction_id: Some(transaction_id.clone()),
            },
            SettlementError::Settlement(_) => {
                Self::new(StatusCode::BAD_GATEWAY, "settlement_failed", err.to_string())
            }
            SettlementError::Provisioning(_) => {
                tracing::warn!(error = %err, "Account provisioning unavailable");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "provisioning_unavailable",
                    err.to_string(),
                )
            }
            SettlementError::BalanceUnavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "balance_unavailable",
                err.to_string(),
            ),
            SettlementError::Crypto(_) | SettlementError::Storage(_) => {
                tracing::error!(error = %err, "Internal error while serving request");
                Self::internal("Internal server error")
            }
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        SettlementError::Storage(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.error_code.to_string(),
            transaction_id: self.transaction_id,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CompletionStatus;
    use axum::body::to_bytes;
    use chrono::NaiveDate;

    #[test]
    fn constructors_set_status_and_message() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.message, "missing");

        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.error_code, "bad_request");

        let unp = ApiError::unprocessable("oops");
        assert_eq!(unp.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(unp.message, "oops");
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data","error_code":"bad_request"}"#);
    }

    #[test]
    fn settlement_errors_map_to_statuses() {
        let cases = [
            (SettlementError::ProofRejected("low".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (SettlementError::TaskNotFound("x".into()), StatusCode::NOT_FOUND),
            (SettlementError::Settlement("reverted".into()), StatusCode::BAD_GATEWAY),
            (
                SettlementError::BalanceUnavailable("rpc down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                SettlementError::AlreadyCompleted {
                    task_id: "medium-blog".into(),
                    date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                    status: CompletionStatus::Confirmed,
                },
                StatusCode::CONFLICT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[tokio::test]
    async fn unknown_outcome_carries_transaction_id() {
        let err = ApiError::from(SettlementError::Unknown {
            transaction_id: "0xabc".into(),
        });
        assert_eq!(err.status, StatusCode::ACCEPTED);

        let response = err.into_response();
        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error_code"], "settlement_pending");
        assert_eq!(body["transaction_id"], "0xabc");
    }
}
