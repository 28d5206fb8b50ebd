// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization header is required")]
    MissingAuthHeader,

    #[error("Invalid authorization header format (expected 'Bearer <token>')")]
    InvalidAuthHeader,

    #[error("Token is malformed")]
    MalformedToken,

    #[error("Token signature is invalid")]
    InvalidSignature,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token is not yet valid")]
    TokenNotYetValid,

    #[error("Token carries no user id")]
    MissingSubject,

    #[error("Insufficient permissions for this operation")]
    InsufficientPermissions,
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: &'static str,
}

impl AuthError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::MissingSubject => "missing_subject",
            AuthError::InsufficientPermissions => "insufficient_permissions",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InsufficientPermissions => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code(),
        });
        (status, body).into_response()
    }
}
