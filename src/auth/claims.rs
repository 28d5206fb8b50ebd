// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session token claims and the authenticated user.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{error::AuthError, roles::Role};
use crate::models::UserId;

/// Claims of a session token issued by the identity provider.
///
/// The user id is `sub`; tokens from the older session format carry it
/// as `uid` instead.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
}

/// The caller of a request, as established by the session token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Token expiration (Unix seconds)
    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    pub fn from_claims(claims: SessionClaims) -> Result<Self, AuthError> {
        let user_id = claims
            .sub
            .or(claims.uid)
            .filter(|id| !id.trim().is_empty())
            .ok_or(AuthError::MissingSubject)?;

        let role = claims
            .role
            .as_deref()
            .and_then(Role::parse)
            .unwrap_or_default();

        Ok(Self {
            user_id: UserId::from(user_id),
            role,
            session_id: claims.sid,
            expires_at: claims.exp,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
