// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated users.
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};

use super::{claims::SessionClaims, AuthError, AuthenticatedUser};
use crate::state::{AppState, AuthConfig};

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Extractor for authenticated users.
///
/// ## Authentication Modes
///
/// - **Production mode** (`SESSION_JWT_SECRET` set): HS256 signature, expiry
///   and not-before are verified
/// - **Development mode**: structure and expiry only, no signature check
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(Auth(user));
        }

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidAuthHeader)?;

        let user = verify_jwt(token, &state.auth_config)?;
        parts.extensions.insert(user.clone());
        Ok(Auth(user))
    }
}

fn verify_jwt(token: &str, auth_config: &AuthConfig) -> Result<AuthenticatedUser, AuthError> {
    let claims = match &auth_config.decoding_key {
        Some(key) => verify_jwt_production(token, key)?,
        None => verify_jwt_development(token)?,
    };
    AuthenticatedUser::from_claims(claims)
}

fn verify_jwt_production(token: &str, key: &DecodingKey) -> Result<SessionClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = CLOCK_SKEW_LEEWAY;
    validation.validate_aud = false;
    validation.validate_nbf = true;

    decode::<SessionClaims>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
            _ => AuthError::MalformedToken,
        })
}

/// WARNING: development environments only.
fn verify_jwt_development(token: &str) -> Result<SessionClaims, AuthError> {
    let claims = jsonwebtoken::dangerous::insecure_decode::<SessionClaims>(token)
        .map_err(|_| AuthError::MalformedToken)?
        .claims;

    let now = chrono::Utc::now().timestamp();
    if claims.exp > 0 && claims.exp < now - CLOCK_SKEW_LEEWAY as i64 {
        return Err(AuthError::TokenExpired);
    }
    Ok(claims)
}

/// Extractor that requires the admin role.
pub struct AdminOnly(pub AuthenticatedUser);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(user) = Auth::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            return Err(AuthError::InsufficientPermissions);
        }

        Ok(AdminOnly(user))
    }
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    /// Unsigned token accepted in development mode.
    pub fn unsigned(user_id: &str, role: &str) -> String {
        let header = r#"{"alg":"HS256","typ":"JWT"}"#;
        let claims = format!(
            r#"{{"sub":"{user_id}","iat":1609459200,"exp":9999999999,"role":"{role}","sid":"sess_123"}}"#
        );
        format!(
            "{}.{}.fake_signature",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        )
    }
}
