// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication and authorization errors.
//!
//! Every failure the crate can surface maps to exactly one of these
//! variants, so the HTTP integration layer can pick a status code without
//! inspecting internals. Provider SDK and network errors never leak
//! unclassified: the validator translates them before they reach a caller.

use std::collections::BTreeSet;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Authentication / authorization failure.
///
/// 401-class variants mean the bearer token could not be accepted;
/// 403-class variants mean the token was accepted but the identity lacks
/// the required roles.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization` header (or WebSocket query parameter) present.
    #[error("Authorization header is required")]
    MissingAuthHeader,

    /// Header present but not `Bearer <token>`.
    #[error("Invalid authorization header format (expected 'Bearer <token>')")]
    InvalidAuthHeader,

    /// Token is malformed, carries a bad signature, or names an unknown
    /// issuer/key. Never retried by callers.
    #[error("Token is invalid")]
    InvalidToken,

    /// Token is structurally valid but past its expiry.
    #[error("Token has expired")]
    TokenExpired,

    /// Transient authentication failure: identity provider unreachable,
    /// timed out, or circuit breaker open. Safe for callers to retry
    /// after backoff.
    #[error("Authentication unavailable: {reason}")]
    Authentication { reason: String },

    /// Identity is valid but the operation is not permitted for it.
    #[error("Authorization failed: {reason}")]
    Authorization { reason: String },

    /// Identity is valid but lacks one or more required roles.
    #[error("Missing required roles: {}", missing.iter().cloned().collect::<Vec<_>>().join(", "))]
    PermissionDenied { missing: BTreeSet<String> },
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Transient failure with a service-unavailable reason.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::InvalidToken => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::Authentication { .. } => "authentication_error",
            AuthError::Authorization { .. } => "authorization_error",
            AuthError::PermissionDenied { .. } => "permission_denied",
        }
    }

    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::InvalidToken
            | AuthError::TokenExpired => StatusCode::UNAUTHORIZED,
            // Transient provider outages are 503: the request may succeed
            // on retry, which 401 would wrongly deny.
            AuthError::Authentication { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Authorization { .. } | AuthError::PermissionDenied { .. } => {
                StatusCode::FORBIDDEN
            }
        }
    }

    /// Whether a caller retry can possibly succeed without any change on
    /// the caller's side.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Authentication { .. })
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn invalid_token_returns_401() {
        let response = AuthError::InvalidToken.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error_code"], "invalid_token");
    }

    #[tokio::test]
    async fn permission_denied_returns_403() {
        let err = AuthError::PermissionDenied {
            missing: BTreeSet::from(["admin".to_string()]),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn transient_failure_returns_503() {
        let response = AuthError::unavailable("keycloak unreachable").into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn missing_roles_listed_in_message() {
        let err = AuthError::PermissionDenied {
            missing: BTreeSet::from(["editor".to_string(), "admin".to_string()]),
        };
        // BTreeSet keeps the listing deterministic.
        assert_eq!(err.to_string(), "Missing required roles: admin, editor");
    }

    #[test]
    fn only_service_errors_are_transient() {
        assert!(AuthError::unavailable("timeout").is_transient());
        assert!(!AuthError::InvalidToken.is_transient());
        assert!(!AuthError::TokenExpired.is_transient());
    }
}
