// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for axum.
//!
//! Apply [`authenticate_request`] to a router subtree to authenticate
//! every request up front and make the [`Identity`] available to handlers
//! via request extensions (and the [`Auth`](crate::extractor::Auth)
//! extractor). Paths matching the configured excluded patterns pass
//! through untouched; the validator is never invoked for them.
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/api/reports", get(reports))
//!     .layer(middleware::from_fn_with_state(manager.clone(), authenticate_request))
//!     .with_state(manager);
//! ```
//!
//! Per-route role requirements use [`RoleGuard`]:
//!
//! ```rust,ignore
//! .route(
//!     "/api/admin",
//!     get(admin).layer(middleware::from_fn_with_state(
//!         RoleGuard::new(manager.clone(), RoleRequirement::all(["admin"])),
//!         require_roles,
//!     )),
//! )
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::{AUTHORIZATION, UPGRADE},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::claims::Identity;
use crate::error::AuthError;
use crate::extractor::bearer_token;
use crate::manager::AuthManager;
use crate::roles::RoleRequirement;

/// Extract the raw bearer token from a request.
///
/// HTTP requests carry it in the `Authorization` header. WebSocket
/// upgrade requests cannot always set headers from browsers, so those may
/// instead carry an `Authorization` query parameter.
fn raw_token(request: &Request) -> Result<String, AuthError> {
    if let Some(header) = request.headers().get(AUTHORIZATION) {
        let value = header.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
        return bearer_token(value).map(str::to_string);
    }

    let is_upgrade = request
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    if is_upgrade {
        if let Some(query) = request.uri().query() {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                if key == "Authorization" {
                    return bearer_token(&value).map(str::to_string);
                }
            }
        }
    }

    Err(AuthError::MissingAuthHeader)
}

/// Authenticate every non-excluded request and stash the identity in
/// request extensions.
pub async fn authenticate_request(
    State(manager): State<Arc<AuthManager>>,
    mut request: Request,
    next: Next,
) -> Response {
    if manager.is_excluded(request.uri().path()) {
        return next.run(request).await;
    }

    let token = match raw_token(&request) {
        Ok(token) => token,
        Err(err) => return err.into_response(),
    };

    match manager.authenticate(&token).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// State for the [`require_roles`] middleware: which manager decides, and
/// which roles the route demands.
#[derive(Clone)]
pub struct RoleGuard {
    manager: Arc<AuthManager>,
    requirement: RoleRequirement,
}

impl RoleGuard {
    pub fn new(manager: Arc<AuthManager>, requirement: RoleRequirement) -> Self {
        Self {
            manager,
            requirement,
        }
    }
}

/// Per-route authorization middleware.
///
/// Reuses an identity authenticated upstream when present, otherwise
/// authenticates the request itself, then enforces the guard's role
/// requirement.
pub async fn require_roles(
    State(guard): State<RoleGuard>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = match request.extensions().get::<Identity>().cloned() {
        Some(identity) => identity,
        None => {
            let token = match raw_token(&request) {
                Ok(token) => token,
                Err(err) => return err.into_response(),
            };
            match guard.manager.authenticate(&token).await {
                Ok(identity) => identity,
                Err(err) => return err.into_response(),
            }
        }
    };

    if let Err(err) = guard.manager.authorize(&identity, &guard.requirement) {
        return err.into_response();
    }

    request.extensions_mut().insert(identity);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopTokenCache;
    use crate::claims::{ProviderClaims, ResourceAccess};
    use crate::config::KeycloakAuthSettings;
    use crate::provider::{ProviderError, TokenVerifier};
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const TOKEN: &str = "aGVhZGVy.cGF5bG9hZA.c2ln";

    struct CountingVerifier {
        roles: Vec<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TokenVerifier for CountingVerifier {
        async fn verify_token(&self, _raw: &str) -> Result<ProviderClaims, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderClaims {
                sub: "u-1".to_string(),
                exp: 4_102_444_800,
                preferred_username: "alice".to_string(),
                iss: "http://kc/realms/apps".to_string(),
                azp: "svc".to_string(),
                aud: None,
                resource_access: HashMap::from([(
                    "svc".to_string(),
                    ResourceAccess {
                        roles: self.roles.iter().map(|r| r.to_string()).collect(),
                    },
                )]),
            })
        }
    }

    fn build(roles: Vec<&'static str>) -> (Arc<AuthManager>, Arc<CountingVerifier>) {
        let verifier = Arc::new(CountingVerifier {
            roles,
            calls: AtomicUsize::new(0),
        });
        let manager = Arc::new(
            AuthManager::new(
                KeycloakAuthSettings::default(),
                verifier.clone(),
                Arc::new(NoopTokenCache),
            )
            .unwrap(),
        );
        (manager, verifier)
    }

    fn app(manager: Arc<AuthManager>) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/api/whoami",
                get(|axum::Extension(identity): axum::Extension<Identity>| async move {
                    identity.username().to_string()
                }),
            )
            .layer(middleware::from_fn_with_state(
                manager.clone(),
                authenticate_request,
            ))
    }

    #[tokio::test]
    async fn excluded_path_never_invokes_validator() {
        let (manager, verifier) = build(vec![]);
        let response = app(manager)
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn protected_path_requires_token() {
        let (manager, _) = build(vec![]);
        let response = app(manager)
            .oneshot(
                HttpRequest::builder()
                    .uri("/api/whoami")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn authenticated_request_reaches_handler_with_identity() {
        let (manager, _) = build(vec!["reader"]);
        let response = app(manager)
            .oneshot(
                HttpRequest::builder()
                    .uri("/api/whoami")
                    .header("Authorization", format!("Bearer {TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"alice");
    }

    #[tokio::test]
    async fn websocket_upgrade_accepts_query_token() {
        let (manager, _) = build(vec![]);
        let request = HttpRequest::builder()
            .uri(format!("/api/whoami?Authorization=Bearer%20{TOKEN}"))
            .header("upgrade", "websocket")
            .body(Body::empty())
            .unwrap();
        let response = app(manager).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn role_guard_denies_missing_roles_with_403() {
        let (manager, _) = build(vec!["reader"]);
        let router = Router::new()
            .route("/api/admin", get(|| async { "secret" }))
            .layer(middleware::from_fn_with_state(
                RoleGuard::new(manager, RoleRequirement::all(["admin"])),
                require_roles,
            ));

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/api/admin")
                    .header("Authorization", format!("Bearer {TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn role_guard_admits_matching_roles() {
        let (manager, _) = build(vec!["admin"]);
        let router = Router::new()
            .route("/api/admin", get(|| async { "secret" }))
            .layer(middleware::from_fn_with_state(
                RoleGuard::new(manager, RoleRequirement::all(["admin"])),
                require_roles,
            ));

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/api/admin")
                    .header("Authorization", format!("Bearer {TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
