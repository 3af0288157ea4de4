// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # keycloak-rbac
//!
//! Bearer-token authentication and role-based authorization for axum
//! services, backed by a Keycloak identity provider.
//!
//! ## Auth Flow
//!
//! 1. A client sends `Authorization: Bearer <Keycloak JWT>`
//! 2. The [`AuthManager`]:
//!    - checks the validation cache (SHA-256 token fingerprint)
//!    - on miss, verifies the JWT against the realm's published JWKS,
//!      behind a circuit breaker isolating Keycloak outages
//!    - extracts `sub`, `preferred_username`, `exp` and the client roles
//!      from `resource_access` into immutable [`Claims`]
//! 3. Handlers receive a request-scoped [`Identity`] and check role
//!    requirements ([`RoleRequirement`]) against it
//!
//! ## Modules
//!
//! - `manager` - orchestration entry point ([`AuthManager`])
//! - `validator` - token validation pipeline
//! - `provider` - identity-provider client boundary
//! - `jwks` - realm key fetching and caching
//! - `cache` - validation cache contract and backends
//! - `breaker` - circuit breaker around the provider
//! - `roles` - pure RBAC checks
//! - `claims` - claims model and identity view
//! - `extractor` / `middleware` - axum integration
//!
//! ## Security
//!
//! - Tokens are never stored: cache keys are SHA-256 fingerprints
//! - Claims parsing fails closed on missing required fields
//! - A provider outage surfaces as a retryable 503, never as 401
//! - Debug mode (validation bypass) must be enabled explicitly

pub mod breaker;
pub mod cache;
pub mod claims;
pub mod config;
pub mod error;
pub mod extractor;
pub mod jwks;
pub mod manager;
pub mod middleware;
pub mod provider;
pub mod roles;
pub mod validator;

pub use breaker::{BreakerConfig, BreakerOpenError, BreakerState, CircuitBreaker};
pub use cache::{CachedValidation, MemoryTokenCache, NoopTokenCache, TokenCache};
pub use claims::{Claims, Identity, ProviderClaims};
pub use config::{ConfigError, KeycloakAuthSettings};
pub use error::AuthError;
pub use extractor::{Auth, OptionalAuth};
pub use manager::AuthManager;
pub use middleware::{authenticate_request, require_roles, RoleGuard};
pub use provider::{KeycloakVerifier, ProviderError, RejectionReason, TokenVerifier};
pub use roles::{check_roles, RoleCheck, RolePolicy, RoleRequirement};
pub use validator::TokenValidator;
