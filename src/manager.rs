// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication manager: the single public surface the framework
//! integration calls.
//!
//! One manager instance is constructed at startup with its collaborators
//! injected, lives for the process, and is shared across all concurrent
//! requests (wrap in an `Arc`). There is no ambient global: tests
//! substitute fake verifiers and caches through the constructor.

use std::sync::Arc;

use regex::RegexSet;

use crate::breaker::BreakerState;
use crate::cache::{MemoryTokenCache, TokenCache};
use crate::claims::Identity;
use crate::config::{ConfigError, KeycloakAuthSettings};
use crate::error::AuthError;
use crate::provider::{KeycloakVerifier, TokenVerifier};
use crate::roles::{check_roles, RoleCheck, RolePolicy, RoleRequirement};
use crate::validator::TokenValidator;

/// Orchestrates token validation and role authorization.
pub struct AuthManager {
    validator: TokenValidator,
    excluded_paths: RegexSet,
    default_policy: RolePolicy,
}

impl AuthManager {
    /// Build a manager with injected collaborators.
    ///
    /// Settings are validated eagerly; a bad excluded-path pattern or
    /// breaker configuration fails construction rather than the first
    /// request.
    pub fn new(
        settings: KeycloakAuthSettings,
        verifier: Arc<dyn TokenVerifier>,
        cache: Arc<dyn TokenCache>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let excluded_paths = settings.excluded_path_set()?;
        tracing::info!(
            issuer = %settings.issuer(),
            client_id = %settings.client_id,
            debug = settings.debug,
            "auth manager initialized"
        );
        Ok(Self {
            validator: TokenValidator::new(&settings, verifier, cache),
            excluded_paths,
            default_policy: settings.default_role_policy,
        })
    }

    /// Build a manager wired to Keycloak with the in-process cache.
    pub fn keycloak(settings: KeycloakAuthSettings) -> Result<Self, ConfigError> {
        let verifier = Arc::new(KeycloakVerifier::new(&settings));
        Self::new(settings, verifier, Arc::new(MemoryTokenCache::default()))
    }

    /// Authenticate a raw bearer token into a request-scoped identity.
    pub async fn authenticate(&self, raw_token: &str) -> Result<Identity, AuthError> {
        match self.validator.validate(raw_token).await {
            Ok(claims) => {
                tracing::debug!(subject = %claims.subject, "authentication succeeded");
                Ok(Identity::new(claims))
            }
            Err(err) => {
                tracing::debug!(error_code = err.error_code(), "authentication failed");
                Err(err)
            }
        }
    }

    /// Evaluate a role requirement against an identity.
    pub fn check_roles(&self, identity: &Identity, requirement: &RoleRequirement) -> RoleCheck {
        check_roles(identity.roles(), requirement)
    }

    /// Authorize an identity against a requirement, with the missing
    /// roles reported on refusal.
    pub fn authorize(
        &self,
        identity: &Identity,
        requirement: &RoleRequirement,
    ) -> Result<(), AuthError> {
        let check = self.check_roles(identity, requirement);
        if check.granted {
            Ok(())
        } else {
            tracing::info!(
                username = %identity.username(),
                required = ?requirement.roles,
                missing = ?check.missing,
                "permission denied"
            );
            Err(AuthError::PermissionDenied {
                missing: check.missing,
            })
        }
    }

    /// Requirement over the given roles under the configured default
    /// policy.
    pub fn requirement<I, S>(&self, roles: I) -> RoleRequirement
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.default_policy {
            RolePolicy::RequireAll => RoleRequirement::all(roles),
            RolePolicy::RequireAny => RoleRequirement::any(roles),
        }
    }

    /// Whether a request path bypasses authentication entirely.
    ///
    /// The bypass is explicit and pattern-based; nothing is ever inferred
    /// from the request itself.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths.is_match(path)
    }

    /// Drop any cached validation outcome for this token.
    pub async fn invalidate_token(&self, raw_token: &str) {
        self.validator.invalidate(raw_token).await;
    }

    /// Breaker state toward the identity provider, for health reporting.
    pub fn breaker_state(&self) -> BreakerState {
        self.validator.breaker_state()
    }
}
