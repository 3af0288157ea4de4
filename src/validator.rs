// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token validation pipeline.
//!
//! Order is fixed: structural reject, cache lookup, then (and only then)
//! a provider call through the circuit breaker. A cache store strictly
//! follows a successful validation; failed or transient outcomes never
//! populate the positive cache.

use std::sync::Arc;
use std::time::Duration;

use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::cache::{token_fingerprint, CachedValidation, TokenCache};
use crate::claims::Claims;
use crate::config::KeycloakAuthSettings;
use crate::error::AuthError;
use crate::provider::{ProviderError, RejectionReason, TokenVerifier};

/// Validates raw bearer tokens into [`Claims`].
///
/// Shared process-wide; all state lives in the cache and breaker, both of
/// which are safe under arbitrary concurrent invocation.
pub struct TokenValidator {
    verifier: Arc<dyn TokenVerifier>,
    cache: Arc<dyn TokenCache>,
    breaker: CircuitBreaker,
    debug: bool,
    cache_max_ttl: Duration,
    negative_cache_ttl: Duration,
}

impl TokenValidator {
    pub fn new(
        settings: &KeycloakAuthSettings,
        verifier: Arc<dyn TokenVerifier>,
        cache: Arc<dyn TokenCache>,
    ) -> Self {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: settings.breaker_failure_threshold,
            failure_window: settings.breaker_failure_window(),
            cooldown: settings.breaker_cooldown(),
        });
        if settings.debug {
            tracing::warn!("debug mode enabled: token validation is bypassed");
        }
        Self {
            verifier,
            cache,
            breaker,
            debug: settings.debug,
            cache_max_ttl: settings.cache_max_ttl(),
            negative_cache_ttl: settings.negative_cache_ttl(),
        }
    }

    /// Validate a raw token, producing claims or a typed failure.
    pub async fn validate(&self, raw_token: &str) -> Result<Claims, AuthError> {
        if !looks_like_jwt(raw_token) {
            return Err(AuthError::InvalidToken);
        }

        if self.debug {
            return Ok(debug_claims());
        }

        let fingerprint = token_fingerprint(raw_token);
        let now = chrono::Utc::now().timestamp();

        match self.cache.get(&fingerprint).await {
            Some(CachedValidation::Valid(claims)) if claims.is_valid_at(now) => {
                tracing::debug!(subject = %claims.subject, "token cache hit");
                return Ok(claims);
            }
            Some(CachedValidation::Valid(_)) => {
                // TTL should have evicted this; treat as a miss.
            }
            Some(CachedValidation::Invalid) => {
                tracing::debug!("negative token cache hit");
                return Err(AuthError::InvalidToken);
            }
            None => {
                tracing::debug!("token cache miss");
            }
        }

        let guard = self.breaker.acquire().map_err(|_| {
            tracing::debug!("circuit breaker open, short-circuiting validation");
            AuthError::unavailable("identity provider temporarily unavailable")
        })?;

        match self.verifier.verify_token(raw_token).await {
            Ok(provider_claims) => {
                // The provider answered; the verdict on the claims
                // themselves is a separate question.
                guard.success();
                let claims = match Claims::from_provider(provider_claims, now) {
                    Ok(claims) => claims,
                    Err(AuthError::InvalidToken) => {
                        self.store_negative(&fingerprint).await;
                        return Err(AuthError::InvalidToken);
                    }
                    Err(other) => return Err(other),
                };
                self.store_positive(&fingerprint, &claims, now).await;
                Ok(claims)
            }
            Err(ProviderError::Rejected(RejectionReason::Expired)) => {
                guard.success();
                // Expiry is self-evident on resubmission; nothing cached.
                Err(AuthError::TokenExpired)
            }
            Err(ProviderError::Rejected(reason)) => {
                guard.success();
                tracing::debug!(?reason, "token rejected by provider");
                self.store_negative(&fingerprint).await;
                Err(AuthError::InvalidToken)
            }
            Err(ProviderError::Unreachable(msg)) => {
                guard.failure();
                tracing::warn!(error = %msg, "identity provider unreachable");
                Err(AuthError::unavailable(msg))
            }
        }
    }

    /// Drop any cached outcome for this token.
    pub async fn invalidate(&self, raw_token: &str) {
        self.cache.invalidate(&token_fingerprint(raw_token)).await;
    }

    /// Current breaker state, for health reporting.
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    async fn store_positive(&self, fingerprint: &str, claims: &Claims, now: i64) {
        let remaining = claims.expiry - now;
        if remaining <= 0 {
            return;
        }
        let ttl = self.cache_max_ttl.min(Duration::from_secs(remaining as u64));
        self.cache
            .set(fingerprint, CachedValidation::Valid(claims.clone()), ttl)
            .await;
    }

    async fn store_negative(&self, fingerprint: &str) {
        self.cache
            .set(fingerprint, CachedValidation::Invalid, self.negative_cache_ttl)
            .await;
    }
}

/// Cheap structural check: three non-empty dot-separated segments.
///
/// Anything else cannot be a JWT and is rejected without touching the
/// cache or the network.
fn looks_like_jwt(raw_token: &str) -> bool {
    let mut segments = 0;
    for segment in raw_token.split('.') {
        segments += 1;
        if segment.is_empty() || segments > 3 {
            return false;
        }
    }
    segments == 3
}

/// Deterministic claims for debug mode.
fn debug_claims() -> Claims {
    Claims {
        subject: "00000000-0000-0000-0000-000000000000".to_string(),
        username: "debug".to_string(),
        roles: Default::default(),
        expiry: chrono::Utc::now().timestamp() + 3600,
    }
}
