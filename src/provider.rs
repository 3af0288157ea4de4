// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity-provider client boundary.
//!
//! The validator only needs one capability from the provider: take a raw
//! token, answer with its claims or a classified rejection. The
//! classification matters because a rejected token and an unreachable
//! provider demand different treatment upstream (negative cache and 401
//! versus breaker bookkeeping and 503).

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Validation};
use thiserror::Error;

use crate::claims::ProviderClaims;
use crate::config::KeycloakAuthSettings;
use crate::jwks::{JwksError, JwksManager};

/// Why the provider rejected a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// Structurally valid but past expiry.
    Expired,
    /// Signature does not verify.
    BadSignature,
    /// Not a decodable JWT.
    Malformed,
    /// Signed with a key the realm does not publish.
    UnknownKey,
    /// Issuer claim does not match the realm.
    BadIssuer,
    /// Audience claim does not match the expected audience.
    BadAudience,
    /// Valid in the future only (`nbf`/`iat` ahead of now).
    NotYetValid,
}

/// Provider-boundary failure.
///
/// `Rejected` means the provider examined the token and refused it;
/// `Unreachable` means no verdict was reached at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("token rejected: {0:?}")]
    Rejected(RejectionReason),
    #[error("identity provider unreachable: {0}")]
    Unreachable(String),
}

/// The one capability the validator needs from an identity provider.
///
/// Implementable via local JWT signature verification against published
/// keys (the shipped [`KeycloakVerifier`]) or via a remote introspection
/// call.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify_token(&self, raw_token: &str) -> Result<ProviderClaims, ProviderError>;
}

/// Verifies Keycloak access tokens locally against the realm's JWKS.
pub struct KeycloakVerifier {
    jwks: JwksManager,
    issuer: String,
    audience: Option<String>,
    leeway_secs: u64,
}

impl KeycloakVerifier {
    pub fn new(settings: &KeycloakAuthSettings) -> Self {
        Self {
            jwks: JwksManager::new(settings.jwks_url(), settings.http_timeout()),
            issuer: settings.issuer(),
            audience: settings.audience.clone(),
            leeway_secs: settings.leeway_secs,
        }
    }

    /// Access to the underlying JWKS manager, e.g. for warm-up or health
    /// checks.
    pub fn jwks(&self) -> &JwksManager {
        &self.jwks
    }

    fn validation(&self, algorithm: jsonwebtoken::Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.leeway_secs;
        validation.set_issuer(&[&self.issuer]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

#[async_trait]
impl TokenVerifier for KeycloakVerifier {
    async fn verify_token(&self, raw_token: &str) -> Result<ProviderClaims, ProviderError> {
        let header = decode_header(raw_token)
            .map_err(|_| ProviderError::Rejected(RejectionReason::Malformed))?;

        let (decoding_key, algorithm) = match &header.kid {
            Some(kid) => self.jwks.get_decoding_key(kid).await,
            None => self.jwks.get_any_decoding_key().await,
        }
        .map_err(|e| match e {
            JwksError::NoMatchingKey => ProviderError::Rejected(RejectionReason::UnknownKey),
            JwksError::Fetch(msg) | JwksError::BadKey(msg) => ProviderError::Unreachable(msg),
        })?;

        let token_data = decode::<ProviderClaims>(raw_token, &decoding_key, &self.validation(algorithm))
            .map_err(|e| {
                let reason = match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => RejectionReason::Expired,
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        RejectionReason::BadSignature
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidIssuer => RejectionReason::BadIssuer,
                    jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                        RejectionReason::BadAudience
                    }
                    jsonwebtoken::errors::ErrorKind::ImmatureSignature => {
                        RejectionReason::NotYetValid
                    }
                    _ => RejectionReason::Malformed,
                };
                ProviderError::Rejected(reason)
            })?;

        Ok(token_data.claims)
    }
}
