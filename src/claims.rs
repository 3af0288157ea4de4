// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Validated token claims and the request-scoped identity view.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Claims as Keycloak encodes them in an access token.
///
/// Keycloak nests client roles under `resource_access.<client>.roles`,
/// where `<client>` is the authorized party (`azp`). Only the fields the
/// crate consumes are modeled; the rest of the payload is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderClaims {
    /// Subject (Keycloak user UUID).
    #[serde(default)]
    pub sub: String,

    /// Expiration timestamp (epoch seconds).
    #[serde(default)]
    pub exp: i64,

    /// Preferred username.
    #[serde(default)]
    pub preferred_username: String,

    /// Issuer (realm URL). Validated by the verifier, kept for logging.
    #[serde(default)]
    pub iss: String,

    /// Authorized party - the client this token was issued to.
    #[serde(default)]
    pub azp: String,

    /// Audience. Validated by the verifier when configured.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,

    /// Per-client role grants.
    #[serde(default)]
    pub resource_access: HashMap<String, ResourceAccess>,
}

/// Role list for one client under `resource_access`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Validated, immutable claims extracted from a bearer token.
///
/// Constructed once per successful validation and shared through the
/// cache. `expiry` is the authoritative source for cache TTLs and
/// staleness checks; it is never re-derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Provider-assigned stable subject identifier.
    pub subject: String,
    /// Display/login name.
    pub username: String,
    /// Deduplicated role names. May be empty.
    pub roles: BTreeSet<String>,
    /// Absolute expiry instant (epoch seconds).
    pub expiry: i64,
}

impl Claims {
    /// Build claims from a provider payload, failing closed.
    ///
    /// Missing `sub` or `preferred_username` means the token was not
    /// issued for an end user we can identify, so the token is invalid
    /// rather than defaulted. An `exp` at or before `now` is expired.
    pub fn from_provider(provider: ProviderClaims, now: i64) -> Result<Self, AuthError> {
        if provider.sub.is_empty() || provider.preferred_username.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        if provider.exp <= now {
            return Err(AuthError::TokenExpired);
        }

        let roles = provider
            .resource_access
            .get(&provider.azp)
            .map(|access| access.roles.iter().cloned().collect::<BTreeSet<_>>())
            .unwrap_or_default();

        Ok(Self {
            subject: provider.sub,
            username: provider.preferred_username,
            roles,
            expiry: provider.exp,
        })
    }

    /// Whether the claims are still valid at `now`.
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.expiry > now
    }
}

/// Request-scoped view of validated claims.
///
/// Created per successful authentication and discarded with the request;
/// never shared across requests. `seconds_until_expiry` is computed at
/// read time because it is clock-dependent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    claims: Claims,
}

impl Identity {
    pub fn new(claims: Claims) -> Self {
        Self { claims }
    }

    pub fn subject(&self) -> &str {
        &self.claims.subject
    }

    pub fn username(&self) -> &str {
        &self.claims.username
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.claims.roles
    }

    pub fn expiry(&self) -> i64 {
        self.claims.expiry
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.claims.roles.contains(role)
    }

    /// Seconds remaining until expiry. Negative once expired.
    pub fn seconds_until_expiry(&self) -> i64 {
        self.claims.expiry - chrono::Utc::now().timestamp()
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self::new(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_provider_claims() -> ProviderClaims {
        ProviderClaims {
            sub: "4f0c1e6a-8f4e-4f6e-9c36-70c1a3cf1d21".to_string(),
            exp: 4_102_444_800, // far future
            preferred_username: "alice".to_string(),
            iss: "http://keycloak:8080/realms/apps".to_string(),
            azp: "my-service".to_string(),
            aud: None,
            resource_access: HashMap::from([(
                "my-service".to_string(),
                ResourceAccess {
                    roles: vec![
                        "reader".to_string(),
                        "writer".to_string(),
                        "reader".to_string(),
                    ],
                },
            )]),
        }
    }

    #[test]
    fn from_provider_extracts_and_dedupes_roles() {
        let claims = Claims::from_provider(sample_provider_claims(), 1_700_000_000).unwrap();
        assert_eq!(claims.subject, "4f0c1e6a-8f4e-4f6e-9c36-70c1a3cf1d21");
        assert_eq!(claims.username, "alice");
        assert_eq!(
            claims.roles,
            BTreeSet::from(["reader".to_string(), "writer".to_string()])
        );
    }

    #[test]
    fn roles_empty_when_azp_has_no_grants() {
        let mut provider = sample_provider_claims();
        provider.azp = "other-client".to_string();
        let claims = Claims::from_provider(provider, 1_700_000_000).unwrap();
        assert!(claims.roles.is_empty());
    }

    #[test]
    fn missing_subject_fails_closed() {
        let mut provider = sample_provider_claims();
        provider.sub = String::new();
        assert_eq!(
            Claims::from_provider(provider, 1_700_000_000),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn missing_username_fails_closed() {
        let mut provider = sample_provider_claims();
        provider.preferred_username = String::new();
        assert_eq!(
            Claims::from_provider(provider, 1_700_000_000),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn past_expiry_is_expired_not_invalid() {
        let mut provider = sample_provider_claims();
        provider.exp = 1_600_000_000;
        assert_eq!(
            Claims::from_provider(provider, 1_700_000_000),
            Err(AuthError::TokenExpired)
        );
    }

    #[test]
    fn identity_exposes_claims() {
        let claims = Claims::from_provider(sample_provider_claims(), 1_700_000_000).unwrap();
        let identity = Identity::new(claims.clone());
        assert_eq!(identity.subject(), claims.subject);
        assert_eq!(identity.username(), "alice");
        assert!(identity.has_role("reader"));
        assert!(!identity.has_role("admin"));
        assert!(identity.seconds_until_expiry() > 0);
    }

    #[test]
    fn parses_keycloak_payload_json() {
        let payload = r#"{
            "sub": "u-1",
            "exp": 4102444800,
            "preferred_username": "bob",
            "iss": "http://kc/realms/apps",
            "azp": "svc",
            "resource_access": {"svc": {"roles": ["auditor"]}},
            "realm_access": {"roles": ["offline_access"]}
        }"#;
        let provider: ProviderClaims = serde_json::from_str(payload).unwrap();
        let claims = Claims::from_provider(provider, 1_700_000_000).unwrap();
        assert_eq!(claims.roles, BTreeSet::from(["auditor".to_string()]));
    }
}
