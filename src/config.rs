// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Settings consumed by the authentication manager.
//!
//! The crate never reads the environment itself; the host application
//! deserializes (or constructs) a [`KeycloakAuthSettings`] and hands it to
//! [`AuthManager::new`](crate::manager::AuthManager::new). Defaults mirror a
//! local Keycloak development setup.

use std::time::Duration;

use regex::RegexSet;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::roles::RolePolicy;

fn default_server_url() -> String {
    "http://localhost:8080/".to_string()
}

fn default_realm() -> String {
    "master".to_string()
}

fn default_excluded_paths() -> Vec<String> {
    vec![r"^(/docs|/openapi.json|/health|/metrics)$".to_string()]
}

fn default_cache_max_ttl_secs() -> u64 {
    300
}

fn default_negative_cache_ttl_secs() -> u64 {
    30
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_failure_window_secs() -> u64 {
    60
}

fn default_breaker_cooldown_secs() -> u64 {
    30
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_leeway_secs() -> u64 {
    60
}

/// Configuration error raised by [`KeycloakAuthSettings::validate`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(&'static str),
    #[error("invalid configuration: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Settings for Keycloak authentication.
///
/// All fields have serde defaults so host applications can deserialize a
/// partial configuration file or build the struct with
/// `..Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeycloakAuthSettings {
    /// Keycloak base URL, e.g. `http://keycloak:8080/`.
    pub server_url: String,
    /// Realm name.
    pub realm: String,
    /// Client ID whose `resource_access` roles apply to validated tokens.
    pub client_id: String,
    /// Expected `aud` claim. When `None`, audience validation is skipped.
    pub audience: Option<String>,
    /// Regex patterns for request paths that bypass authentication.
    pub excluded_paths: Vec<String>,
    /// Synthesize a fixed identity instead of validating tokens.
    ///
    /// Development only. Never enabled by default.
    pub debug: bool,

    /// Upper bound on positive cache entry lifetime, in seconds. The
    /// effective TTL is `min(cache_max_ttl, token expiry - now)`.
    pub cache_max_ttl_secs: u64,
    /// Lifetime of negative (known-invalid) cache entries, in seconds.
    /// Independent of token expiry, which an invalid token cannot attest.
    pub negative_cache_ttl_secs: u64,

    /// Provider failures within the window before the breaker opens.
    pub breaker_failure_threshold: u32,
    /// Rolling window over which breaker failures are counted, in seconds.
    pub breaker_failure_window_secs: u64,
    /// How long the breaker stays open before probing, in seconds.
    pub breaker_cooldown_secs: u64,

    /// Timeout for each HTTP call to the identity provider, in seconds.
    pub http_timeout_secs: u64,
    /// Clock skew tolerance for expiry checks, in seconds.
    pub leeway_secs: u64,

    /// Role-check policy used when a requirement does not specify one.
    pub default_role_policy: RolePolicy,
}

impl Default for KeycloakAuthSettings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            realm: default_realm(),
            client_id: String::new(),
            audience: None,
            excluded_paths: default_excluded_paths(),
            debug: false,
            cache_max_ttl_secs: default_cache_max_ttl_secs(),
            negative_cache_ttl_secs: default_negative_cache_ttl_secs(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_failure_window_secs: default_breaker_failure_window_secs(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            leeway_secs: default_leeway_secs(),
            default_role_policy: RolePolicy::RequireAll,
        }
    }
}

impl KeycloakAuthSettings {
    /// Validate the settings, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.realm.is_empty() {
            return Err(ConfigError::Missing("realm"));
        }
        Url::parse(&self.server_url).map_err(|e| ConfigError::Invalid {
            field: "server_url",
            reason: e.to_string(),
        })?;
        self.excluded_path_set()?;
        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "breaker_failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.breaker_cooldown_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "breaker_cooldown_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.breaker_failure_window_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "breaker_failure_window_secs",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Expected issuer claim: `{server_url}/realms/{realm}`.
    pub fn issuer(&self) -> String {
        format!(
            "{}/realms/{}",
            self.server_url.trim_end_matches('/'),
            self.realm
        )
    }

    /// JWKS endpoint for the realm.
    pub fn jwks_url(&self) -> String {
        format!("{}/protocol/openid-connect/certs", self.issuer())
    }

    /// Compile the excluded-path patterns into a single set.
    pub fn excluded_path_set(&self) -> Result<RegexSet, ConfigError> {
        RegexSet::new(&self.excluded_paths).map_err(|e| ConfigError::Invalid {
            field: "excluded_paths",
            reason: e.to_string(),
        })
    }

    pub fn cache_max_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_max_ttl_secs)
    }

    pub fn negative_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_cache_ttl_secs)
    }

    pub fn breaker_failure_window(&self) -> Duration {
        Duration::from_secs(self.breaker_failure_window_secs)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
