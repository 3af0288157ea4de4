// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token validation cache.
//!
//! Maps a token fingerprint to a previously computed validation outcome so
//! the dominant path never reaches the identity provider. Entries are
//! replace-only and expire with the token itself.
//!
//! Backend failures must be absorbed by implementations (logged, reported
//! as a miss): a cache outage can slow authentication down but must never
//! block it.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::claims::Claims;

/// Default capacity for [`MemoryTokenCache`].
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Deterministic cache key for a raw token.
///
/// SHA-256 hex digest so the raw token is never retained in the backend's
/// keyspace in recoverable form.
pub fn token_fingerprint(raw_token: &str) -> String {
    let digest = Sha256::digest(raw_token.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// A cached validation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachedValidation {
    /// The token validated successfully and produced these claims.
    Valid(Claims),
    /// The token is known invalid. Stored with a short TTL to dampen
    /// repeated-failure storms; carries no claims because an invalid
    /// token attests nothing.
    Invalid,
}

/// Key-value contract the validator needs from a cache backend.
///
/// Implementations own error handling: `get` answers `None` both for a
/// genuine miss and for a backend failure.
#[async_trait]
pub trait TokenCache: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Option<CachedValidation>;
    async fn set(&self, fingerprint: &str, value: CachedValidation, ttl: Duration);
    async fn invalidate(&self, fingerprint: &str);
}

/// Always-miss cache. The correct default when no cache infrastructure
/// is available.
#[derive(Debug, Default, Clone)]
pub struct NoopTokenCache;

#[async_trait]
impl TokenCache for NoopTokenCache {
    async fn get(&self, _fingerprint: &str) -> Option<CachedValidation> {
        None
    }

    async fn set(&self, _fingerprint: &str, _value: CachedValidation, _ttl: Duration) {}

    async fn invalidate(&self, _fingerprint: &str) {}
}

struct TimedEntry {
    value: CachedValidation,
    expires_at: Instant,
}

/// Bounded in-process cache.
///
/// LRU eviction bounds memory; TTLs are enforced on read. Lock sections
/// are short and never span an await point.
pub struct MemoryTokenCache {
    entries: Mutex<LruCache<String, TimedEntry>>,
}

impl MemoryTokenCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap());
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, TimedEntry>> {
        // A poisoned lock means a panic mid-insert; the cache holds no
        // invariants beyond single entries, so keep serving.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryTokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[async_trait]
impl TokenCache for MemoryTokenCache {
    async fn get(&self, fingerprint: &str) -> Option<CachedValidation> {
        let mut entries = self.lock();
        match entries.get(fingerprint) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(fingerprint);
                None
            }
            None => None,
        }
    }

    async fn set(&self, fingerprint: &str, value: CachedValidation, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let entry = TimedEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.lock().put(fingerprint.to_string(), entry);
    }

    async fn invalidate(&self, fingerprint: &str) {
        self.lock().pop(fingerprint);
    }
}
