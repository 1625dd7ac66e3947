//! Signing key resolution for the configured issuer.
//!
//! # Resolution flow
//!
//! 1. Reject any issuer other than the configured one. Keys are never
//!    fetched from a location chosen by the token.
//! 2. Serve the key from the cached set if it is fresh and holds the `kid`.
//! 3. Otherwise refetch exactly once: discover `jwks_uri` through the
//!    issuer's metadata (unless configured), download the set, replace the
//!    cache entry and look the `kid` up again.
//!
//! Concurrent refreshes are collapsed: a caller that waited for another
//! task's fetch reuses its result instead of fetching again. Key material
//! is never logged.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::jwk::Jwk;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::oauth::{AuthorizationServerMetadata, DiscoveryError};

/// Key resolution failures. All of them end as an invalid token.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// The token names an issuer other than the configured one
    #[error("untrusted issuer: {0}")]
    UnknownIssuer(String),

    /// Metadata discovery failed
    #[error("issuer discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Network or decoding error while fetching the key set
    #[error("JWKS fetch error: {0}")]
    Fetch(#[from] reqwest::Error),

    /// JWKS endpoint answered with a non-success status
    #[error("JWKS endpoint returned HTTP {0}")]
    Status(u16),

    /// The `kid` is absent even from a freshly fetched set
    #[error("unknown key ID: {0}")]
    UnknownKeyId(String),
}

/// Wire form of a key set. Entries that do not parse as a supported JWK are
/// skipped rather than failing the whole set.
#[derive(Deserialize)]
struct RawJwkSet {
    #[serde(default)]
    keys: Vec<serde_json::Value>,
}

/// Cached key set for one issuer
struct CachedJwks {
    keys: Vec<Jwk>,
    fetched_at: Instant,
}

/// Settings for [`JwksResolver`]
#[derive(Debug, Clone)]
pub struct JwksSettings {
    /// Trusted issuer
    pub issuer: String,
    /// Explicit key set location, bypassing discovery
    pub jwks_uri: Option<String>,
    /// Freshness window of a fetched set
    pub ttl: Duration,
    /// Timeout of each discovery or key set request
    pub fetch_timeout: Duration,
    /// Refuse plain-HTTP discovery and key set URLs
    pub require_https: bool,
}

/// Fetches and caches the signing keys of the trusted issuer.
pub struct JwksResolver {
    settings: JwksSettings,
    http: reqwest::Client,
    cache: DashMap<String, CachedJwks>,
    fetch_lock: tokio::sync::Mutex<()>,
}

impl JwksResolver {
    /// Create a resolver for `settings.issuer`
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built with the requested
    /// timeout and transport policy.
    pub fn new(settings: JwksSettings) -> Result<Self, JwksError> {
        let http = reqwest::Client::builder()
            .https_only(settings.require_https)
            .timeout(settings.fetch_timeout)
            .build()?;
        Ok(Self {
            settings,
            http,
            cache: DashMap::new(),
            fetch_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// The trusted issuer
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.settings.issuer
    }

    /// Return the key `kid` published by `issuer`.
    ///
    /// # Errors
    ///
    /// Fails for a foreign issuer, on any fetch failure, or when the key is
    /// still absent after one refetch.
    pub async fn key_for(&self, issuer: &str, kid: &str) -> Result<Jwk, JwksError> {
        if !same_issuer(issuer, &self.settings.issuer) {
            return Err(JwksError::UnknownIssuer(issuer.to_string()));
        }

        let requested_at = Instant::now();
        if let Some(entry) = self.cache.get(&self.settings.issuer) {
            if entry.fetched_at.elapsed() < self.settings.ttl {
                if let Some(jwk) = find_key(&entry.keys, kid) {
                    return Ok(jwk);
                }
            }
        }

        debug!(kid = %kid, "Key not cached or cache stale, refreshing JWKS");
        let keys = self.refresh(requested_at).await?;
        find_key(&keys, kid).ok_or_else(|| JwksError::UnknownKeyId(kid.to_string()))
    }

    /// Refetch the key set unless another task already did so after
    /// `requested_at`.
    async fn refresh(&self, requested_at: Instant) -> Result<Vec<Jwk>, JwksError> {
        let _guard = self.fetch_lock.lock().await;

        if let Some(entry) = self.cache.get(&self.settings.issuer) {
            if entry.fetched_at >= requested_at {
                return Ok(entry.keys.clone());
            }
        }

        let jwks_uri = match &self.settings.jwks_uri {
            Some(uri) => uri.clone(),
            None => AuthorizationServerMetadata::discover(&self.http, &self.settings.issuer)
                .await?
                .jwks_uri
                .ok_or_else(|| DiscoveryError::MissingJwksUri(self.settings.issuer.clone()))?,
        };

        debug!(issuer = %self.settings.issuer, jwks_uri = %jwks_uri, "Fetching JWKS");
        let response = self.http.get(&jwks_uri).send().await?;
        if !response.status().is_success() {
            return Err(JwksError::Status(response.status().as_u16()));
        }
        let raw: RawJwkSet = response.json().await?;

        let total = raw.keys.len();
        let keys: Vec<Jwk> = raw
            .keys
            .into_iter()
            .filter_map(|k| serde_json::from_value(k).ok())
            .collect();
        if keys.len() < total {
            warn!(
                issuer = %self.settings.issuer,
                skipped = total - keys.len(),
                "Skipped unparseable JWKS entries"
            );
        }

        self.cache.insert(
            self.settings.issuer.clone(),
            CachedJwks {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(keys)
    }
}

/// Issuer comparison tolerant of a trailing slash
fn same_issuer(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Find a JWK by `kid`
fn find_key(keys: &[Jwk], kid: &str) -> Option<Jwk> {
    keys.iter()
        .find(|k| k.common.key_id.as_deref() == Some(kid))
        .cloned()
}
