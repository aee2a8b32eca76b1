// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session token verification keys.
//!
//! ## Sources
//!
//! - A static PEM public key (`AUTH_JWT_KEY`): networkless verification,
//!   the preferred setup at the edge.
//! - A JWKS endpoint (`AUTH_JWKS_URL`, defaulting to the frontend API's
//!   `/.well-known/jwks.json`): fetched via HTTPS, cached, and refreshed by a
//!   background task.
//!
//! ## Fast path
//!
//! Token verification never awaits. Lookups read the last fetched key set
//! through a synchronous snapshot; a failed refresh keeps the stale set
//! (fail-open for availability).

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::error::TokenVerificationError;
use crate::error::ConfigError;

/// Default JWKS cache TTL (5 minutes).
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Retry delay after a failed refresh.
const RETRY_DELAY: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    #[error("JWKS request failed: {0}")]
    Fetch(String),

    #[error("HTTP {0} from JWKS endpoint")]
    Status(u16),
}

/// JWKS cache entry.
struct CacheEntry {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// JWKS manager with caching.
#[derive(Clone)]
pub struct JwksManager {
    jwks_url: String,
    cache_ttl: Duration,
    cache: Arc<RwLock<Option<CacheEntry>>>,
    client: reqwest::Client,
}

impl JwksManager {
    /// Create a new JWKS manager. Only HTTPS endpoints are accepted.
    pub fn new(jwks_url: impl Into<String>) -> Result<Self, ConfigError> {
        let jwks_url = jwks_url.into();
        let parsed = Url::parse(&jwks_url).map_err(|e| ConfigError::InvalidUrl {
            url: jwks_url.clone(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "https" {
            return Err(ConfigError::InvalidUrl {
                url: jwks_url,
                reason: "JWKS must be fetched over https".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Ok(Self {
            jwks_url,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: Arc::new(RwLock::new(None)),
            client,
        })
    }

    /// JWKS endpoint of a frontend API.
    pub fn for_frontend_api(frontend_api_url: &str) -> Result<Self, ConfigError> {
        Self::new(format!(
            "{}/.well-known/jwks.json",
            frontend_api_url.trim_end_matches('/')
        ))
    }

    /// Create with custom cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Fetch JWKS from the endpoint.
    async fn fetch_jwks(&self) -> Result<JwkSet, JwksError> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksError::Status(response.status().as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))
    }

    /// Force refresh the JWKS cache. Returns the number of keys loaded.
    pub async fn refresh(&self) -> Result<usize, JwksError> {
        let jwks = self.fetch_jwks().await?;
        let count = jwks.keys.len();
        self.store(jwks);
        Ok(count)
    }

    fn store(&self, jwks: JwkSet) {
        let mut cache = match self.cache.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cache = Some(CacheEntry {
            jwks,
            fetched_at: Instant::now(),
        });
    }

    /// Check if JWKS is currently cached and within its TTL.
    pub fn is_cached(&self) -> bool {
        self.with_snapshot(|entry| entry.is_some_and(|e| e.fetched_at.elapsed() < self.cache_ttl))
    }

    pub fn key_count(&self) -> usize {
        self.with_snapshot(|entry| entry.map_or(0, |e| e.jwks.keys.len()))
    }

    fn with_snapshot<T>(&self, f: impl FnOnce(Option<&CacheEntry>) -> T) -> T {
        let cache = match self.cache.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(cache.as_ref())
    }

    /// Decoding key for a key ID, or any usable key when the token has none.
    pub fn decoding_key(
        &self,
        kid: Option<&str>,
    ) -> Result<(DecodingKey, Algorithm), TokenVerificationError> {
        self.with_snapshot(|entry| {
            let jwks = &entry.ok_or(TokenVerificationError::KeysUnavailable)?.jwks;
            match kid {
                Some(kid) => {
                    let jwk = jwks
                        .keys
                        .iter()
                        .find(|k| k.common.key_id.as_deref() == Some(kid))
                        .ok_or_else(|| TokenVerificationError::NoMatchingKey(kid.to_string()))?;
                    jwk_to_decoding_key(jwk)
                }
                None => jwks
                    .keys
                    .iter()
                    .find_map(|jwk| jwk_to_decoding_key(jwk).ok())
                    .ok_or_else(|| TokenVerificationError::NoMatchingKey("<none>".to_string())),
            }
        })
    }

    /// Keep the key set fresh until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(url = %self.jwks_url, ttl_secs = self.cache_ttl.as_secs(), "JWKS refresher started");

        loop {
            let delay = match self.refresh().await {
                Ok(keys) => {
                    debug!(keys, "JWKS refreshed");
                    self.cache_ttl
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        cached_keys = self.key_count(),
                        "JWKS refresh failed, keeping cached keys"
                    );
                    RETRY_DELAY.min(self.cache_ttl)
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("JWKS refresher shutting down");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Convert a JWK to a DecodingKey.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), TokenVerificationError> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|_| TokenVerificationError::KeysUnavailable)?;

            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::RS384) => Algorithm::RS384,
                Some(KeyAlgorithm::RS512) => Algorithm::RS512,
                _ => Algorithm::RS256,
            };
            Ok((key, alg))
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let key = DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|_| TokenVerificationError::KeysUnavailable)?;

            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::ES384) => Algorithm::ES384,
                _ => Algorithm::ES256,
            };
            Ok((key, alg))
        }
        _ => Err(TokenVerificationError::KeysUnavailable),
    }
}

/// Where session token verification keys come from.
#[derive(Clone)]
pub enum KeyStore {
    /// A single PEM-encoded RSA public key.
    Static(DecodingKey),
    Jwks(JwksManager),
}

impl KeyStore {
    /// Parse a PEM public key. Escaped `\n` sequences (common when the key is
    /// passed through an environment variable) are accepted.
    pub fn from_pem(pem: &str) -> Result<Self, ConfigError> {
        let pem = pem.trim().replace("\\n", "\n");
        DecodingKey::from_rsa_pem(pem.as_bytes())
            .map(KeyStore::Static)
            .map_err(|e| ConfigError::InvalidJwtKey(e.to_string()))
    }

    pub fn decoding_key(
        &self,
        kid: Option<&str>,
    ) -> Result<(DecodingKey, Algorithm), TokenVerificationError> {
        match self {
            KeyStore::Static(key) => Ok((key.clone(), Algorithm::RS256)),
            KeyStore::Jwks(manager) => manager.decoding_key(kid),
        }
    }

    /// Whether verification keys are available right now.
    pub fn is_ready(&self) -> bool {
        match self {
            KeyStore::Static(_) => true,
            KeyStore::Jwks(manager) => manager.key_count() > 0,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            KeyStore::Static(_) => "static",
            KeyStore::Jwks(_) => "jwks",
        }
    }
}

impl std::fmt::Debug for JwksManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksManager")
            .field("jwks_url", &self.jwks_url)
            .field("cache_ttl", &self.cache_ttl)
            .field("key_count", &self.key_count())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyStore::Static(_) => f.write_str("KeyStore::Static"),
            KeyStore::Jwks(m) => write!(f, "KeyStore::Jwks({})", m.jwks_url),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const VERIFYING_KEY_PEM: &str = include_str!("fixtures/session_verifying_key.pem");
    const JWKS_JSON: &str = include_str!("fixtures/session_jwks.json");

    pub(crate) fn static_store() -> KeyStore {
        KeyStore::from_pem(VERIFYING_KEY_PEM).unwrap()
    }

    pub(crate) fn loaded_jwks_store() -> KeyStore {
        let manager = JwksManager::new("https://clerk.example.com/.well-known/jwks.json").unwrap();
        manager.store(serde_json::from_str(JWKS_JSON).unwrap());
        KeyStore::Jwks(manager)
    }

    #[test]
    fn jwks_manager_creation() {
        let manager = JwksManager::for_frontend_api("https://clerk.example.com/").unwrap();
        assert_eq!(
            manager.jwks_url(),
            "https://clerk.example.com/.well-known/jwks.json"
        );
    }

    #[test]
    fn rejects_plain_http() {
        let err = JwksManager::new("http://clerk.example.com/jwks").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn custom_cache_ttl() {
        let manager = JwksManager::new("https://example.com/.well-known/jwks.json")
            .unwrap()
            .with_cache_ttl(Duration::from_secs(60));
        assert_eq!(manager.cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn debug_output_shows_endpoint_and_key_count() {
        let KeyStore::Jwks(manager) = loaded_jwks_store() else {
            panic!("expected a JWKS store");
        };
        let rendered = format!("{manager:?}");
        assert!(rendered.starts_with("JwksManager {"));
        assert!(rendered.contains("https://clerk.example.com/.well-known/jwks.json"));
        assert!(rendered.contains("key_count: 1"));
    }

    #[test]
    fn cache_initially_empty() {
        let manager = JwksManager::new("https://example.com/.well-known/jwks.json").unwrap();
        assert!(!manager.is_cached());
        assert!(matches!(
            manager.decoding_key(Some("ins_test_1")),
            Err(TokenVerificationError::KeysUnavailable)
        ));
        assert!(!KeyStore::Jwks(manager).is_ready());
    }

    #[test]
    fn snapshot_finds_key_by_kid() {
        let store = loaded_jwks_store();
        assert!(store.is_ready());
        let (_, alg) = store.decoding_key(Some("ins_test_1")).unwrap();
        assert_eq!(alg, Algorithm::RS256);
        assert!(store.decoding_key(None).is_ok());
        assert!(matches!(
            store.decoding_key(Some("other")),
            Err(TokenVerificationError::NoMatchingKey(kid)) if kid == "other"
        ));
    }

    #[test]
    fn static_pem_accepts_escaped_newlines() {
        let escaped = VERIFYING_KEY_PEM.replace('\n', "\\n");
        let store = KeyStore::from_pem(&escaped).unwrap();
        assert_eq!(store.source(), "static");
        assert!(store.is_ready());
    }

    #[test]
    fn static_pem_rejects_garbage() {
        let err = KeyStore::from_pem("not a key").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidJwtKey(_)));
    }
}
