//! Per-issuer signing key cache.
//!
//! `resolve(kid)` answers from the cache while it is fresh and holds the key. Anything else
//! (stale cache, unknown `kid`) triggers one fetch of the issuer's key set.
//!
//! Concurrency:
//! - cache hits only take the shared read lock, so they never wait on each other;
//! - fetches are serialized by an async mutex and counted; a caller that waited on the mutex
//!   while another caller fetched reuses that fetch's outcome (keys or error) instead of
//!   fetching again, so at most one fetch per issuer is in flight;
//! - every issuer has its own resolver, so a slow issuer never blocks another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::services::auth::key_source::{KeySetDocument, KeySource};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("no key with id {kid:?} for issuer {issuer}")]
    KeyNotFound { issuer: String, kid: String },

    #[error("fetching keys for issuer {issuer} failed: {reason}")]
    KeyFetchFailed { issuer: String, reason: String },
}

/// A verification key from an issuer's key set, with the algorithms it may verify.
#[derive(Clone)]
pub struct PublicKey {
    kid: String,
    algorithms: Vec<Algorithm>,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("PublicKey")
            .field("kid", &self.kid)
            .field("algorithms", &self.algorithms)
            .finish()
    }
}

impl PublicKey {
    /// Accepts signature keys with a `kid` whose type maps to an asymmetric JWS algorithm.
    ///
    /// A declared `alg` narrows the key to that single algorithm and must agree with the key type.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, &'static str> {
        let kid = jwk.common.key_id.clone().ok_or("missing kid")?;

        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            return Err("encryption key");
        }

        let family = key_family(&jwk.algorithm)?;
        let algorithms = match jwk.common.key_algorithm.as_ref() {
            Some(declared) => {
                let alg = signature_algorithm(declared).ok_or("unsupported alg")?;
                if !family.contains(&alg) {
                    return Err("alg does not match key type");
                }
                vec![alg]
            }
            None => family,
        };

        let decoding_key = DecodingKey::from_jwk(jwk).map_err(|_| "unusable key material")?;

        Ok(Self {
            kid,
            algorithms,
            decoding_key,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    pub fn allows(&self, alg: Algorithm) -> bool {
        self.algorithms.contains(&alg)
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

#[allow(unreachable_patterns)]
fn key_family(params: &AlgorithmParameters) -> Result<Vec<Algorithm>, &'static str> {
    match params {
        AlgorithmParameters::RSA(_) => Ok(vec![
            Algorithm::RS256,
            Algorithm::RS384,
            Algorithm::RS512,
            Algorithm::PS256,
            Algorithm::PS384,
            Algorithm::PS512,
        ]),
        AlgorithmParameters::EllipticCurve(ec) => match ec.curve {
            EllipticCurve::P256 => Ok(vec![Algorithm::ES256]),
            EllipticCurve::P384 => Ok(vec![Algorithm::ES384]),
            _ => Err("unsupported curve"),
        },
        AlgorithmParameters::OctetKeyPair(okp) => match okp.curve {
            EllipticCurve::Ed25519 => Ok(vec![Algorithm::EdDSA]),
            _ => Err("unsupported curve"),
        },
        AlgorithmParameters::OctetKey(_) => Err("symmetric key"),
        _ => Err("unsupported key type"),
    }
}

#[allow(unreachable_patterns)]
fn signature_algorithm(alg: &KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Converts a fetched document into `kid -> key`, skipping entries that are not usable.
pub fn parse_key_set(issuer: &str, document: &KeySetDocument) -> HashMap<String, PublicKey> {
    let mut keys = HashMap::with_capacity(document.keys.len());

    for raw in &document.keys {
        let jwk: Jwk = match serde_json::from_value(raw.clone()) {
            Ok(jwk) => jwk,
            Err(err) => {
                debug!(issuer = %issuer, error = %err, "skipping undecodable jwk");
                continue;
            }
        };

        match PublicKey::from_jwk(&jwk) {
            Ok(key) => {
                keys.insert(key.kid.clone(), key);
            }
            Err(reason) => {
                debug!(issuer = %issuer, kid = ?jwk.common.key_id, reason, "skipping jwk");
            }
        }
    }

    keys
}

#[derive(Default)]
struct CachedKeys {
    keys: HashMap<String, PublicKey>,
    fetched_at: Option<Instant>,
}

impl CachedKeys {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|at| at.elapsed() < ttl)
    }
}

/// Outcome of the most recent fetch, read by callers that waited on it.
#[derive(Default)]
struct LastFetch {
    error: Option<String>,
}

pub struct KeyResolver {
    issuer: String,
    source: Arc<dyn KeySource>,
    refresh_interval: Duration,
    fetch_timeout: Duration,
    cache: RwLock<CachedKeys>,
    fetches: AtomicU64,
    last_fetch: Mutex<LastFetch>,
}

impl std::fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResolver")
            .field("issuer", &self.issuer)
            .field("source", &self.source.describe())
            .field("refresh_interval", &self.refresh_interval)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

impl KeyResolver {
    pub fn new(
        issuer: impl Into<String>,
        source: Arc<dyn KeySource>,
        refresh_interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            source,
            refresh_interval,
            fetch_timeout,
            cache: RwLock::new(CachedKeys::default()),
            fetches: AtomicU64::new(0),
            last_fetch: Mutex::new(LastFetch::default()),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub async fn resolve(&self, kid: &str) -> Result<PublicKey, KeyError> {
        // Read the fetch counter before the cache: if a fetch lands between the two reads,
        // the counter check below notices it.
        let seen = self.fetches.load(Ordering::Acquire);

        if let Some(key) = self.cached(kid) {
            return Ok(key);
        }

        let mut last_fetch = self.last_fetch.lock().await;

        if self.fetches.load(Ordering::Acquire) != seen {
            // Someone fetched while we waited; use that result.
            if let Some(reason) = &last_fetch.error {
                return Err(self.fetch_failed(reason.clone()));
            }
            return self.lookup(kid).ok_or_else(|| self.not_found(kid));
        }

        let result = self.fetch().await;

        match result {
            Ok(keys) => {
                {
                    let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
                    cache.keys = keys;
                    cache.fetched_at = Some(Instant::now());
                }
                last_fetch.error = None;
                self.fetches.fetch_add(1, Ordering::Release);
                self.lookup(kid).ok_or_else(|| self.not_found(kid))
            }
            Err(reason) => {
                last_fetch.error = Some(reason.clone());
                self.fetches.fetch_add(1, Ordering::Release);
                Err(self.fetch_failed(reason))
            }
        }
    }

    /// Number of key-set fetches attempted so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Acquire)
    }

    fn cached(&self, kid: &str) -> Option<PublicKey> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        if !cache.is_fresh(self.refresh_interval) {
            return None;
        }
        cache.keys.get(kid).cloned()
    }

    fn lookup(&self, kid: &str) -> Option<PublicKey> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache.keys.get(kid).cloned()
    }

    async fn fetch(&self) -> Result<HashMap<String, PublicKey>, String> {
        debug!(issuer = %self.issuer, source = %self.source.describe(), "fetching signing keys");

        let document = match tokio::time::timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(Ok(document)) => document,
            Ok(Err(err)) => {
                warn!(issuer = %self.issuer, error = %err, "signing key fetch failed");
                return Err(err.to_string());
            }
            Err(_) => {
                warn!(
                    issuer = %self.issuer,
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "signing key fetch timed out"
                );
                return Err(format!("timed out after {:?}", self.fetch_timeout));
            }
        };

        let keys = parse_key_set(&self.issuer, &document);
        info!(
            issuer = %self.issuer,
            published = document.keys.len(),
            usable = keys.len(),
            "refreshed signing keys"
        );

        Ok(keys)
    }

    fn not_found(&self, kid: &str) -> KeyError {
        KeyError::KeyNotFound {
            issuer: self.issuer.clone(),
            kid: kid.to_string(),
        }
    }

    fn fetch_failed(&self, reason: String) -> KeyError {
        KeyError::KeyFetchFailed {
            issuer: self.issuer.clone(),
            reason,
        }
    }
}
