//! Bearer token verification.
//!
//! Flow for `JwtVerifier::verify`:
//! 1. split the token into header / payload / signature
//! 2. read `kid`, `alg` and the claimed `iss` without trusting them
//! 3. look the issuer up in the registry (untrusted issuers stop here, before any fetch)
//! 4. resolve the signing key through that issuer's resolver
//! 5. verify the signature (jsonwebtoken) with an algorithm the key allows
//! 6. validate iss / aud / exp / nbf from the verified payload only
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, Validation};
use serde::Deserialize;

use crate::services::auth::key_resolver::KeyError;
use crate::services::auth::registry::IssuerRegistry;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimsError {
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("audience mismatch")]
    AudienceMismatch,
    #[error("issuer mismatch")]
    IssuerMismatch,
    #[error("missing or empty '{0}' claim")]
    MissingClaim(String),
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("malformed token: {0}")]
    MalformedToken(&'static str),

    #[error("untrusted issuer {0:?}")]
    UntrustedIssuer(String),

    #[error("verification failed: {0}")]
    VerificationFailed(#[from] KeyError),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("algorithm {0:?} is not allowed for the signing key")]
    AlgorithmMismatch(Algorithm),

    #[error("invalid claims: {0}")]
    ClaimsInvalid(#[from] ClaimsError),

    #[error("token rejected: {0}")]
    Jwt(#[source] jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for VerifyError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match e.kind() {
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::ExpiredSignature => ClaimsError::Expired.into(),
            ErrorKind::ImmatureSignature => ClaimsError::NotYetValid.into(),
            ErrorKind::InvalidAudience => ClaimsError::AudienceMismatch.into(),
            ErrorKind::InvalidIssuer => ClaimsError::IssuerMismatch.into(),
            ErrorKind::MissingRequiredClaim(claim) => ClaimsError::MissingClaim(claim.clone()).into(),
            ErrorKind::InvalidToken => Self::MalformedToken("undecodable token"),
            _ => Self::Jwt(e),
        }
    }
}

/// `aud` is either a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == audience,
            Audience::Many(auds) => auds.iter().any(|aud| aud == audience),
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            Audience::Single(aud) => vec![aud],
            Audience::Many(auds) => auds,
        }
    }
}

/// Claims read before the signature is checked. Only used to pick the issuer and key.
#[derive(Debug, Clone, Deserialize)]
pub struct UnverifiedClaims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub aud: Option<Audience>,
    // NumericDate may be fractional.
    #[serde(default)]
    pub exp: Option<f64>,
}

/// A parsed but not yet trusted token.
#[derive(Debug, Clone)]
pub struct UnverifiedToken {
    pub kid: String,
    pub alg: Algorithm,
    pub issuer: String,
    pub claims: UnverifiedClaims,
}

impl UnverifiedToken {
    pub fn parse(raw: &str) -> Result<Self, VerifyError> {
        let mut segments = raw.split('.');
        let payload = match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() && !s.is_empty() => p,
            _ => return Err(VerifyError::MalformedToken("expected three non-empty segments")),
        };

        let header = jsonwebtoken::decode_header(raw)
            .map_err(|_| VerifyError::MalformedToken("undecodable header"))?;
        let kid = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or(VerifyError::MalformedToken("missing kid"))?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| VerifyError::MalformedToken("payload is not base64url"))?;
        let claims: UnverifiedClaims = serde_json::from_slice(&payload)
            .map_err(|_| VerifyError::MalformedToken("payload is not a claims object"))?;

        let issuer = claims
            .iss
            .clone()
            .filter(|iss| !iss.is_empty())
            .ok_or(VerifyError::MalformedToken("missing iss"))?;

        Ok(Self {
            kid,
            alg: header.alg,
            issuer,
            claims,
        })
    }
}

/// Claims of a token whose signature has been verified.
///
/// Everything is optional so that absence surfaces as `MissingClaim` rather than a decode error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct TokenClaims {
    iss: Option<String>,
    aud: Option<Audience>,
    sub: Option<String>,
    exp: Option<u64>,
    nbf: Option<u64>,
}

fn required<T>(claim: Option<T>, name: &str) -> Result<T, ClaimsError> {
    claim.ok_or_else(|| ClaimsError::MissingClaim(name.to_string()))
}

/// Result of a successful verification. Only ever built from a verified payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    pub subject: String,
    pub issuer: String,
    pub audience: Vec<String>,
    pub expires_at: u64,
    pub not_before: Option<u64>,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, raw_token: &str) -> Result<VerifiedClaims, VerifyError>;
}

/// Verifies JWTs against the keys of the trusted issuers.
#[derive(Debug, Clone)]
pub struct JwtVerifier {
    registry: Arc<IssuerRegistry>,
    leeway_seconds: u64,
}

impl JwtVerifier {
    pub fn new(registry: Arc<IssuerRegistry>, leeway_seconds: u64) -> Self {
        Self {
            registry,
            leeway_seconds,
        }
    }

    pub fn registry(&self) -> &IssuerRegistry {
        &self.registry
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, raw_token: &str) -> Result<VerifiedClaims, VerifyError> {
        let token = UnverifiedToken::parse(raw_token)?;

        let trusted = self
            .registry
            .lookup(&token.issuer)
            .map_err(|_| VerifyError::UntrustedIssuer(token.issuer.clone()))?;

        let key = trusted.resolver().resolve(&token.kid).await?;
        if !key.allows(token.alg) {
            return Err(VerifyError::AlgorithmMismatch(token.alg));
        }

        let mut validation = Validation::new(token.alg);
        validation.set_issuer(&[trusted.issuer()]);
        validation.set_audience(&[trusted.audience()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_nbf = true;
        validation.leeway = self.leeway_seconds;

        // Everything below comes from the verified payload; `token` is not consulted again.
        let claims =
            jsonwebtoken::decode::<TokenClaims>(raw_token, key.decoding_key(), &validation)?.claims;

        let issuer = required(claims.iss, "iss")?;
        let audience = required(claims.aud, "aud")?;
        let subject = required(claims.sub, "sub")?;
        let expires_at = required(claims.exp, "exp")?;

        if issuer != trusted.issuer() {
            return Err(ClaimsError::IssuerMismatch.into());
        }
        if !audience.contains(trusted.audience()) {
            return Err(ClaimsError::AudienceMismatch.into());
        }
        if subject.is_empty() {
            return Err(ClaimsError::MissingClaim("sub".to_string()).into());
        }
        // jsonwebtoken accepts `exp == now`; the token must expire strictly after now.
        if jsonwebtoken::get_current_timestamp() >= expires_at.saturating_add(self.leeway_seconds) {
            return Err(ClaimsError::Expired.into());
        }

        Ok(VerifiedClaims {
            subject,
            issuer,
            audience: audience.into_vec(),
            expires_at,
            not_before: claims.nbf,
        })
    }
}
