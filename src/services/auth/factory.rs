/// Factory: build the verifier, authorizer and key sources from application `Config`.
use std::sync::Arc;

use tracing::info;

use crate::config::{Config, IssuerConfig, SubjectPolicy};
use crate::services::auth::key_source::{
    KeySource, KeySourceError, OidcDiscoverySource, StaticJwksSource, http_client,
};
use crate::services::auth::{
    IssuerRegistry, JwtVerifier, KeyResolver, RegistryError, SubjectAuthorizer, TrustedIssuer,
};

#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("invalid subject pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    KeySource(#[from] KeySourceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub fn build_key_source(
    issuer: &IssuerConfig,
    http: reqwest::Client,
) -> Result<Arc<dyn KeySource>, FactoryError> {
    let source: Arc<dyn KeySource> = match &issuer.jwks_uri {
        Some(jwks_uri) => Arc::new(StaticJwksSource::new(jwks_uri.clone(), http)),
        None => Arc::new(OidcDiscoverySource::new(&issuer.issuer, http)?),
    };
    Ok(source)
}

pub fn build_registry(config: &Config) -> Result<IssuerRegistry, FactoryError> {
    let http = http_client(config.key_fetch_timeout)?;

    let mut trusted = Vec::with_capacity(config.issuers.len());
    for issuer in &config.issuers {
        let source = build_key_source(issuer, http.clone())?;
        info!(issuer = %issuer.issuer, source = %source.describe(), "trusting issuer");

        let resolver = KeyResolver::new(
            issuer.issuer.clone(),
            source,
            config.key_refresh_interval,
            config.key_fetch_timeout,
        );
        trusted.push(TrustedIssuer::new(config.audience.clone(), resolver));
    }

    Ok(IssuerRegistry::new(trusted)?)
}

pub fn build_verifier(config: &Config) -> Result<Arc<JwtVerifier>, FactoryError> {
    let registry = build_registry(config)?;
    Ok(Arc::new(JwtVerifier::new(
        Arc::new(registry),
        config.token_leeway_seconds,
    )))
}

pub fn build_authorizer(policy: &SubjectPolicy) -> Result<Arc<SubjectAuthorizer>, FactoryError> {
    let authorizer = match policy {
        SubjectPolicy::Subjects(subjects) => SubjectAuthorizer::subjects(subjects.iter().cloned()),
        SubjectPolicy::Pattern { pattern, mode } => SubjectAuthorizer::pattern(pattern, *mode)?,
    };
    Ok(Arc::new(authorizer))
}
