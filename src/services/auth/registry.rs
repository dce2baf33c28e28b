use std::collections::HashMap;

use crate::services::auth::key_resolver::KeyResolver;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("issuer {0:?} is not trusted")]
    UnknownIssuer(String),

    #[error("issuer {0:?} is configured more than once")]
    DuplicateIssuer(String),
}

/// An issuer whose tokens are accepted, with the audience its tokens must carry.
#[derive(Debug)]
pub struct TrustedIssuer {
    issuer: String,
    audience: String,
    resolver: KeyResolver,
}

impl TrustedIssuer {
    /// The resolver's issuer is the identifier tokens must present, compared byte for byte.
    pub fn new(audience: impl Into<String>, resolver: KeyResolver) -> Self {
        Self {
            issuer: resolver.issuer().to_string(),
            audience: audience.into(),
            resolver,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }
}

/// Fixed set of trusted issuers, built once at startup.
#[derive(Debug)]
pub struct IssuerRegistry {
    issuers: HashMap<String, TrustedIssuer>,
}

impl IssuerRegistry {
    pub fn new(issuers: impl IntoIterator<Item = TrustedIssuer>) -> Result<Self, RegistryError> {
        let mut map = HashMap::new();

        for trusted in issuers {
            if map.contains_key(trusted.issuer()) {
                return Err(RegistryError::DuplicateIssuer(trusted.issuer().to_string()));
            }
            map.insert(trusted.issuer().to_string(), trusted);
        }

        Ok(Self { issuers: map })
    }

    /// Looks up the issuer a token claims. Callers must do this before touching any key.
    pub fn lookup(&self, issuer: &str) -> Result<&TrustedIssuer, RegistryError> {
        self.issuers
            .get(issuer)
            .ok_or_else(|| RegistryError::UnknownIssuer(issuer.to_string()))
    }

    pub fn len(&self) -> usize {
        self.issuers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty()
    }
}
