pub mod authorizer;
pub mod decision;
pub mod factory;
pub mod key_resolver;
pub mod key_source;
pub mod registry;
pub mod token_verifier;

pub use authorizer::{AuthorizationPolicy, PatternMatch, SubjectAuthorizer};
pub use decision::{Decision, RejectReason, bearer_token, decide};
pub use factory::{build_authorizer, build_verifier};
pub use key_resolver::{KeyError, KeyResolver, PublicKey};
pub use key_source::{KeySetDocument, KeySource, KeySourceError};
pub use registry::{IssuerRegistry, RegistryError, TrustedIssuer};
pub use token_verifier::{
    ClaimsError, JwtVerifier, TokenVerifier, VerifiedClaims, VerifyError,
};
