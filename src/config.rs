/*
 * Responsibility
 * - Read settings from the environment (.env is loaded first when present)
 * - Validate them (anything missing or unparsable fails startup)
 */
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::AppError;
use crate::services::auth::PatternMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(value: Option<String>) -> Self {
        match value
            .unwrap_or_else(|| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A trusted issuer and, optionally, a fixed JWKS URI (otherwise OIDC discovery is used).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerConfig {
    pub issuer: String,
    pub jwks_uri: Option<Url>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectPolicy {
    Subjects(Vec<String>),
    Pattern { pattern: String, mode: PatternMatch },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,

    pub issuers: Vec<IssuerConfig>,
    pub audience: String,
    pub subject_policy: SubjectPolicy,

    pub key_refresh_interval: Duration,
    pub key_fetch_timeout: Duration,
    pub token_leeway_seconds: u64,
    pub request_timeout: Duration,
    // Response for requests without a verified identity (401 or 403)
    pub rejection: AppError,

    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port: u16 = match var("PORT") {
            Some(s) => s.parse().map_err(|_| ConfigError::Invalid("PORT"))?,
            None => 8000,
        };

        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::parse(var("APP_ENV"));

        let issuer_names = split_list(&var("ISSUERS").ok_or(ConfigError::Missing("ISSUERS"))?);
        if issuer_names.is_empty() {
            return Err(ConfigError::Missing("ISSUERS"));
        }
        // Issuers are matched as written; parsing only validates them.
        if issuer_names.iter().any(|issuer| Url::parse(issuer).is_err()) {
            return Err(ConfigError::Invalid("ISSUERS"));
        }

        let mut issuers: Vec<IssuerConfig> = issuer_names
            .into_iter()
            .map(|issuer| IssuerConfig {
                issuer,
                jwks_uri: None,
            })
            .collect();

        for entry in split_list(&var("JWKS_URIS").unwrap_or_default()) {
            let (issuer, uri) = entry
                .split_once('=')
                .ok_or(ConfigError::Invalid("JWKS_URIS"))?;
            let uri = Url::parse(uri.trim()).map_err(|_| ConfigError::Invalid("JWKS_URIS"))?;
            let target = issuers
                .iter_mut()
                .find(|c| c.issuer == issuer.trim())
                .ok_or(ConfigError::Invalid("JWKS_URIS"))?;
            target.jwks_uri = Some(uri);
        }

        let audience = var("AUDIENCE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("AUDIENCE"))?;

        let subject_policy = match (var("SUBJECTS"), var("SUBJECT_PATTERN")) {
            (Some(_), Some(_)) => return Err(ConfigError::Invalid("SUBJECT_PATTERN")),
            (Some(subjects), None) => {
                let subjects = split_list(&subjects);
                if subjects.is_empty() {
                    return Err(ConfigError::Missing("SUBJECTS"));
                }
                SubjectPolicy::Subjects(subjects)
            }
            (None, Some(pattern)) => {
                let mode = match var("SUBJECT_MATCH") {
                    Some(s) => s
                        .parse::<PatternMatch>()
                        .map_err(|_| ConfigError::Invalid("SUBJECT_MATCH"))?,
                    None => PatternMatch::default(),
                };
                SubjectPolicy::Pattern { pattern, mode }
            }
            (None, None) => return Err(ConfigError::Missing("SUBJECTS")),
        };

        let key_refresh_interval =
            Duration::from_secs(parse_or(&var, "KEY_REFRESH_SECONDS", 6 * 60 * 60)?);
        let key_fetch_timeout =
            Duration::from_secs(parse_or(&var, "KEY_FETCH_TIMEOUT_SECONDS", 10)?);
        if key_fetch_timeout.is_zero() {
            return Err(ConfigError::Invalid("KEY_FETCH_TIMEOUT_SECONDS"));
        }

        let token_leeway_seconds = parse_or(&var, "TOKEN_LEEWAY_SECONDS", 0)?;

        let request_timeout = Duration::from_secs(parse_or(&var, "REQUEST_TIMEOUT_SECONDS", 30)?);
        if request_timeout.is_zero() {
            return Err(ConfigError::Invalid("REQUEST_TIMEOUT_SECONDS"));
        }

        let rejection = match parse_or(&var, "AUTH_FAILURE_STATUS", 401)? {
            401 => AppError::Unauthorized,
            403 => AppError::Forbidden,
            _ => return Err(ConfigError::Invalid("AUTH_FAILURE_STATUS")),
        };

        let log_level = var("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(_) => return Err(ConfigError::Invalid("LOG_FORMAT")),
        };

        Ok(Self {
            addr,
            app_env,
            issuers,
            audience,
            subject_policy,
            key_refresh_interval,
            key_fetch_timeout,
            token_leeway_seconds,
            request_timeout,
            rejection,
            log_level,
            log_format,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match var(key) {
        Some(s) => s.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}
