use std::env;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has unsupported value {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("set exactly one of JWT_JWKS_URL or JWT_SECRET")]
    AmbiguousTrust,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    DynamoDb,
    Memory,
}

/// Where the owner of a request comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// `sub` claim of the validated bearer token
    TokenSubject,
    /// Trusted `X-User-ID` header
    Header,
}

/// Keys bearer tokens are verified against
#[derive(Clone, PartialEq, Eq)]
pub enum TrustMaterial {
    /// RS256 keys published by the identity provider
    Jwks { url: String },
    /// HS256 shared secret
    SharedSecret(String),
}

impl fmt::Debug for TrustMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustMaterial::Jwks { url } => f.debug_struct("Jwks").field("url", url).finish(),
            TrustMaterial::SharedSecret(_) => f.write_str("SharedSecret(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: Option<String>,
    pub trust: TrustMaterial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub table_name: String,
    pub owner_index: String,
    pub store: StoreBackend,
    pub cors_allowed_origin: String,
    pub identity_source: IdentitySource,
    pub jwt: JwtConfig,
}

impl Config {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let store = match get("TODO_STORE").as_deref() {
            None | Some("dynamodb") => StoreBackend::DynamoDb,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "TODO_STORE",
                    value: other.to_string(),
                })
            }
        };

        let identity_source = match get("IDENTITY_SOURCE").as_deref() {
            None | Some("token") => IdentitySource::TokenSubject,
            Some("header") => IdentitySource::Header,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "IDENTITY_SOURCE",
                    value: other.to_string(),
                })
            }
        };

        let trust = match (get("JWT_JWKS_URL"), get("JWT_SECRET")) {
            (Some(url), None) => TrustMaterial::Jwks { url },
            (None, Some(secret)) => TrustMaterial::SharedSecret(secret),
            (None, None) => return Err(ConfigError::Missing("JWT_JWKS_URL or JWT_SECRET")),
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousTrust),
        };

        Ok(Self {
            table_name: get("TABLE_NAME").unwrap_or_else(|| "todos".to_string()),
            owner_index: get("OWNER_INDEX_NAME").unwrap_or_else(|| "GSI1".to_string()),
            store,
            cors_allowed_origin: get("CORS_ALLOWED_ORIGIN")
                .unwrap_or_else(|| "http://localhost:5173".to_string()),
            identity_source,
            jwt: JwtConfig {
                issuer: get("JWT_ISSUER").ok_or(ConfigError::Missing("JWT_ISSUER"))?,
                audience: get("JWT_AUDIENCE"),
                trust,
            },
        })
    }
}
