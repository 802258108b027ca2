//! Connection-string parsing and access-token signing.
//!
//! The hub service hands out connection strings of the form
//! `Endpoint=https://<name>.service.signalr.net;AccessKey=<key>;Version=1.0;`.
//! Both the server and the client parse one of these once at startup and then
//! sign a short-lived HS256 token for every outgoing request or connection.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::Serialize;
use thiserror::Error;
use url::Url;

/// Lifetime used when the caller does not ask for a specific one.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Claim type the hub reads the principal id from.
pub const NAME_IDENTIFIER_CLAIM: &str =
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("connection string is missing the '{0}' field")]
    MissingField(&'static str),

    #[error("connection string segment '{0}' is not a key=value pair")]
    MalformedSegment(String),

    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid port '{0}'")]
    InvalidPort(String),

    #[error("failed to sign access token: {0}")]
    Signing(String),
}

#[derive(Debug, Serialize)]
struct AccessClaims<'a> {
    aud: &'a str,
    exp: u64,
    iat: u64,
    nbf: u64,
    #[serde(
        rename = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier",
        skip_serializing_if = "Option::is_none"
    )]
    name_identifier: Option<&'a str>,
}

/// Endpoint and access key parsed from a hub connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    endpoint: String,
    access_key: String,
}

impl ServiceEndpoint {
    /// Parses `Endpoint=...;AccessKey=...;` style connection strings.
    ///
    /// Keys are matched case-insensitively and values may themselves contain
    /// `=` (access keys are base64). An optional `Port=` field is folded into
    /// the endpoint URL. Unknown keys such as `Version` are ignored.
    pub fn parse(connection_string: &str) -> Result<Self, ConfigError> {
        let mut endpoint = None;
        let mut access_key = None;
        let mut port = None;

        for segment in connection_string.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedSegment(segment.to_string()))?;
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.to_string()),
                "accesskey" => access_key = Some(value.to_string()),
                "port" => port = Some(value.to_string()),
                _ => {}
            }
        }

        let endpoint = endpoint
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingField("Endpoint"))?;
        let access_key = access_key
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingField("AccessKey"))?;

        Ok(Self {
            endpoint: normalize_endpoint(&endpoint, port.as_deref())?,
            access_key,
        })
    }

    /// Base URL of the service, without a trailing slash.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn generate_access_token(
        &self,
        target_url: &str,
        principal_id: Option<&str>,
    ) -> Result<String, ConfigError> {
        self.generate_access_token_with_lifetime(target_url, principal_id, DEFAULT_TOKEN_LIFETIME)
    }

    /// Signs a token scoped to `target_url` for `principal_id`.
    ///
    /// The audience must be the exact URL the token is presented to; the hub
    /// rejects tokens whose audience differs from the request URL.
    pub fn generate_access_token_with_lifetime(
        &self,
        target_url: &str,
        principal_id: Option<&str>,
        lifetime: Duration,
    ) -> Result<String, ConfigError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| ConfigError::Signing(err.to_string()))?
            .as_secs();

        let claims = AccessClaims {
            aud: target_url,
            exp: now + lifetime.as_secs(),
            iat: now,
            nbf: now,
            name_identifier: principal_id,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.access_key.as_bytes()),
        )
        .map_err(|err| ConfigError::Signing(err.to_string()))
    }
}

impl FromStr for ServiceEndpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("endpoint", &self.endpoint)
            .field("access_key", &"[REDACTED]")
            .finish()
    }
}

fn normalize_endpoint(raw: &str, port: Option<&str>) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint {
        endpoint: raw.to_string(),
        reason,
    };

    let mut url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }

    if let Some(port) = port {
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;
        url.set_port(Some(port))
            .map_err(|_| invalid("endpoint cannot carry a port".to_string()))?;
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}
