//! Bearer token sources
//!
//! A token either comes from the `LIFTOFF_TOKEN` environment variable or from
//! the `auth.json` file written by `liftoff login`. The binary picks exactly one
//! provider up front; nothing here falls back from one source to the other.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::config::{AUTH_FILE, AUTH_TOKEN_ENV_VAR};
use crate::deps::AuthProvider;

/// Where a token was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// `LIFTOFF_TOKEN` environment variable
    Env,
    /// Credentials file in the configuration directory
    Stored,
}

/// Opaque bearer credential
#[derive(Clone)]
pub struct AuthToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
    source: TokenSource,
}

impl AuthToken {
    /// Create a token, reading its expiry from the JWT `exp` claim when present
    pub fn new(secret: impl Into<String>, source: TokenSource) -> Self {
        let secret = secret.into();
        let expires_at = jwt_expiry(&secret);
        Self {
            secret,
            expires_at,
            source,
        }
    }

    /// Create a token with an explicit expiry
    pub fn with_expiry(
        secret: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
        source: TokenSource,
    ) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
            source,
        }
    }

    /// Raw bearer value
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Expiry timestamp, if the token carries one
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Source tag
    pub const fn source(&self) -> TokenSource {
        self.source
    }

    /// Whether the token is past its expiry at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("source", &self.source)
            .finish()
    }
}

/// Reads the `exp` claim out of a JWT payload without verifying the signature
fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

/// Failures while resolving a token
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credentials available from the configured source
    #[error("No credentials found. Run `liftoff login` or set LIFTOFF_TOKEN.")]
    Missing,

    /// The credentials file could not be read
    #[error("Failed to read credentials at {path}: {source}")]
    Unreadable {
        /// Credentials file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The credentials file is not valid JSON
    #[error("Stored credentials at {path} are malformed. Run `liftoff login` again.")]
    Malformed {
        /// Credentials file
        path: PathBuf,
    },
}

/// Token taken from the environment
pub struct EnvTokenProvider {
    token: String,
}

impl EnvTokenProvider {
    /// Wrap an already-read token value
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Read `LIFTOFF_TOKEN`; `None` when unset or blank
    pub fn from_env() -> Option<Self> {
        std::env::var(AUTH_TOKEN_ENV_VAR)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(Self::new)
    }
}

#[async_trait]
impl AuthProvider for EnvTokenProvider {
    async fn resolve_token(&self) -> Result<AuthToken, AuthError> {
        Ok(AuthToken::new(self.token.clone(), TokenSource::Env))
    }
}

#[derive(Deserialize)]
struct StoredAuth {
    access_token: String,
}

/// Token read from the credentials file
pub struct StoredTokenProvider {
    path: PathBuf,
}

impl StoredTokenProvider {
    /// Read credentials from a specific file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read credentials from `<config_dir>/auth.json`
    pub fn in_config_dir(config_dir: &Path) -> Self {
        Self::new(config_dir.join(AUTH_FILE))
    }
}

#[async_trait]
impl AuthProvider for StoredTokenProvider {
    async fn resolve_token(&self) -> Result<AuthToken, AuthError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(AuthError::Missing),
            Err(source) => {
                return Err(AuthError::Unreadable {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let stored: StoredAuth =
            serde_json::from_str(&contents).map_err(|_| AuthError::Malformed {
                path: self.path.clone(),
            })?;

        if stored.access_token.trim().is_empty() {
            return Err(AuthError::Missing);
        }

        Ok(AuthToken::new(stored.access_token, TokenSource::Stored))
    }
}

/// Select the token source for this process: the environment when
/// `LIFTOFF_TOKEN` is set, otherwise the credentials file
pub fn select_auth_provider(config_dir: &Path) -> Arc<dyn AuthProvider> {
    match EnvTokenProvider::from_env() {
        Some(provider) => {
            tracing::debug!("Using token from {}", AUTH_TOKEN_ENV_VAR);
            Arc::new(provider)
        }
        None => Arc::new(StoredTokenProvider::in_config_dir(config_dir)),
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
