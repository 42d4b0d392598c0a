//! Token expiry as a local deadline
//!
//! A token's expiry is a wall-clock timestamp. It is turned into a
//! [`tokio::time::Instant`] once, so every later check runs on the same clock
//! as the retry, poll and reconnect timers.

use std::time::Duration;

use chrono::Utc;
use liftoff_runtime::AuthToken;
use tokio::time::Instant;
use tracing::warn;

use crate::error::DeployError;

/// Point after which a token must not be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionDeadline(Option<Instant>);

impl SessionDeadline {
    pub(crate) fn for_token(token: &AuthToken) -> Self {
        Self(token.expires_at().map(|expires_at| {
            let remaining = (expires_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            Instant::now() + remaining
        }))
    }

    /// Checked before every request that carries the token
    pub(crate) fn ensure_live(self) -> Result<(), DeployError> {
        match self.0 {
            Some(deadline) if Instant::now() >= deadline => {
                warn!("Token expired while the deploy was running");
                Err(DeployError::session_expired())
            }
            _ => Ok(()),
        }
    }
}
