//! Resumable build log stream
//!
//! The service sends newline-delimited JSON events. Message events carry an
//! `id` that becomes the resume cursor; after any disruption the stream
//! reopens with `last_message_id` set to the last delivered id, and the
//! service replays only what comes after it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use liftoff_runtime::config::backoff_delay;
use liftoff_runtime::{ApiError, AuthToken, CloudApiClient, DeploySettings, LineStream};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DeployError;
use crate::model::{DeploymentId, LogCursor, LogLine};
use crate::session::SessionDeadline;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum LogEvent {
    Message {
        message: String,
        id: serde_json::Value,
    },
    Heartbeat,
    Timeout,
    Complete,
    Failed,
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

fn cursor_from(id: serde_json::Value) -> LogCursor {
    match id {
        serde_json::Value::String(s) => LogCursor::new(s),
        other => LogCursor::new(other.to_string()),
    }
}

/// Build log lines of one deployment as a lazy, self-reconnecting sequence
///
/// Yields `(cursor, line)` pairs through [`BuildLogStream::next`] until the
/// service signals the end of the build, the stop token fires, or the
/// reconnect budget runs out (the last case yields one error, then `None`).
pub struct BuildLogStream {
    api_client: Arc<dyn CloudApiClient>,
    token: AuthToken,
    session: SessionDeadline,
    deployment_id: DeploymentId,
    cursor: Option<LogCursor>,
    lines: Option<LineStream>,
    max_reconnects: u32,
    backoff: Duration,
    failures: u32,
    /// The service closed its window; pause once before resuming
    window_ended: bool,
    stop: CancellationToken,
    finished: bool,
}

impl BuildLogStream {
    /// Prepare a stream starting after `from`; nothing is requested until the
    /// first call to [`BuildLogStream::next`]
    pub fn open(
        api_client: Arc<dyn CloudApiClient>,
        token: AuthToken,
        deployment_id: DeploymentId,
        from: Option<LogCursor>,
        settings: &DeploySettings,
        stop: CancellationToken,
    ) -> Self {
        Self {
            api_client,
            session: SessionDeadline::for_token(&token),
            token,
            deployment_id,
            cursor: from,
            lines: None,
            max_reconnects: settings.log_max_reconnects,
            backoff: settings.log_backoff(),
            failures: 0,
            window_ended: false,
            stop,
            finished: false,
        }
    }

    /// Cursor of the last delivered line
    pub const fn cursor(&self) -> Option<&LogCursor> {
        self.cursor.as_ref()
    }

    /// Next log line
    pub async fn next(&mut self) -> Option<Result<LogLine, DeployError>> {
        loop {
            if self.finished || self.stop.is_cancelled() {
                self.close();
                return None;
            }

            if self.lines.is_none() {
                match self.connect().await {
                    None => return None,
                    Some(Err(err)) => return Some(Err(err)),
                    Some(Ok(())) => continue,
                }
            }
            let Some(lines) = self.lines.as_mut() else {
                continue;
            };

            let item = tokio::select! {
                biased;
                () = self.stop.cancelled() => None,
                item = lines.next() => Some(item),
            };
            let Some(item) = item else {
                self.close();
                return None;
            };

            let raw = match item {
                Some(Ok(raw)) => raw,
                Some(Err(err)) => {
                    if let Some(err) = self.disrupted(&err.to_string()) {
                        return Some(Err(err));
                    }
                    continue;
                }
                None => {
                    if let Some(err) = self.disrupted("connection closed before the build ended") {
                        return Some(Err(err));
                    }
                    continue;
                }
            };

            if raw.trim().is_empty() {
                continue;
            }
            let event = match serde_json::from_str::<LogEvent>(&raw) {
                Ok(event) => event,
                Err(err) => {
                    debug!("Skipping unreadable build log line {:?}: {}", raw, err);
                    continue;
                }
            };

            match event {
                LogEvent::Message { message, id } => {
                    self.failures = 0;
                    let cursor = cursor_from(id);
                    self.cursor = Some(cursor.clone());
                    return Some(Ok(LogLine {
                        cursor,
                        text: message.trim_end().to_string(),
                    }));
                }
                LogEvent::Heartbeat => {
                    self.failures = 0;
                }
                LogEvent::Timeout => {
                    debug!("Build log window ended, resuming from {:?}", self.cursor);
                    self.lines = None;
                    self.window_ended = true;
                }
                LogEvent::Complete | LogEvent::Failed => {
                    debug!("Build log for {} ended", self.deployment_id);
                    self.close();
                    return None;
                }
                LogEvent::Error { message } => {
                    let reason = message.unwrap_or_else(|| "service reported an error".to_string());
                    if let Some(err) = self.disrupted(&reason) {
                        return Some(Err(err));
                    }
                }
            }
        }
    }

    /// Open a subscription, waiting out the backoff after failures.
    /// `None` means the stop token fired.
    async fn connect(&mut self) -> Option<Result<(), DeployError>> {
        let delay = if self.failures > 0 {
            Some(backoff_delay(self.backoff, self.failures - 1))
        } else if std::mem::take(&mut self.window_ended) {
            Some(backoff_delay(self.backoff, 0))
        } else {
            None
        };
        if let Some(delay) = delay {
            debug!(
                "Reconnecting to build log in {:?} ({} failed attempts of {})",
                delay, self.failures, self.max_reconnects
            );
            tokio::select! {
                biased;
                () = self.stop.cancelled() => {
                    self.close();
                    return None;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        if let Err(err) = self.session.ensure_live() {
            self.close();
            return Some(Err(err));
        }

        let cursor = self.cursor.as_ref().map(LogCursor::as_str);
        let opened = tokio::select! {
            biased;
            () = self.stop.cancelled() => None,
            opened = self.api_client.open_build_logs(&self.token, self.deployment_id.as_str(), cursor) => Some(opened),
        };

        match opened? {
            Ok(lines) => {
                self.lines = Some(lines);
                Some(Ok(()))
            }
            Err(err @ ApiError::Unauthorized { .. }) => {
                self.close();
                Some(Err(err.into()))
            }
            Err(err) => Some(self.disrupted(&err.to_string()).map_or(Ok(()), Err)),
        }
    }

    fn disrupted(&mut self, reason: &str) -> Option<DeployError> {
        self.lines = None;
        self.failures += 1;
        if self.failures > self.max_reconnects {
            warn!(
                "Giving up on build log for {} after {} reconnect attempts: {}",
                self.deployment_id, self.max_reconnects, reason
            );
            self.close();
            return Some(DeployError::Transport(format!(
                "Build log stream lost after {} reconnect attempts: {reason}",
                self.max_reconnects
            )));
        }
        debug!("Build log stream disrupted: {}", reason);
        None
    }

    fn close(&mut self) {
        self.finished = true;
        self.lines = None;
    }
}

#[cfg(test)]
#[path = "logs_tests.rs"]
mod tests;
