//! Deployment lifecycle state machine and the poller that drives it
//!
//! The service reports one stage at a time. Stages form a tree rooted at
//! [`DeploymentStage::Queued`]:
//!
//! ```text
//! Queued -> Building -> BuildFailed
//!                    -> Built -> Deploying -> DeployFailed
//!                                          -> Deployed -> Verifying -> VerificationFailed
//!                                                                   -> VerificationSkipped
//!                                                                   -> Verified
//! ```
//!
//! Polling can miss short-lived stages, so an observation further down the
//! current branch is reported as the full path to it. Anything else (a stage
//! on another branch, an earlier stage, an unknown name) is a protocol error.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use liftoff_runtime::{ApiError, AuthToken, CloudApiClient, DeploySettings, StatusReport};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DeployError;
use crate::model::DeploymentId;
use crate::session::SessionDeadline;

/// One stage of a deployment's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentStage {
    /// Waiting for a builder
    Queued,
    /// Image build in progress
    Building,
    /// Build failed (terminal)
    BuildFailed,
    /// Image built
    Built,
    /// Rolling out
    Deploying,
    /// Rollout failed (terminal)
    DeployFailed,
    /// Rolled out
    Deployed,
    /// Health checks running
    Verifying,
    /// Health checks failed (terminal)
    VerificationFailed,
    /// Health checks not run (terminal, success)
    VerificationSkipped,
    /// Live and healthy (terminal, success)
    Verified,
}

impl DeploymentStage {
    /// Stage that must directly precede this one
    pub const fn predecessor(self) -> Option<Self> {
        match self {
            Self::Queued => None,
            Self::Building => Some(Self::Queued),
            Self::BuildFailed | Self::Built => Some(Self::Building),
            Self::Deploying => Some(Self::Built),
            Self::DeployFailed | Self::Deployed => Some(Self::Deploying),
            Self::Verifying => Some(Self::Deployed),
            Self::VerificationFailed | Self::VerificationSkipped | Self::Verified => {
                Some(Self::Verifying)
            }
        }
    }

    /// No transition leaves this stage
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::BuildFailed
                | Self::DeployFailed
                | Self::VerificationFailed
                | Self::VerificationSkipped
                | Self::Verified
        )
    }

    /// Terminal stage in which the app is live
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Verified | Self::VerificationSkipped)
    }

    /// Stages strictly after `from` up to and including `self`, when `self`
    /// lies further down `from`'s branch. `from = None` means nothing has been
    /// reported yet, so the path starts at the root.
    pub fn path_from(self, from: Option<Self>) -> Option<Vec<Self>> {
        let mut path = vec![self];
        let mut cursor = self.predecessor();
        loop {
            match (cursor, from) {
                (Some(stage), Some(origin)) if stage == origin => break,
                (Some(stage), _) => {
                    path.push(stage);
                    cursor = stage.predecessor();
                }
                (None, None) => break,
                (None, Some(_)) => return None,
            }
        }
        path.reverse();
        Some(path)
    }

    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Building => "building",
            Self::BuildFailed => "build_failed",
            Self::Built => "built",
            Self::Deploying => "deploying",
            Self::DeployFailed => "deploy_failed",
            Self::Deployed => "deployed",
            Self::Verifying => "verifying",
            Self::VerificationFailed => "verification_failed",
            Self::VerificationSkipped => "verification_skipped",
            Self::Verified => "verified",
        }
    }

    /// Progress message for this stage
    pub const fn human_readable(self) -> &'static str {
        match self {
            Self::Queued => "Waiting in the build queue",
            Self::Building => "Building image",
            Self::BuildFailed => "Build failed",
            Self::Built => "Image built",
            Self::Deploying => "Deploying",
            Self::DeployFailed => "Deployment failed",
            Self::Deployed => "Deployed",
            Self::Verifying => "Verifying deployment",
            Self::VerificationFailed => "Verification failed",
            Self::VerificationSkipped => "Verification skipped",
            Self::Verified => "Deployment verified",
        }
    }
}

impl fmt::Display for DeploymentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage name the client does not know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStage(pub String);

impl FromStr for DeploymentStage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stage = match s.trim().to_ascii_lowercase().as_str() {
            "queued" | "waiting_upload" | "ready_for_build" => Self::Queued,
            "building" | "extracting" | "building_image" => Self::Building,
            "build_failed" | "extracting_failed" | "building_image_failed" => Self::BuildFailed,
            "built" => Self::Built,
            "deploying" => Self::Deploying,
            "deploy_failed" | "deploying_failed" => Self::DeployFailed,
            "deployed" => Self::Deployed,
            "verifying" => Self::Verifying,
            "verification_failed" | "verifying_failed" => Self::VerificationFailed,
            "verification_skipped" | "verifying_skipped" => Self::VerificationSkipped,
            "verified" | "success" => Self::Verified,
            _ => return Err(UnknownStage(s.to_string())),
        };
        Ok(stage)
    }
}

/// A reported stage with the service's diagnostic detail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStatus {
    /// Lifecycle stage
    pub stage: DeploymentStage,
    /// Service-provided detail, kept for failure and skip stages
    pub detail: Option<String>,
}

impl DeploymentStatus {
    /// Pair a stage with its detail
    pub const fn new(stage: DeploymentStage, detail: Option<String>) -> Self {
        Self { stage, detail }
    }
}

/// Polls a deployment's status until it reaches a terminal stage
///
/// [`StatusTracker::next`] yields each stage once, in graph order, and
/// returns `None` after the terminal stage. Finishing for any reason cancels
/// the stop token handed to [`StatusTracker::new`], which is how the log
/// stream learns to stop.
pub struct StatusTracker {
    api_client: Arc<dyn CloudApiClient>,
    token: AuthToken,
    session: SessionDeadline,
    deployment_id: DeploymentId,
    poll_interval: Duration,
    wait_timeout: Duration,
    terminal_timeout: Duration,
    max_failures: u32,
    stop: CancellationToken,
    last_reported: Option<DeploymentStage>,
    pending: VecDeque<DeploymentStatus>,
    started_at: Instant,
    subscribed_at: Instant,
    polls: u32,
    failures: u32,
    finished: bool,
}

impl StatusTracker {
    /// Start tracking `deployment_id`
    pub fn new(
        api_client: Arc<dyn CloudApiClient>,
        token: AuthToken,
        deployment_id: DeploymentId,
        settings: &DeploySettings,
        stop: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            api_client,
            session: SessionDeadline::for_token(&token),
            token,
            deployment_id,
            poll_interval: settings.status_poll_interval(),
            wait_timeout: settings.status_wait_timeout(),
            terminal_timeout: settings.status_terminal_timeout(),
            max_failures: settings.status_max_failures,
            stop,
            last_reported: None,
            pending: VecDeque::new(),
            started_at: now,
            subscribed_at: now,
            polls: 0,
            failures: 0,
            finished: false,
        }
    }

    /// Last stage handed out
    pub const fn current(&self) -> Option<DeploymentStage> {
        self.last_reported
    }

    /// Next stage in graph order, `None` once a terminal stage was returned
    pub async fn next(&mut self) -> Option<Result<DeploymentStatus, DeployError>> {
        loop {
            if let Some(status) = self.pending.pop_front() {
                self.last_reported = Some(status.stage);
                if status.stage.is_terminal() {
                    info!(
                        "Deployment {} finished with {}",
                        self.deployment_id, status.stage
                    );
                    self.finish();
                }
                return Some(Ok(status));
            }
            if self.finished {
                return None;
            }

            let now = Instant::now();
            if now.duration_since(self.started_at) >= self.terminal_timeout {
                return Some(Err(self.fail(DeployError::StatusTimeout(self.terminal_timeout))));
            }
            if now.duration_since(self.subscribed_at) >= self.wait_timeout {
                warn!(
                    "No terminal status for deployment {} after {:?}, re-subscribing",
                    self.deployment_id, self.wait_timeout
                );
                self.subscribed_at = now;
                self.failures = 0;
            }

            if self.polls > 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
            if let Err(err) = self.session.ensure_live() {
                return Some(Err(self.fail(err)));
            }
            self.polls += 1;

            match self
                .api_client
                .deployment_status(&self.token, self.deployment_id.as_str())
                .await
            {
                Ok(report) => {
                    self.failures = 0;
                    if let Err(err) = self.observe(report) {
                        return Some(Err(self.fail(err)));
                    }
                }
                Err(
                    err @ (ApiError::Unauthorized { .. }
                    | ApiError::Rejected { .. }
                    | ApiError::Decode(_)),
                ) => {
                    return Some(Err(self.fail(err.into())));
                }
                Err(err) => {
                    self.failures += 1;
                    debug!(
                        "Status poll {} failed ({}/{}): {}",
                        self.polls, self.failures, self.max_failures, err
                    );
                    if self.failures > self.max_failures {
                        return Some(Err(self.fail(DeployError::Transport(format!(
                            "Lost contact with the deployment service while waiting for status: {err}"
                        )))));
                    }
                }
            }
        }
    }

    fn observe(&mut self, report: StatusReport) -> Result<(), DeployError> {
        let stage: DeploymentStage = report.status.parse().map_err(|UnknownStage(name)| {
            DeployError::Protocol(format!("unknown deployment status '{name}'"))
        })?;

        if Some(stage) == self.last_reported {
            return Ok(());
        }

        let path = stage.path_from(self.last_reported).ok_or_else(|| {
            let from = self.last_reported.map_or("start", DeploymentStage::as_str);
            DeployError::Protocol(format!(
                "deployment status went from '{from}' to '{stage}', which is not a valid transition"
            ))
        })?;

        debug!("Deployment {} observed {}", self.deployment_id, stage);
        let mut detail = report.detail;
        for step in path {
            let step_detail = if step == stage { detail.take() } else { None };
            self.pending.push_back(DeploymentStatus::new(step, step_detail));
        }
        Ok(())
    }

    fn fail(&mut self, err: DeployError) -> DeployError {
        self.finish();
        err
    }

    fn finish(&mut self) {
        self.finished = true;
        self.pending.clear();
        self.stop.cancel();
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
