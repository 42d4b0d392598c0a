//! One deploy, end to end
//!
//! Token check, archive, upload, then status tracking and log streaming side
//! by side until the deployment reaches a terminal stage.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use liftoff_runtime::{
    AuthProvider, AuthToken, CloudApiClient, DeploySettings, MessageStyle, ProgressIndicator,
    UserInterface,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::ArchiveBuilder;
use crate::error::DeployError;
use crate::ignore_rules::IgnoreSources;
use crate::logs::BuildLogStream;
use crate::model::{DeploymentId, DeploymentOutcome};
use crate::status::{DeploymentStatus, StatusTracker};
use crate::upload::{UploadOutcome, UploadSession};

/// Dependencies for a deploy
pub struct DeployDependencies {
    /// API client for the deployment service
    pub api_client: Arc<dyn CloudApiClient>,
    /// Source of the bearer token
    pub auth_provider: Arc<dyn AuthProvider>,
    /// User interface for output
    pub ui: Arc<dyn UserInterface>,
    /// Retry, timeout and endpoint settings
    pub settings: DeploySettings,
}

/// Per-invocation choices for a deploy
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Ignore files to read
    pub ignore_sources: IgnoreSources,
    /// Follow the build and rollout after the upload is accepted
    pub wait: bool,
    /// Where the temporary archive directory is created
    pub archive_parent: PathBuf,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            ignore_sources: IgnoreSources::default(),
            wait: true,
            archive_parent: std::env::temp_dir(),
        }
    }
}

/// Deploy the application in `root`
///
/// Errors abort the deploy; a failed deployment or a user interrupt is an
/// `Ok` outcome. Cancelling `cancel` stops whichever stage is running.
pub async fn deploy(
    root: &Path,
    options: &DeployOptions,
    deps: Arc<DeployDependencies>,
    cancel: CancellationToken,
) -> Result<DeploymentOutcome, DeployError> {
    let spinner = deps.ui.create_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));

    spinner.set_message("Checking credentials...");
    let token = deps.auth_provider.resolve_token().await.inspect_err(|_| {
        spinner.finish_and_clear();
    })?;
    if token.is_expired_at(Utc::now()) {
        spinner.finish_and_clear();
        warn!("Token from {:?} expired at {:?}", token.source(), token.expires_at());
        return Err(DeployError::session_expired());
    }

    let root = match tokio::fs::canonicalize(root).await {
        Ok(path) if path.is_dir() => path,
        Ok(path) => {
            spinner.finish_and_clear();
            return Err(DeployError::Configuration(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        Err(err) => {
            spinner.finish_and_clear();
            return Err(DeployError::Configuration(format!(
                "Cannot deploy {}: {err}",
                root.display()
            )));
        }
    };

    spinner.set_message("Packaging application...");
    let archive = {
        let sources = options.ignore_sources.clone();
        let parent = options.archive_parent.clone();
        let root = root.clone();
        tokio::task::spawn_blocking(move || {
            let rules = sources.load(&root)?;
            ArchiveBuilder::build_in(&root, &rules, &parent)
        })
        .await
        .map_err(|e| DeployError::Io(std::io::Error::other(e)))?
    };
    spinner.finish_and_clear();
    let archive = archive?;

    if cancel.is_cancelled() {
        deps.ui
            .print_styled("Deployment cancelled.", MessageStyle::Warning);
        return Ok(DeploymentOutcome::Cancelled);
    }

    deps.ui.print(&format!(
        "Packaged {} files ({} KB)",
        archive.entries().len(),
        archive.size().div_ceil(1024)
    ));

    let progress: Arc<dyn ProgressIndicator> =
        Arc::from(deps.ui.create_progress_bar(archive.size()));
    progress.set_message("Uploading");
    let session = UploadSession::new(Arc::clone(&deps.api_client), &deps.settings);
    debug!("Upload id {}", session.upload_id());
    let uploaded = session
        .upload(archive, &token, Arc::clone(&progress), &cancel)
        .await;
    progress.finish_and_clear();

    let (deployment_id, dashboard_url) = match uploaded? {
        UploadOutcome::Accepted {
            deployment_id,
            dashboard_url,
        } => (deployment_id, dashboard_url),
        UploadOutcome::Cancelled => {
            deps.ui
                .print_styled("Upload cancelled.", MessageStyle::Warning);
            return Ok(DeploymentOutcome::Cancelled);
        }
    };

    deps.ui.print_styled(
        &format!("Deployment {deployment_id} created"),
        MessageStyle::Success,
    );
    if let Some(url) = &dashboard_url {
        deps.ui.print(&format!("Dashboard: {url}"));
    }

    if !options.wait {
        if let Some(url) = &dashboard_url {
            deps.ui
                .print(&format!("Check the status of your deployment at {url}"));
        }
        return Ok(DeploymentOutcome::Submitted {
            deployment_id,
            dashboard_url,
        });
    }
    deps.ui.print("");

    let stop = cancel.child_token();
    let watched = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        watched = watch(&deps, token, deployment_id.clone(), dashboard_url.as_deref(), &stop) => Some(watched),
    };
    stop.cancel();

    let Some(status) = watched.transpose()? else {
        deps.ui
            .print_styled("Stopped watching the deployment.", MessageStyle::Warning);
        if let Some(url) = &dashboard_url {
            deps.ui.print(&format!("It keeps running; follow it at {url}"));
        }
        return Ok(DeploymentOutcome::Cancelled);
    };

    report(&*deps.ui, &status, dashboard_url.as_deref());
    Ok(DeploymentOutcome::Finished {
        deployment_id,
        status,
        dashboard_url,
    })
}

/// Track status and stream logs concurrently until a terminal stage
async fn watch(
    deps: &DeployDependencies,
    token: AuthToken,
    deployment_id: DeploymentId,
    dashboard_url: Option<&str>,
    stop: &CancellationToken,
) -> Result<DeploymentStatus, DeployError> {
    let mut tracker = StatusTracker::new(
        Arc::clone(&deps.api_client),
        token.clone(),
        deployment_id.clone(),
        &deps.settings,
        stop.clone(),
    );
    let mut logs = BuildLogStream::open(
        Arc::clone(&deps.api_client),
        token,
        deployment_id,
        None,
        &deps.settings,
        stop.clone(),
    );

    let spinner = deps.ui.create_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));

    let track = async {
        let mut terminal = None;
        while let Some(status) = tracker.next().await {
            let status = status.inspect_err(|err| {
                debug!("Status tracking stopped after {:?}: {}", tracker.current(), err);
            })?;
            debug!("Deployment stage: {}", status.stage);
            spinner.set_message(status.stage.human_readable());
            if status.stage.is_terminal() {
                terminal = Some(status);
            }
        }
        terminal.ok_or_else(|| {
            DeployError::Protocol("status tracking ended without a terminal stage".to_string())
        })
    };

    let stream = async {
        while let Some(line) = logs.next().await {
            match line {
                Ok(line) => deps.ui.print_styled(&line.text, MessageStyle::Dim),
                Err(err) => {
                    // log visibility is best-effort; status decides the outcome
                    warn!("Build log streaming stopped: {}", err);
                    deps.ui
                        .print_styled("Unable to stream build logs.", MessageStyle::Warning);
                    if let Some(url) = dashboard_url {
                        deps.ui.print(&format!("Follow the build at {url}"));
                    }
                    break;
                }
            }
        }
    };

    let (status, ()) = tokio::join!(track, stream);
    spinner.finish_and_clear();
    status
}

fn report(ui: &dyn UserInterface, status: &DeploymentStatus, dashboard_url: Option<&str>) {
    ui.print("");
    let headline = status.stage.human_readable();
    if status.stage.is_success() {
        info!("Deployment finished: {}", status.stage);
        ui.print_styled(headline, MessageStyle::Success);
        if let Some(detail) = &status.detail {
            ui.print(detail);
        }
        return;
    }

    match &status.detail {
        Some(detail) => ui.print_styled(&format!("{headline}: {detail}"), MessageStyle::Error),
        None => ui.print_styled(headline, MessageStyle::Error),
    }
    if let Some(url) = dashboard_url {
        ui.print(&format!("Details: {url}"));
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
