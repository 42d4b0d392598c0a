//! `liftoff deploy`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use liftoff_deploy::error::EXIT_CONFIGURATION;
use liftoff_deploy::{DeployDependencies, DeployOptions, deploy};
use liftoff_runtime::config::Config;
use liftoff_runtime::{
    DeploySettings, MessageStyle, RealCloudApiClient, RealUserInterface, UserInterface,
    select_auth_provider,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Application directory to deploy
    #[arg(default_value = ".")]
    pub path: PathBuf,
    /// Return once the upload is accepted instead of following the build
    #[arg(long)]
    pub no_wait: bool,
    /// Show debug logs
    #[arg(short, long)]
    pub verbose: bool,
}

/// Run a deploy and return the process exit code
pub async fn execute(args: DeployArgs) -> i32 {
    let ui = Arc::new(RealUserInterface);

    let deps = match dependencies(Arc::clone(&ui) as Arc<dyn UserInterface>) {
        Ok(deps) => deps,
        Err(err) => {
            ui.print_styled(&format!("Error: {err:#}"), MessageStyle::Error);
            return EXIT_CONFIGURATION;
        }
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    let options = DeployOptions {
        wait: !args.no_wait,
        ..DeployOptions::default()
    };
    match deploy(&args.path, &options, deps, cancel).await {
        Ok(outcome) => {
            debug!("Deploy finished: {:?}", outcome);
            outcome.exit_code()
        }
        Err(err) => {
            ui.print_styled(&format!("Error: {err}"), MessageStyle::Error);
            err.exit_code()
        }
    }
}

fn dependencies(ui: Arc<dyn UserInterface>) -> Result<Arc<DeployDependencies>> {
    let config_dir = Config::default_config_dir()?;
    let settings = DeploySettings::load(&config_dir)?;
    debug!("Using API at {}", settings.api_url);

    let api_client =
        RealCloudApiClient::new(&settings).context("Failed to create the HTTP client")?;

    Ok(Arc::new(DeployDependencies {
        api_client: Arc::new(api_client),
        auth_provider: select_auth_provider(&config_dir),
        ui,
        settings,
    }))
}
