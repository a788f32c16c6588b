mod args;
mod client;
mod credentials;
mod deploy;
mod payload;
mod reconcile;
mod retag;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use nimbus_common::telemetry::init_tracing;
use nimbus_common::Manifest;

use crate::args::{Args, Command};
use crate::client::{with_reauth, ControlPlane, HttpControlPlane};
use crate::credentials::EnvTokenProvider;
use crate::deploy::{Driver, DriverConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("nimbus");
    let args = Args::parse();

    match args.command {
        Command::Deploy {
            manifest,
            environment,
            function_name,
            debug,
            poll_interval_secs,
            poll_timeout_secs,
        } => {
            let config = DriverConfig {
                poll_interval: Duration::from_secs(poll_interval_secs),
                poll_timeout: Duration::from_secs(poll_timeout_secs),
                debug,
                ..DriverConfig::default()
            };
            run_deploy(
                &args.registry_url,
                &args.runtime_url,
                &manifest,
                &environment,
                function_name.as_deref(),
                config,
            )
            .await
        }
        Command::SetImageTag { tag, manifest } => {
            retag::set_image_tag(&manifest, &tag)?;
            Ok(())
        }
    }
}

async fn run_deploy(
    registry_url: &str,
    runtime_url: &str,
    manifest_path: &Path,
    environment: &str,
    function_name: Option<&[String]>,
    config: DriverConfig,
) -> Result<()> {
    let mut manifest = Manifest::load(manifest_path)?;
    info!(
        name = %manifest.name,
        functions = manifest.functions.len(),
        "manifest loaded"
    );

    if let Some(names) = function_name {
        manifest.retain_named(names);
    }

    if manifest.manual_deploy {
        info!("manual deploy flag is set, skipping function processing");
        return Ok(());
    }

    let credentials = EnvTokenProvider::for_environment(environment);
    let api = HttpControlPlane::new(registry_url, runtime_url);

    let remote = {
        let api = &api;
        with_reauth(&credentials, |token| async move {
            api.list_functions(&token).await
        })
        .await?
    };
    info!(count = remote.len(), "remote function index fetched");

    let plan = reconcile::plan(&manifest, &remote, environment);
    if plan.is_empty() {
        info!(environment, "no variants match the target environment, nothing to do");
        return Ok(());
    }

    Driver::new(&api, &credentials, config).run(&plan).await?;
    info!("all functions reconciled");
    Ok(())
}
