use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "nimbus")]
#[command(about = "Declarative function deployment against the cloud-function control plane", long_about = None)]
pub struct Args {
    /// Registry host: function listing, registration and version management
    #[arg(
        long,
        env = "NIMBUS_REGISTRY_URL",
        default_value = "https://api.ngc.nvidia.com/v2/nvcf"
    )]
    pub registry_url: String,

    /// Runtime host: deployment requests and status polling
    #[arg(
        long,
        env = "NIMBUS_RUNTIME_URL",
        default_value = "https://api.nvcf.nvidia.com/v2/nvcf"
    )]
    pub runtime_url: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reconcile a manifest against the control plane and drive deployments
    Deploy {
        /// Path to the YAML manifest
        #[arg(long)]
        manifest: PathBuf,

        /// Target environment; only variants whose `type` matches are processed
        #[arg(long)]
        environment: String,

        /// Limit to named functions (comma-separated, or '*' for all)
        #[arg(long, value_delimiter = ',')]
        function_name: Option<Vec<String>>,

        /// Print the built payloads without calling the control plane
        #[arg(long)]
        debug: bool,

        /// Seconds between deployment status polls
        #[arg(long, default_value_t = 45)]
        poll_interval_secs: u64,

        /// Overall deadline for a deployment to reach ACTIVE
        #[arg(long, default_value_t = 3600)]
        poll_timeout_secs: u64,
    },
    /// Rewrite the image tag of the manifest's `fn_image` field in place
    SetImageTag {
        /// New tag, e.g. a CI build number
        tag: String,

        /// Path to the manifest to rewrite
        #[arg(long, default_value = "launch-list.yml")]
        manifest: PathBuf,
    },
}
