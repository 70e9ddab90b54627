//! Plank - installs plain manifest bundles as versioned releases

use clap::{Parser, Subcommand};
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use plank::controller::{
    self, ControllerConfig, DEFAULT_RELEASE_NAMESPACE, DEFAULT_STORAGE_NAMESPACE,
};
use plank::crd::{Bundle, BundleInstance};

/// Plank - CRD-driven controller for plain manifest bundles
#[derive(Parser, Debug)]
#[command(name = "plank", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches BundleInstances, the Bundles they reference, and every kind
    /// installed on their behalf.
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Namespace holding release records and receiving unnamespaced objects
    #[arg(
        long,
        env = "PLANK_RELEASE_NAMESPACE",
        default_value = DEFAULT_RELEASE_NAMESPACE
    )]
    release_namespace: String,

    /// Namespace holding unpacked bundle content
    #[arg(
        long,
        env = "PLANK_STORAGE_NAMESPACE",
        default_value = DEFAULT_STORAGE_NAMESPACE
    )]
    storage_namespace: String,

    /// Buffer size of the dynamic watch trigger channel
    #[arg(long, default_value_t = controller::DEFAULT_WATCH_CHANNEL_CAPACITY)]
    watch_channel_capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        for crd in [Bundle::crd(), BundleInstance::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => run_controller(ControllerArgs::parse_from(["controller"])).await,
    }
}

/// Ensure all Plank CRDs are installed
///
/// The controller installs its own CRDs on startup using server-side apply,
/// so CRD versions always match the controller version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(plank::FIELD_MANAGER).force();

    tracing::info!("Installing Bundle CRD...");
    crds.patch("bundles.plank.dev", &params, &Patch::Apply(&Bundle::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install Bundle CRD: {}", e))?;

    tracing::info!("Installing BundleInstance CRD...");
    crds.patch(
        "bundleinstances.plank.dev",
        &params,
        &Patch::Apply(&BundleInstance::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install BundleInstance CRD: {}", e))?;

    tracing::info!("All Plank CRDs installed/updated");
    Ok(())
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!(
        release_namespace = %args.release_namespace,
        storage_namespace = %args.storage_namespace,
        "Plank controller starting..."
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    controller::run(
        client,
        ControllerConfig {
            release_namespace: args.release_namespace,
            storage_namespace: args.storage_namespace,
            watch_channel_capacity: args.watch_channel_capacity,
        },
    )
    .await;

    Ok(())
}
