//! FleetConfig operator - declarative hub-and-spoke fleet registration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fleetconfig::controller::{error_policy, reconcile, Context};
use fleetconfig::crd::FleetConfig;
use fleetconfig::webhook::webhook_router;

/// FleetConfig operator - reconciles hub-and-spoke fleet topologies
#[derive(Parser, Debug)]
#[command(name = "fleetconfig-controller", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Admission webhook HTTPS listen address
    #[arg(long, default_value = "0.0.0.0:9443")]
    webhook_addr: SocketAddr,

    /// Path to the webhook TLS certificate (PEM)
    #[arg(long, env = "WEBHOOK_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// Path to the webhook TLS private key (PEM)
    #[arg(long, env = "WEBHOOK_TLS_KEY")]
    tls_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider for the webhook TLS listener
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install crypto provider");

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&FleetConfig::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    tracing::info!("FleetConfig controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let ctx = Arc::new(Context::new(client.clone()));
    let fleetconfigs: Api<FleetConfig> = Api::all(client);

    // Start the admission webhook server when TLS material is provided
    let webhook_server = match (&cli.tls_cert, &cli.tls_key) {
        (Some(cert), Some(key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to configure webhook TLS: {}", e))?;
            let router = webhook_router();
            let addr = cli.webhook_addr;
            tracing::info!(addr = %addr, "Admission webhook listening");

            Some(tokio::spawn(async move {
                axum_server::bind_rustls(addr, tls)
                    .serve(router.into_make_service())
                    .await
                    .map_err(|e| tracing::error!(error = %e, "Webhook server error"))
            }))
        }
        _ => {
            tracing::info!("Webhook TLS material not provided; admission webhooks disabled");
            None
        }
    };

    tracing::info!("Starting FleetConfig controller...");

    let controller = Controller::new(fleetconfigs, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Reconciliation error");
                }
            }
        });

    controller.await;

    if let Some(server) = webhook_server {
        server.abort();
    }

    tracing::info!("FleetConfig controller shutting down");
    Ok(())
}
