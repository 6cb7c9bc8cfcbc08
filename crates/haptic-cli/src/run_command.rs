//! `haptic run` - the controller daemon

use std::path::PathBuf;

use clap::Args;
use kube::Client;
use tracing::{error, info};

use haptic_config::Settings;
use haptic_operator::Controller;

#[derive(Args)]
pub(crate) struct RunArgs {
    /// Name of the HAProxyTemplateConfig (or legacy ConfigMap) to load
    #[arg(long, env = "CRD_NAME", default_value = "haproxy-config")]
    crd_name: String,

    /// Secret holding dataplane API credentials
    #[arg(long, env = "SECRET_NAME", default_value = "haproxy-template-ic-credentials")]
    secret_name: String,

    /// Secret holding the webhook TLS certificate
    #[arg(long, env = "WEBHOOK_CERT_SECRET_NAME", default_value = "haproxy-webhook-certs")]
    webhook_cert_secret_name: String,

    /// Explicit kubeconfig path; in-cluster configuration when omitted
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Port for the debug endpoint
    #[arg(long, env = "DEBUG_PORT")]
    debug_port: Option<u16>,

    /// Verbosity: 0 warn, 1 info, 2 debug
    #[arg(long, env = "VERBOSE", default_value_t = 1)]
    verbose: u8,
}

pub(crate) async fn execute(args: RunArgs) -> anyhow::Result<()> {
    let settings = Settings {
        crd_name: args.crd_name,
        secret_name: args.secret_name,
        webhook_cert_secret_name: args.webhook_cert_secret_name,
        debug_port: args.debug_port,
        verbose: args.verbose,
        kubeconfig: args.kubeconfig,
    };
    crate::init_tracing(&settings.log_filter());

    let client = build_client(settings.kubeconfig.as_deref()).await?;
    info!("connected to kubernetes cluster");

    if let Some(port) = settings.debug_port {
        info!(port, "debug endpoint requested; not compiled into this build");
    }

    let controller = Controller::new(client, settings);
    if let Err(e) = controller.run().await {
        error!(error = %e, "controller failed");
        std::process::exit(1);
    }
    info!("controller shut down gracefully");
    Ok(())
}

async fn build_client(kubeconfig: Option<&std::path::Path>) -> anyhow::Result<Client> {
    match kubeconfig {
        None => Ok(Client::try_default().await?),
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)?;
            let config = kube::Config::from_custom_kubeconfig(
                kubeconfig,
                &kube::config::KubeConfigOptions::default(),
            )
            .await?;
            Ok(Client::try_from(config)?)
        }
    }
}
