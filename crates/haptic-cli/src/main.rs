//! HAPTIC command line entry point

use clap::{Parser, Subcommand};

mod run_command;
mod validate_command;

pub(crate) use run_command::RunArgs;
pub(crate) use validate_command::ValidateArgs;

#[derive(Parser)]
#[command(name = "haptic")]
#[command(about = "HAProxy Template Ingress Controller")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller daemon against the cluster
    Run(RunArgs),
    /// Load a config file and execute its embedded validation tests
    Validate(ValidateArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_command::execute(args).await,
        Commands::Validate(args) => validate_command::execute(args).await,
    }
}

pub(crate) fn init_tracing(filter: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
