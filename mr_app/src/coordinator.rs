use std::path::PathBuf;

use clap::Parser;
use mr::config::CoordinatorConfig;
use mr::coordinator::Coordinator;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "coordinator", about = "Run the MapReduce coordinator for one job")]
struct Cli {
    #[command(flatten)]
    config: CoordinatorConfig,

    /// Input files, one Map task each
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coordinator=info,mr=info".into()),
        )
        .init();

    let cli = Cli::parse();
    info!(
        "starting job: {} input file(s), {} bucket(s)",
        cli.files.len(),
        cli.config.buckets
    );

    let coordinator = Coordinator::new(cli.files, &cli.config)?;
    mr::coordinator::run(coordinator, &cli.config).await?;

    info!("application has completed successfully");
    Ok(())
}
