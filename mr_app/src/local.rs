use std::path::PathBuf;

use clap::Parser;
use mr::config::LocalConfig;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "local", about = "Run word count inside this process, without workers")]
struct Cli {
    #[command(flatten)]
    config: LocalConfig,

    /// Input files
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "local=info,mr=info".into()),
        )
        .init();

    let cli = Cli::parse();
    info!(
        "running {:?} job over {} input file(s)",
        cli.config.mode,
        cli.files.len()
    );
    mr::runtime::from_config(&cli.config).run(mr_app::word_count(), &cli.files)?;
    info!("output written to {}", cli.config.output.display());
    Ok(())
}
