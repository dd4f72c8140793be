use clap::Parser;
use mr::config::WorkerConfig;
use mr::worker::Worker;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "worker", about = "Run a MapReduce worker with the word count application")]
struct Cli {
    #[command(flatten)]
    config: WorkerConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worker=info,mr=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut worker = Worker::new(cli.config, mr_app::word_count());
    worker.start().await?;
    info!("worker started: {}", worker);

    let heartbeat = worker.spawn_heartbeat()?;
    let result = worker.run().await;
    heartbeat.abort();
    result
}
