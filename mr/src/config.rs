use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};

pub const DEFAULT_ADDR: &str = "127.0.0.1:50051";
pub const DEFAULT_BUCKETS: u32 = 10;

#[derive(Debug, Clone, Args)]
pub struct CoordinatorConfig {
    /// Address the RPC endpoint listens on
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub addr: SocketAddr,

    /// Number of partitions, which is also the number of Reduce tasks
    #[arg(long, default_value_t = DEFAULT_BUCKETS)]
    pub buckets: u32,

    /// Directory the Reduce output files are written to
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Heartbeat silence after which a worker is declared dead
    #[arg(long, default_value_t = 5000)]
    pub heartbeat_timeout_ms: u64,

    /// How often the watchdog scans worker heartbeats
    #[arg(long, default_value_t = 5000)]
    pub watchdog_interval_ms: u64,

    /// How often the driver checks for completion and logs statistics
    #[arg(long, default_value_t = 1000)]
    pub status_interval_ms: u64,

    /// Maximum number of concurrently served worker connections
    #[arg(long, default_value_t = 128)]
    pub max_connections: usize,
}

impl CoordinatorConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            buckets: DEFAULT_BUCKETS,
            output_dir: PathBuf::from("."),
            heartbeat_timeout_ms: 5000,
            watchdog_interval_ms: 5000,
            status_interval_ms: 1000,
            max_connections: 128,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct WorkerConfig {
    /// Coordinator RPC address
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub addr: SocketAddr,

    /// Worker id; defaults to the process id
    #[arg(long)]
    pub id: Option<u32>,

    /// Bucket count declared at registration
    #[arg(long, default_value_t = DEFAULT_BUCKETS)]
    pub buckets: u32,

    /// Parent of the worker's private working directory; defaults to the
    /// system temp dir
    #[arg(long)]
    pub work_root: Option<PathBuf>,

    #[arg(long, default_value_t = 2000)]
    pub heartbeat_interval_ms: u64,

    /// Sleep between task requests when no work is available
    #[arg(long, default_value_t = 1000)]
    pub backoff_ms: u64,
}

impl WorkerConfig {
    pub fn worker_id(&self) -> u32 {
        self.id.unwrap_or_else(std::process::id)
    }

    /// `<work_root>/<worker id>`
    pub fn working_dir(&self) -> PathBuf {
        let root = self.work_root.clone().unwrap_or_else(std::env::temp_dir);
        root.join(self.worker_id().to_string())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            id: None,
            buckets: DEFAULT_BUCKETS,
            work_root: None,
            heartbeat_interval_ms: 2000,
            backoff_ms: 1000,
        }
    }
}

/// Which in-process runtime runs a local job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RuntimeMode {
    /// Map every file in turn, keep all records in memory
    Sequential,
    /// One Map thread per input file over shared bucket files
    Multithreaded,
}

/// A whole job inside one process, no coordinator or workers.
#[derive(Debug, Clone, Args)]
pub struct LocalConfig {
    #[arg(long, value_enum, default_value_t = RuntimeMode::Multithreaded)]
    pub mode: RuntimeMode,

    /// The single output file
    #[arg(long, default_value = "mr-out-0")]
    pub output: PathBuf,

    /// Where the multithreaded runtime keeps its bucket files
    #[arg(long, default_value = "data/intermediate")]
    pub work_dir: PathBuf,

    /// Bucket count of the multithreaded runtime
    #[arg(long, default_value_t = DEFAULT_BUCKETS)]
    pub buckets: u32,
}

impl Default for LocalConfig {
    fn default() -> Self {
        LocalConfig {
            mode: RuntimeMode::Multithreaded,
            output: PathBuf::from("mr-out-0"),
            work_dir: PathBuf::from("data/intermediate"),
            buckets: DEFAULT_BUCKETS,
        }
    }
}
