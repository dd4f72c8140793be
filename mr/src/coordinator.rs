use futures::{future, lock::Mutex, prelude::*};
use std::{
    fmt,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::{Instant, SystemTime},
};
use tarpc::{
    context,
    server::{self, Channel},
    tokio_serde::formats::Json,
};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::directory::{TaskRef, WorkerDirectory, WorkerId};
use crate::error::Result;
use crate::registry::{PhaseCounts, TaskRegistry};
use crate::rpc::{Assignment, AssignmentKind, StatusReport};
use crate::task::{MapOutput, Task, TaskKind, TaskStatus, TaskType};

/// Scheduling state of one job: every task and every worker.
#[derive(Debug)]
pub struct Coordinator {
    registry: TaskRegistry,
    directory: WorkerDirectory,
    heartbeat_timeout: Duration,
}

impl Coordinator {
    pub fn new(files: Vec<PathBuf>, config: &CoordinatorConfig) -> Result<Self> {
        let registry = TaskRegistry::create_job(&files, config.buckets, &config.output_dir)?;
        Ok(Coordinator {
            registry,
            directory: WorkerDirectory::new(),
            heartbeat_timeout: config.heartbeat_timeout(),
        })
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &WorkerDirectory {
        &self.directory
    }

    pub fn register_worker(&mut self, id: WorkerId, buckets: u32, working_dir: PathBuf) -> bool {
        if buckets != self.registry.bucket_count() {
            warn!(
                "worker {} declared {} buckets, job uses {}",
                id,
                buckets,
                self.registry.bucket_count()
            );
        }
        info!("registering worker {} at {}", id, working_dir.display());
        if let Some(task) = self.directory.register(id, buckets, working_dir, Instant::now()) {
            self.roll_back(id, task);
        }
        true
    }

    pub fn heartbeat(&mut self, id: WorkerId, sent_at: SystemTime) -> bool {
        if let Ok(lag) = SystemTime::now().duration_since(sent_at) {
            debug!("heartbeat from worker {} ({:?} in flight)", id, lag);
        }
        let ok = self.directory.heartbeat(id, Instant::now());
        if !ok {
            warn!("heartbeat from unknown worker {}", id);
        }
        ok
    }

    /// Picks the lowest-index assignable Map task, or once every Map task has
    /// succeeded, the lowest-index assignable Reduce task.
    pub fn send_task(&mut self, worker_id: WorkerId) -> Option<Assignment> {
        if !self.directory.is_alive(worker_id) {
            warn!("task request from unknown or dead worker {}", worker_id);
            return None;
        }

        let task_type = if self.registry.all_map_done() {
            TaskType::Reduce
        } else {
            TaskType::Map
        };
        let bucket_count = self.registry.bucket_count();
        let map_outputs = self.registry.map_outputs();
        let task = self.registry.start_next(task_type)?;
        let assignment = make_assignment(task, bucket_count, map_outputs, &self.directory);

        self.directory.assign(
            worker_id,
            TaskRef {
                id: assignment.task_id,
                task_type,
                generation: assignment.generation,
            },
        );
        info!(
            "assigned {} task {} (generation {}) to worker {}",
            task_type, assignment.task_id, assignment.generation, worker_id
        );
        Some(assignment)
    }

    /// Records a worker's report. Reports from unknown workers, for unknown
    /// tasks, or for an assignment that has since been handed out again are
    /// discarded.
    pub fn get_task_status(&mut self, report: StatusReport) -> bool {
        let StatusReport {
            worker_id,
            task_id,
            task_type,
            status,
            generation,
        } = report;

        if self.directory.get(worker_id).is_none() {
            warn!("status report from unknown worker {}", worker_id);
            return false;
        }
        self.directory.release(
            worker_id,
            TaskRef {
                id: task_id,
                task_type,
                generation,
            },
        );

        let Some(task) = self.registry.get(task_id, task_type) else {
            warn!("worker {} reported unknown {} task {}", worker_id, task_type, task_id);
            return false;
        };
        if task.get_generation() != generation {
            warn!(
                "discarding stale report from worker {} for {} task {} (generation {}, current {})",
                worker_id,
                task_type,
                task_id,
                generation,
                task.get_generation()
            );
            return false;
        }

        info!(
            "worker {} reported {} task {} as {}",
            worker_id, task_type, task_id, status
        );
        self.registry.set_status(task_id, task_type, status)
    }

    /// One watchdog pass: declares silent workers dead and returns their
    /// tasks to the pool. Returns how many tasks were rolled back.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let revoked = self.directory.sweep(now, self.heartbeat_timeout);
        revoked
            .into_iter()
            .filter(|&(worker_id, task)| self.roll_back(worker_id, task))
            .count()
    }

    /// Puts a task a worker lost back to `NotStarted`, unless it has finished
    /// or been handed out again since.
    fn roll_back(&mut self, worker_id: WorkerId, task: TaskRef) -> bool {
        let Some(current) = self.registry.get(task.id, task.task_type) else {
            return false;
        };
        if current.get_task_status() != TaskStatus::Running
            || current.get_generation() != task.generation
        {
            return false;
        }
        info!(
            "rolling back {} task {} lost by worker {}",
            task.task_type, task.id, worker_id
        );
        self.registry
            .set_status(task.id, task.task_type, TaskStatus::NotStarted)
    }

    pub fn done(&self) -> bool {
        self.registry.all_map_done() && self.registry.all_reduce_done()
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            map: self.registry.counts(TaskType::Map),
            reduce: self.registry.counts(TaskType::Reduce),
            live_workers: self.directory.live_count(),
            dead_workers: self.directory.len() - self.directory.live_count(),
        }
    }
}

fn make_assignment(
    task: &Task,
    bucket_count: u32,
    map_outputs: Vec<MapOutput>,
    directory: &WorkerDirectory,
) -> Assignment {
    let kind = match task.kind() {
        TaskKind::Map(data) => AssignmentKind::Map {
            input_file: data.input_file.clone(),
            bucket_count,
        },
        TaskKind::Reduce(data) => AssignmentKind::Reduce {
            output_dir: data.output_dir.clone(),
            output_file_name: data.output_file_name.clone(),
            worker_dirs: directory.working_dirs(),
            map_outputs,
        },
    };
    Assignment {
        task_id: task.get_task_id(),
        task_index: task.get_task_index(),
        generation: task.get_generation(),
        kind,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub map: PhaseCounts,
    pub reduce: PhaseCounts,
    pub live_workers: usize,
    pub dead_workers: usize,
}

impl Statistics {
    pub fn completed(&self) -> usize {
        self.map.success + self.reduce.success
    }

    pub fn total(&self) -> usize {
        self.map.total() + self.reduce.total()
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "completed {}/{} tasks (map {}/{} running {}, reduce {}/{} running {}), workers {} live {} dead",
            self.completed(),
            self.total(),
            self.map.success,
            self.map.total(),
            self.map.running,
            self.reduce.success,
            self.reduce.total(),
            self.reduce.running,
            self.live_workers,
            self.dead_workers
        )
    }
}

#[derive(Clone)]
pub struct CoordinatorServer {
    coordinator: Arc<Mutex<Coordinator>>,
    peer_addr: Option<SocketAddr>,
}

impl crate::rpc::Rpc for CoordinatorServer {
    async fn register_worker(
        self,
        _: context::Context,
        worker_id: WorkerId,
        buckets: u32,
        working_dir: PathBuf,
    ) -> bool {
        debug!("register request from {:?}", self.peer_addr);
        let mut coordinator = self.coordinator.lock().await;
        coordinator.register_worker(worker_id, buckets, working_dir)
    }

    async fn heartbeat(
        self,
        _: context::Context,
        worker_id: WorkerId,
        sent_at: SystemTime,
    ) -> bool {
        let mut coordinator = self.coordinator.lock().await;
        coordinator.heartbeat(worker_id, sent_at)
    }

    async fn send_task(self, _: context::Context, worker_id: WorkerId) -> Option<Assignment> {
        let mut coordinator = self.coordinator.lock().await;
        coordinator.send_task(worker_id)
    }

    async fn get_task_status(self, _: context::Context, report: StatusReport) -> bool {
        let mut coordinator = self.coordinator.lock().await;
        coordinator.get_task_status(report)
    }
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

/// A coordinator serving RPCs and running its watchdog in the background.
pub struct CoordinatorHandle {
    coordinator: Arc<Mutex<Coordinator>>,
    local_addr: SocketAddr,
    server: JoinHandle<()>,
    watchdog: JoinHandle<()>,
}

impl CoordinatorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn done(&self) -> bool {
        self.coordinator.lock().await.done()
    }

    pub async fn statistics(&self) -> Statistics {
        self.coordinator.lock().await.statistics()
    }

    /// Tasks currently held by live workers.
    pub async fn assignments(&self) -> Vec<(WorkerId, TaskRef)> {
        self.coordinator.lock().await.directory().assignments().collect()
    }

    pub fn shutdown(self) {
        self.server.abort();
        self.watchdog.abort();
    }
}

/// Opens the RPC endpoint and starts the watchdog.
pub async fn start(
    coordinator: Coordinator,
    config: &CoordinatorConfig,
) -> anyhow::Result<CoordinatorHandle> {
    let coordinator = Arc::new(Mutex::new(coordinator));

    let mut listener = tarpc::serde_transport::tcp::listen(&config.addr, Json::default).await?;
    let local_addr = listener.local_addr();
    info!("listening on {}", local_addr);
    listener.config_mut().max_frame_length(usize::MAX);

    let server_coordinator = Arc::clone(&coordinator);
    let server_future = listener
        // Ignore accept errors.
        .filter_map(|r| future::ready(r.ok()))
        .map(server::BaseChannel::with_defaults)
        .map(move |channel| {
            let server = CoordinatorServer {
                coordinator: Arc::clone(&server_coordinator),
                peer_addr: channel.transport().peer_addr().ok(),
            };
            channel
                .execute(crate::rpc::Rpc::serve(server))
                .for_each(spawn)
        })
        .buffer_unordered(config.max_connections)
        .for_each(|_| async {});
    let server = tokio::spawn(server_future);

    let watchdog = tokio::spawn(watchdog(
        Arc::clone(&coordinator),
        config.watchdog_interval(),
    ));

    Ok(CoordinatorHandle {
        coordinator,
        local_addr,
        server,
        watchdog,
    })
}

async fn watchdog(coordinator: Arc<Mutex<Coordinator>>, period: Duration) {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let rolled_back = coordinator.lock().await.sweep(Instant::now());
        if rolled_back > 0 {
            info!("watchdog returned {} task(s) to the pool", rolled_back);
        }
    }
}

/// Serves the job until every task has succeeded, logging progress on every
/// status tick.
pub async fn run(coordinator: Coordinator, config: &CoordinatorConfig) -> anyhow::Result<()> {
    let handle = start(coordinator, config).await?;

    while !handle.done().await {
        info!("{}", handle.statistics().await);
        sleep(config.status_interval()).await;
    }

    info!("job completed: {}", handle.statistics().await);
    handle.shutdown();
    Ok(())
}
