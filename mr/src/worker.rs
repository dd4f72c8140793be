use crate::app::{KeyValue, MapReduceApp};
use crate::config::WorkerConfig;
use crate::directory::WorkerId;
use crate::rpc::{Assignment, AssignmentKind, RpcClient, StatusReport};
use crate::store::{self, BucketFiles};
use crate::task::{MapOutput, TaskId, TaskStatus};
use anyhow::Context as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tarpc::client::RpcError;
use tarpc::{client, context, tokio_serde::formats::Json};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// A worker process: executes one task at a time and heartbeats in the
/// background for as long as it lives.
pub struct Worker {
    id: WorkerId,
    working_dir: PathBuf,
    config: WorkerConfig,
    app: MapReduceApp,
    client: Option<RpcClient>,
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Worker {{ id: {}, dir: {}, connected: {} }}",
            self.id,
            self.working_dir.display(),
            self.client.is_some()
        )
    }
}

impl Worker {
    pub fn new(config: WorkerConfig, app: MapReduceApp) -> Self {
        Worker {
            id: config.worker_id(),
            working_dir: config.working_dir(),
            config,
            app,
            client: None,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Creates the working directory, connects to the coordinator and
    /// registers.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.client.is_some() {
            // already have a client running
            return Ok(());
        }

        info!("creating worker directory {}", self.working_dir.display());
        fs::create_dir_all(&self.working_dir).with_context(|| {
            format!("creating worker directory {}", self.working_dir.display())
        })?;

        let mut transport = tarpc::serde_transport::tcp::connect(&self.config.addr, Json::default);
        transport.config_mut().max_frame_length(usize::MAX);
        let transport = transport
            .await
            .with_context(|| format!("connecting to coordinator at {}", self.config.addr))?;

        let client = RpcClient::new(client::Config::default(), transport).spawn();
        self.client = Some(client);
        self.register().await?;
        info!("worker {} registered", self.id);
        Ok(())
    }

    fn client(&self) -> anyhow::Result<&RpcClient> {
        self.client
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Client not started"))
    }

    async fn register(&self) -> anyhow::Result<()> {
        let ok = self
            .client()?
            .register_worker(
                context::current(),
                self.id,
                self.config.buckets,
                self.working_dir.clone(),
            )
            .await?;
        if !ok {
            anyhow::bail!("coordinator refused registration of worker {}", self.id);
        }
        Ok(())
    }

    /// Sends a heartbeat every interval until the returned task is aborted.
    pub fn spawn_heartbeat(&self) -> anyhow::Result<JoinHandle<()>> {
        let client = self.client()?.clone();
        let id = self.id;
        let period = self.config.heartbeat_interval().max(Duration::from_millis(1));

        Ok(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!("worker {} sending heartbeat", id);
                match client
                    .heartbeat(context::current(), id, SystemTime::now())
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => warn!("coordinator does not know worker {}", id),
                    Err(e) => warn!("heartbeat from worker {} failed: {}", id, e),
                }
            }
        }))
    }

    /// Request, execute, report, repeat. Returns once the coordinator can no
    /// longer be reached; local I/O failures end it with an error.
    pub async fn run(&self) -> anyhow::Result<()> {
        let client = self.client()?;
        loop {
            let assignment = match client.send_task(context::current(), self.id).await {
                Ok(assignment) => assignment,
                Err(RpcError::DeadlineExceeded) => {
                    warn!("task request timed out, retrying");
                    continue;
                }
                Err(e) => {
                    info!("coordinator unreachable ({}), worker {} exiting", e, self.id);
                    return Ok(());
                }
            };

            let Some(assignment) = assignment else {
                debug!("no tasks available, sleeping");
                sleep(self.config.backoff()).await;
                continue;
            };

            info!(
                "worker {} received {} task {} (generation {})",
                self.id,
                assignment.task_type(),
                assignment.task_id,
                assignment.generation
            );
            let status = self.execute(&assignment).await?;

            let report = StatusReport {
                worker_id: self.id,
                task_id: assignment.task_id,
                task_type: assignment.task_type(),
                status,
                generation: assignment.generation,
            };
            match client.get_task_status(context::current(), report).await {
                Ok(true) => info!(
                    "{} task {} reported as {}",
                    assignment.task_type(),
                    assignment.task_id,
                    status
                ),
                Ok(false) => {
                    warn!(
                        "coordinator rejected report for {} task {}",
                        assignment.task_type(),
                        assignment.task_id
                    );
                    self.discard_output(&assignment);
                }
                Err(e) => {
                    info!("coordinator unreachable ({}), worker {} exiting", e, self.id);
                    return Ok(());
                }
            }
        }
    }

    async fn execute(&self, assignment: &Assignment) -> anyhow::Result<TaskStatus> {
        let app = self.app;
        let working_dir = self.working_dir.clone();
        let assignment = assignment.clone();

        tokio::task::spawn_blocking(move || execute_assignment(app, &working_dir, &assignment))
            .await?
    }

    /// A rejected Map report means another attempt owns the task now. Reduce
    /// never reads this copy; dropping it only reclaims space.
    fn discard_output(&self, assignment: &Assignment) {
        if let AssignmentKind::Map { .. } = assignment.kind {
            let output = MapOutput {
                task_id: assignment.task_id,
                generation: assignment.generation,
            };
            let dir = self.working_dir.join(output.dir_name());
            if dir.exists() {
                if let Err(e) = fs::remove_dir_all(&dir) {
                    error!("removing {}: {}", dir.display(), e);
                }
            }
        }
    }
}

/// Runs one assignment to completion on the calling thread.
pub fn execute_assignment(
    app: MapReduceApp,
    working_dir: &Path,
    assignment: &Assignment,
) -> anyhow::Result<TaskStatus> {
    match &assignment.kind {
        AssignmentKind::Map {
            input_file,
            bucket_count,
        } => do_map(
            app,
            working_dir,
            assignment.task_id,
            assignment.generation,
            input_file,
            *bucket_count,
        ),
        AssignmentKind::Reduce {
            output_dir,
            output_file_name,
            worker_dirs,
            map_outputs,
        } => do_reduce(
            app,
            assignment.task_index,
            worker_dirs,
            map_outputs,
            &output_dir.join(output_file_name),
        ),
    }
}

/// Runs the Map function over one input file and partitions its output into
/// `<working_dir>/map-<task_id>-<generation>`.
///
/// I/O failures are errors; a panicking Map function is a `Failure` outcome.
pub fn do_map(
    app: MapReduceApp,
    working_dir: &Path,
    task_id: TaskId,
    generation: u64,
    input_file: &Path,
    bucket_count: u32,
) -> anyhow::Result<TaskStatus> {
    let content = fs::read_to_string(input_file)
        .with_context(|| format!("cannot read {}", input_file.display()))?;
    let filename = input_file.to_string_lossy().into_owned();

    let Ok(pairs) = catch_unwind(AssertUnwindSafe(|| (app.map_fn)(filename, content))) else {
        warn!("map function panicked on {}", input_file.display());
        return Ok(TaskStatus::Failure);
    };

    let output = MapOutput {
        task_id,
        generation,
    };
    let staging = working_dir.join(format!(".{}", output.dir_name()));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    let files = BucketFiles::create(&staging, bucket_count)?;
    for kv in &pairs {
        files.append_partitioned(kv)?;
    }
    files.flush()?;
    drop(files);

    let finished = working_dir.join(output.dir_name());
    if finished.exists() {
        fs::remove_dir_all(&finished)?;
    }
    fs::rename(&staging, &finished)
        .with_context(|| format!("publishing {}", finished.display()))?;

    debug!("map task {} wrote {} records", task_id, pairs.len());
    Ok(TaskStatus::Success)
}

/// Merges partition `index` of the accepted Map outputs found under the
/// worker directories, reduces each key in sorted order and writes one
/// `<key> <output>` line per key to `output_path`.
pub fn do_reduce(
    app: MapReduceApp,
    index: u32,
    worker_dirs: &[PathBuf],
    map_outputs: &[MapOutput],
    output_path: &Path,
) -> anyhow::Result<TaskStatus> {
    let records = store::load_partition(worker_dirs, map_outputs, index)?;

    let Some(output) = reduce_sorted(app, records) else {
        return Ok(TaskStatus::Failure);
    };
    write_output(output_path, &output)?;

    debug!("reduce task {} wrote {} keys", index, output.len());
    Ok(TaskStatus::Success)
}

/// Applies the Reduce function to every key of a key-sorted sequence.
/// `None` if the function panicked.
pub(crate) fn reduce_sorted(
    app: MapReduceApp,
    records: Vec<KeyValue>,
) -> Option<Vec<(String, String)>> {
    let mut output = Vec::new();
    for (key, values) in store::group_sorted(records) {
        let reduced = catch_unwind(AssertUnwindSafe(|| (app.reduce_fn)(key.clone(), values)));
        match reduced {
            Ok(value) => output.push((key, value)),
            Err(_) => {
                warn!("reduce function panicked on key {:?}", key);
                return None;
            }
        }
    }
    Some(output)
}

/// Writes the output file through a temporary sibling and a rename, so
/// readers see either the old file or the complete new one.
pub(crate) fn write_output(output_path: &Path, output: &[(String, String)]) -> anyhow::Result<()> {
    let output_dir = match output_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;
    let file_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = output_dir.join(format!(".{}.tmp-{}", file_name, std::process::id()));

    let file = File::create(&tmp)
        .with_context(|| format!("cannot create output file {}", tmp.display()))?;
    let mut writer = BufWriter::new(file);
    for (key, value) in output {
        store::write_record(&mut writer, key, value)?;
    }
    writer.flush()?;
    drop(writer);
    fs::rename(&tmp, output_path)
        .with_context(|| format!("publishing {}", output_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::coordinator::Coordinator;
    use crate::partition::bucket_for;
    use std::time::Instant;

    fn mock_map_fn(_filename: String, contents: String) -> Vec<KeyValue> {
        contents
            .split_whitespace()
            .map(|word| KeyValue::new(word, "1"))
            .collect()
    }

    fn mock_reduce_fn(_key: String, values: Vec<String>) -> String {
        values
            .iter()
            .map(|v| v.parse::<u32>().unwrap_or(0))
            .sum::<u32>()
            .to_string()
    }

    fn panicking_map_fn(_filename: String, _contents: String) -> Vec<KeyValue> {
        panic!("bad input")
    }

    fn app() -> MapReduceApp {
        MapReduceApp::new(mock_map_fn, mock_reduce_fn)
    }

    fn first_attempt(task_id: TaskId) -> MapOutput {
        MapOutput {
            task_id,
            generation: 1,
        }
    }

    #[test]
    fn test_map_then_reduce_two_files() {
        let tmp = tempfile::tempdir().unwrap();
        let file1 = tmp.path().join("1.txt");
        let file2 = tmp.path().join("2.txt");
        fs::write(&file1, "a b").unwrap();
        fs::write(&file2, "a").unwrap();

        let w1 = tmp.path().join("w1");
        let w2 = tmp.path().join("w2");
        assert_eq!(do_map(app(), &w1, 0, 1, &file1, 2).unwrap(), TaskStatus::Success);
        assert_eq!(do_map(app(), &w2, 1, 1, &file2, 2).unwrap(), TaskStatus::Success);
        assert!(w1.join("map-0-1").is_dir());
        assert!(!w1.join(".map-0-1").exists());

        let dirs = vec![w1, w2];
        let outputs = [first_attempt(0), first_attempt(1)];
        let out = tmp.path().join("out");
        for bucket in 0..2 {
            let path = out.join(format!("out-{}", bucket));
            assert_eq!(
                do_reduce(app(), bucket, &dirs, &outputs, &path).unwrap(),
                TaskStatus::Success
            );
        }

        assert_eq!(bucket_for("a", 2), 0);
        assert_eq!(fs::read_to_string(out.join("out-0")).unwrap(), "a 2\n");
        assert_eq!(fs::read_to_string(out.join("out-1")).unwrap(), "b 1\n");
    }

    #[test]
    fn test_reduce_output_sorted_by_key() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.txt");
        fs::write(&input, "pear apple fig apple pear apple").unwrap();
        let worker_dir = tmp.path().join("w");
        do_map(app(), &worker_dir, 0, 1, &input, 1).unwrap();

        let output = tmp.path().join("out-0");
        do_reduce(app(), 0, &[worker_dir], &[first_attempt(0)], &output).unwrap();
        assert_eq!(
            fs::read_to_string(output).unwrap(),
            "apple 3\nfig 1\npear 2\n"
        );
    }

    #[test]
    fn test_rerun_on_same_worker_reads_accepted_attempt_only() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.txt");
        fs::write(&input, "x x").unwrap();
        let worker_dir = tmp.path().join("w");

        do_map(app(), &worker_dir, 0, 1, &input, 1).unwrap();
        do_map(app(), &worker_dir, 0, 2, &input, 1).unwrap();

        let output = tmp.path().join("out-0");
        let accepted = MapOutput {
            task_id: 0,
            generation: 2,
        };
        do_reduce(app(), 0, &[worker_dir], &[accepted], &output).unwrap();
        assert_eq!(fs::read_to_string(output).unwrap(), "x 2\n");
    }

    #[test]
    fn test_superseded_map_attempt_is_not_reduced() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.txt");
        fs::write(&input, "a").unwrap();
        let config = CoordinatorConfig {
            buckets: 1,
            output_dir: tmp.path().join("out"),
            ..CoordinatorConfig::default()
        };
        let mut coordinator = Coordinator::new(vec![input], &config).unwrap();
        let w1 = tmp.path().join("1");
        let w2 = tmp.path().join("2");

        // Worker 1 publishes map 0 and goes silent before reporting.
        coordinator.register_worker(1, 1, w1.clone());
        let first = coordinator.send_task(1).unwrap();
        assert_eq!(
            execute_assignment(app(), &w1, &first).unwrap(),
            TaskStatus::Success
        );
        assert_eq!(coordinator.sweep(Instant::now() + Duration::from_secs(6)), 1);

        coordinator.register_worker(2, 1, w2.clone());
        let second = coordinator.send_task(2).unwrap();
        assert_eq!(second.task_id, first.task_id);
        assert_eq!(
            execute_assignment(app(), &w2, &second).unwrap(),
            TaskStatus::Success
        );
        assert!(coordinator.get_task_status(StatusReport {
            worker_id: 2,
            task_id: second.task_id,
            task_type: second.task_type(),
            status: TaskStatus::Success,
            generation: second.generation,
        }));

        // Both copies are on disk; Reduce must count "a" once.
        assert!(w1.join("map-0-1").is_dir());
        assert!(w2.join("map-0-2").is_dir());
        let reduce = coordinator.send_task(2).unwrap();
        assert_eq!(
            execute_assignment(app(), &w2, &reduce).unwrap(),
            TaskStatus::Success
        );
        assert_eq!(
            fs::read_to_string(tmp.path().join("out").join("out-0")).unwrap(),
            "a 1\n"
        );
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = do_map(app(), tmp.path(), 0, 1, &tmp.path().join("nope.txt"), 2).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }

    #[test]
    fn test_panicking_map_reports_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.txt");
        fs::write(&input, "a").unwrap();
        let app = MapReduceApp::new(panicking_map_fn, mock_reduce_fn);

        let status = do_map(app, &tmp.path().join("w"), 0, 1, &input, 2).unwrap();
        assert_eq!(status, TaskStatus::Failure);
        assert!(!tmp.path().join("w").join("map-0-1").exists());
    }

    #[test]
    fn test_reduce_with_no_intermediate_data_writes_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join("out").join("out-3");

        let status = do_reduce(app(), 3, &[tmp.path().join("missing")], &[], &output).unwrap();
        assert_eq!(status, TaskStatus::Success);
        assert_eq!(fs::read_to_string(output).unwrap(), "");
    }

    #[test]
    fn test_worker_paths_from_config() {
        let config = WorkerConfig {
            id: Some(12),
            work_root: Some(PathBuf::from("/tmp/mr-test")),
            ..WorkerConfig::default()
        };
        let worker = Worker::new(config, app());
        assert_eq!(worker.id(), 12);
        assert_eq!(worker.working_dir(), Path::new("/tmp/mr-test/12"));
        assert!(worker.to_string().contains("connected: false"));
    }
}
