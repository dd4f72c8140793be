use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::task::{TaskId, TaskType};

pub type WorkerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    RunningTask,
    Dead,
}

/// Lookup of the task a worker currently holds; the registry owns the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRef {
    pub id: TaskId,
    pub task_type: TaskType,
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub struct RegisteredWorker {
    pub id: WorkerId,
    pub working_dir: PathBuf,
    pub buckets: u32,
    pub status: WorkerStatus,
    pub assigned_task: Option<TaskRef>,
    pub last_heartbeat: Instant,
}

impl fmt::Display for RegisteredWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "worker {} ({:?}, dir {}, last heartbeat {:?} ago",
            self.id,
            self.status,
            self.working_dir.display(),
            self.last_heartbeat.elapsed()
        )?;
        if let Some(task) = &self.assigned_task {
            write!(f, ", {} task {}", task.task_type, task.id)?;
        }
        f.write_str(")")
    }
}

/// Registered workers, dead ones included.
#[derive(Debug, Default, Clone)]
pub struct WorkerDirectory {
    workers: BTreeMap<WorkerId, RegisteredWorker>,
}

impl WorkerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering an id again replaces the old entry and hands back the task
    /// the old entry still held, which the caller has to put back in the pool.
    pub fn register(
        &mut self,
        id: WorkerId,
        buckets: u32,
        working_dir: PathBuf,
        now: Instant,
    ) -> Option<TaskRef> {
        let worker = RegisteredWorker {
            id,
            working_dir,
            buckets,
            status: WorkerStatus::Idle,
            assigned_task: None,
            last_heartbeat: now,
        };
        let old = self.workers.insert(id, worker)?;
        warn!("worker {} registered again, replacing {}", id, old);
        old.assigned_task
    }

    /// Returns false for an unknown worker. A heartbeat from a worker already
    /// declared dead brings it back as idle.
    pub fn heartbeat(&mut self, id: WorkerId, now: Instant) -> bool {
        match self.workers.get_mut(&id) {
            Some(worker) => {
                worker.last_heartbeat = now;
                if worker.status == WorkerStatus::Dead {
                    warn!("worker {} is heartbeating again after being declared dead", id);
                    worker.status = WorkerStatus::Idle;
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: WorkerId) -> Option<&RegisteredWorker> {
        self.workers.get(&id)
    }

    pub fn is_alive(&self, id: WorkerId) -> bool {
        self.workers
            .get(&id)
            .is_some_and(|w| w.status != WorkerStatus::Dead)
    }

    pub fn assign(&mut self, id: WorkerId, task: TaskRef) -> bool {
        match self.workers.get_mut(&id) {
            Some(worker) => {
                worker.assigned_task = Some(task);
                worker.status = WorkerStatus::RunningTask;
                true
            }
            None => false,
        }
    }

    /// Clears the worker's assignment if it still points at this attempt of
    /// the task.
    pub fn release(&mut self, id: WorkerId, task: TaskRef) {
        if let Some(worker) = self.workers.get_mut(&id) {
            if worker.assigned_task == Some(task) {
                worker.assigned_task = None;
                if worker.status == WorkerStatus::RunningTask {
                    worker.status = WorkerStatus::Idle;
                }
            }
        }
    }

    /// Marks every live worker silent for longer than `timeout` as dead and
    /// hands back the tasks they held.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<(WorkerId, TaskRef)> {
        let mut revoked = Vec::new();
        for worker in self.workers.values_mut() {
            if worker.status == WorkerStatus::Dead {
                continue;
            }
            let silence = now.saturating_duration_since(worker.last_heartbeat);
            if silence > timeout {
                warn!(
                    "marking worker {} as dead (no heartbeat for {:?})",
                    worker.id, silence
                );
                worker.status = WorkerStatus::Dead;
                if let Some(task) = worker.assigned_task.take() {
                    revoked.push((worker.id, task));
                }
            }
        }
        revoked
    }

    /// Working directories of every registered worker, dead ones included,
    /// since a dead worker's finished Map output is still needed.
    pub fn working_dirs(&self) -> Vec<PathBuf> {
        self.workers.values().map(|w| w.working_dir.clone()).collect()
    }

    /// Tasks held by live workers.
    pub fn assignments(&self) -> impl Iterator<Item = (WorkerId, TaskRef)> + '_ {
        self.workers
            .values()
            .filter(|w| w.status != WorkerStatus::Dead)
            .filter_map(|w| w.assigned_task.map(|task| (w.id, task)))
    }

    pub fn workers(&self) -> impl Iterator<Item = &RegisteredWorker> {
        self.workers.values()
    }

    pub fn live_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.status != WorkerStatus::Dead)
            .count()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
