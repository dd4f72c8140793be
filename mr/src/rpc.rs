use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::directory::WorkerId;
use crate::task::{MapOutput, TaskId, TaskStatus, TaskType};

/// Phase-specific part of an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentKind {
    Map {
        input_file: PathBuf,
        bucket_count: u32,
    },
    Reduce {
        output_dir: PathBuf,
        output_file_name: String,
        worker_dirs: Vec<PathBuf>,
        /// Accepted attempt of every Map task; other map directories are ignored.
        map_outputs: Vec<MapOutput>,
    },
}

/// Reply of `send_task` when work is available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: TaskId,
    pub task_index: u32,
    pub generation: u64,
    pub kind: AssignmentKind,
}

impl Assignment {
    pub fn task_type(&self) -> TaskType {
        match self.kind {
            AssignmentKind::Map { .. } => TaskType::Map,
            AssignmentKind::Reduce { .. } => TaskType::Reduce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub worker_id: WorkerId,
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub generation: u64,
}

#[tarpc::service]
pub trait Rpc {
    async fn register_worker(worker_id: WorkerId, buckets: u32, working_dir: PathBuf) -> bool;
    async fn heartbeat(worker_id: WorkerId, sent_at: SystemTime) -> bool;
    /// `None` means no work right now; back off and ask again.
    async fn send_task(worker_id: WorkerId) -> Option<Assignment>;
    /// Worker-reported outcome of an assignment.
    async fn get_task_status(report: StatusReport) -> bool;
}
