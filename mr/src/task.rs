use std::fmt;
use std::path::{Path, PathBuf};

pub type TaskId = u32;

#[derive(Debug, PartialEq, Eq, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub enum TaskStatus {
    NotStarted,
    Running,
    Success,
    Failure,
}

impl TaskStatus {
    /// A failed task goes back into the pool just like one that never ran.
    pub fn is_assignable(self) -> bool {
        matches!(self, TaskStatus::NotStarted | TaskStatus::Failure)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::NotStarted => "Not Started",
            TaskStatus::Running => "Running",
            TaskStatus::Success => "Success",
            TaskStatus::Failure => "Failure",
        };
        f.write_str(s)
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    Map,
    Reduce,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Map => f.write_str("map"),
            TaskType::Reduce => f.write_str("reduce"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapTaskData {
    pub input_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceTaskData {
    pub output_dir: PathBuf,
    pub output_file_name: String,
}

impl ReduceTaskData {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file_name)
    }
}

/// A Map task's output as published by the attempt whose report was
/// accepted. Reduce reads only these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct MapOutput {
    pub task_id: TaskId,
    pub generation: u64,
}

impl MapOutput {
    /// Directory name inside the producing worker's working directory.
    pub fn dir_name(&self) -> String {
        format!("map-{}-{}", self.task_id, self.generation)
    }
}

/// Phase-specific parameters of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Map(MapTaskData),
    Reduce(ReduceTaskData),
}

#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    index: u32,
    status: TaskStatus,
    generation: u64,
    kind: TaskKind,
}

impl Task {
    pub fn new_map(id: TaskId, index: u32, input_file: impl Into<PathBuf>) -> Task {
        Task {
            id,
            index,
            status: TaskStatus::NotStarted,
            generation: 0,
            kind: TaskKind::Map(MapTaskData {
                input_file: input_file.into(),
            }),
        }
    }

    pub fn new_reduce(id: TaskId, index: u32, output_dir: &Path) -> Task {
        Task {
            id,
            index,
            status: TaskStatus::NotStarted,
            generation: 0,
            kind: TaskKind::Reduce(ReduceTaskData {
                output_dir: output_dir.to_path_buf(),
                output_file_name: format!("out-{}", index),
            }),
        }
    }

    pub fn get_task_id(&self) -> TaskId {
        self.id
    }

    pub fn get_task_index(&self) -> u32 {
        self.index
    }

    pub fn get_task_type(&self) -> TaskType {
        match self.kind {
            TaskKind::Map(_) => TaskType::Map,
            TaskKind::Reduce(_) => TaskType::Reduce,
        }
    }

    pub fn get_task_status(&self) -> TaskStatus {
        self.status
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    pub fn get_generation(&self) -> u64 {
        self.generation
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// Hands the task out again: flips it to `Running` under a fresh generation.
    pub fn start_attempt(&mut self) -> u64 {
        self.generation += 1;
        self.status = TaskStatus::Running;
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tasks_start_not_started() {
        let map = Task::new_map(0, 0, "pg-1.txt");
        let reduce = Task::new_reduce(3, 3, Path::new("out"));

        assert_eq!(map.get_task_status(), TaskStatus::NotStarted);
        assert_eq!(map.get_task_type(), TaskType::Map);
        assert_eq!(reduce.get_task_type(), TaskType::Reduce);
        assert_eq!(reduce.get_generation(), 0);
        match reduce.kind() {
            TaskKind::Reduce(data) => {
                assert_eq!(data.output_file_name, "out-3");
                assert_eq!(data.output_path(), PathBuf::from("out/out-3"));
            }
            TaskKind::Map(_) => panic!("expected a reduce task"),
        }
    }

    #[test]
    fn test_start_attempt_bumps_generation() {
        let mut task = Task::new_map(1, 1, "a.txt");
        assert_eq!(task.start_attempt(), 1);
        task.set_status(TaskStatus::Failure);
        assert!(task.get_task_status().is_assignable());
        assert_eq!(task.start_attempt(), 2);
        assert_eq!(task.get_task_status(), TaskStatus::Running);
    }

    #[test]
    fn test_map_output_dir_name_carries_generation() {
        let output = MapOutput {
            task_id: 4,
            generation: 2,
        };
        assert_eq!(output.dir_name(), "map-4-2");
    }

    #[test]
    fn test_assignable_statuses() {
        assert!(TaskStatus::NotStarted.is_assignable());
        assert!(TaskStatus::Failure.is_assignable());
        assert!(!TaskStatus::Running.is_assignable());
        assert!(!TaskStatus::Success.is_assignable());
    }
}
