use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::task::{MapOutput, Task, TaskId, TaskStatus, TaskType};

/// Owner of every Map and Reduce task of one job.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    map_tasks: Vec<Task>,
    reduce_tasks: Vec<Task>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PhaseCounts {
    pub not_started: usize,
    pub running: usize,
    pub success: usize,
    pub failure: usize,
}

impl PhaseCounts {
    pub fn total(&self) -> usize {
        self.not_started + self.running + self.success + self.failure
    }
}

impl TaskRegistry {
    /// One Map task per input file and one Reduce task per bucket, all
    /// `NotStarted`. Reduce output lands in `output_dir`.
    pub fn create_job(
        input_files: &[PathBuf],
        bucket_count: u32,
        output_dir: &Path,
    ) -> Result<Self> {
        if bucket_count == 0 {
            return Err(Error::InvalidBucketCount);
        }

        let map_tasks = input_files
            .iter()
            .enumerate()
            .map(|(i, file)| Task::new_map(i as TaskId, i as u32, file.clone()))
            .collect();
        let reduce_tasks = (0..bucket_count)
            .map(|i| Task::new_reduce(i, i, output_dir))
            .collect();

        Ok(TaskRegistry {
            map_tasks,
            reduce_tasks,
        })
    }

    fn phase(&self, task_type: TaskType) -> &[Task] {
        match task_type {
            TaskType::Map => &self.map_tasks,
            TaskType::Reduce => &self.reduce_tasks,
        }
    }

    fn phase_mut(&mut self, task_type: TaskType) -> &mut [Task] {
        match task_type {
            TaskType::Map => &mut self.map_tasks,
            TaskType::Reduce => &mut self.reduce_tasks,
        }
    }

    pub fn get(&self, id: TaskId, task_type: TaskType) -> Option<&Task> {
        self.phase(task_type).iter().find(|t| t.get_task_id() == id)
    }

    pub fn get_mut(&mut self, id: TaskId, task_type: TaskType) -> Option<&mut Task> {
        self.phase_mut(task_type)
            .iter_mut()
            .find(|t| t.get_task_id() == id)
    }

    /// Last write wins. Returns false if no such task exists.
    pub fn set_status(&mut self, id: TaskId, task_type: TaskType, status: TaskStatus) -> bool {
        match self.get_mut(id, task_type) {
            Some(task) => {
                task.set_status(status);
                true
            }
            None => false,
        }
    }

    pub fn all_map_done(&self) -> bool {
        self.map_tasks.iter().all(Task::is_success)
    }

    pub fn all_reduce_done(&self) -> bool {
        self.reduce_tasks.iter().all(Task::is_success)
    }

    /// Lowest-index assignable task of the phase, flipped to `Running`.
    ///
    /// Reduce tasks stay locked until every Map task has succeeded.
    pub fn start_next(&mut self, task_type: TaskType) -> Option<&Task> {
        if task_type == TaskType::Reduce && !self.all_map_done() {
            return None;
        }
        let task = self
            .phase_mut(task_type)
            .iter_mut()
            .filter(|t| t.get_task_status().is_assignable())
            .min_by_key(|t| t.get_task_index())?;
        task.start_attempt();
        Some(task)
    }

    /// The attempt behind every succeeded Map task. A Map task's status only
    /// turns `Success` through a report carrying its current generation.
    pub fn map_outputs(&self) -> Vec<MapOutput> {
        self.map_tasks
            .iter()
            .filter(|t| t.is_success())
            .map(|t| MapOutput {
                task_id: t.get_task_id(),
                generation: t.get_generation(),
            })
            .collect()
    }

    pub fn counts(&self, task_type: TaskType) -> PhaseCounts {
        let mut counts = PhaseCounts::default();
        for task in self.phase(task_type) {
            match task.get_task_status() {
                TaskStatus::NotStarted => counts.not_started += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Success => counts.success += 1,
                TaskStatus::Failure => counts.failure += 1,
            }
        }
        counts
    }

    pub fn bucket_count(&self) -> u32 {
        self.reduce_tasks.len() as u32
    }
}
