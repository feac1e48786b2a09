//! Bounded execution log.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskStatus, TaskType};

/// What caused a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTrigger {
    Scheduled,
    Manual,
}

/// One completed run of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub task_type: TaskType,
    pub trigger: TaskTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    /// `Completed` or `Failed`
    pub status: TaskStatus,
    /// Summary returned by the routine on success
    pub result: Option<String>,
    pub error: Option<String>,
}

impl TaskExecution {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Ring buffer of the most recent executions, oldest first.
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    entries: VecDeque<TaskExecution>,
    capacity: usize,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, dropping the oldest one when full.
    pub fn push(&mut self, execution: TaskExecution) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(execution);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskExecution> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<TaskExecution> {
        self.entries.iter().cloned().collect()
    }

    /// Entries for a single task type, oldest first.
    pub fn for_task(&self, task_type: TaskType) -> Vec<TaskExecution> {
        self.entries
            .iter()
            .filter(|e| e.task_type == task_type)
            .cloned()
            .collect()
    }
}
