use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::domain::lifecycle::status::{TaskStatus, WorkflowStatus};
use crate::domain::utils::id::{GroupName, TaskName, WorkflowId};

/// What changed: a single task, or the roll-up of the whole workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EventStatus {
    Task(TaskStatus),
    Workflow(WorkflowStatus),
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStatus::Task(status) => write!(f, "{}", status),
            EventStatus::Workflow(status) => write!(f, "{}", status),
        }
    }
}

/// A status change. Task events carry `group` and `task`; workflow events carry neither.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub timestamp: i64,
    pub workflow_id: WorkflowId,
    pub group: Option<GroupName>,
    pub task: Option<TaskName>,
    pub status: EventStatus,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp, self.workflow_id)?;
        if let Some(task) = &self.task {
            write!(f, "/{}", task)?;
        }
        write!(f, " -> {}", self.status)?;
        if let Some(code) = self.exit_code {
            write!(f, " (exit {})", code)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

/// Subscriber to status changes.
pub trait StatusListener: fmt::Debug + Send + Sync {
    fn on_status_change(&self, event: &StatusEvent);
}

/// Default listener: writes every change to the log.
#[derive(Debug, Default)]
pub struct LogStatusListener;

impl StatusListener for LogStatusListener {
    fn on_status_change(&self, event: &StatusEvent) {
        match event.status {
            EventStatus::Workflow(status) if status.is_terminal() => log::info!("Workflow finished: {}", event),
            EventStatus::Task(status) if status.is_failure() => log::warn!("{}", event),
            _ => log::debug!("{}", event),
        }
    }
}

/// Keeps every event it receives. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: Arc<RwLock<Vec<StatusEvent>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.read().expect("RwLock poisoned").clone()
    }

    /// Status sequence reported for one task.
    pub fn task_history(&self, workflow: &WorkflowId, task: &str) -> Vec<TaskStatus> {
        self.events
            .read()
            .expect("RwLock poisoned")
            .iter()
            .filter(|e| &e.workflow_id == workflow && e.task.as_ref().is_some_and(|t| t.as_str() == task))
            .filter_map(|e| match e.status {
                EventStatus::Task(status) => Some(status),
                EventStatus::Workflow(_) => None,
            })
            .collect()
    }
}

impl StatusListener for RecordingListener {
    fn on_status_change(&self, event: &StatusEvent) {
        self.events.write().expect("RwLock poisoned").push(event.clone());
    }
}
