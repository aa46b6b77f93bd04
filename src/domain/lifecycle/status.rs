use std::fmt;

use serde::{Deserialize, Serialize};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_UPSTREAM_FAILED: i32 = 3000;
pub const EXIT_START_ERROR: i32 = 3003;
pub const EXIT_EVICTED: i32 = 3004;
pub const EXIT_START_TIMEOUT: i32 = 3005;
pub const EXIT_PREEMPTED: i32 = 3006;
pub const EXIT_UNKNOWN: i32 = 4000;

/// Severity class of an exit code. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitClass {
    Success,
    User,
    Init,
    Service,
    Infra,
    Unknown,
}

impl ExitClass {
    pub fn of(code: i32) -> ExitClass {
        match code {
            EXIT_SUCCESS => ExitClass::Success,
            1..=255 => ExitClass::User,
            256..=257 => ExitClass::Init,
            2000..=2999 => ExitClass::Service,
            3000..=3999 => ExitClass::Infra,
            _ => ExitClass::Unknown,
        }
    }
}

/// Collapses every code a task reported into the one that is recorded: the highest wins.
pub fn resolve_exit_code(codes: &[i32]) -> Option<i32> {
    codes.iter().copied().max()
}

/// Infra codes bypass the task's exit actions; 3000 is only ever assigned by the engine.
pub fn is_infra_code(code: i32) -> bool {
    ExitClass::of(code) == ExitClass::Infra && code != EXIT_UPSTREAM_FAILED
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    RescheduleRequested,
    Evicted,
    Preempted,
    Completed,
    Failed,
    FailedExecTimeout,
    FailedQueueTimeout,
    FailedStartTimeout,
    FailedUpstream,
    FailedCanceled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed) || self.is_failure()
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failed
                | TaskStatus::FailedExecTimeout
                | TaskStatus::FailedQueueTimeout
                | TaskStatus::FailedStartTimeout
                | TaskStatus::FailedUpstream
                | TaskStatus::FailedCanceled
        )
    }

    /// Failures caused by the task itself, as opposed to cancellation or an upstream failure.
    pub fn is_root_failure(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failed | TaskStatus::FailedExecTimeout | TaskStatus::FailedQueueTimeout | TaskStatus::FailedStartTimeout
        )
    }

    /// Holds a reservation (or is about to).
    pub fn holds_resources(&self) -> bool {
        matches!(self, TaskStatus::Ready | TaskStatus::Running)
    }

    /// Rank among non-terminal states, used to pick the least advanced member of a group.
    fn progress(&self) -> u8 {
        match self {
            TaskStatus::Pending | TaskStatus::RescheduleRequested | TaskStatus::Evicted | TaskStatus::Preempted => 0,
            TaskStatus::Ready => 1,
            TaskStatus::Running => 2,
            _ => 3,
        }
    }

    pub fn least_advanced(statuses: impl IntoIterator<Item = TaskStatus>) -> Option<TaskStatus> {
        statuses.into_iter().filter(|s| !s.is_terminal()).min_by_key(|s| s.progress())
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Ready => "READY",
            TaskStatus::Running => "RUNNING",
            TaskStatus::RescheduleRequested => "RESCHEDULE_REQUESTED",
            TaskStatus::Evicted => "EVICTED",
            TaskStatus::Preempted => "PREEMPTED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::FailedExecTimeout => "FAILED_EXEC_TIMEOUT",
            TaskStatus::FailedQueueTimeout => "FAILED_QUEUE_TIMEOUT",
            TaskStatus::FailedStartTimeout => "FAILED_START_TIMEOUT",
            TaskStatus::FailedUpstream => "FAILED_UPSTREAM",
            TaskStatus::FailedCanceled => "FAILED_CANCELED",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    FailedExecTimeout,
    FailedQueueTimeout,
    FailedStartTimeout,
    FailedUpstream,
    FailedCanceled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowStatus::Pending | WorkflowStatus::Running)
    }

    /// Precedence used when several groups failed differently; higher wins.
    pub fn failure_precedence(&self) -> u8 {
        match self {
            WorkflowStatus::FailedExecTimeout => 6,
            WorkflowStatus::FailedQueueTimeout => 5,
            WorkflowStatus::FailedStartTimeout => 4,
            WorkflowStatus::Failed => 3,
            WorkflowStatus::FailedCanceled => 2,
            WorkflowStatus::FailedUpstream => 1,
            _ => 0,
        }
    }

    /// Workflow-level counterpart of a terminal failure status.
    pub fn from_failure(status: TaskStatus) -> Option<WorkflowStatus> {
        match status {
            TaskStatus::Failed => Some(WorkflowStatus::Failed),
            TaskStatus::FailedExecTimeout => Some(WorkflowStatus::FailedExecTimeout),
            TaskStatus::FailedQueueTimeout => Some(WorkflowStatus::FailedQueueTimeout),
            TaskStatus::FailedStartTimeout => Some(WorkflowStatus::FailedStartTimeout),
            TaskStatus::FailedUpstream => Some(WorkflowStatus::FailedUpstream),
            TaskStatus::FailedCanceled => Some(WorkflowStatus::FailedCanceled),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            WorkflowStatus::Pending => "PENDING",
            WorkflowStatus::Running => "RUNNING",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::FailedExecTimeout => "FAILED_EXEC_TIMEOUT",
            WorkflowStatus::FailedQueueTimeout => "FAILED_QUEUE_TIMEOUT",
            WorkflowStatus::FailedStartTimeout => "FAILED_START_TIMEOUT",
            WorkflowStatus::FailedUpstream => "FAILED_UPSTREAM",
            WorkflowStatus::FailedCanceled => "FAILED_CANCELED",
        };
        f.write_str(text)
    }
}
