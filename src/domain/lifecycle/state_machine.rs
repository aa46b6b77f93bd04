use std::fmt;

use serde::Serialize;

use crate::domain::lifecycle::status::{
    EXIT_EVICTED, EXIT_PREEMPTED, EXIT_START_TIMEOUT, EXIT_UPSTREAM_FAILED, TaskStatus, is_infra_code,
};
use crate::domain::utils::id::{NodeName, PlatformName};
use crate::domain::workflow::task::{ExitAction, ExitActions};
use crate::error::{Error, Result};

/// Retry budgets. A reschedule is allowed while both budgets have room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retry_per_task: u32,
    pub max_retry_per_job: u32,
}

impl RetryPolicy {
    pub fn allows(&self, task_retries: u32, job_retries: u32) -> bool {
        task_retries < self.max_retry_per_task && job_retries < self.max_retry_per_job
    }
}

/// Inputs of the task state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// The scheduler placed the task.
    Reserve { node: NodeName, platform: PlatformName },
    /// The container reported it started; the task stays READY until its gang is up.
    ContainerStarted,
    /// Every member of the reservation started.
    Start,
    /// The container exited with the resolved (highest) code.
    Exit { code: i32 },
    Evict,
    Preempt,
    /// A sibling forced the whole group to restart; no retry budget is consumed.
    Restart,
    /// Released resources; back into the queue.
    Requeue,
    QueueTimeout,
    ExecTimeout,
    StartTimeout,
    UpstreamFailed,
    Cancel { exit_code: Option<i32> },
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskEvent::Reserve { node, .. } => write!(f, "Reserve({})", node),
            TaskEvent::ContainerStarted => f.write_str("ContainerStarted"),
            TaskEvent::Start => f.write_str("Start"),
            TaskEvent::Exit { code } => write!(f, "Exit({})", code),
            TaskEvent::Evict => f.write_str("Evict"),
            TaskEvent::Preempt => f.write_str("Preempt"),
            TaskEvent::Restart => f.write_str("Restart"),
            TaskEvent::Requeue => f.write_str("Requeue"),
            TaskEvent::QueueTimeout => f.write_str("QueueTimeout"),
            TaskEvent::ExecTimeout => f.write_str("ExecTimeout"),
            TaskEvent::StartTimeout => f.write_str("StartTimeout"),
            TaskEvent::UpstreamFailed => f.write_str("UpstreamFailed"),
            TaskEvent::Cancel { .. } => f.write_str("Cancel"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    /// The transition consumed one unit of retry budget.
    pub retried: bool,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Runtime state of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLifecycle {
    pub name: String,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
    pub node: Option<NodeName>,
    pub platform: Option<PlatformName>,
    pub container_started: bool,

    /// Seconds since epoch.
    pub queued_at: Option<i64>,
    pub ready_at: Option<i64>,
    pub running_since: Option<i64>,
    pub finished_at: Option<i64>,
}

impl TaskLifecycle {
    /// A task waiting for its group to become ready. `queued_at` is set when it enters the queue.
    pub fn new(name: &str) -> Self {
        TaskLifecycle {
            name: name.to_string(),
            status: TaskStatus::Pending,
            retry_count: 0,
            exit_code: None,
            reason: None,
            node: None,
            platform: None,
            container_started: false,
            queued_at: None,
            ready_at: None,
            running_since: None,
            finished_at: None,
        }
    }

    fn invalid(&self, event: &TaskEvent) -> Error {
        Error::InvalidTransitionError { task: self.name.clone(), from: self.status.to_string(), event: event.to_string() }
    }

    fn evicted(&mut self, can_retry: bool, retried: &mut bool) -> TaskStatus {
        self.exit_code = Some(EXIT_EVICTED);
        if can_retry {
            *retried = true;
            self.reason = Some("evicted".to_string());
            TaskStatus::Evicted
        } else {
            self.reason = Some("evicted with retry budget exhausted".to_string());
            TaskStatus::Failed
        }
    }

    /// Applies `event` at time `now`.
    ///
    /// `job_retries` is the number of retries already spent by the whole workflow; it only
    /// matters for events that may reschedule.
    pub fn apply(&mut self, event: TaskEvent, now: i64, policy: &RetryPolicy, exit_actions: &ExitActions, job_retries: u32) -> Result<Transition> {
        use TaskStatus::*;

        let from = self.status;
        let can_retry = policy.allows(self.retry_count, job_retries);
        let mut retried = false;

        let to = match (&event, from) {
            (TaskEvent::Reserve { node, platform }, Pending) => {
                self.node = Some(node.clone());
                self.platform = Some(platform.clone());
                self.ready_at = Some(now);
                Ready
            }
            (TaskEvent::ContainerStarted, Ready) => {
                self.container_started = true;
                Ready
            }
            (TaskEvent::Start, Ready) => {
                self.container_started = true;
                self.running_since = Some(now);
                Running
            }
            (TaskEvent::Exit { code }, Ready | Running) => {
                self.exit_code = Some(*code);
                if *code == EXIT_PREEMPTED {
                    Preempted
                } else if *code == EXIT_EVICTED {
                    self.evicted(can_retry, &mut retried)
                } else if is_infra_code(*code) {
                    self.reason = Some(format!("infrastructure exit {}", code));
                    if can_retry {
                        retried = true;
                        RescheduleRequested
                    } else {
                        Failed
                    }
                } else {
                    match exit_actions.resolve(*code) {
                        ExitAction::Complete => Completed,
                        ExitAction::Fail => {
                            self.reason = Some(format!("exit {}", code));
                            Failed
                        }
                        ExitAction::Reschedule if can_retry => {
                            retried = true;
                            RescheduleRequested
                        }
                        ExitAction::Reschedule => {
                            self.reason = Some(format!("exit {} with retry budget exhausted", code));
                            Failed
                        }
                    }
                }
            }
            (TaskEvent::Evict, Ready | Running) => self.evicted(can_retry, &mut retried),
            (TaskEvent::Preempt, Ready | Running) => {
                self.exit_code = Some(EXIT_PREEMPTED);
                self.reason = Some("preempted".to_string());
                Preempted
            }
            (TaskEvent::Restart, Pending | Ready | Running) => {
                self.reason = Some("group restart".to_string());
                RescheduleRequested
            }
            (TaskEvent::Requeue, RescheduleRequested | Evicted | Preempted) => {
                self.node = None;
                self.platform = None;
                self.container_started = false;
                self.ready_at = None;
                self.running_since = None;
                self.queued_at = Some(now);
                Pending
            }
            (TaskEvent::QueueTimeout, Pending) => {
                self.reason = Some("queue timeout".to_string());
                FailedQueueTimeout
            }
            (TaskEvent::ExecTimeout, Running) => {
                self.reason = Some("exec timeout".to_string());
                FailedExecTimeout
            }
            (TaskEvent::StartTimeout, Ready) => {
                self.exit_code = Some(EXIT_START_TIMEOUT);
                if can_retry {
                    retried = true;
                    self.reason = Some("start timeout".to_string());
                    RescheduleRequested
                } else {
                    self.reason = Some("start timeout with retry budget exhausted".to_string());
                    FailedStartTimeout
                }
            }
            (TaskEvent::UpstreamFailed, Pending) => {
                self.exit_code = Some(EXIT_UPSTREAM_FAILED);
                self.reason = Some("upstream failed".to_string());
                FailedUpstream
            }
            (TaskEvent::Cancel { exit_code }, status) if !status.is_terminal() => {
                if exit_code.is_some() {
                    self.exit_code = *exit_code;
                }
                self.reason = Some("canceled".to_string());
                FailedCanceled
            }
            _ => return Err(self.invalid(&event)),
        };

        if retried {
            self.retry_count += 1;
        }
        if to.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = to;
        Ok(Transition { from, to, retried })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::workflow_dto::workflow_dto::ExitActionDto;
    use std::collections::BTreeMap;

    const POLICY: RetryPolicy = RetryPolicy { max_retry_per_task: 2, max_retry_per_job: 10 };

    fn running(actions: &ExitActions) -> TaskLifecycle {
        let mut task = TaskLifecycle::new("train");
        task.apply(TaskEvent::Reserve { node: NodeName::new("n0"), platform: PlatformName::new("dgx") }, 0, &POLICY, actions, 0).unwrap();
        task.apply(TaskEvent::Start, 1, &POLICY, actions, 0).unwrap();
        task
    }

    fn reschedule_on_42() -> ExitActions {
        ExitActions::from_dto(&BTreeMap::from([(ExitActionDto::Reschedule, "42".to_string())])).unwrap()
    }

    #[test]
    fn happy_path() {
        let actions = ExitActions::default();
        let mut task = running(&actions);
        assert_eq!(task.running_since, Some(1));
        let t = task.apply(TaskEvent::Exit { code: 0 }, 9, &POLICY, &actions, 0).unwrap();
        assert_eq!(t.to, TaskStatus::Completed);
        assert_eq!(task.finished_at, Some(9));
    }

    #[test]
    fn reschedules_until_budget_is_spent() {
        let actions = reschedule_on_42();
        let mut task = running(&actions);
        for attempt in 0..2 {
            let t = task.apply(TaskEvent::Exit { code: 42 }, 10, &POLICY, &actions, attempt).unwrap();
            assert_eq!(t.to, TaskStatus::RescheduleRequested);
            assert!(t.retried);
            task.apply(TaskEvent::Requeue, 11, &POLICY, &actions, attempt + 1).unwrap();
            assert_eq!(task.queued_at, Some(11));
            task.apply(TaskEvent::Reserve { node: NodeName::new("n0"), platform: PlatformName::new("dgx") }, 12, &POLICY, &actions, 0).unwrap();
            task.apply(TaskEvent::Start, 13, &POLICY, &actions, 0).unwrap();
        }
        let t = task.apply(TaskEvent::Exit { code: 42 }, 20, &POLICY, &actions, 2).unwrap();
        assert_eq!(t.to, TaskStatus::Failed);
        assert_eq!(task.retry_count, 2);
    }

    #[test]
    fn job_budget_caps_retries() {
        let actions = reschedule_on_42();
        let mut task = running(&actions);
        let policy = RetryPolicy { max_retry_per_task: 5, max_retry_per_job: 3 };
        let t = task.apply(TaskEvent::Exit { code: 42 }, 10, &policy, &actions, 3).unwrap();
        assert_eq!(t.to, TaskStatus::Failed);
    }

    #[test]
    fn infra_codes_bypass_exit_actions() {
        let actions = ExitActions::from_dto(&BTreeMap::from([(ExitActionDto::Complete, "0-4000".to_string())])).unwrap();
        let mut task = running(&actions);
        let t = task.apply(TaskEvent::Exit { code: 3003 }, 10, &POLICY, &actions, 0).unwrap();
        assert_eq!(t.to, TaskStatus::RescheduleRequested);

        let mut task = running(&actions);
        let t = task.apply(TaskEvent::Exit { code: 3000 }, 10, &POLICY, &actions, 0).unwrap();
        assert_eq!(t.to, TaskStatus::Completed);
    }

    #[test]
    fn preemption_is_free_and_eviction_is_not() {
        let actions = ExitActions::default();
        let mut task = running(&actions);
        let t = task.apply(TaskEvent::Preempt, 5, &POLICY, &actions, 0).unwrap();
        assert_eq!((t.to, t.retried), (TaskStatus::Preempted, false));
        task.apply(TaskEvent::Requeue, 5, &POLICY, &actions, 0).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.node, None);

        let mut task = running(&actions);
        task.retry_count = 2;
        let t = task.apply(TaskEvent::Evict, 5, &POLICY, &actions, 0).unwrap();
        assert_eq!(t.to, TaskStatus::Failed);
        assert_eq!(task.exit_code, Some(EXIT_EVICTED));
    }

    #[test]
    fn reported_eviction_matches_evict_event() {
        let actions = ExitActions::default();
        let mut task = running(&actions);
        let t = task.apply(TaskEvent::Exit { code: EXIT_EVICTED }, 5, &POLICY, &actions, 0).unwrap();
        assert_eq!((t.to, t.retried), (TaskStatus::Evicted, true));
        assert_eq!((task.retry_count, task.reason.as_deref()), (1, Some("evicted")));

        let mut task = running(&actions);
        task.retry_count = 2;
        let t = task.apply(TaskEvent::Exit { code: EXIT_EVICTED }, 5, &POLICY, &actions, 0).unwrap();
        assert_eq!(t.to, TaskStatus::Failed);
    }

    #[test]
    fn start_timeout_without_budget_is_terminal() {
        let actions = ExitActions::default();
        let policy = RetryPolicy { max_retry_per_task: 0, max_retry_per_job: 0 };
        let mut task = TaskLifecycle::new("t");
        task.apply(TaskEvent::Reserve { node: NodeName::new("n0"), platform: PlatformName::new("dgx") }, 0, &policy, &actions, 0).unwrap();
        let t = task.apply(TaskEvent::StartTimeout, 600, &policy, &actions, 0).unwrap();
        assert_eq!(t.to, TaskStatus::FailedStartTimeout);
        assert_eq!(task.exit_code, Some(EXIT_START_TIMEOUT));
    }

    #[test]
    fn illegal_events_are_rejected() {
        let actions = ExitActions::default();
        let mut task = TaskLifecycle::new("t");
        let err = task.apply(TaskEvent::Exit { code: 0 }, 0, &POLICY, &actions, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidTransitionError { .. }));
        assert_eq!(task.status, TaskStatus::Pending);

        task.apply(TaskEvent::Cancel { exit_code: None }, 1, &POLICY, &actions, 0).unwrap();
        assert!(task.apply(TaskEvent::Cancel { exit_code: None }, 2, &POLICY, &actions, 0).is_err());
    }
}
