//! Status roll-up from tasks to groups to the workflow.
//!
//! Both reducers are pure: the same child statuses always give the same result, whatever order
//! the underlying events arrived in.

use std::collections::BTreeMap;

use crate::domain::lifecycle::status::{TaskStatus, WorkflowStatus};
use crate::domain::utils::id::TaskName;
use crate::domain::workflow::group::GroupSpec;

fn status_of(statuses: &BTreeMap<TaskName, TaskStatus>, task: &TaskName) -> TaskStatus {
    statuses.get(task).copied().unwrap_or(TaskStatus::Pending)
}

/// Observable status of a group.
///
/// The group mirrors its lead. With `ignore_nonlead_status` off, a non-lead root failure
/// forces `FAILED`, and a completed lead only completes the group once every member has.
pub fn group_status(group: &GroupSpec, statuses: &BTreeMap<TaskName, TaskStatus>) -> TaskStatus {
    let lead = status_of(statuses, &group.lead);
    if group.ignore_nonlead_status {
        return lead;
    }

    let members = group.tasks.iter().map(|task| status_of(statuses, task));
    if group.tasks.iter().filter(|task| !group.is_lead(task)).any(|task| status_of(statuses, task).is_root_failure()) {
        return TaskStatus::Failed;
    }
    if lead != TaskStatus::Completed {
        return lead;
    }
    if members.clone().all(|s| s == TaskStatus::Completed) {
        return TaskStatus::Completed;
    }
    TaskStatus::least_advanced(members.clone())
        .or_else(|| members.filter(|s| *s != TaskStatus::Completed).max_by_key(|s| failure_rank(*s)))
        .unwrap_or(TaskStatus::Completed)
}

fn failure_rank(status: TaskStatus) -> u8 {
    WorkflowStatus::from_failure(status).map(|w| w.failure_precedence()).unwrap_or(0)
}

/// Workflow status from its group statuses.
pub fn workflow_status(groups: impl IntoIterator<Item = TaskStatus>) -> WorkflowStatus {
    let groups: Vec<TaskStatus> = groups.into_iter().collect();
    if groups.iter().all(|s| *s == TaskStatus::Pending) {
        return WorkflowStatus::Pending;
    }
    if groups.iter().any(|s| !s.is_terminal()) {
        return WorkflowStatus::Running;
    }
    groups
        .iter()
        .filter_map(|s| WorkflowStatus::from_failure(*s))
        .max_by_key(|w| w.failure_precedence())
        .unwrap_or(WorkflowStatus::Completed)
}

/// Convenience roll-up straight from task statuses.
pub fn workflow_status_of(groups: &[GroupSpec], statuses: &BTreeMap<TaskName, TaskStatus>) -> WorkflowStatus {
    workflow_status(groups.iter().map(|g| group_status(g, statuses)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::utils::id::GroupName;
    use TaskStatus::*;

    fn group(ignore_nonlead_status: bool) -> GroupSpec {
        GroupSpec {
            name: GroupName::new("g"),
            tasks: vec![TaskName::new("lead"), TaskName::new("w1"), TaskName::new("w2")],
            lead: TaskName::new("lead"),
            barrier: true,
            ignore_nonlead_status,
        }
    }

    fn statuses(lead: TaskStatus, w1: TaskStatus, w2: TaskStatus) -> BTreeMap<TaskName, TaskStatus> {
        BTreeMap::from([(TaskName::new("lead"), lead), (TaskName::new("w1"), w1), (TaskName::new("w2"), w2)])
    }

    #[test]
    fn group_follows_lead_by_default() {
        assert_eq!(group_status(&group(true), &statuses(Running, Failed, Running)), Running);
        assert_eq!(group_status(&group(true), &statuses(Completed, Failed, Running)), Completed);
    }

    #[test]
    fn nonlead_failure_forces_failed() {
        assert_eq!(group_status(&group(false), &statuses(Running, Failed, Running)), Failed);
        assert_eq!(group_status(&group(false), &statuses(Completed, FailedExecTimeout, Completed)), Failed);
        assert_eq!(group_status(&group(false), &statuses(Completed, Running, Completed)), Running);
        assert_eq!(group_status(&group(false), &statuses(Completed, Completed, Completed)), Completed);
        assert_eq!(group_status(&group(false), &statuses(FailedExecTimeout, Completed, Completed)), FailedExecTimeout);
    }

    #[test]
    fn workflow_rollup() {
        assert_eq!(workflow_status([Pending, Pending]), WorkflowStatus::Pending);
        assert_eq!(workflow_status([Completed, Pending]), WorkflowStatus::Running);
        assert_eq!(workflow_status([Completed, Running]), WorkflowStatus::Running);
        assert_eq!(workflow_status([Completed, Completed]), WorkflowStatus::Completed);
        assert_eq!(workflow_status([Failed, FailedUpstream, FailedCanceled]), WorkflowStatus::Failed);
        assert_eq!(workflow_status([Failed, FailedQueueTimeout]), WorkflowStatus::FailedQueueTimeout);
        assert_eq!(workflow_status([FailedExecTimeout, FailedQueueTimeout]), WorkflowStatus::FailedExecTimeout);
    }

    #[test]
    fn aggregation_is_order_independent() {
        let groups = [Completed, FailedCanceled, Failed, FailedUpstream];
        let forward = workflow_status(groups);
        let mut reversed = groups;
        reversed.reverse();
        assert_eq!(forward, workflow_status(reversed));
        assert_eq!(forward, workflow_status(groups));
    }
}
