use crate::domain::utils::id::{GroupName, TaskName};

/// A set of tasks scheduled and supervised together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub name: GroupName,
    /// Members in declaration order.
    pub tasks: Vec<TaskName>,
    pub lead: TaskName,
    /// All members are placed atomically and start together.
    pub barrier: bool,
    /// The group mirrors its lead; non-lead failures do not fail the group.
    pub ignore_nonlead_status: bool,
}

impl GroupSpec {
    /// The implicit group of a task submitted through `tasks:`.
    pub fn single(task: TaskName) -> Self {
        GroupSpec { name: GroupName::new(task.id.clone()), tasks: vec![task.clone()], lead: task, barrier: true, ignore_nonlead_status: true }
    }

    pub fn is_lead(&self, task: &TaskName) -> bool {
        &self.lead == task
    }
}
