use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::domain::utils::id::{GroupName, TaskName};
use crate::domain::workflow::group::GroupSpec;
use crate::domain::workflow::task::TaskSpec;
use crate::error::{Error, Result};

/// Task and group dependency graph of one workflow.
///
/// Edges come from `inputs: task:`. A group depends on another group if any of its members
/// consumes the output of any member of the other. Readiness is tracked per upstream task so a
/// group may start as soon as the specific tasks it consumes have completed.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Owning group of every task.
    pub task_group: BTreeMap<TaskName, GroupName>,

    /// Tasks outside the group whose outputs the group consumes.
    pub upstream_tasks: BTreeMap<GroupName, BTreeSet<TaskName>>,

    pub upstream_groups: BTreeMap<GroupName, BTreeSet<GroupName>>,
    pub downstream_groups: BTreeMap<GroupName, BTreeSet<GroupName>>,

    /// Groups consuming the output of a task.
    pub consumers: BTreeMap<TaskName, BTreeSet<GroupName>>,

    /// Topological layers; names sorted within a layer.
    pub layers: Vec<Vec<GroupName>>,
}

impl DependencyGraph {
    pub fn build(workflow: &str, groups: &[GroupSpec], tasks: &BTreeMap<TaskName, TaskSpec>) -> Result<Self> {
        let mut graph = DependencyGraph::default();

        // Phase 1: ownership
        for group in groups {
            graph.upstream_tasks.insert(group.name.clone(), BTreeSet::new());
            graph.upstream_groups.insert(group.name.clone(), BTreeSet::new());
            graph.downstream_groups.insert(group.name.clone(), BTreeSet::new());
            for task in &group.tasks {
                graph.task_group.insert(task.clone(), group.name.clone());
            }
        }

        // Phase 2: edges
        for group in groups {
            for task_name in &group.tasks {
                let Some(task) = tasks.get(task_name) else {
                    return Err(Error::UnknownTaskError(task_name.id.clone()));
                };
                for upstream in task.upstream_tasks() {
                    let Some(upstream_group) = graph.task_group.get(upstream).cloned() else {
                        return Err(Error::UnknownTaskReferenceError { task: task_name.id.clone(), input: upstream.id.clone() });
                    };
                    if upstream_group == group.name {
                        return Err(Error::IntraGroupDependencyError {
                            group: group.name.id.clone(),
                            task: task_name.id.clone(),
                            input: upstream.id.clone(),
                        });
                    }
                    graph.upstream_tasks.entry(group.name.clone()).or_default().insert(upstream.clone());
                    graph.consumers.entry(upstream.clone()).or_default().insert(group.name.clone());
                    graph.upstream_groups.entry(group.name.clone()).or_default().insert(upstream_group.clone());
                    graph.downstream_groups.entry(upstream_group).or_default().insert(group.name.clone());
                }
            }
        }

        // Phase 3: layering, which doubles as the cycle check
        graph.layers = graph.topological_layers(workflow)?;
        Ok(graph)
    }

    /// Kahn's algorithm, one layer per round.
    fn topological_layers(&self, workflow: &str) -> Result<Vec<Vec<GroupName>>> {
        let mut in_degree: BTreeMap<&GroupName, usize> = self.upstream_groups.iter().map(|(group, ups)| (group, ups.len())).collect();
        let mut current: Vec<&GroupName> = in_degree.iter().filter(|(_, degree)| **degree == 0).map(|(group, _)| *group).collect();
        let mut layers = Vec::new();
        let mut visited = 0;

        while !current.is_empty() {
            let mut next = Vec::new();
            for group in &current {
                in_degree.remove(*group);
                for downstream in &self.downstream_groups[*group] {
                    if let Some(degree) = in_degree.get_mut(downstream) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(downstream);
                        }
                    }
                }
            }
            visited += current.len();
            layers.push(current.into_iter().cloned().collect::<Vec<_>>());
            next.sort();
            current = next;
        }

        if visited != self.upstream_groups.len() {
            let groups = in_degree.keys().map(|g| g.id.clone()).collect();
            return Err(Error::CyclicDependencyError { workflow: workflow.to_string(), groups });
        }
        Ok(layers)
    }

    /// Every group whose upstream tasks have all completed, including groups already started.
    pub fn ready_units(&self, completed: &BTreeSet<TaskName>) -> BTreeSet<GroupName> {
        self.upstream_tasks.iter().filter(|(_, ups)| ups.is_subset(completed)).map(|(group, _)| group.clone()).collect()
    }

    /// Transitive set of groups that consume `task`, directly or through other groups.
    pub fn downstream_of_task(&self, task: &TaskName) -> BTreeSet<GroupName> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<GroupName> = self.consumers.get(task).into_iter().flatten().cloned().collect();
        while let Some(group) = queue.pop_front() {
            if seen.insert(group.clone()) {
                queue.extend(self.downstream_groups.get(&group).into_iter().flatten().cloned());
            }
        }
        seen
    }

    pub fn group_of(&self, task: &TaskName) -> Option<&GroupName> {
        self.task_group.get(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::workflow_dto::workflow_dto::InputDto;
    use crate::domain::workflow::task::TaskInput;

    fn task(name: &str, inputs: &[&str]) -> TaskSpec {
        let mut spec = TaskSpec::named(name);
        spec.inputs = inputs
            .iter()
            .map(|up| {
                let dto = InputDto { task: Some(up.to_string()), ..Default::default() };
                TaskInput::from_dto(name, &dto).unwrap()
            })
            .collect();
        spec
    }

    fn singles(tasks: &[TaskSpec]) -> (Vec<GroupSpec>, BTreeMap<TaskName, TaskSpec>) {
        let groups = tasks.iter().map(|t| GroupSpec::single(t.name.clone())).collect();
        let map = tasks.iter().map(|t| (t.name.clone(), t.clone())).collect();
        (groups, map)
    }

    fn names(items: &[&str]) -> Vec<GroupName> {
        items.iter().map(|s| GroupName::new(*s)).collect()
    }

    #[test]
    fn layers_follow_task_inputs() {
        let (groups, tasks) = singles(&[task("c", &["a", "b"]), task("a", &[]), task("b", &["a"]), task("lonely", &[])]);
        let graph = DependencyGraph::build("wf", &groups, &tasks).unwrap();
        assert_eq!(graph.layers, vec![names(&["a", "lonely"]), names(&["b"]), names(&["c"])]);
    }

    #[test]
    fn cycles_are_rejected_with_their_groups() {
        let (groups, tasks) = singles(&[task("a", &["c"]), task("b", &["a"]), task("c", &["b"]), task("d", &[])]);
        match DependencyGraph::build("wf", &groups, &tasks) {
            Err(Error::CyclicDependencyError { workflow, groups }) => {
                assert_eq!(workflow, "wf");
                assert_eq!(groups, vec!["a", "b", "c"]);
            }
            other => panic!("expected a cycle error, got {:?}", other),
        }
    }

    #[test]
    fn readiness_is_task_granular() {
        let group = GroupSpec {
            name: GroupName::new("prep"),
            tasks: vec![TaskName::new("p1"), TaskName::new("p2")],
            lead: TaskName::new("p1"),
            barrier: true,
            ignore_nonlead_status: true,
        };
        let tasks: BTreeMap<_, _> = [task("p1", &[]), task("p2", &[]), task("train", &["p2"])].into_iter().map(|t| (t.name.clone(), t)).collect();
        let groups = vec![group, GroupSpec::single(TaskName::new("train"))];
        let graph = DependencyGraph::build("wf", &groups, &tasks).unwrap();

        let mut completed = BTreeSet::new();
        assert!(!graph.ready_units(&completed).contains(&GroupName::new("train")));
        completed.insert(TaskName::new("p2"));
        assert!(graph.ready_units(&completed).contains(&GroupName::new("train")));
    }

    #[test]
    fn reference_errors() {
        let (groups, tasks) = singles(&[task("a", &["ghost"])]);
        assert!(matches!(DependencyGraph::build("wf", &groups, &tasks), Err(Error::UnknownTaskReferenceError { .. })));

        let group = GroupSpec {
            name: GroupName::new("g"),
            tasks: vec![TaskName::new("x"), TaskName::new("y")],
            lead: TaskName::new("x"),
            barrier: true,
            ignore_nonlead_status: true,
        };
        let tasks: BTreeMap<_, _> = [task("x", &[]), task("y", &["x"])].into_iter().map(|t| (t.name.clone(), t)).collect();
        assert!(matches!(DependencyGraph::build("wf", &[group], &tasks), Err(Error::IntraGroupDependencyError { .. })));
    }

    #[test]
    fn downstream_is_transitive() {
        let (groups, tasks) = singles(&[task("a", &[]), task("b", &["a"]), task("c", &["b"]), task("d", &[])]);
        let graph = DependencyGraph::build("wf", &groups, &tasks).unwrap();
        let downstream = graph.downstream_of_task(&TaskName::new("a"));
        assert_eq!(downstream.into_iter().collect::<Vec<_>>(), names(&["b", "c"]));
    }
}
