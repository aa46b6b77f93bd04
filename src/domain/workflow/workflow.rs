use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::api::workflow_dto::workflow_dto::{GroupDto, PriorityDto, TaskDto, WorkflowSpecDto};
use crate::domain::pod::builder::PodSpecBuilder;
use crate::domain::resource::cluster::Cluster;
use crate::domain::resource::pool::{Pool, PoolRegistry};
use crate::domain::utils::id::{GroupName, PoolName, TaskName, WorkflowId};
use crate::domain::workflow::dependency::DependencyGraph;
use crate::domain::workflow::group::GroupSpec;
use crate::domain::workflow::task::TaskSpec;
use crate::error::{Error, Result};

/// Scheduling priority. `Low` work is preemptible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    pub fn is_preemptible(&self) -> bool {
        *self == Priority::Low
    }
}

impl From<PriorityDto> for Priority {
    fn from(dto: PriorityDto) -> Self {
        match dto {
            PriorityDto::Low => Priority::Low,
            PriorityDto::Normal => Priority::Normal,
            PriorityDto::High => Priority::High,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => f.write_str("LOW"),
            Priority::Normal => f.write_str("NORMAL"),
            Priority::High => f.write_str("HIGH"),
        }
    }
}

/// A validated workflow submission.
#[derive(Debug, Clone)]
pub struct WorkflowSpec {
    pub id: WorkflowId,
    pub name: String,
    pub pool: PoolName,
    pub priority: Priority,

    /// Seconds; `None` falls back to the engine defaults.
    pub exec_timeout: Option<i64>,
    pub queue_timeout: Option<i64>,

    pub max_retry_per_task: Option<u32>,
    pub max_retry_per_job: Option<u32>,

    /// Groups in declaration order.
    pub groups: Vec<GroupSpec>,
    pub tasks: BTreeMap<TaskName, TaskSpec>,
    pub graph: DependencyGraph,
}

impl WorkflowSpec {
    /// Validates a submission and builds its model.
    ///
    /// Every check happens here, before anything is queued or reserved.
    pub fn from_dto(dto: &WorkflowSpecDto, id: WorkflowId, pools: &PoolRegistry, cluster: &Cluster) -> Result<Self> {
        // Phase 0: Shape of the submission
        let group_dtos = Self::normalize_groups(dto)?;

        // Phase 1: Target pool
        let pool = pools.resolve(dto.pool.as_deref())?;

        // Phase 2: Tasks with their resolved resource requests
        let tasks = Self::build_tasks(dto, &group_dtos, pool)?;

        // Phase 3: Groups and their leads
        let groups = Self::build_groups(&group_dtos)?;

        // Phase 4: Dependencies, rejecting cycles
        let graph = DependencyGraph::build(&dto.name, &groups, &tasks)?;

        // Phase 5: Resource validations against the pool and platform
        Self::validate_resources(&id, &tasks, pool, cluster)?;

        let exec_timeout = dto.timeout.exec_timeout.as_ref().map(|d| d.to_seconds()).transpose()?;
        let queue_timeout = dto.timeout.queue_timeout.as_ref().map(|d| d.to_seconds()).transpose()?;

        Ok(WorkflowSpec {
            id,
            name: dto.name.clone(),
            pool: pool.name.clone(),
            priority: dto.priority.into(),
            exec_timeout,
            queue_timeout,
            max_retry_per_task: dto.max_retry_per_task,
            max_retry_per_job: dto.max_retry_per_job,
            groups,
            tasks,
            graph,
        })
    }

    /// **Phase 0: Normalize Groups**
    ///
    /// `tasks` and `groups` are mutually exclusive. A `tasks:` workflow becomes one implicit
    /// single-task group per task, led by that task.
    fn normalize_groups(dto: &WorkflowSpecDto) -> Result<Vec<GroupDto>> {
        match (&dto.tasks, &dto.groups) {
            (Some(_), Some(_)) => Err(Error::MutuallyExclusiveFieldsError {
                workflow: dto.name.clone(),
                first: "tasks".to_string(),
                second: "groups".to_string(),
            }),
            (Some(tasks), None) if !tasks.is_empty() => Ok(tasks
                .iter()
                .map(|task| GroupDto {
                    name: task.name.clone(),
                    barrier: true,
                    ignore_nonlead_status: true,
                    tasks: vec![TaskDto { lead: true, ..task.clone() }],
                })
                .collect()),
            (None, Some(groups)) if !groups.is_empty() => {
                for group in groups {
                    if group.tasks.len() < 2 {
                        return Err(Error::GroupTooSmallError { group: group.name.clone(), size: group.tasks.len() });
                    }
                }
                Ok(groups.clone())
            }
            _ => Err(Error::EmptyWorkflowError(dto.name.clone())),
        }
    }

    /// **Phase 2: Build Tasks**
    fn build_tasks(dto: &WorkflowSpecDto, groups: &[GroupDto], pool: &Pool) -> Result<BTreeMap<TaskName, TaskSpec>> {
        let mut tasks = BTreeMap::new();
        for task_dto in groups.iter().flat_map(|g| g.tasks.iter()) {
            let task = TaskSpec::from_dto(task_dto, &dto.resources, pool)?;
            if tasks.insert(task.name.clone(), task).is_some() {
                return Err(Error::DuplicateTaskError(task_dto.name.clone()));
            }
        }
        Ok(tasks)
    }

    /// **Phase 3: Build Groups**
    ///
    /// Every group needs exactly one lead task. Group names must not collide.
    fn build_groups(dtos: &[GroupDto]) -> Result<Vec<GroupSpec>> {
        let mut seen = BTreeSet::new();
        let mut groups = Vec::with_capacity(dtos.len());
        for dto in dtos {
            if !seen.insert(dto.name.clone()) {
                return Err(Error::ModelConstructionError(format!("group name '{}' is used more than once", dto.name)));
            }
            let leads: Vec<&TaskDto> = dto.tasks.iter().filter(|t| t.lead).collect();
            if leads.len() != 1 {
                return Err(Error::InvalidGroupLeaderError { group: dto.name.clone(), leads: leads.len() });
            }
            groups.push(GroupSpec {
                name: GroupName::new(dto.name.clone()),
                tasks: dto.tasks.iter().map(|t| TaskName::new(t.name.clone())).collect(),
                lead: TaskName::new(leads[0].name.clone()),
                barrier: dto.barrier,
                ignore_nonlead_status: dto.ignore_nonlead_status,
            });
        }
        Ok(groups)
    }

    /// **Phase 5: Validate Resources**
    fn validate_resources(id: &WorkflowId, tasks: &BTreeMap<TaskName, TaskSpec>, pool: &Pool, cluster: &Cluster) -> Result<()> {
        let builder = PodSpecBuilder::new(pool, cluster);
        for task in tasks.values() {
            builder.validate(id, task.name.as_str(), &task.resources)?;
        }
        Ok(())
    }

    pub fn group(&self, name: &GroupName) -> Option<&GroupSpec> {
        self.groups.iter().find(|g| &g.name == name)
    }

    pub fn task(&self, name: &TaskName) -> Result<&TaskSpec> {
        self.tasks.get(name).ok_or_else(|| Error::UnknownTaskError(format!("{}/{}", self.id, name)))
    }

    pub fn group_of(&self, task: &TaskName) -> Option<&GroupSpec> {
        self.graph.group_of(task).and_then(|name| self.group(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::engine_dto::{NodeDto, PlatformDto, PoolDto};
    use crate::api::workflow_dto::resource_dto::{QuantityDto, ResourceSpecDto};
    use crate::api::workflow_dto::workflow_dto::{InputDto, TimeoutDto};
    use crate::loader::parser::parse_yaml_str;

    fn environment() -> (PoolRegistry, Cluster) {
        let cluster = Cluster::from_dto(&[NodeDto {
            name: "n0".to_string(),
            cpu: QuantityDto::Integer(32),
            memory: QuantityDto::Text("128Gi".to_string()),
            storage: None,
            gpu: Some(QuantityDto::Integer(8)),
        }])
        .unwrap();
        let pool = PoolDto {
            name: "default".to_string(),
            description: String::new(),
            quotas: BTreeMap::new(),
            platforms: vec![PlatformDto {
                name: "dgx".to_string(),
                nodes: vec!["n0".to_string()],
                override_pod_template: Vec::new(),
                resource_validations: Vec::new(),
                default_variables: BTreeMap::new(),
            }],
            default_platform: None,
            default_resources: ResourceSpecDto { cpu: Some(QuantityDto::Integer(1)), ..Default::default() },
            default_variables: BTreeMap::new(),
            resource_validations: Vec::new(),
            common_pod_template: Vec::new(),
        };
        let pools = PoolRegistry::from_dto(&[pool], &cluster, None).unwrap();
        (pools, cluster)
    }

    fn build(yaml: &str) -> Result<WorkflowSpec> {
        let (pools, cluster) = environment();
        let dto: WorkflowSpecDto = parse_yaml_str(yaml)?;
        let id = WorkflowId::new(format!("{}-1", dto.name));
        WorkflowSpec::from_dto(&dto, id, &pools, &cluster)
    }

    #[test]
    fn tasks_become_single_task_groups() {
        let spec = build(
            r#"
name: combo
timeout:
  exec_timeout: 2h
  queue_timeout: 6h
tasks:
  - name: a
  - name: b
    inputs:
      - task: a
"#,
        )
        .unwrap();
        assert_eq!(spec.groups.len(), 2);
        assert!(spec.groups.iter().all(|g| g.tasks.len() == 1 && g.is_lead(&g.tasks[0])));
        assert_eq!(spec.exec_timeout, Some(7200));
        assert_eq!(spec.queue_timeout, Some(21_600));
        assert_eq!(spec.priority, Priority::Normal);
        assert_eq!(spec.pool, PoolName::new("default"));
    }

    #[test]
    fn tasks_and_groups_are_mutually_exclusive() {
        let dto = WorkflowSpecDto {
            name: "both".to_string(),
            pool: None,
            priority: PriorityDto::Normal,
            timeout: TimeoutDto::default(),
            resources: BTreeMap::new(),
            tasks: Some(vec![TaskDto { name: "a".to_string(), ..Default::default() }]),
            groups: Some(Vec::new()),
            max_retry_per_task: None,
            max_retry_per_job: None,
        };
        let (pools, cluster) = environment();
        assert!(matches!(WorkflowSpec::from_dto(&dto, WorkflowId::new("both-1"), &pools, &cluster), Err(Error::MutuallyExclusiveFieldsError { .. })));
    }

    #[test]
    fn groups_need_one_lead_and_two_members() {
        let no_lead = build(
            r#"
name: g
groups:
  - name: grp
    tasks:
      - name: a
      - name: b
"#,
        );
        assert!(matches!(no_lead, Err(Error::InvalidGroupLeaderError { leads: 0, .. })));

        let two_leads = build(
            r#"
name: g
groups:
  - name: grp
    tasks:
      - name: a
        lead: true
      - name: b
        lead: true
"#,
        );
        assert!(matches!(two_leads, Err(Error::InvalidGroupLeaderError { leads: 2, .. })));

        let lonely = build(
            r#"
name: g
groups:
  - name: grp
    tasks:
      - name: a
        lead: true
"#,
        );
        assert!(matches!(lonely, Err(Error::GroupTooSmallError { size: 1, .. })));
    }

    #[test]
    fn duplicate_and_unknown_references() {
        let duplicate = build("name: d\ntasks:\n  - name: a\n  - name: a\n");
        assert!(matches!(duplicate, Err(Error::DuplicateTaskError(_))));

        let mut dto = WorkflowSpecDto {
            name: "u".to_string(),
            pool: Some("missing".to_string()),
            priority: PriorityDto::High,
            timeout: TimeoutDto::default(),
            resources: BTreeMap::new(),
            tasks: Some(vec![TaskDto {
                name: "a".to_string(),
                inputs: vec![InputDto { task: Some("ghost".to_string()), ..Default::default() }],
                ..Default::default()
            }]),
            groups: None,
            max_retry_per_task: None,
            max_retry_per_job: None,
        };
        let (pools, cluster) = environment();
        assert!(matches!(WorkflowSpec::from_dto(&dto, WorkflowId::new("u-1"), &pools, &cluster), Err(Error::UnknownPoolError(_))));

        dto.pool = None;
        assert!(matches!(WorkflowSpec::from_dto(&dto, WorkflowId::new("u-1"), &pools, &cluster), Err(Error::UnknownTaskReferenceError { .. })));
    }

    #[test]
    fn oversized_requests_are_rejected() {
        let result = build(
            r#"
name: big
resources:
  default:
    gpu: 16
tasks:
  - name: a
"#,
        );
        assert!(matches!(result, Err(Error::ResourceValidationError { .. })));
    }

    #[test]
    fn empty_workflow_is_rejected() {
        assert!(matches!(build("name: empty\ntasks: []\n"), Err(Error::EmptyWorkflowError(_))));
    }
}
