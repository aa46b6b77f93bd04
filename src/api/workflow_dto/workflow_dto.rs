use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::api::workflow_dto::resource_dto::{DurationDto, ResourceSpecDto};

/// A workflow submission as accepted from the CLI/UI, in YAML or JSON.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpecDto {
    pub name: String,

    /// Target pool; the engine's default pool when omitted.
    pub pool: Option<String>,

    #[serde(default)]
    pub priority: PriorityDto,

    #[serde(default)]
    pub timeout: TimeoutDto,

    /// Named resource specs referenced by `TaskDto::resource`.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSpecDto>,

    pub tasks: Option<Vec<TaskDto>>,
    pub groups: Option<Vec<GroupDto>>,

    #[serde(alias = "max_retry_per_task")]
    pub max_retry_per_task: Option<u32>,
    #[serde(alias = "max_retry_per_job")]
    pub max_retry_per_job: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutDto {
    #[serde(alias = "exec_timeout")]
    pub exec_timeout: Option<DurationDto>,
    #[serde(alias = "queue_timeout")]
    pub queue_timeout: Option<DurationDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityDto {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GroupDto {
    pub name: String,

    #[serde(default = "default_true")]
    pub barrier: bool,

    #[serde(default = "default_true", alias = "ignore_nonlead_status")]
    pub ignore_nonlead_status: bool,

    pub tasks: Vec<TaskDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskDto {
    pub name: String,

    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Key into `WorkflowSpecDto::resources`.
    pub resource: Option<String>,

    #[serde(default)]
    pub lead: bool,

    #[serde(default)]
    pub inputs: Vec<InputDto>,
    #[serde(default)]
    pub outputs: Vec<OutputDto>,

    /// Action -> comma separated exit code ranges, e.g. `RESCHEDULE: "3000-3999,42"`.
    #[serde(default, alias = "exit_actions")]
    pub exit_actions: BTreeMap<ExitActionDto, String>,

    #[serde(default, alias = "checkpoints")]
    pub checkpoint: Vec<CheckpointDto>,
}

/// Exactly one of `task`, `url` or `dataset` must be set.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct InputDto {
    pub task: Option<String>,
    pub url: Option<String>,
    pub dataset: Option<String>,
    pub regex: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct OutputDto {
    pub url: Option<String>,
    pub dataset: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointDto {
    pub path: String,
    pub url: String,
    pub frequency: DurationDto,
    pub regex: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitActionDto {
    Complete,
    Fail,
    Reschedule,
}

fn default_true() -> bool {
    true
}
