use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::api::workflow_dto::resource_dto::{DurationDto, QuantityDto, ResourceSpecDto};
use crate::domain::resource::quantity::ResourceKind;

/// Admin configuration: engine settings, the cluster's nodes and the pools sharing them.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfigDto {
    #[serde(default)]
    pub engine: EngineSettingsDto,
    #[serde(default)]
    pub simulator: SimulatorDto,
    pub nodes: Vec<NodeDto>,
    pub pools: Vec<PoolDto>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettingsDto {
    pub default_pool: Option<String>,
    #[serde(alias = "start_timeout")]
    pub start_timeout: Option<DurationDto>,
    #[serde(alias = "force_cleanup_delay")]
    pub force_cleanup_delay: Option<DurationDto>,
    #[serde(alias = "max_retry_per_task")]
    pub max_retry_per_task: Option<u32>,
    #[serde(alias = "max_retry_per_job")]
    pub max_retry_per_job: Option<u32>,
    #[serde(alias = "scheduling_interval")]
    pub scheduling_interval: Option<DurationDto>,
    pub retention: Option<DurationDto>,
    #[serde(alias = "default_exec_timeout")]
    pub default_exec_timeout: Option<DurationDto>,
    #[serde(alias = "default_queue_timeout")]
    pub default_queue_timeout: Option<DurationDto>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorDto {
    #[serde(default)]
    pub is_simulation: bool,
    #[serde(default)]
    pub start_time: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NodeDto {
    pub name: String,
    pub cpu: QuantityDto,
    pub memory: QuantityDto,
    #[serde(default)]
    pub storage: Option<QuantityDto>,
    #[serde(default)]
    pub gpu: Option<QuantityDto>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PoolDto {
    pub name: String,
    #[serde(default)]
    pub description: String,

    /// Fairness controls per resource kind.
    #[serde(default)]
    pub quotas: BTreeMap<ResourceKind, QuotaDto>,

    pub platforms: Vec<PlatformDto>,
    #[serde(alias = "default_platform")]
    pub default_platform: Option<String>,

    #[serde(default, alias = "default_resources")]
    pub default_resources: ResourceSpecDto,
    #[serde(default, alias = "default_variables")]
    pub default_variables: BTreeMap<String, String>,
    #[serde(default, alias = "resource_validations")]
    pub resource_validations: Vec<ValidationRuleDto>,
    #[serde(default, alias = "common_pod_template")]
    pub common_pod_template: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDto {
    pub guarantee: Option<QuantityDto>,
    pub weight: Option<u32>,
    pub maximum: Option<QuantityDto>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlatformDto {
    pub name: String,
    /// Cluster nodes this platform may place tasks onto.
    pub nodes: Vec<String>,
    #[serde(default, alias = "override_pod_template")]
    pub override_pod_template: Vec<serde_json::Value>,
    #[serde(default, alias = "resource_validations")]
    pub resource_validations: Vec<ValidationRuleDto>,
    #[serde(default, alias = "default_variables")]
    pub default_variables: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ValidationRuleDto {
    pub operator: ValidationOperatorDto,
    #[serde(alias = "leftOperand")]
    pub left_operand: String,
    #[serde(alias = "rightOperand")]
    pub right_operand: String,
    #[serde(alias = "assertMessage")]
    pub assert_message: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationOperatorDto {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}
