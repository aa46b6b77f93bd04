use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::domain::pod::expression::{VariableValue, Variables};
use crate::domain::pod::template::{merge_all, substitute};
use crate::domain::pod::validation::check_all;
use crate::domain::resource::cluster::Cluster;
use crate::domain::resource::pool::{Platform, Pool};
use crate::domain::resource::quantity::{ResourceKind, ResourceVector};
use crate::domain::resource::resource_spec::ResourceSpec;
use crate::domain::utils::id::{GroupName, NodeName, PlatformName, PoolName, TaskKey, WorkflowId};
use crate::domain::workflow::task::TaskSpec;
use crate::error::{Error, Result};

/// Everything the cluster backend needs to launch one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSpec {
    pub key: TaskKey,
    pub group: GroupName,
    pub pool: PoolName,
    pub platform: PlatformName,
    pub node: NodeName,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub request: ResourceVector,
    /// Merged and substituted pod template.
    pub pod: Value,
}

/// Renders pod specs and checks resource validations for the tasks of one pool.
pub struct PodSpecBuilder<'a> {
    pool: &'a Pool,
    cluster: &'a Cluster,
}

impl<'a> PodSpecBuilder<'a> {
    pub fn new(pool: &'a Pool, cluster: &'a Cluster) -> Self {
        Self { pool, cluster }
    }

    fn platform(&self, resources: &ResourceSpec) -> Result<&'a Platform> {
        self.pool.platform(&resources.platform)
    }

    /// Variables visible to templates and validation rules of one task.
    ///
    /// `USER_*` describe the request, `K8_*` the largest allocatable node of the platform.
    /// CPU is exposed in whole cores: the request rounds up and the node capacity rounds down.
    pub fn variables(&self, workflow_id: &WorkflowId, task: &str, resources: &ResourceSpec) -> Result<Variables> {
        let platform = self.platform(resources)?;
        let largest = self.cluster.largest_node(platform.nodes.iter());

        let mut vars = Variables::new();
        for (name, value) in self.pool.default_variables.iter().chain(platform.default_variables.iter()) {
            vars.insert(name.clone(), VariableValue::Text(value.clone()));
        }
        for kind in ResourceKind::ALL {
            let (user, k8) = match kind {
                ResourceKind::Cpu => ((resources.request.cpu + 999) / 1000, largest.cpu / 1000),
                _ => (resources.request.get(kind), largest.get(kind)),
            };
            vars.insert(format!("USER_{}", kind.variable_suffix()), VariableValue::Number(user));
            vars.insert(format!("K8_{}", kind.variable_suffix()), VariableValue::Number(k8));
        }
        vars.insert("WF_ID".to_string(), VariableValue::Text(workflow_id.id.clone()));
        vars.insert("TASK_NAME".to_string(), VariableValue::Text(task.to_string()));
        vars.insert("POOL_NAME".to_string(), VariableValue::Text(self.pool.name.id.clone()));
        vars.insert("PLATFORM_NAME".to_string(), VariableValue::Text(platform.name.id.clone()));
        Ok(vars)
    }

    /// Submission-time checks: pool and platform validation rules, then whether any eligible
    /// node of the platform could ever host the request.
    pub fn validate(&self, workflow_id: &WorkflowId, task: &str, resources: &ResourceSpec) -> Result<()> {
        let platform = self.platform(resources)?;
        let vars = self.variables(workflow_id, task, resources)?;
        check_all(self.pool.resource_validations.iter().chain(platform.resource_validations.iter()), task, &vars)?;

        let fits_somewhere = platform
            .nodes
            .iter()
            .filter(|name| !resources.nodes_excluded.contains(name))
            .filter_map(|name| self.cluster.node(name))
            .any(|node| node.allocatable.fits(&resources.request));
        if !fits_somewhere {
            return Err(Error::ResourceValidationError {
                task: task.to_string(),
                message: format!("no node of platform '{}' can hold {}", platform.name, resources.request),
            });
        }
        Ok(())
    }

    /// Builds the execution spec of a task placed on `node`.
    pub fn build(&self, workflow_id: &WorkflowId, group: &GroupName, task: &TaskSpec, node: &NodeName) -> Result<ExecutionSpec> {
        let platform = self.platform(&task.resources)?;
        let mut vars = self.variables(workflow_id, task.name.as_str(), &task.resources)?;
        vars.insert("NODE_NAME".to_string(), VariableValue::Text(node.id.clone()));

        let merged = merge_all(self.pool.common_pod_template.iter().chain(platform.override_pod_template.iter()));
        let pod = substitute(&merged, &vars)?;

        Ok(ExecutionSpec {
            key: TaskKey::new(workflow_id.clone(), task.name.clone()),
            group: group.clone(),
            pool: self.pool.name.clone(),
            platform: platform.name.clone(),
            node: node.clone(),
            image: task.image.clone(),
            command: task.command.clone(),
            args: task.args.clone(),
            environment: task.environment.clone(),
            request: task.resources.request,
            pod,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::engine_dto::{NodeDto, PlatformDto, PoolDto, ValidationOperatorDto, ValidationRuleDto};
    use crate::api::workflow_dto::resource_dto::{QuantityDto, ResourceSpecDto};
    use serde_json::json;

    fn setup() -> (Cluster, Pool) {
        let node = |name: &str, gpu: i64| NodeDto {
            name: name.to_string(),
            cpu: QuantityDto::Text("15.5".to_string()),
            memory: QuantityDto::Text("64Gi".to_string()),
            storage: None,
            gpu: Some(QuantityDto::Integer(gpu)),
        };
        let cluster = Cluster::from_dto(&[node("a", 8), node("b", 4)]).unwrap();
        let dto = PoolDto {
            name: "research".to_string(),
            description: String::new(),
            quotas: BTreeMap::new(),
            platforms: vec![PlatformDto {
                name: "dgx".to_string(),
                nodes: vec!["a".to_string(), "b".to_string()],
                override_pod_template: vec![json!({"spec": {"nodeSelector": {"platform": "{{PLATFORM_NAME}}"}}})],
                resource_validations: vec![ValidationRuleDto {
                    operator: ValidationOperatorDto::Le,
                    left_operand: "{{USER_GPU}}".to_string(),
                    right_operand: "{{K8_GPU}}".to_string(),
                    assert_message: "too many GPUs".to_string(),
                }],
                default_variables: BTreeMap::new(),
            }],
            default_platform: None,
            default_resources: ResourceSpecDto::default(),
            default_variables: BTreeMap::from([("SHM".to_string(), "1Gi".to_string())]),
            resource_validations: Vec::new(),
            common_pod_template: vec![json!({"metadata": {"labels": {"workflow": "{{WF_ID}}", "shm": "{{SHM}}"}}})],
        };
        let pool = Pool::from_dto(&dto, &cluster).unwrap();
        (cluster, pool)
    }

    fn spec(cpu_millis: i64, gpu: i64) -> ResourceSpec {
        ResourceSpec { request: ResourceVector::new(cpu_millis, 1 << 30, 0, gpu), platform: PlatformName::new("dgx"), nodes_excluded: Vec::new() }
    }

    #[test]
    fn cpu_variables_use_whole_cores() {
        let (cluster, pool) = setup();
        let builder = PodSpecBuilder::new(&pool, &cluster);
        let vars = builder.variables(&WorkflowId::new("wf-1"), "t", &spec(1500, 1)).unwrap();
        assert_eq!(vars["USER_CPU"], VariableValue::Number(2));
        assert_eq!(vars["K8_CPU"], VariableValue::Number(15));
        assert_eq!(vars["K8_GPU"], VariableValue::Number(8));
    }

    #[test]
    fn validation_rules_and_fit_are_checked() {
        let (cluster, pool) = setup();
        let builder = PodSpecBuilder::new(&pool, &cluster);
        let wf = WorkflowId::new("wf-1");
        assert!(builder.validate(&wf, "t", &spec(1000, 8)).is_ok());
        assert!(matches!(builder.validate(&wf, "t", &spec(1000, 9)), Err(Error::ResourceValidationError { .. })));

        let mut excluded = spec(1000, 8);
        excluded.nodes_excluded = vec![NodeName::new("a")];
        assert!(matches!(builder.validate(&wf, "t", &excluded), Err(Error::ResourceValidationError { .. })));
    }

    #[test]
    fn pod_template_is_merged_and_rendered() {
        let (cluster, pool) = setup();
        let builder = PodSpecBuilder::new(&pool, &cluster);
        let task = TaskSpec { image: "nvcr.io/train:1".to_string(), resources: spec(1000, 2), ..TaskSpec::named("train") };

        let exec = builder.build(&WorkflowId::new("wf-1"), &GroupName::new("train"), &task, &NodeName::new("a")).unwrap();
        assert_eq!(exec.pod["metadata"]["labels"]["workflow"], "wf-1");
        assert_eq!(exec.pod["metadata"]["labels"]["shm"], "1Gi");
        assert_eq!(exec.pod["spec"]["nodeSelector"]["platform"], "dgx");
        assert_eq!(exec.key.to_string(), "wf-1/train");
    }
}
