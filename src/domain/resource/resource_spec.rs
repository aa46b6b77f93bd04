use std::collections::BTreeMap;

use crate::api::workflow_dto::resource_dto::{QuantityDto, ResourceSpecDto};
use crate::domain::resource::pool::Pool;
use crate::domain::resource::quantity::{ResourceKind, ResourceVector};
use crate::domain::utils::id::{NodeName, PlatformName};
use crate::error::{Error, Result};

/// Name of the workflow resource entry used by tasks without a `resource` reference.
pub const DEFAULT_RESOURCE_SPEC: &str = "default";

/// Fully resolved resource request of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub request: ResourceVector,
    pub platform: PlatformName,
    pub nodes_excluded: Vec<NodeName>,
}

impl ResourceSpec {
    /// Resolves the request of `task`.
    ///
    /// The named entry (or the workflow's `default` entry) is looked up in `resources`; every
    /// field left unset there falls back to the pool's `default_resources`, and the platform
    /// falls back to the pool's default platform.
    pub fn resolve(task: &str, reference: Option<&str>, resources: &BTreeMap<String, ResourceSpecDto>, pool: &Pool) -> Result<Self> {
        let declared = match reference {
            Some(name) => Some(resources.get(name).ok_or_else(|| Error::UnknownResourceSpecError { task: task.to_string(), spec: name.to_string() })?),
            None => resources.get(DEFAULT_RESOURCE_SPEC),
        };
        let fallback = &pool.default_resources;

        let mut request = ResourceVector::ZERO;
        for kind in ResourceKind::ALL {
            let quantity = declared.and_then(|spec| field(spec, kind)).or_else(|| field(fallback, kind));
            if let Some(quantity) = quantity {
                let value = quantity.parse(kind)?;
                if value < 0 {
                    return Err(Error::ResourceValidationError { task: task.to_string(), message: format!("negative {} request", kind) });
                }
                request.set(kind, value);
            }
        }

        let platform = declared
            .and_then(|spec| spec.platform.clone())
            .or_else(|| fallback.platform.clone())
            .map(PlatformName::new)
            .unwrap_or_else(|| pool.default_platform.clone());
        pool.platform(&platform)?;

        let nodes_excluded = match declared {
            Some(spec) if !spec.nodes_excluded.is_empty() => &spec.nodes_excluded,
            _ => &fallback.nodes_excluded,
        };

        Ok(ResourceSpec { request, platform, nodes_excluded: nodes_excluded.iter().map(|n| NodeName::new(n.clone())).collect() })
    }
}

fn field(spec: &ResourceSpecDto, kind: ResourceKind) -> Option<&QuantityDto> {
    match kind {
        ResourceKind::Cpu => spec.cpu.as_ref(),
        ResourceKind::Memory => spec.memory.as_ref(),
        ResourceKind::Storage => spec.storage.as_ref(),
        ResourceKind::Gpu => spec.gpu.as_ref(),
    }
}
