use std::collections::BTreeMap;

use crate::api::engine_dto::NodeDto;
use crate::domain::resource::quantity::{ResourceKind, ResourceVector};
use crate::domain::utils::id::NodeName;
use crate::error::Result;

/// A schedulable machine and its allocatable capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: NodeName,
    pub allocatable: ResourceVector,
}

impl Node {
    pub fn from_dto(dto: &NodeDto) -> Result<Self> {
        let storage = match &dto.storage {
            Some(storage) => storage.parse(ResourceKind::Storage)?,
            None => 0,
        };
        let gpu = match &dto.gpu {
            Some(gpu) => gpu.parse(ResourceKind::Gpu)?,
            None => 0,
        };
        Ok(Node {
            name: NodeName::new(dto.name.clone()),
            allocatable: ResourceVector::new(dto.cpu.parse(ResourceKind::Cpu)?, dto.memory.parse(ResourceKind::Memory)?, storage, gpu),
        })
    }
}

/// All nodes shared by the configured pools.
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    pub nodes: BTreeMap<NodeName, Node>,
}

impl Cluster {
    pub fn from_dto(nodes: &[NodeDto]) -> Result<Self> {
        let mut cluster = Cluster::default();
        for dto in nodes {
            let node = Node::from_dto(dto)?;
            if cluster.nodes.insert(node.name.clone(), node).is_some() {
                log::warn!("Node '{}' is declared twice, keeping the last definition.", dto.name);
            }
        }
        Ok(cluster)
    }

    pub fn node(&self, name: &NodeName) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Sum of all allocatable capacity.
    pub fn capacity(&self) -> ResourceVector {
        self.nodes.values().fold(ResourceVector::ZERO, |acc, node| acc + node.allocatable)
    }

    /// Component-wise maximum over the given nodes; the `K8_*` view of a platform.
    pub fn largest_node<'a>(&self, names: impl IntoIterator<Item = &'a NodeName>) -> ResourceVector {
        names.into_iter().filter_map(|name| self.nodes.get(name)).fold(ResourceVector::ZERO, |acc, node| acc.max(&node.allocatable))
    }
}
