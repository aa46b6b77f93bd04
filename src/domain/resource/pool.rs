use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::api::engine_dto::{PlatformDto, PoolDto, QuotaDto};
use crate::api::workflow_dto::resource_dto::ResourceSpecDto;
use crate::domain::pod::validation::ValidationRule;
use crate::domain::resource::cluster::Cluster;
use crate::domain::resource::quantity::ResourceKind;
use crate::domain::utils::id::{NodeName, PlatformName, PoolName};
use crate::error::{Error, Result};

/// Fairness controls of one pool for one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceQuota {
    /// Capacity reserved for the pool's non-preemptible work.
    pub guarantee: i64,
    /// Share of the contested capacity above all guarantees.
    pub weight: u32,
    /// Hard cap on everything the pool holds; `None` is unlimited.
    pub maximum: Option<i64>,
}

impl ResourceQuota {
    fn from_dto(kind: ResourceKind, dto: &QuotaDto) -> Result<Option<Self>> {
        let (Some(guarantee), Some(weight), Some(maximum)) = (&dto.guarantee, dto.weight, &dto.maximum) else {
            return Ok(None);
        };
        let maximum = if maximum.is_unlimited() { None } else { Some(maximum.parse(kind)?) };
        Ok(Some(ResourceQuota { guarantee: guarantee.parse(kind)?, weight, maximum }))
    }
}

/// A hardware class inside a pool, bound to a set of cluster nodes.
#[derive(Debug, Clone)]
pub struct Platform {
    pub name: PlatformName,
    pub nodes: Vec<NodeName>,
    pub override_pod_template: Vec<Value>,
    pub resource_validations: Vec<ValidationRule>,
    pub default_variables: BTreeMap<String, String>,
}

impl Platform {
    fn from_dto(dto: &PlatformDto, cluster: &Cluster, pool: &str) -> Result<Self> {
        let mut nodes: Vec<NodeName> = Vec::with_capacity(dto.nodes.len());
        for node in &dto.nodes {
            let name = NodeName::new(node.clone());
            if cluster.node(&name).is_none() {
                return Err(Error::ModelConstructionError(format!("platform '{}' of pool '{}' references unknown node '{}'", dto.name, pool, node)));
            }
            nodes.push(name);
        }
        nodes.sort();
        nodes.dedup();

        Ok(Platform {
            name: PlatformName::new(dto.name.clone()),
            nodes,
            override_pod_template: dto.override_pod_template.clone(),
            resource_validations: dto.resource_validations.iter().map(ValidationRule::from).collect(),
            default_variables: dto.default_variables.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Pool {
    pub name: PoolName,
    pub description: String,
    /// Only fully specified quotas (guarantee, weight and maximum).
    pub quotas: BTreeMap<ResourceKind, ResourceQuota>,
    /// Kinds for which the pool declares a quota, complete or not.
    pub declared_quota_kinds: BTreeSet<ResourceKind>,
    pub platforms: BTreeMap<PlatformName, Platform>,
    pub default_platform: PlatformName,
    pub default_resources: ResourceSpecDto,
    pub default_variables: BTreeMap<String, String>,
    pub resource_validations: Vec<ValidationRule>,
    pub common_pod_template: Vec<Value>,
}

impl Pool {
    pub fn from_dto(dto: &PoolDto, cluster: &Cluster) -> Result<Self> {
        let mut quotas = BTreeMap::new();
        let mut declared_quota_kinds = BTreeSet::new();
        for (kind, quota_dto) in &dto.quotas {
            declared_quota_kinds.insert(*kind);
            match ResourceQuota::from_dto(*kind, quota_dto)? {
                Some(quota) => {
                    quotas.insert(*kind, quota);
                }
                None => log::warn!("Pool '{}' declares an incomplete {} quota; fair-share controls are disabled.", dto.name, kind),
            }
        }

        let mut platforms = BTreeMap::new();
        for platform_dto in &dto.platforms {
            let platform = Platform::from_dto(platform_dto, cluster, &dto.name)?;
            platforms.insert(platform.name.clone(), platform);
        }

        let default_platform = match &dto.default_platform {
            Some(name) => PlatformName::new(name.clone()),
            None => platforms
                .keys()
                .next()
                .cloned()
                .ok_or_else(|| Error::ModelConstructionError(format!("pool '{}' has no platforms", dto.name)))?,
        };
        if !platforms.contains_key(&default_platform) {
            return Err(Error::UnknownPlatformError { pool: dto.name.clone(), platform: default_platform.id });
        }

        Ok(Pool {
            name: PoolName::new(dto.name.clone()),
            description: dto.description.clone(),
            quotas,
            declared_quota_kinds,
            platforms,
            default_platform,
            default_resources: dto.default_resources.clone(),
            default_variables: dto.default_variables.clone(),
            resource_validations: dto.resource_validations.iter().map(ValidationRule::from).collect(),
            common_pod_template: dto.common_pod_template.clone(),
        })
    }

    pub fn platform(&self, name: &PlatformName) -> Result<&Platform> {
        self.platforms.get(name).ok_or_else(|| Error::UnknownPlatformError { pool: self.name.id.clone(), platform: name.id.clone() })
    }

    pub fn quota(&self, kind: ResourceKind) -> Option<&ResourceQuota> {
        self.quotas.get(&kind)
    }

    fn has_complete_quotas(&self) -> bool {
        self.declared_quota_kinds.len() == self.quotas.len()
    }
}

/// Every pool co-located on the cluster.
#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    pub pools: BTreeMap<PoolName, Pool>,
    pub default_pool: Option<PoolName>,
}

impl PoolRegistry {
    pub fn from_dto(pools: &[PoolDto], cluster: &Cluster, default_pool: Option<&str>) -> Result<Self> {
        let mut registry = PoolRegistry::default();
        for dto in pools {
            let pool = Pool::from_dto(dto, cluster)?;
            registry.pools.insert(pool.name.clone(), pool);
        }
        registry.default_pool = match default_pool {
            Some(name) => {
                let name = PoolName::new(name);
                if !registry.pools.contains_key(&name) {
                    return Err(Error::UnknownPoolError(name.id));
                }
                Some(name)
            }
            None => registry.pools.keys().next().cloned(),
        };
        Ok(registry)
    }

    pub fn get(&self, name: &PoolName) -> Result<&Pool> {
        self.pools.get(name).ok_or_else(|| Error::UnknownPoolError(name.id.clone()))
    }

    /// Resolves the pool a submission targets.
    pub fn resolve(&self, requested: Option<&str>) -> Result<&Pool> {
        match requested {
            Some(name) => self.get(&PoolName::new(name)),
            None => match &self.default_pool {
                Some(name) => self.get(name),
                None => Err(Error::UnknownPoolError("<default>".to_string())),
            },
        }
    }

    /// Kinds governed by fair-share quotas.
    ///
    /// Quotas only take effect when every pool defines guarantee, weight and maximum for the
    /// same set of kinds; otherwise the result is empty and no quota is enforced.
    pub fn governed_kinds(&self) -> BTreeSet<ResourceKind> {
        let mut pools = self.pools.values();
        let Some(first) = pools.next() else {
            return BTreeSet::new();
        };
        if !first.has_complete_quotas() {
            return BTreeSet::new();
        }
        let kinds = first.declared_quota_kinds.clone();
        for pool in pools {
            if !pool.has_complete_quotas() || pool.declared_quota_kinds != kinds {
                return BTreeSet::new();
            }
        }
        kinds
    }

    /// Preemption may cross pool boundaries only under consistent quotas.
    pub fn cross_pool_preemption_enabled(&self) -> bool {
        !self.governed_kinds().is_empty()
    }
}
