use std::collections::{BTreeMap, BTreeSet};

use crate::domain::resource::pool::PoolRegistry;
use crate::domain::resource::quantity::{ResourceKind, ResourceVector};
use crate::domain::scheduler::ledger::PoolUsage;
use crate::domain::utils::id::PoolName;

/// Splits `total` across `weights` proportionally in whole units.
///
/// Every pool gets the floor of its exact share; the units left over go one each to the pools
/// with the largest fractional remainders, ties broken by pool name.
pub fn largest_remainder(total: i64, weights: &[(PoolName, u32)]) -> BTreeMap<PoolName, i64> {
    let mut shares: BTreeMap<PoolName, i64> = weights.iter().map(|(pool, _)| (pool.clone(), 0)).collect();
    let weight_sum: i64 = weights.iter().map(|(_, w)| i64::from(*w)).sum();
    if total <= 0 || weight_sum == 0 {
        return shares;
    }

    let mut remainders: Vec<(i64, &PoolName)> = Vec::with_capacity(weights.len());
    let mut assigned = 0;
    for (pool, weight) in weights {
        let exact = i128::from(total) * i128::from(*weight);
        let floor = (exact / i128::from(weight_sum)) as i64;
        let remainder = (exact % i128::from(weight_sum)) as i64;
        shares.insert(pool.clone(), floor);
        assigned += floor;
        remainders.push((remainder, pool));
    }

    remainders.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    for (_, pool) in remainders.into_iter().take((total - assigned) as usize) {
        if let Some(share) = shares.get_mut(pool) {
            *share += 1;
        }
    }
    shares
}

/// Deserved quota of every pool for every governed resource kind.
///
/// `deserved = min(guarantee + weighted share of the contested capacity, maximum)`, where the
/// contested capacity is whatever the cluster holds beyond the sum of all guarantees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeservedQuotas {
    pub kinds: BTreeSet<ResourceKind>,
    pub by_pool: BTreeMap<PoolName, BTreeMap<ResourceKind, i64>>,
}

impl DeservedQuotas {
    pub fn compute(pools: &PoolRegistry, capacity: &ResourceVector) -> Self {
        let kinds = pools.governed_kinds();
        let mut by_pool: BTreeMap<PoolName, BTreeMap<ResourceKind, i64>> = BTreeMap::new();

        for kind in &kinds {
            let quotas: Vec<_> = pools.pools.values().filter_map(|p| p.quota(*kind).map(|q| (p.name.clone(), *q))).collect();
            let guaranteed: i64 = quotas.iter().map(|(_, q)| q.guarantee).sum();
            let contested = (capacity.get(*kind) - guaranteed).max(0);
            let weights: Vec<(PoolName, u32)> = quotas.iter().map(|(name, q)| (name.clone(), q.weight)).collect();
            let shares = largest_remainder(contested, &weights);

            for (name, quota) in &quotas {
                let fair = quota.guarantee + shares.get(name).copied().unwrap_or(0);
                let deserved = quota.maximum.map_or(fair, |max| fair.min(max));
                by_pool.entry(name.clone()).or_default().insert(*kind, deserved);
            }
        }
        log::debug!("Deserved quotas over {:?}: {:?}", kinds, by_pool);
        DeservedQuotas { kinds, by_pool }
    }

    pub fn is_enforced(&self) -> bool {
        !self.kinds.is_empty()
    }

    pub fn deserved(&self, pool: &PoolName, kind: ResourceKind) -> Option<i64> {
        self.by_pool.get(pool).and_then(|quotas| quotas.get(&kind)).copied()
    }

    /// First governed kind whose deserved quota `usage + request` would exceed.
    pub fn exceeded_by(&self, pool: &PoolName, usage: &PoolUsage, request: &ResourceVector) -> Option<ResourceKind> {
        self.kinds.iter().copied().find(|kind| match self.deserved(pool, *kind) {
            Some(deserved) => usage.non_preemptible.get(*kind) + request.get(*kind) > deserved,
            None => false,
        })
    }

    /// Largest ratio of non-preemptible usage to deserved quota over the governed kinds.
    ///
    /// Without quotas the ratio is taken against the cluster capacity instead.
    pub fn dominant_share(&self, pool: &PoolName, usage: &PoolUsage, capacity: &ResourceVector) -> f64 {
        let ratio = |used: i64, of: i64| if of > 0 { used as f64 / of as f64 } else if used > 0 { f64::INFINITY } else { 0.0 };
        if self.is_enforced() {
            self.kinds
                .iter()
                .map(|kind| ratio(usage.non_preemptible.get(*kind), self.deserved(pool, *kind).unwrap_or(0)))
                .fold(0.0, f64::max)
        } else {
            ResourceKind::ALL.iter().map(|kind| ratio(usage.total().get(*kind), capacity.get(*kind))).fold(0.0, f64::max)
        }
    }
}
