use std::fmt;

use crate::domain::resource::pool::PoolRegistry;
use crate::domain::resource::quantity::{ResourceKind, ResourceVector};
use crate::domain::scheduler::fair_share::DeservedQuotas;
use crate::domain::scheduler::ledger::{LedgerState, Placement, Reservation, ReservationId, ResourceLedger};
use crate::domain::scheduler::placement::{PlacementRequest, place};
use crate::domain::scheduler::preemption::{candidates, select_victims};
use crate::domain::scheduler::queue::AdmissionLocks;
use crate::domain::utils::id::{GroupName, NodeName, PoolName, WorkflowId};
use crate::domain::workflow::workflow::Priority;
use crate::error::Result;

/// An all-or-nothing request for resources.
#[derive(Debug, Clone, PartialEq)]
pub struct GangRequest {
    pub workflow: WorkflowId,
    pub group: GroupName,
    pub pool: PoolName,
    pub priority: Priority,
    pub tasks: Vec<PlacementRequest>,
}

impl GangRequest {
    pub fn total(&self) -> ResourceVector {
        self.tasks.iter().fold(ResourceVector::ZERO, |acc, t| acc + t.request)
    }

    pub fn preemptible(&self) -> bool {
        self.priority.is_preemptible()
    }
}

/// Why a unit stays pending. Never fatal; the unit is retried on the next pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingReason {
    InsufficientCapacity,
    PoolMaximumExceeded(ResourceKind),
    DeservedQuotaExceeded(ResourceKind),
}

impl fmt::Display for PendingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingReason::InsufficientCapacity => f.write_str("insufficient capacity"),
            PendingReason::PoolMaximumExceeded(kind) => write!(f, "pool maximum exceeded for {}", kind),
            PendingReason::DeservedQuotaExceeded(kind) => write!(f, "deserved quota exceeded for {}", kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted {
        reservation: ReservationId,
        placements: Vec<Placement>,
        /// Reservations released to make room, already gone from the ledger.
        preempted: Vec<Reservation>,
    },
    Pending(PendingReason),
}

/// Gang admission against the shared ledger.
#[derive(Debug, Clone)]
pub struct GangScheduler {
    ledger: ResourceLedger,
    locks: AdmissionLocks,
    quotas: DeservedQuotas,
    cross_pool_preemption: bool,
}

impl GangScheduler {
    pub fn new(pools: &PoolRegistry, ledger: ResourceLedger) -> Self {
        let capacity = ledger.read(|state| state.cluster_capacity());
        let quotas = DeservedQuotas::compute(pools, &capacity);
        let cross_pool_preemption = pools.cross_pool_preemption_enabled();
        if !quotas.is_enforced() {
            log::info!("Pool quotas are incomplete; deserved quotas and cross-pool preemption are disabled.");
        }
        Self { ledger, locks: AdmissionLocks::new(), quotas, cross_pool_preemption }
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn quotas(&self) -> &DeservedQuotas {
        &self.quotas
    }

    pub fn dominant_share(&self, pool: &PoolName) -> f64 {
        self.ledger.read(|state| self.quotas.dominant_share(pool, &state.usage(pool), &state.cluster_capacity()))
    }

    /// Tries to admit `request` at time `now`.
    ///
    /// Checks run in order: pool maximum (everything the pool holds), deserved quota
    /// (non-preemptible work only), placement on free capacity, and finally preemption of
    /// preemptible reservations. The plan and its commit share a single ledger lock.
    pub fn admit(&self, pools: &PoolRegistry, request: &GangRequest, now: i64) -> Result<Admission> {
        let pool = pools.get(&request.pool)?;
        let lock = self.locks.handle(&request.pool);
        let _guard = lock.lock().expect("Mutex poisoned");

        let admission = self.ledger.write(|state| {
            let usage = state.usage(&request.pool);
            let total = request.total();

            for kind in ResourceKind::ALL {
                if let Some(maximum) = pool.quota(kind).and_then(|q| q.maximum) {
                    if usage.total().get(kind) + total.get(kind) > maximum {
                        return Admission::Pending(PendingReason::PoolMaximumExceeded(kind));
                    }
                }
            }

            if !request.preemptible() {
                if let Some(kind) = self.quotas.exceeded_by(&request.pool, &usage, &total) {
                    return Admission::Pending(PendingReason::DeservedQuotaExceeded(kind));
                }
            }

            if let Some(nodes) = place(&request.tasks, state.free()) {
                return Self::commit(state, request, nodes, Vec::new(), now);
            }

            if request.preemptible() {
                return Admission::Pending(PendingReason::InsufficientCapacity);
            }
            let ordered = candidates(state, &request.pool, self.cross_pool_preemption);
            let Some(victims) = select_victims(state, &request.tasks, &ordered) else {
                return Admission::Pending(PendingReason::InsufficientCapacity);
            };
            let preempted: Vec<Reservation> = victims.into_iter().filter_map(|id| state.release(id)).collect();
            match place(&request.tasks, state.free()) {
                Some(nodes) => Self::commit(state, request, nodes, preempted, now),
                None => {
                    log::error!("Placement for {}/{} failed after preemption; restoring victims.", request.workflow, request.group);
                    for victim in preempted {
                        state.commit(victim);
                    }
                    Admission::Pending(PendingReason::InsufficientCapacity)
                }
            }
        });

        match &admission {
            Admission::Admitted { preempted, .. } => {
                log::debug!("Admitted {}/{} in pool '{}' ({} preempted).", request.workflow, request.group, request.pool, preempted.len())
            }
            Admission::Pending(reason) => log::debug!("{}/{} stays pending: {}.", request.workflow, request.group, reason),
        }
        Ok(admission)
    }

    fn commit(state: &mut LedgerState, request: &GangRequest, nodes: Vec<NodeName>, preempted: Vec<Reservation>, now: i64) -> Admission {
        let placements: Vec<Placement> = request
            .tasks
            .iter()
            .zip(nodes)
            .map(|(task, node)| Placement { task: task.task.clone(), node, platform: task.platform.clone(), request: task.request })
            .collect();
        let reservation = Reservation {
            workflow: request.workflow.clone(),
            group: request.group.clone(),
            pool: request.pool.clone(),
            priority: request.priority,
            preemptible: request.preemptible(),
            reserved_at: now,
            sequence: 0,
            placements: placements.clone(),
        };
        match state.commit(reservation) {
            Some(id) => Admission::Admitted { reservation: id, placements, preempted },
            None => Admission::Pending(PendingReason::InsufficientCapacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::engine_dto::EngineConfigDto;
    use crate::domain::resource::cluster::Cluster;
    use crate::domain::utils::id::{PlatformName, TaskKey};
    use serde_json::json;

    /// Two 8-GPU nodes shared by pools `a` (guarantee 4, weight 1, maximum 10) and
    /// `b` (guarantee 4, weight 1, unlimited).
    fn setup() -> (PoolRegistry, GangScheduler) {
        let pool = |name: &str, maximum: i64| {
            json!({
                "name": name,
                "quotas": {"gpu": {"guarantee": 4, "weight": 1, "maximum": maximum}},
                "platforms": [{"name": "dgx", "nodes": ["n0", "n1"]}]
            })
        };
        let config: EngineConfigDto = serde_json::from_value(json!({
            "nodes": [
                {"name": "n0", "cpu": 64, "memory": "512Gi", "gpu": 8},
                {"name": "n1", "cpu": 64, "memory": "512Gi", "gpu": 8}
            ],
            "pools": [pool("a", 10), pool("b", -1)]
        }))
        .unwrap();
        let cluster = Cluster::from_dto(&config.nodes).unwrap();
        let pools = PoolRegistry::from_dto(&config.pools, &cluster, None).unwrap();
        let scheduler = GangScheduler::new(&pools, ResourceLedger::new(&cluster));
        (pools, scheduler)
    }

    fn gang(pool: &str, name: &str, priority: Priority, gpus: &[i64]) -> GangRequest {
        let workflow = WorkflowId::new(format!("{}-1", name));
        GangRequest {
            workflow: workflow.clone(),
            group: GroupName::new(name),
            pool: PoolName::new(pool),
            priority,
            tasks: gpus
                .iter()
                .enumerate()
                .map(|(i, gpu)| PlacementRequest {
                    task: TaskKey::new(workflow.clone(), format!("{}-{}", name, i).as_str().into()),
                    platform: PlatformName::new("dgx"),
                    candidates: vec![NodeName::new("n0"), NodeName::new("n1")],
                    request: ResourceVector::gpus(*gpu),
                })
                .collect(),
        }
    }

    #[test]
    fn deserved_quota_caps_non_preemptible_work() {
        let (pools, scheduler) = setup();
        assert_eq!(scheduler.quotas().deserved(&PoolName::new("a"), ResourceKind::Gpu), Some(8));

        let admission = scheduler.admit(&pools, &gang("a", "big", Priority::Normal, &[4, 4]), 0).unwrap();
        assert!(matches!(admission, Admission::Admitted { .. }));

        let admission = scheduler.admit(&pools, &gang("a", "more", Priority::High, &[1]), 1).unwrap();
        assert_eq!(admission, Admission::Pending(PendingReason::DeservedQuotaExceeded(ResourceKind::Gpu)));

        let admission = scheduler.admit(&pools, &gang("a", "spare", Priority::Low, &[2]), 2).unwrap();
        assert!(matches!(admission, Admission::Admitted { .. }));
    }

    #[test]
    fn pool_maximum_covers_preemptible_work() {
        let (pools, scheduler) = setup();
        scheduler.admit(&pools, &gang("a", "x", Priority::Low, &[8]), 0).unwrap();
        let admission = scheduler.admit(&pools, &gang("a", "y", Priority::Low, &[3]), 1).unwrap();
        assert_eq!(admission, Admission::Pending(PendingReason::PoolMaximumExceeded(ResourceKind::Gpu)));
    }

    #[test]
    fn barrier_gang_is_all_or_nothing() {
        let (pools, scheduler) = setup();
        scheduler.admit(&pools, &gang("b", "fill", Priority::Low, &[6]), 0).unwrap();
        let before = scheduler.ledger().free_capacity();

        let admission = scheduler.admit(&pools, &gang("b", "wide", Priority::Low, &[8, 4]), 1).unwrap();
        assert_eq!(admission, Admission::Pending(PendingReason::InsufficientCapacity));
        assert_eq!(scheduler.ledger().free_capacity(), before);
    }

    #[test]
    fn non_preemptible_work_reclaims_preemptible_capacity() {
        let (pools, scheduler) = setup();
        scheduler.admit(&pools, &gang("a", "low1", Priority::Low, &[5]), 0).unwrap();
        scheduler.admit(&pools, &gang("a", "low2", Priority::Low, &[5]), 1).unwrap();
        scheduler.admit(&pools, &gang("b", "fill", Priority::Normal, &[3]), 2).unwrap();

        let admission = scheduler.admit(&pools, &gang("b", "need", Priority::Normal, &[4]), 3).unwrap();
        match admission {
            Admission::Admitted { preempted, .. } => {
                assert_eq!(preempted.len(), 1);
                assert_eq!(preempted[0].group, GroupName::new("low1"));
            }
            other => panic!("expected admission, got {:?}", other),
        }
        assert_eq!(scheduler.ledger().pool_usage(&PoolName::new("a")).preemptible.gpu, 5);
        assert_eq!(scheduler.ledger().pool_usage(&PoolName::new("b")).non_preemptible.gpu, 7);
    }

    #[test]
    fn preemptible_work_never_preempts() {
        let (pools, scheduler) = setup();
        scheduler.admit(&pools, &gang("a", "low1", Priority::Low, &[8]), 0).unwrap();
        scheduler.admit(&pools, &gang("b", "low2", Priority::Low, &[8]), 1).unwrap();
        let admission = scheduler.admit(&pools, &gang("b", "low3", Priority::Low, &[1]), 2).unwrap();
        assert_eq!(admission, Admission::Pending(PendingReason::InsufficientCapacity));
    }
}
