use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use slotmap::{SlotMap, new_key_type};

use crate::domain::resource::cluster::Cluster;
use crate::domain::resource::quantity::ResourceVector;
use crate::domain::utils::id::{GroupName, NodeName, PlatformName, PoolName, TaskKey, WorkflowId};
use crate::domain::workflow::workflow::Priority;

new_key_type! {
    pub struct ReservationId;
}

/// Where one task of a reservation runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub task: TaskKey,
    pub node: NodeName,
    pub platform: PlatformName,
    pub request: ResourceVector,
}

/// Resources held by one admitted gang.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub workflow: WorkflowId,
    pub group: GroupName,
    pub pool: PoolName,
    pub priority: Priority,
    pub preemptible: bool,
    pub reserved_at: i64,
    /// Commit order, the final tie-breaker between reservations.
    pub sequence: u64,
    pub placements: Vec<Placement>,
}

impl Reservation {
    pub fn total(&self) -> ResourceVector {
        self.placements.iter().fold(ResourceVector::ZERO, |acc, p| acc + p.request)
    }
}

/// Allocation of one pool, split by preemptibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolUsage {
    pub non_preemptible: ResourceVector,
    pub preemptible: ResourceVector,
}

impl PoolUsage {
    pub fn total(&self) -> ResourceVector {
        self.non_preemptible + self.preemptible
    }

    fn add(&mut self, preemptible: bool, amount: ResourceVector) {
        if preemptible {
            self.preemptible += amount;
        } else {
            self.non_preemptible += amount;
        }
    }

    fn sub(&mut self, preemptible: bool, amount: ResourceVector) {
        if preemptible {
            self.preemptible -= amount;
        } else {
            self.non_preemptible -= amount;
        }
    }
}

/// Everything the ledger tracks; only reachable through [`ResourceLedger::read`] and
/// [`ResourceLedger::write`], so a plan and its commit share one lock acquisition.
#[derive(Debug)]
pub struct LedgerState {
    capacity: BTreeMap<NodeName, ResourceVector>,
    free: BTreeMap<NodeName, ResourceVector>,
    reservations: SlotMap<ReservationId, Reservation>,
    task_index: BTreeMap<TaskKey, ReservationId>,
    usage: BTreeMap<PoolName, PoolUsage>,
    next_sequence: u64,
}

impl LedgerState {
    pub fn free(&self) -> &BTreeMap<NodeName, ResourceVector> {
        &self.free
    }

    pub fn cluster_capacity(&self) -> ResourceVector {
        self.capacity.values().fold(ResourceVector::ZERO, |acc, c| acc + *c)
    }

    pub fn free_capacity(&self) -> ResourceVector {
        self.free.values().fold(ResourceVector::ZERO, |acc, c| acc + *c)
    }

    pub fn usage(&self, pool: &PoolName) -> PoolUsage {
        self.usage.get(pool).copied().unwrap_or_default()
    }

    pub fn reservation(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.get(id)
    }

    pub fn reservations(&self) -> impl Iterator<Item = (ReservationId, &Reservation)> {
        self.reservations.iter()
    }

    pub fn reservation_of(&self, task: &TaskKey) -> Option<ReservationId> {
        self.task_index.get(task).copied()
    }

    /// Records a reservation and takes its resources off the nodes.
    ///
    /// Callers plan against [`LedgerState::free`] first; a placement that no longer fits is a
    /// logic error and is refused without touching the ledger.
    pub fn commit(&mut self, mut reservation: Reservation) -> Option<ReservationId> {
        let mut free = self.free.clone();
        for placement in &reservation.placements {
            let slot = free.get_mut(&placement.node)?;
            if !slot.fits(&placement.request) {
                return None;
            }
            *slot -= placement.request;
        }
        self.free = free;

        reservation.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.usage.entry(reservation.pool.clone()).or_default().add(reservation.preemptible, reservation.total());
        let tasks: Vec<TaskKey> = reservation.placements.iter().map(|p| p.task.clone()).collect();
        let id = self.reservations.insert(reservation);
        for task in tasks {
            self.task_index.insert(task, id);
        }
        Some(id)
    }

    /// Drops a whole reservation and returns its resources.
    pub fn release(&mut self, id: ReservationId) -> Option<Reservation> {
        let reservation = self.reservations.remove(id)?;
        for placement in &reservation.placements {
            self.give_back(placement);
            self.task_index.remove(&placement.task);
        }
        if let Some(usage) = self.usage.get_mut(&reservation.pool) {
            usage.sub(reservation.preemptible, reservation.total());
        }
        Some(reservation)
    }

    /// Returns the resources of a single finished task. The reservation disappears with its
    /// last placement.
    pub fn release_task(&mut self, task: &TaskKey) -> Option<Placement> {
        let id = self.task_index.remove(task)?;
        let reservation = self.reservations.get_mut(id)?;
        let index = reservation.placements.iter().position(|p| &p.task == task)?;
        let placement = reservation.placements.remove(index);
        let (pool, preemptible, empty) = (reservation.pool.clone(), reservation.preemptible, reservation.placements.is_empty());

        self.give_back(&placement);
        if let Some(usage) = self.usage.get_mut(&pool) {
            usage.sub(preemptible, placement.request);
        }
        if empty {
            self.reservations.remove(id);
        }
        Some(placement)
    }

    fn give_back(&mut self, placement: &Placement) {
        if let Some(slot) = self.free.get_mut(&placement.node) {
            *slot += placement.request;
        }
    }
}

/// Shared, lock-guarded resource ledger.
#[derive(Debug, Clone)]
pub struct ResourceLedger {
    inner: Arc<RwLock<LedgerState>>,
}

impl ResourceLedger {
    pub fn new(cluster: &Cluster) -> Self {
        let capacity: BTreeMap<NodeName, ResourceVector> = cluster.nodes.values().map(|n| (n.name.clone(), n.allocatable)).collect();
        Self {
            inner: Arc::new(RwLock::new(LedgerState {
                free: capacity.clone(),
                capacity,
                reservations: SlotMap::with_key(),
                task_index: BTreeMap::new(),
                usage: BTreeMap::new(),
                next_sequence: 0,
            })),
        }
    }

    /// Runs `f` against a consistent snapshot.
    pub fn read<R>(&self, f: impl FnOnce(&LedgerState) -> R) -> R {
        let guard = self.inner.read().expect("RwLock poisoned");
        f(&guard)
    }

    /// Runs `f` under the write lock; everything `f` does commits atomically.
    pub fn write<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        let mut guard = self.inner.write().expect("RwLock poisoned");
        f(&mut guard)
    }

    pub fn pool_usage(&self, pool: &PoolName) -> PoolUsage {
        self.read(|state| state.usage(pool))
    }

    pub fn free_capacity(&self) -> ResourceVector {
        self.read(|state| state.free_capacity())
    }

    pub fn reservation_of(&self, task: &TaskKey) -> Option<ReservationId> {
        self.read(|state| state.reservation_of(task))
    }

    pub fn release(&self, id: ReservationId) -> Option<Reservation> {
        self.write(|state| state.release(id))
    }

    pub fn release_task(&self, task: &TaskKey) -> Option<Placement> {
        self.write(|state| state.release_task(task))
    }
}
