use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::domain::utils::id::{GroupName, PoolName, TaskName, WorkflowId};
use crate::domain::workflow::workflow::Priority;

/// One schedulable unit waiting for admission: a barrier group, or one task of a
/// non-barrier group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub workflow: WorkflowId,
    pub group: GroupName,
    pub tasks: Vec<TaskName>,
    pub pool: PoolName,
    pub priority: Priority,
    /// When the unit entered the queue, in seconds.
    pub queued_at: i64,
    /// Workflow submission sequence and the unit's position inside the workflow.
    pub sequence: (u64, usize),
}

impl QueueEntry {
    fn fifo_cmp(&self, other: &QueueEntry) -> Ordering {
        self.queued_at.cmp(&other.queued_at).then_with(|| self.sequence.cmp(&other.sequence))
    }
}

type QueueKey = (PoolName, Priority);

/// Admission order for one scheduling pass.
///
/// Units are grouped into FIFO queues per (pool, priority). The next unit is the head with the
/// highest priority, then the lowest dominant share of its pool, then the oldest queue time. A
/// queue whose head was refused is blocked for the rest of the pass, so nothing overtakes it.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    queues: BTreeMap<QueueKey, VecDeque<QueueEntry>>,
    blocked: BTreeSet<QueueKey>,
}

impl AdmissionQueue {
    pub fn new(entries: impl IntoIterator<Item = QueueEntry>) -> Self {
        let mut queues: BTreeMap<QueueKey, Vec<QueueEntry>> = BTreeMap::new();
        for entry in entries {
            queues.entry((entry.pool.clone(), entry.priority)).or_default().push(entry);
        }
        let queues = queues
            .into_iter()
            .map(|(key, mut entries)| {
                entries.sort_by(QueueEntry::fifo_cmp);
                (key, VecDeque::from(entries))
            })
            .collect();
        AdmissionQueue { queues, blocked: BTreeSet::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|(key, queue)| queue.is_empty() || self.blocked.contains(key))
    }

    /// The next unit to try, given each pool's current dominant share.
    pub fn peek(&self, dominant_share: impl Fn(&PoolName) -> f64) -> Option<&QueueEntry> {
        self.queues
            .iter()
            .filter(|(key, _)| !self.blocked.contains(*key))
            .filter_map(|(_, queue)| queue.front())
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| dominant_share(&a.pool).total_cmp(&dominant_share(&b.pool)))
                    .then_with(|| a.fifo_cmp(b))
            })
    }

    /// Removes the head of `entry`'s queue after a successful admission.
    pub fn admitted(&mut self, entry: &QueueEntry) {
        if let Some(queue) = self.queues.get_mut(&(entry.pool.clone(), entry.priority)) {
            queue.pop_front();
        }
    }

    /// Blocks `entry`'s queue for the rest of the pass.
    pub fn refused(&mut self, entry: &QueueEntry) {
        self.blocked.insert((entry.pool.clone(), entry.priority));
    }
}

/// One admission lock per pool; admissions to the same pool never overlap.
#[derive(Debug, Clone, Default)]
pub struct AdmissionLocks {
    locks: Arc<Mutex<BTreeMap<PoolName, Arc<Mutex<()>>>>>,
}

impl AdmissionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self, pool: &PoolName) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("Mutex poisoned");
        locks.entry(pool.clone()).or_default().clone()
    }
}
