use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::api::engine_dto::EngineConfigDto;
use crate::api::workflow_dto::workflow_dto::WorkflowSpecDto;
use crate::domain::aggregator;
use crate::domain::engine::backend::{ClusterBackend, NullBackend};
use crate::domain::engine::event::{EventStatus, LogStatusListener, StatusEvent, StatusListener};
use crate::domain::engine::settings::EngineSettings;
use crate::domain::lifecycle::state_machine::{TaskEvent, TaskLifecycle, Transition};
use crate::domain::lifecycle::status::{EXIT_START_ERROR, EXIT_UNKNOWN, TaskStatus, WorkflowStatus, resolve_exit_code};
use crate::domain::pod::builder::PodSpecBuilder;
use crate::domain::resource::cluster::Cluster;
use crate::domain::resource::pool::PoolRegistry;
use crate::domain::scheduler::gang::{Admission, GangRequest, GangScheduler, PendingReason};
use crate::domain::scheduler::ledger::{Placement, Reservation, ResourceLedger};
use crate::domain::scheduler::placement::PlacementRequest;
use crate::domain::scheduler::queue::{AdmissionQueue, QueueEntry};
use crate::domain::simulator::simulator::SystemSimulator;
use crate::domain::utils::id::{GroupName, TaskKey, TaskName, WorkflowId};
use crate::domain::workflow::group::GroupSpec;
use crate::domain::workflow::workflow::WorkflowSpec;
use crate::error::{Error, Result};

/// Runtime state of one submitted workflow.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub spec: WorkflowSpec,
    pub tasks: BTreeMap<TaskName, TaskLifecycle>,
    pub status: WorkflowStatus,
    pub submitted_at: i64,
    pub finished_at: Option<i64>,
    /// Retries spent by all tasks together.
    pub job_retries: u32,
    sequence: u64,
    /// Groups whose upstream tasks have completed.
    released: BTreeSet<GroupName>,
    cancel_requested_at: Option<i64>,
}

impl WorkflowRun {
    pub fn task(&self, name: &TaskName) -> Result<&TaskLifecycle> {
        self.tasks.get(name).ok_or_else(|| Error::UnknownTaskError(format!("{}/{}", self.spec.id, name)))
    }

    pub fn statuses(&self) -> BTreeMap<TaskName, TaskStatus> {
        self.tasks.iter().map(|(name, lifecycle)| (name.clone(), lifecycle.status)).collect()
    }

    pub fn group_status(&self, group: &GroupName) -> Option<TaskStatus> {
        self.spec.group(group).map(|g| aggregator::group_status(g, &self.statuses()))
    }

    pub fn is_canceling(&self) -> bool {
        self.cancel_requested_at.is_some()
    }

    fn completed_tasks(&self) -> BTreeSet<TaskName> {
        self.tasks.iter().filter(|(_, l)| l.status == TaskStatus::Completed).map(|(name, _)| name.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmittedUnit {
    pub workflow: WorkflowId,
    pub group: GroupName,
    pub placements: Vec<Placement>,
}

#[derive(Debug, Clone)]
pub struct PendingUnit {
    pub workflow: WorkflowId,
    pub group: GroupName,
    pub tasks: Vec<TaskName>,
    pub reason: PendingReason,
}

/// Outcome of one scheduling pass.
#[derive(Debug, Clone, Default)]
pub struct ScheduleReport {
    pub admitted: Vec<AdmittedUnit>,
    pub pending: Vec<PendingUnit>,
    pub preempted: Vec<TaskKey>,
}

/// Drives submitted workflows from submission to a terminal status.
///
/// The engine owns every workflow's runtime state; the resource ledger is shared with the
/// gang scheduler. Time comes from the injected simulator, pod outcomes arrive through
/// [`WorkflowEngine::task_started`], [`WorkflowEngine::task_exited`] and
/// [`WorkflowEngine::task_evicted`].
#[derive(Debug)]
pub struct WorkflowEngine {
    settings: EngineSettings,
    cluster: Cluster,
    pools: PoolRegistry,
    scheduler: GangScheduler,
    simulator: Arc<dyn SystemSimulator>,
    backend: Arc<dyn ClusterBackend>,
    listeners: Vec<Arc<dyn StatusListener>>,
    workflows: BTreeMap<WorkflowId, WorkflowRun>,
    name_counters: BTreeMap<String, u64>,
    next_sequence: u64,
}

impl WorkflowEngine {
    pub fn from_dto(config: &EngineConfigDto, simulator: Arc<dyn SystemSimulator>) -> Result<Self> {
        // Phase 1: Settings
        let settings = EngineSettings::from_dto(&config.engine)?;

        // Phase 2: Cluster and pools
        let cluster = Cluster::from_dto(&config.nodes)?;
        let pools = PoolRegistry::from_dto(&config.pools, &cluster, settings.default_pool.as_deref())?;
        log::info!("Cluster has {} nodes shared by {} pools.", cluster.nodes.len(), pools.pools.len());

        // Phase 3: Scheduler on an empty ledger
        let scheduler = GangScheduler::new(&pools, ResourceLedger::new(&cluster));

        Ok(WorkflowEngine {
            settings,
            cluster,
            pools,
            scheduler,
            simulator,
            backend: Arc::new(NullBackend),
            listeners: vec![Arc::new(LogStatusListener)],
            workflows: BTreeMap::new(),
            name_counters: BTreeMap::new(),
            next_sequence: 0,
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn ClusterBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn StatusListener>) {
        self.listeners.push(listener);
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn ledger(&self) -> &ResourceLedger {
        self.scheduler.ledger()
    }

    fn now(&self) -> i64 {
        self.simulator.get_current_time_in_s()
    }

    pub fn workflow(&self, id: &WorkflowId) -> Result<&WorkflowRun> {
        self.workflows.get(id).ok_or_else(|| Error::UnknownWorkflowError(id.id.clone()))
    }

    pub fn workflows(&self) -> impl Iterator<Item = &WorkflowRun> {
        self.workflows.values()
    }

    pub fn status(&self, id: &WorkflowId) -> Result<WorkflowStatus> {
        Ok(self.workflow(id)?.status)
    }

    pub fn task(&self, id: &WorkflowId, task: &str) -> Result<&TaskLifecycle> {
        self.workflow(id)?.task(&TaskName::new(task))
    }

    pub fn group_status(&self, id: &WorkflowId, group: &str) -> Result<TaskStatus> {
        self.workflow(id)?.group_status(&GroupName::new(group)).ok_or_else(|| Error::UnknownTaskError(format!("{}/{}", id, group)))
    }

    /// Every live reservation, oldest first.
    pub fn reservations(&self) -> Vec<Reservation> {
        let mut reservations: Vec<Reservation> = self.ledger().read(|state| state.reservations().map(|(_, r)| r.clone()).collect());
        reservations.sort_by_key(|r| r.sequence);
        reservations
    }

    fn status_of(&self, workflow: &WorkflowId, task: &TaskName) -> Result<TaskStatus> {
        Ok(self.workflow(workflow)?.task(task)?.status)
    }

    /// Validates and registers a workflow. Returns its id `<name>-<n>`.
    ///
    /// A rejected submission leaves no trace: no id is consumed and nothing is queued.
    pub fn submit(&mut self, dto: &WorkflowSpecDto) -> Result<WorkflowId> {
        let now = self.now();
        let n = self.name_counters.get(&dto.name).copied().unwrap_or(0) + 1;
        let id = WorkflowId::new(format!("{}-{}", dto.name, n));

        let spec = match WorkflowSpec::from_dto(dto, id.clone(), &self.pools, &self.cluster) {
            Ok(spec) => spec,
            Err(e) => {
                log::warn!("Rejected workflow '{}': {}", dto.name, e);
                return Err(e);
            }
        };
        self.name_counters.insert(dto.name.clone(), n);

        let tasks = spec.tasks.keys().map(|name| (name.clone(), TaskLifecycle::new(name.as_str()))).collect();
        log::info!(
            "Workflow '{}' submitted to pool '{}' ({} priority, {} groups, {} tasks).",
            id,
            spec.pool,
            spec.priority,
            spec.groups.len(),
            spec.tasks.len()
        );
        let run = WorkflowRun {
            spec,
            tasks,
            status: WorkflowStatus::Pending,
            submitted_at: now,
            finished_at: None,
            job_retries: 0,
            sequence: self.next_sequence,
            released: BTreeSet::new(),
            cancel_requested_at: None,
        };
        self.next_sequence += 1;
        self.workflows.insert(id.clone(), run);

        self.emit_workflow(&id, WorkflowStatus::Pending, None);
        self.release_ready(&id, now);
        Ok(id)
    }

    /// Queues every group whose upstream tasks have all completed.
    fn release_ready(&mut self, workflow: &WorkflowId, now: i64) {
        let Some(run) = self.workflows.get_mut(workflow) else {
            return;
        };
        if run.is_canceling() {
            return;
        }
        let ready = run.spec.graph.ready_units(&run.completed_tasks());
        for group in ready {
            if !run.released.insert(group.clone()) {
                continue;
            }
            let Some(spec) = run.spec.group(&group) else {
                continue;
            };
            for task in &spec.tasks {
                if let Some(lifecycle) = run.tasks.get_mut(task) {
                    if lifecycle.status == TaskStatus::Pending && lifecycle.queued_at.is_none() {
                        lifecycle.queued_at = Some(now);
                    }
                }
            }
            log::debug!("Group {}/{} is ready for scheduling.", workflow, group);
        }
    }

    /// One periodic step: timeouts, archiving, then a scheduling pass.
    pub fn tick(&mut self) -> Result<ScheduleReport> {
        self.check_timeouts()?;
        self.archive_finished();
        self.schedule()
    }

    /// One admission pass over every queued unit.
    pub fn schedule(&mut self) -> Result<ScheduleReport> {
        let now = self.now();
        let mut queue = AdmissionQueue::new(self.queue_entries());
        let mut report = ScheduleReport::default();

        loop {
            let scheduler = &self.scheduler;
            let Some(entry) = queue.peek(|pool| scheduler.dominant_share(pool)).cloned() else {
                break;
            };
            let request = self.gang_request(&entry)?;

            match self.scheduler.admit(&self.pools, &request, now)? {
                Admission::Admitted { placements, preempted, .. } => {
                    queue.admitted(&entry);
                    report.preempted.extend(self.preempt(preempted)?);
                    self.launch(&entry.workflow, &entry.group, &placements)?;
                    report.admitted.push(AdmittedUnit { workflow: entry.workflow.clone(), group: entry.group.clone(), placements });
                }
                Admission::Pending(reason) => {
                    queue.refused(&entry);
                    report.pending.push(PendingUnit { workflow: entry.workflow, group: entry.group, tasks: entry.tasks, reason });
                }
            }
        }

        if !report.admitted.is_empty() || !report.preempted.is_empty() {
            log::info!(
                "Scheduling pass: {} admitted, {} pending, {} preempted.",
                report.admitted.len(),
                report.pending.len(),
                report.preempted.len()
            );
        }
        Ok(report)
    }

    /// Schedulable units of every live workflow: a barrier group's waiting members together,
    /// or each waiting task of a non-barrier group on its own.
    fn queue_entries(&self) -> Vec<QueueEntry> {
        let mut entries = Vec::new();
        for run in self.workflows.values().filter(|r| !r.is_canceling() && !r.status.is_terminal()) {
            let mut position = 0;
            for group in &run.spec.groups {
                let base = position;
                position += group.tasks.len();
                if !run.released.contains(&group.name) {
                    continue;
                }

                let waiting: Vec<(usize, &TaskName, i64)> = group
                    .tasks
                    .iter()
                    .enumerate()
                    .filter_map(|(i, name)| {
                        let lifecycle = run.tasks.get(name)?;
                        match (lifecycle.status, lifecycle.queued_at) {
                            (TaskStatus::Pending, Some(at)) => Some((base + i, name, at)),
                            _ => None,
                        }
                    })
                    .collect();
                if waiting.is_empty() {
                    continue;
                }

                let entry = |tasks: Vec<TaskName>, queued_at: i64, position: usize| QueueEntry {
                    workflow: run.spec.id.clone(),
                    group: group.name.clone(),
                    tasks,
                    pool: run.spec.pool.clone(),
                    priority: run.spec.priority,
                    queued_at,
                    sequence: (run.sequence, position),
                };
                if group.barrier {
                    let queued_at = waiting.iter().map(|(_, _, at)| *at).min().unwrap_or_default();
                    entries.push(entry(waiting.iter().map(|(_, name, _)| (*name).clone()).collect(), queued_at, waiting[0].0));
                } else {
                    entries.extend(waiting.into_iter().map(|(pos, name, at)| entry(vec![name.clone()], at, pos)));
                }
            }
        }
        entries
    }

    fn gang_request(&self, entry: &QueueEntry) -> Result<GangRequest> {
        let run = self.workflow(&entry.workflow)?;
        let pool = self.pools.get(&entry.pool)?;
        let tasks = entry
            .tasks
            .iter()
            .map(|name| -> Result<PlacementRequest> {
                let task = run.spec.task(name)?;
                let platform = pool.platform(&task.resources.platform)?;
                Ok(PlacementRequest {
                    task: TaskKey::new(entry.workflow.clone(), name.clone()),
                    platform: platform.name.clone(),
                    candidates: platform.nodes.iter().filter(|node| !task.resources.nodes_excluded.contains(node)).cloned().collect(),
                    request: task.resources.request,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(GangRequest {
            workflow: entry.workflow.clone(),
            group: entry.group.clone(),
            pool: entry.pool.clone(),
            priority: entry.priority,
            tasks,
        })
    }

    /// Moves an admitted gang to READY and hands its pods to the backend. A pod that cannot be
    /// built or launched exits with the start-error code.
    fn launch(&mut self, workflow: &WorkflowId, group: &GroupName, placements: &[Placement]) -> Result<()> {
        for placement in placements {
            let event = TaskEvent::Reserve { node: placement.node.clone(), platform: placement.platform.clone() };
            self.apply(workflow, &placement.task.task, event)?;
        }

        let mut failed = Vec::new();
        for placement in placements {
            let launched = {
                let run = self.workflow(workflow)?;
                let pool = self.pools.get(&run.spec.pool)?;
                PodSpecBuilder::new(pool, &self.cluster)
                    .build(workflow, group, run.spec.task(&placement.task.task)?, &placement.node)
                    .and_then(|spec| self.backend.launch(&spec))
            };
            if let Err(e) = launched {
                log::error!("Failed to launch {}: {}", placement.task, e);
                failed.push(placement.task.task.clone());
            }
        }
        for task in failed {
            self.handle_exit(workflow, &task, EXIT_START_ERROR)?;
        }
        Ok(())
    }

    /// Stops the tasks of reservations the scheduler already released, and requeues them.
    fn preempt(&mut self, victims: Vec<Reservation>) -> Result<Vec<TaskKey>> {
        let mut transitions = Vec::new();
        for victim in &victims {
            log::info!("Preempting {}/{} (pool '{}', {} tasks).", victim.workflow, victim.group, victim.pool, victim.placements.len());
            for placement in &victim.placements {
                let key = &placement.task;
                if !self.status_of(&key.workflow, &key.task)?.holds_resources() {
                    continue;
                }
                self.terminate_pod(key);
                let transition = self.apply(&key.workflow, &key.task, TaskEvent::Preempt)?;
                transitions.push((key.clone(), transition));
            }
        }
        let mut preempted = Vec::with_capacity(transitions.len());
        for (key, transition) in transitions {
            self.settle(&key.workflow, &key.task, transition)?;
            preempted.push(key);
        }
        Ok(preempted)
    }

    /// The container of `task` is up. The task runs once every member of its reservation is up.
    pub fn task_started(&mut self, workflow: &WorkflowId, task: &str) -> Result<()> {
        let task = TaskName::new(task);
        if self.status_of(workflow, &task)? != TaskStatus::Ready {
            log::debug!("Ignoring start report of {}/{}; it is not waiting to start.", workflow, task);
            return Ok(());
        }
        self.apply(workflow, &task, TaskEvent::ContainerStarted)?;

        let key = TaskKey::new(workflow.clone(), task.clone());
        let mut gang = self.gang_of(&key);
        if gang.is_empty() {
            gang.push(task);
        }
        let run = self.workflow(workflow)?;
        let all_started = gang.iter().all(|name| run.tasks.get(name).is_some_and(|l| l.container_started));
        if !all_started {
            return Ok(());
        }
        for name in gang {
            if self.status_of(workflow, &name)? == TaskStatus::Ready {
                self.apply(workflow, &name, TaskEvent::Start)?;
            }
        }
        self.refresh_status(workflow);
        Ok(())
    }

    /// The container of `task` exited. When several codes are reported the highest wins.
    pub fn task_exited(&mut self, workflow: &WorkflowId, task: &str, codes: &[i32]) -> Result<()> {
        let code = resolve_exit_code(codes).unwrap_or(EXIT_UNKNOWN);
        self.handle_exit(workflow, &TaskName::new(task), code)
    }

    pub fn task_evicted(&mut self, workflow: &WorkflowId, task: &str) -> Result<()> {
        let task = TaskName::new(task);
        if !self.status_of(workflow, &task)?.holds_resources() {
            log::debug!("Ignoring eviction of {}/{}; it holds no resources.", workflow, task);
            return Ok(());
        }
        let transition = self.apply(workflow, &task, TaskEvent::Evict)?;
        self.settle(workflow, &task, transition)
    }

    fn handle_exit(&mut self, workflow: &WorkflowId, task: &TaskName, code: i32) -> Result<()> {
        let run = self.workflow(workflow)?;
        let status = run.task(task)?.status;
        if !status.holds_resources() {
            log::debug!("Ignoring exit {} of {}/{} while {}.", code, workflow, task, status);
            return Ok(());
        }
        let event = if run.is_canceling() { TaskEvent::Cancel { exit_code: Some(code) } } else { TaskEvent::Exit { code } };
        let transition = self.apply(workflow, task, event)?;
        self.settle(workflow, task, transition)
    }

    /// Applies `event` to one task and reports the change.
    fn apply(&mut self, workflow: &WorkflowId, task: &TaskName, event: TaskEvent) -> Result<Transition> {
        let now = self.now();
        let run = self.workflows.get_mut(workflow).ok_or_else(|| Error::UnknownWorkflowError(workflow.id.clone()))?;
        let policy = self.settings.retry_policy(&run.spec);
        let exit_actions = &run.spec.task(task)?.exit_actions;
        let job_retries = run.job_retries;
        let lifecycle = run.tasks.get_mut(task).ok_or_else(|| Error::UnknownTaskError(format!("{}/{}", workflow, task)))?;

        let transition = lifecycle.apply(event, now, &policy, exit_actions, job_retries)?;
        let status_event = StatusEvent {
            timestamp: now,
            workflow_id: workflow.clone(),
            group: run.spec.graph.group_of(task).cloned(),
            task: Some(task.clone()),
            status: EventStatus::Task(transition.to),
            exit_code: lifecycle.exit_code,
            reason: lifecycle.reason.clone(),
        };
        if transition.retried {
            run.job_retries += 1;
        }
        if transition.changed() {
            self.emit(&status_event);
        }
        Ok(transition)
    }

    /// Follow-up of a transition: returns resources, requeues rescheduled work, handles the
    /// siblings, releases downstream groups and fails fast.
    fn settle(&mut self, workflow: &WorkflowId, task: &TaskName, transition: Transition) -> Result<()> {
        let key = TaskKey::new(workflow.clone(), task.clone());
        let gang = self.gang_of(&key);
        if transition.from.holds_resources() && !transition.to.holds_resources() {
            self.ledger().release_task(&key);
        }

        let (group, canceling) = {
            let run = self.workflow(workflow)?;
            let group = run.spec.group_of(task).cloned().ok_or_else(|| Error::UnknownTaskError(key.to_string()))?;
            (group, run.is_canceling())
        };
        if canceling {
            // A canceled workflow never requeues; work pushed off its node ends here.
            if matches!(transition.to, TaskStatus::RescheduleRequested | TaskStatus::Evicted | TaskStatus::Preempted) {
                self.apply(workflow, task, TaskEvent::Cancel { exit_code: None })?;
            }
            self.refresh_status(workflow);
            return Ok(());
        }

        // Members of the same reservation cannot start without this one.
        if transition.from == TaskStatus::Ready && !transition.to.holds_resources() {
            for sibling in gang.iter().filter(|name| *name != task) {
                if self.status_of(workflow, sibling)? == TaskStatus::Ready {
                    self.restart(workflow, sibling)?;
                }
            }
        }

        match transition.to {
            TaskStatus::RescheduleRequested | TaskStatus::Evicted | TaskStatus::Preempted => {
                if !group.ignore_nonlead_status {
                    for sibling in group.tasks.iter().filter(|name| *name != task) {
                        if self.status_of(workflow, sibling)?.holds_resources() {
                            self.restart(workflow, sibling)?;
                        }
                    }
                }
                self.apply(workflow, task, TaskEvent::Requeue)?;
            }
            status if status.is_terminal() => {
                let mut ended = vec![task.clone()];
                if group.ignore_nonlead_status && group.is_lead(task) {
                    for sibling in group.tasks.iter().filter(|name| *name != task) {
                        if !self.status_of(workflow, sibling)?.is_terminal() {
                            self.terminate(workflow, sibling)?;
                            ended.push(sibling.clone());
                        }
                    }
                }
                if status == TaskStatus::Completed {
                    let now = self.now();
                    self.release_ready(workflow, now);
                }
                let group_status = aggregator::group_status(&group, &self.workflow(workflow)?.statuses());
                if group_status.is_failure() {
                    self.fail_fast(workflow, &group, group_status)?;
                } else {
                    self.fail_consumers(workflow, &ended)?;
                }
            }
            _ => {}
        }

        self.refresh_status(workflow);
        Ok(())
    }

    /// Tasks of the workflow sharing `key`'s reservation, `key` included.
    fn gang_of(&self, key: &TaskKey) -> Vec<TaskName> {
        self.ledger().read(|state| {
            state
                .reservation_of(key)
                .and_then(|id| state.reservation(id))
                .map(|r| r.placements.iter().filter(|p| p.task.workflow == key.workflow).map(|p| p.task.task.clone()).collect())
                .unwrap_or_default()
        })
    }

    fn terminate_pod(&self, key: &TaskKey) {
        if let Err(e) = self.backend.terminate(key) {
            log::error!("Failed to terminate {}: {}", key, e);
        }
    }

    /// Gives back whatever `task` holds, stopping its pod if one may be up.
    fn stop(&mut self, workflow: &WorkflowId, task: &TaskName) -> Result<()> {
        let key = TaskKey::new(workflow.clone(), task.clone());
        let lifecycle = self.workflow(workflow)?.task(task)?;
        if lifecycle.status.holds_resources() {
            if lifecycle.status == TaskStatus::Running || lifecycle.container_started {
                self.terminate_pod(&key);
            }
            self.ledger().release_task(&key);
        }
        Ok(())
    }

    /// Sends a sibling back to the queue without charging its retry budget.
    fn restart(&mut self, workflow: &WorkflowId, task: &TaskName) -> Result<()> {
        self.stop(workflow, task)?;
        self.apply(workflow, task, TaskEvent::Restart)?;
        self.apply(workflow, task, TaskEvent::Requeue)?;
        Ok(())
    }

    /// Ends a task immediately as `FAILED_CANCELED`.
    fn terminate(&mut self, workflow: &WorkflowId, task: &TaskName) -> Result<()> {
        self.stop(workflow, task)?;
        self.apply(workflow, task, TaskEvent::Cancel { exit_code: None })?;
        Ok(())
    }

    /// Marks everything depending on `group` as `FAILED_UPSTREAM` and cancels the rest.
    fn fail_fast(&mut self, workflow: &WorkflowId, group: &GroupSpec, status: TaskStatus) -> Result<()> {
        log::warn!("Group {}/{} ended {}; failing the workflow fast.", workflow, group.name, status);
        self.fail_downstream(workflow, group.tasks.iter())?;
        self.begin_cancel(workflow)
    }

    /// Marks the waiting consumers of every task in `tasks` that ended without completing as
    /// `FAILED_UPSTREAM`. The rest of the workflow carries on.
    fn fail_consumers(&mut self, workflow: &WorkflowId, tasks: &[TaskName]) -> Result<()> {
        let failed: Vec<TaskName> = {
            let run = self.workflow(workflow)?;
            tasks
                .iter()
                .filter(|task| run.tasks.get(*task).is_some_and(|l| l.status.is_terminal() && l.status != TaskStatus::Completed))
                .cloned()
                .collect()
        };
        let doomed = self.fail_downstream(workflow, failed.iter())?;
        if doomed > 0 {
            log::warn!("{} tasks of workflow '{}' lost an input and will not run.", doomed, workflow);
        }
        Ok(())
    }

    /// Fails every pending task downstream of `tasks`. Returns how many were failed.
    fn fail_downstream<'a>(&mut self, workflow: &WorkflowId, tasks: impl Iterator<Item = &'a TaskName>) -> Result<usize> {
        let doomed: Vec<TaskName> = {
            let run = self.workflow(workflow)?;
            let downstream: BTreeSet<GroupName> = tasks.flat_map(|task| run.spec.graph.downstream_of_task(task)).collect();
            downstream
                .iter()
                .filter_map(|name| run.spec.group(name))
                .flat_map(|g| g.tasks.iter())
                .filter(|task| run.tasks.get(*task).is_some_and(|l| l.status == TaskStatus::Pending))
                .cloned()
                .collect()
        };
        for task in &doomed {
            self.apply(workflow, task, TaskEvent::UpstreamFailed)?;
        }
        Ok(doomed.len())
    }

    /// Cancels a workflow.
    ///
    /// Nothing more is admitted. Pending and reserved tasks end at once; running tasks are
    /// asked to terminate and end when their exit is reported, or after the force cleanup delay.
    pub fn cancel(&mut self, workflow: &WorkflowId) -> Result<()> {
        let run = self.workflow(workflow)?;
        if run.status.is_terminal() {
            log::info!("Workflow '{}' already finished {}; nothing to cancel.", workflow, run.status);
            return Ok(());
        }
        log::info!("Canceling workflow '{}'.", workflow);
        self.begin_cancel(workflow)
    }

    fn begin_cancel(&mut self, workflow: &WorkflowId) -> Result<()> {
        let now = self.now();
        let active: Vec<(TaskName, TaskStatus)> = {
            let run = self.workflows.get_mut(workflow).ok_or_else(|| Error::UnknownWorkflowError(workflow.id.clone()))?;
            run.cancel_requested_at.get_or_insert(now);
            run.tasks.iter().filter(|(_, l)| !l.status.is_terminal()).map(|(name, l)| (name.clone(), l.status)).collect()
        };
        for (task, status) in active {
            match status {
                TaskStatus::Running => self.terminate_pod(&TaskKey::new(workflow.clone(), task)),
                _ => self.terminate(workflow, &task)?,
            }
        }
        self.refresh_status(workflow);
        Ok(())
    }

    /// Applies every queue, start and exec timeout due at the current time, and force-ends
    /// every unfinished task of workflows canceled longer than the cleanup delay ago.
    pub fn check_timeouts(&mut self) -> Result<()> {
        let now = self.now();
        let mut expired: Vec<(WorkflowId, TaskName, TaskEvent)> = Vec::new();
        let mut abandoned: Vec<(WorkflowId, TaskName)> = Vec::new();

        for (id, run) in &self.workflows {
            if run.status.is_terminal() {
                continue;
            }
            if let Some(requested) = run.cancel_requested_at {
                if now - requested >= self.settings.force_cleanup_delay {
                    abandoned.extend(run.tasks.iter().filter(|(_, l)| !l.status.is_terminal()).map(|(name, _)| (id.clone(), name.clone())));
                }
                continue;
            }

            let queue_timeout = self.settings.queue_timeout(&run.spec);
            let exec_timeout = self.settings.exec_timeout(&run.spec);
            let due = |since: Option<i64>, limit: Option<i64>| matches!((since, limit), (Some(since), Some(limit)) if now - since >= limit);
            for (name, lifecycle) in &run.tasks {
                let event = match lifecycle.status {
                    TaskStatus::Pending if due(lifecycle.queued_at, queue_timeout) => TaskEvent::QueueTimeout,
                    TaskStatus::Ready if due(lifecycle.ready_at, Some(self.settings.start_timeout)) => TaskEvent::StartTimeout,
                    TaskStatus::Running if due(lifecycle.running_since, exec_timeout) => TaskEvent::ExecTimeout,
                    _ => continue,
                };
                expired.push((id.clone(), name.clone(), event));
            }
        }

        for (workflow, task) in abandoned {
            log::warn!("No exit report from {}/{} after the force cleanup delay; ending it.", workflow, task);
            self.terminate(&workflow, &task)?;
            self.refresh_status(&workflow);
        }

        // Members of one reservation share their ready time: apply all, then settle.
        let mut transitions = Vec::new();
        for (workflow, task, event) in expired {
            log::info!("{} for {}/{}.", event, workflow, task);
            self.stop(&workflow, &task)?;
            let transition = self.apply(&workflow, &task, event)?;
            transitions.push((workflow, task, transition));
        }
        for (workflow, task, transition) in transitions {
            self.settle(&workflow, &task, transition)?;
        }
        Ok(())
    }

    /// Drops workflows whose retention period has passed. Returns their ids.
    pub fn archive_finished(&mut self) -> Vec<WorkflowId> {
        let now = self.now();
        let retention = self.settings.retention;
        let expired: Vec<WorkflowId> =
            self.workflows.iter().filter(|(_, run)| run.finished_at.is_some_and(|at| now - at >= retention)).map(|(id, _)| id.clone()).collect();
        for id in &expired {
            self.workflows.remove(id);
            log::info!("Archived workflow '{}'.", id);
        }
        expired
    }

    fn refresh_status(&mut self, workflow: &WorkflowId) {
        let now = self.now();
        let Some(run) = self.workflows.get_mut(workflow) else {
            return;
        };
        let status = aggregator::workflow_status_of(&run.spec.groups, &run.statuses());
        if status == run.status {
            return;
        }
        run.status = status;
        if status.is_terminal() {
            run.finished_at = Some(now);
        }
        let reason = status.is_terminal().then(|| format!("{} retries spent", run.job_retries));
        self.emit_workflow(workflow, status, reason);
    }

    fn emit_workflow(&self, workflow: &WorkflowId, status: WorkflowStatus, reason: Option<String>) {
        let event = StatusEvent {
            timestamp: self.now(),
            workflow_id: workflow.clone(),
            group: None,
            task: None,
            status: EventStatus::Workflow(status),
            exit_code: None,
            reason,
        };
        self.emit(&event);
    }

    fn emit(&self, event: &StatusEvent) {
        for listener in &self.listeners {
            listener.on_status_change(event);
        }
    }
}
