use std::time::Duration;

use actix::prelude::{Actor, AsyncContext, Context, Handler, Message};

use crate::api::workflow_dto::workflow_dto::WorkflowSpecDto;
use crate::domain::engine::engine::{ScheduleReport, WorkflowEngine};
use crate::domain::lifecycle::status::WorkflowStatus;
use crate::domain::utils::id::WorkflowId;
use crate::error::Result;

/// Hosts the engine as a single-owner actor. Every submission, pod report and cancellation
/// is a message; scheduling runs on a timer of `scheduling_interval` seconds.
pub struct EngineActor {
    engine: WorkflowEngine,
}

impl EngineActor {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self { engine }
    }
}

impl Actor for EngineActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let interval = Duration::from_secs(self.engine.settings().scheduling_interval.max(1) as u64);
        log::info!("Engine actor started; scheduling every {}s.", interval.as_secs());
        ctx.run_interval(interval, |actor, _| {
            if let Err(e) = actor.engine.tick() {
                log::error!("Scheduling tick failed: {}", e);
            }
        });
    }
}

#[derive(Message)]
#[rtype(result = "Result<WorkflowId>")]
pub struct Submit(pub WorkflowSpecDto);

#[derive(Message)]
#[rtype(result = "Result<()>")]
pub struct Cancel(pub WorkflowId);

/// Runs one scheduling step right away, outside the timer.
#[derive(Message)]
#[rtype(result = "Result<ScheduleReport>")]
pub struct Tick;

#[derive(Message)]
#[rtype(result = "Result<WorkflowStatus>")]
pub struct GetStatus(pub WorkflowId);

/// Pod status reported by the cluster backend.
#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<()>")]
pub enum PodEvent {
    Started { workflow: WorkflowId, task: String },
    Exited { workflow: WorkflowId, task: String, codes: Vec<i32> },
    Evicted { workflow: WorkflowId, task: String },
}

impl Handler<Submit> for EngineActor {
    type Result = Result<WorkflowId>;
    fn handle(&mut self, msg: Submit, _ctx: &mut Self::Context) -> Self::Result {
        self.engine.submit(&msg.0)
    }
}

impl Handler<Cancel> for EngineActor {
    type Result = Result<()>;
    fn handle(&mut self, msg: Cancel, _ctx: &mut Self::Context) -> Self::Result {
        self.engine.cancel(&msg.0)
    }
}

impl Handler<Tick> for EngineActor {
    type Result = Result<ScheduleReport>;
    fn handle(&mut self, _msg: Tick, _ctx: &mut Self::Context) -> Self::Result {
        self.engine.tick()
    }
}

impl Handler<GetStatus> for EngineActor {
    type Result = Result<WorkflowStatus>;
    fn handle(&mut self, msg: GetStatus, _ctx: &mut Self::Context) -> Self::Result {
        self.engine.status(&msg.0)
    }
}

impl Handler<PodEvent> for EngineActor {
    type Result = Result<()>;
    fn handle(&mut self, msg: PodEvent, _ctx: &mut Self::Context) -> Self::Result {
        let outcome = match &msg {
            PodEvent::Started { workflow, task } => self.engine.task_started(workflow, task),
            PodEvent::Exited { workflow, task, codes } => self.engine.task_exited(workflow, task, codes),
            PodEvent::Evicted { workflow, task } => self.engine.task_evicted(workflow, task),
        };
        if let Err(e) = &outcome {
            log::error!("Pod event {:?} rejected: {}", msg, e);
        }
        outcome
    }
}
