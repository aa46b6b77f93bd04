use crate::api::engine_dto::EngineSettingsDto;
use crate::api::workflow_dto::resource_dto::DurationDto;
use crate::domain::lifecycle::state_machine::RetryPolicy;
use crate::domain::workflow::workflow::WorkflowSpec;
use crate::error::Result;

const DEFAULT_START_TIMEOUT_S: i64 = 10 * 60;
const DEFAULT_FORCE_CLEANUP_DELAY_S: i64 = 60 * 60;
const DEFAULT_MAX_RETRY_PER_TASK: u32 = 3;
const DEFAULT_MAX_RETRY_PER_JOB: u32 = 10;
const DEFAULT_SCHEDULING_INTERVAL_S: i64 = 5;
const DEFAULT_RETENTION_S: i64 = 30 * 24 * 60 * 60;

/// Engine-wide knobs. All durations are in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub default_pool: Option<String>,
    pub start_timeout: i64,
    pub force_cleanup_delay: i64,
    pub max_retry_per_task: u32,
    pub max_retry_per_job: u32,
    pub scheduling_interval: i64,
    /// How long a finished workflow stays queryable.
    pub retention: i64,
    pub default_exec_timeout: Option<i64>,
    pub default_queue_timeout: Option<i64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            default_pool: None,
            start_timeout: DEFAULT_START_TIMEOUT_S,
            force_cleanup_delay: DEFAULT_FORCE_CLEANUP_DELAY_S,
            max_retry_per_task: DEFAULT_MAX_RETRY_PER_TASK,
            max_retry_per_job: DEFAULT_MAX_RETRY_PER_JOB,
            scheduling_interval: DEFAULT_SCHEDULING_INTERVAL_S,
            retention: DEFAULT_RETENTION_S,
            default_exec_timeout: None,
            default_queue_timeout: None,
        }
    }
}

fn seconds(dto: &Option<DurationDto>, default: i64) -> Result<i64> {
    Ok(dto.as_ref().map(|d| d.to_seconds()).transpose()?.unwrap_or(default))
}

impl EngineSettings {
    pub fn from_dto(dto: &EngineSettingsDto) -> Result<Self> {
        let defaults = EngineSettings::default();
        Ok(EngineSettings {
            default_pool: dto.default_pool.clone(),
            start_timeout: seconds(&dto.start_timeout, defaults.start_timeout)?,
            force_cleanup_delay: seconds(&dto.force_cleanup_delay, defaults.force_cleanup_delay)?,
            max_retry_per_task: dto.max_retry_per_task.unwrap_or(defaults.max_retry_per_task),
            max_retry_per_job: dto.max_retry_per_job.unwrap_or(defaults.max_retry_per_job),
            scheduling_interval: seconds(&dto.scheduling_interval, defaults.scheduling_interval)?,
            retention: seconds(&dto.retention, defaults.retention)?,
            default_exec_timeout: dto.default_exec_timeout.as_ref().map(|d| d.to_seconds()).transpose()?,
            default_queue_timeout: dto.default_queue_timeout.as_ref().map(|d| d.to_seconds()).transpose()?,
        })
    }

    /// Retry budgets for `workflow`; the submission may override the engine defaults.
    pub fn retry_policy(&self, workflow: &WorkflowSpec) -> RetryPolicy {
        RetryPolicy {
            max_retry_per_task: workflow.max_retry_per_task.unwrap_or(self.max_retry_per_task),
            max_retry_per_job: workflow.max_retry_per_job.unwrap_or(self.max_retry_per_job),
        }
    }

    pub fn exec_timeout(&self, workflow: &WorkflowSpec) -> Option<i64> {
        workflow.exec_timeout.or(self.default_exec_timeout)
    }

    pub fn queue_timeout(&self, workflow: &WorkflowSpec) -> Option<i64> {
        workflow.queue_timeout.or(self.default_queue_timeout)
    }
}
