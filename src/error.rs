use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON document: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Failed to parse YAML document: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to build engine model: {0}")]
    ModelConstructionError(String),

    // Submission-time validation
    #[error("Fields '{first}' and '{second}' are mutually exclusive in workflow '{workflow}'")]
    MutuallyExclusiveFieldsError { workflow: String, first: String, second: String },

    #[error("Workflow '{0}' declares neither tasks nor groups")]
    EmptyWorkflowError(String),

    #[error("Cyclic dependency in workflow '{workflow}' between groups: {}", groups.join(", "))]
    CyclicDependencyError { workflow: String, groups: Vec<String> },

    #[error("Group '{group}' must have exactly one lead task, found {leads}")]
    InvalidGroupLeaderError { group: String, leads: usize },

    #[error("Group '{group}' must contain at least two tasks, found {size}")]
    GroupTooSmallError { group: String, size: usize },

    #[error("Task name '{0}' is used more than once")]
    DuplicateTaskError(String),

    #[error("Task '{task}' consumes output of unknown task '{input}'")]
    UnknownTaskReferenceError { task: String, input: String },

    #[error("Task '{task}' in group '{group}' consumes output of sibling task '{input}'")]
    IntraGroupDependencyError { group: String, task: String, input: String },

    #[error("Input filter of task '{task}' is not a valid regex: {source}")]
    InvalidInputFilterError {
        task: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unknown pool '{0}'")]
    UnknownPoolError(String),

    #[error("Pool '{pool}' has no platform '{platform}'")]
    UnknownPlatformError { pool: String, platform: String },

    #[error("Task '{task}' references unknown resource spec '{spec}'")]
    UnknownResourceSpecError { task: String, spec: String },

    #[error("Resource validation failed for task '{task}': {message}")]
    ResourceValidationError { task: String, message: String },

    #[error("Invalid quantity '{0}'")]
    QuantityParseError(String),

    #[error("Invalid duration '{0}'")]
    DurationParseError(String),

    #[error("Expression error: {0}")]
    ExpressionError(String),

    #[error("Invalid exit action range '{0}'")]
    InvalidExitActionError(String),

    // Runtime
    #[error("Unknown workflow '{0}'")]
    UnknownWorkflowError(String),

    #[error("Unknown task '{0}'")]
    UnknownTaskError(String),

    #[error("Task '{task}' cannot handle {event} while {from}")]
    InvalidTransitionError { task: String, from: String, event: String },
}

impl Error {
    /// True for errors raised while validating a submission; those never reach the queue.
    pub fn is_submission_error(&self) -> bool {
        !matches!(
            self,
            Error::IoError(_)
                | Error::DeserializationError(_)
                | Error::YamlError(_)
                | Error::UnknownWorkflowError(_)
                | Error::UnknownTaskError(_)
                | Error::InvalidTransitionError { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
