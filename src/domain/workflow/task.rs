use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use regex::Regex;

use crate::api::workflow_dto::resource_dto::ResourceSpecDto;
use crate::api::workflow_dto::workflow_dto::{CheckpointDto, ExitActionDto, InputDto, TaskDto};
use crate::domain::resource::pool::Pool;
use crate::domain::resource::quantity::ResourceVector;
use crate::domain::resource::resource_spec::ResourceSpec;
use crate::domain::utils::id::{PlatformName, TaskName};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    Complete,
    Fail,
    Reschedule,
}

impl From<ExitActionDto> for ExitAction {
    fn from(dto: ExitActionDto) -> Self {
        match dto {
            ExitActionDto::Complete => ExitAction::Complete,
            ExitActionDto::Fail => ExitAction::Fail,
            ExitActionDto::Reschedule => ExitAction::Reschedule,
        }
    }
}

/// Exit-code ranges mapped to outcomes, e.g. `RESCHEDULE: "42,100-110"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitActions {
    rules: Vec<(ExitAction, Vec<RangeInclusive<i32>>)>,
}

impl ExitActions {
    pub fn from_dto(map: &BTreeMap<ExitActionDto, String>) -> Result<Self> {
        let mut rules = Vec::with_capacity(map.len());
        for (action, ranges) in map {
            rules.push(((*action).into(), parse_ranges(ranges)?));
        }
        Ok(ExitActions { rules })
    }

    /// Outcome for `code`. The first matching rule wins (COMPLETE, then FAIL, then RESCHEDULE);
    /// an unmatched 0 completes and any other unmatched code fails.
    pub fn resolve(&self, code: i32) -> ExitAction {
        self.rules
            .iter()
            .find(|(_, ranges)| ranges.iter().any(|range| range.contains(&code)))
            .map(|(action, _)| *action)
            .unwrap_or(if code == 0 { ExitAction::Complete } else { ExitAction::Fail })
    }
}

fn parse_ranges(text: &str) -> Result<Vec<RangeInclusive<i32>>> {
    let invalid = || Error::InvalidExitActionError(text.to_string());
    let mut ranges = Vec::new();
    for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let range = match part.split_once('-') {
            Some((start, end)) => {
                let start: i32 = start.trim().parse().map_err(|_| invalid())?;
                let end: i32 = end.trim().parse().map_err(|_| invalid())?;
                if start > end {
                    return Err(invalid());
                }
                start..=end
            }
            None => {
                let code: i32 = part.parse().map_err(|_| invalid())?;
                code..=code
            }
        };
        ranges.push(range);
    }
    if ranges.is_empty() {
        return Err(invalid());
    }
    Ok(ranges)
}

#[derive(Debug, Clone)]
pub enum InputSource {
    Task(TaskName),
    Url(String),
    Dataset(String),
}

#[derive(Debug, Clone)]
pub struct TaskInput {
    pub source: InputSource,
    pub filter: Option<Regex>,
}

impl TaskInput {
    pub fn from_dto(task: &str, dto: &InputDto) -> Result<Self> {
        let source = match (&dto.task, &dto.url, &dto.dataset) {
            (Some(upstream), None, None) => InputSource::Task(TaskName::new(upstream.clone())),
            (None, Some(url), None) => InputSource::Url(url.clone()),
            (None, None, Some(dataset)) => InputSource::Dataset(dataset.clone()),
            _ => {
                return Err(Error::ModelConstructionError(format!("input of task '{}' must name exactly one of task, url or dataset", task)));
            }
        };
        Ok(TaskInput { source, filter: compile_filter(task, dto.regex.as_deref())? })
    }

    pub fn upstream_task(&self) -> Option<&TaskName> {
        match &self.source {
            InputSource::Task(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutput {
    Url(String),
    Dataset(String),
}

#[derive(Debug, Clone)]
pub struct CheckpointSpec {
    pub path: String,
    pub url: String,
    pub frequency_s: i64,
    pub filter: Option<Regex>,
}

impl CheckpointSpec {
    fn from_dto(task: &str, dto: &CheckpointDto) -> Result<Self> {
        let frequency_s = dto.frequency.to_seconds()?;
        if frequency_s <= 0 {
            return Err(Error::DurationParseError(format!("checkpoint frequency of task '{}' must be positive", task)));
        }
        Ok(CheckpointSpec { path: dto.path.clone(), url: dto.url.clone(), frequency_s, filter: compile_filter(task, dto.regex.as_deref())? })
    }
}

fn compile_filter(task: &str, pattern: Option<&str>) -> Result<Option<Regex>> {
    pattern
        .map(|p| Regex::new(p).map_err(|source| Error::InvalidInputFilterError { task: task.to_string(), source }))
        .transpose()
}

/// A task as submitted, with its resource request already resolved against the pool.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: TaskName,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub lead: bool,
    pub resources: ResourceSpec,
    pub inputs: Vec<TaskInput>,
    pub outputs: Vec<TaskOutput>,
    pub exit_actions: ExitActions,
    pub checkpoints: Vec<CheckpointSpec>,
}

impl TaskSpec {
    pub fn from_dto(dto: &TaskDto, resources: &BTreeMap<String, ResourceSpecDto>, pool: &Pool) -> Result<Self> {
        let name = dto.name.as_str();
        let mut outputs = Vec::with_capacity(dto.outputs.len());
        for output in &dto.outputs {
            outputs.push(match (&output.url, &output.dataset) {
                (Some(url), None) => TaskOutput::Url(url.clone()),
                (None, Some(dataset)) => TaskOutput::Dataset(dataset.clone()),
                _ => return Err(Error::ModelConstructionError(format!("output of task '{}' must name exactly one of url or dataset", name))),
            });
        }

        Ok(TaskSpec {
            name: TaskName::new(name),
            image: dto.image.clone(),
            command: dto.command.clone(),
            args: dto.args.clone(),
            environment: dto.environment.clone(),
            lead: dto.lead,
            resources: ResourceSpec::resolve(name, dto.resource.as_deref(), resources, pool)?,
            inputs: dto.inputs.iter().map(|input| TaskInput::from_dto(name, input)).collect::<Result<_>>()?,
            outputs,
            exit_actions: ExitActions::from_dto(&dto.exit_actions)?,
            checkpoints: dto.checkpoint.iter().map(|c| CheckpointSpec::from_dto(name, c)).collect::<Result<_>>()?,
        })
    }

    /// A bare task with no request, mostly useful for tests and tooling.
    pub fn named(name: &str) -> Self {
        TaskSpec {
            name: TaskName::new(name),
            image: String::new(),
            command: Vec::new(),
            args: Vec::new(),
            environment: BTreeMap::new(),
            lead: false,
            resources: ResourceSpec { request: ResourceVector::ZERO, platform: PlatformName::new(""), nodes_excluded: Vec::new() },
            inputs: Vec::new(),
            outputs: Vec::new(),
            exit_actions: ExitActions::default(),
            checkpoints: Vec::new(),
        }
    }

    pub fn upstream_tasks(&self) -> impl Iterator<Item = &TaskName> {
        self.inputs.iter().filter_map(TaskInput::upstream_task)
    }
}
