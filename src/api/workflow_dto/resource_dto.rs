use serde::{Deserialize, Serialize};

use crate::domain::resource::quantity::{ResourceKind, parse_duration, parse_quantity};
use crate::error::Result;

/// A quantity written either as a bare number or as a string with a unit (`16Gi`, `500m`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum QuantityDto {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl QuantityDto {
    pub fn to_text(&self) -> String {
        match self {
            QuantityDto::Integer(value) => value.to_string(),
            QuantityDto::Float(value) => value.to_string(),
            QuantityDto::Text(text) => text.clone(),
        }
    }

    pub fn parse(&self, kind: ResourceKind) -> Result<i64> {
        parse_quantity(kind, &self.to_text())
    }

    /// `-1` means "no limit".
    pub fn is_unlimited(&self) -> bool {
        matches!(self, QuantityDto::Integer(-1)) || matches!(self, QuantityDto::Text(t) if t.trim() == "-1")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum DurationDto {
    Seconds(i64),
    Text(String),
}

impl DurationDto {
    pub fn to_seconds(&self) -> Result<i64> {
        match self {
            DurationDto::Seconds(seconds) => Ok(*seconds),
            DurationDto::Text(text) => parse_duration(text),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpecDto {
    pub cpu: Option<QuantityDto>,
    pub memory: Option<QuantityDto>,
    pub storage: Option<QuantityDto>,
    pub gpu: Option<QuantityDto>,
    pub platform: Option<String>,
    #[serde(default, alias = "nodes_excluded")]
    pub nodes_excluded: Vec<String>,
}
