use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Parses a JSON file into a given type `T`.
///
/// Errors are converted into `crate::error::Error` variants:
/// - `Error::IoError` if the file cannot be read.
/// - `Error::DeserializationError` if the JSON is malformed.
pub fn parse_json_file<T: DeserializeOwned>(file_path: &str) -> Result<T> {
    let data = fs::read_to_string(file_path).map_err(Error::IoError)?;

    let parsed_data: T = serde_json::from_str(&data).map_err(Error::DeserializationError)?;

    Ok(parsed_data)
}

/// Parses a YAML file into a given type `T`.
pub fn parse_yaml_file<T: DeserializeOwned>(file_path: &str) -> Result<T> {
    let data = fs::read_to_string(file_path)?;
    parse_yaml_str(&data)
}

pub fn parse_yaml_str<T: DeserializeOwned>(data: &str) -> Result<T> {
    Ok(serde_yaml::from_str(data)?)
}

/// Parses a workflow submission, picking the format from the file extension.
///
/// `.json` is read as JSON, everything else (`.yaml`, `.yml`, no extension) as YAML,
/// which also accepts plain JSON documents.
pub fn parse_workflow_file<T: DeserializeOwned>(file_path: &str) -> Result<T> {
    let extension = Path::new(file_path).extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("json") => parse_json_file(file_path),
        _ => parse_yaml_file(file_path),
    }
}
