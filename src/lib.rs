use std::sync::Arc;

use crate::api::engine_dto::EngineConfigDto;
use crate::domain::engine::engine::WorkflowEngine;
use crate::domain::simulator::simulator::{Simulator, SystemSimulator};
use crate::error::Result;
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Builds a workflow engine from an engine configuration file.
///
/// Without an explicit clock the engine uses the one described by the file's `simulator`
/// section (real time by default).
pub fn generate_engine(config_path: &str, simulator: Option<Arc<dyn SystemSimulator>>) -> Result<WorkflowEngine> {
    logger::init();
    log::info!("Logger initialized. Starting engine construction.");

    let config: EngineConfigDto = parse_json_file::<EngineConfigDto>(config_path)?;
    log::info!("Engine configuration '{}' parsed successfully.", config_path);

    let simulator = simulator.unwrap_or_else(|| Arc::new(Simulator::new(config.simulator.clone())));
    let engine = WorkflowEngine::from_dto(&config, simulator)?;
    log::info!("Workflow engine constructed successfully.");

    Ok(engine)
}
