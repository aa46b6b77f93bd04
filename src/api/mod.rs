pub mod engine_dto;
pub mod workflow_dto;
