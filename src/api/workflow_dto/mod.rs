pub mod resource_dto;
pub mod workflow_dto;
