pub mod dependency;
pub mod group;
pub mod task;
pub mod workflow;
