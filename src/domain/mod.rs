pub mod aggregator;
pub mod engine;
pub mod lifecycle;
pub mod pod;
pub mod resource;
pub mod scheduler;
pub mod simulator;
pub mod utils;
pub mod workflow;
