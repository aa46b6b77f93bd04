pub mod actor;
pub mod backend;
pub mod engine;
pub mod event;
pub mod settings;
