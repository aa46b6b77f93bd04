pub mod state_machine;
pub mod status;
