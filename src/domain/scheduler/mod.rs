pub mod fair_share;
pub mod gang;
pub mod ledger;
pub mod placement;
pub mod preemption;
pub mod queue;
