mod executor;
pub(crate) mod planner;

pub use executor::run_restore_flow;
pub use planner::plan_restore;
