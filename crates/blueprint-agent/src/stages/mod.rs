//! The built-in pipeline stages.

pub mod architect;
pub mod coder;
pub mod planner;

pub use architect::ArchitectStage;
pub use coder::CoderStage;
pub use planner::PlannerStage;
