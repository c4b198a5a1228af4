pub mod graph;
pub mod pipeline;
pub mod prompts;
pub mod run_log;
pub mod stage;
pub mod stages;

pub use graph::{
    status_route, GraphExecutor, Phase, Route, RunOptions, RunReport, StageResult, Target,
    WorkflowBuilder, WorkflowGraph,
};
pub use pipeline::{standard_graph, Pipeline};
pub use run_log::RunLogger;
pub use stage::{Stage, StageContext};
pub use stages::{ArchitectStage, CoderStage, PlannerStage};
