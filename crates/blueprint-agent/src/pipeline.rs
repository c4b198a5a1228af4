use std::sync::Arc;

use blueprint_core::config::PipelineConfig;
use blueprint_core::error::Result;
use blueprint_core::event::EventBus;
use blueprint_core::{SharedState, StageKind};

use crate::graph::{status_route, GraphExecutor, RunOptions, RunReport, Target, WorkflowGraph};
use crate::stage::{Stage, StageContext};
use crate::stages::{ArchitectStage, CoderStage, PlannerStage};

/// planner → architect → coder, with the coder looping on its status marker.
pub fn standard_graph(
    planner: impl Stage,
    architect: impl Stage,
    coder: impl Stage,
    strict_status: bool,
) -> Result<WorkflowGraph> {
    WorkflowGraph::builder()
        .add_stage(planner)
        .add_stage(architect)
        .add_stage(coder)
        .add_edge(StageKind::Planner, Target::Stage(StageKind::Architect))
        .add_edge(StageKind::Architect, Target::Stage(StageKind::Coder))
        .add_route(StageKind::Coder, status_route(StageKind::Coder, strict_status))
        .entry(StageKind::Planner)
        .build()
}

/// The code-generation pipeline: a validated graph plus its executor.
pub struct Pipeline {
    executor: GraphExecutor,
}

impl Pipeline {
    /// Standard pipeline over the built-in stages.
    ///
    /// When `ctx` carries an event bus the executor publishes to it as well.
    pub fn new(ctx: StageContext, config: &PipelineConfig) -> Result<Self> {
        let events = ctx.events.clone();
        let graph = standard_graph(
            PlannerStage::new(ctx.clone()),
            ArchitectStage::new(ctx.clone()),
            CoderStage::new(ctx),
            config.strict_status,
        )?;
        let pipeline = Self::from_graph(graph);
        Ok(match events {
            Some(bus) => pipeline.with_events(bus),
            None => pipeline,
        })
    }

    /// Pipeline over any validated graph, e.g. one built from test stages.
    pub fn from_graph(graph: WorkflowGraph) -> Self {
        Self {
            executor: GraphExecutor::new(graph),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.executor = self.executor.with_events(events);
        self
    }

    pub fn graph(&self) -> &WorkflowGraph {
        self.executor.graph()
    }

    /// Run the pipeline for one request.
    pub async fn run(&self, initial_request: &str, options: RunOptions) -> Result<RunReport> {
        let state = SharedState::with_request(initial_request);
        self.executor.execute(state, &options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use blueprint_core::types::PipelineEvent;
    use blueprint_core::BlueprintError;
    use blueprint_llm::StructuredClient;
    use blueprint_test_utils::{
        sample_plan, sample_task_plan, test_model_config, MemoryFs, ScriptedLlm,
    };

    fn context(llm: ScriptedLlm, fs: MemoryFs) -> StageContext {
        StageContext::new(
            StructuredClient::new(Arc::new(llm), test_model_config()),
            Arc::new(fs),
        )
    }

    fn scripted_run(files: &[&str]) -> ScriptedLlm {
        let mut llm = ScriptedLlm::new()
            .tool_call("Plan", serde_json::to_value(sample_plan(files)).unwrap())
            .tool_call(
                "TaskPlan",
                serde_json::to_value(sample_task_plan(files)).unwrap(),
            );
        for f in files {
            llm = llm.tool_call(
                "CodeUnit",
                json!({ "path": f, "contents": format!("// {}", f) }),
            );
        }
        llm
    }

    #[tokio::test]
    async fn test_standard_pipeline_end_to_end() {
        let files = ["index.html", "style.css", "script.js"];
        let llm = scripted_run(&files);
        let calls = llm.call_counter();
        let fs = MemoryFs::new();
        let pipeline = Pipeline::new(context(llm, fs.clone()), &PipelineConfig::default()).unwrap();

        let report = pipeline
            .run(
                "create a simple calculator web application",
                RunOptions::new(5),
            )
            .await
            .unwrap();

        assert_eq!(report.completed_files(), files);
        assert_eq!(report.visits(StageKind::Coder), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(fs.contents("style.css").as_deref(), Some("// style.css"));
        assert!(report.state.is_done());
    }

    #[tokio::test]
    async fn test_repeated_task_file_is_coded_twice() {
        let files = ["app.js", "app.js"];
        let llm = scripted_run(&files);
        let calls = llm.call_counter();
        let pipeline =
            Pipeline::new(context(llm, MemoryFs::new()), &PipelineConfig::default()).unwrap();

        let report = pipeline.run("todo app", RunOptions::new(5)).await.unwrap();

        assert_eq!(report.completed_files(), files);
        assert_eq!(report.visits(StageKind::Coder), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(report.state.is_done());
    }

    #[tokio::test]
    async fn test_architect_upstream_error_skips_coder() {
        let llm = ScriptedLlm::new()
            .tool_call("Plan", serde_json::to_value(sample_plan(&["a.js"])).unwrap())
            .fail_with(BlueprintError::Upstream("connection refused".into()));
        let calls = llm.call_counter();
        let fs = MemoryFs::new();
        let pipeline = Pipeline::new(context(llm, fs.clone()), &PipelineConfig::default()).unwrap();

        let err = pipeline.run("x", RunOptions::default()).await.unwrap_err();

        assert_eq!(err.stage(), Some(StageKind::Architect));
        assert!(matches!(err.root_cause(), BlueprintError::Upstream(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(fs.paths().is_empty());
    }

    #[tokio::test]
    async fn test_events_flow_through_context_bus() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let ctx = context(scripted_run(&["a.js"]), MemoryFs::new()).with_events(bus.clone());
        let pipeline = Pipeline::new(ctx, &PipelineConfig::default()).unwrap();

        pipeline.run("x", RunOptions::default()).await.unwrap();

        let mut written = 0;
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                PipelineEvent::FileWritten { .. } => written += 1,
                PipelineEvent::RunCompleted { .. } => completed = true,
                _ => {}
            }
        }
        assert_eq!(written, 1);
        assert!(completed);
    }

    #[test]
    fn test_graph_topology() {
        let ctx = context(ScriptedLlm::new(), MemoryFs::new());
        let pipeline = Pipeline::new(ctx, &PipelineConfig::default()).unwrap();
        assert_eq!(pipeline.graph().entry(), StageKind::Planner);
        assert_eq!(pipeline.graph().describe().len(), 4);
    }
}
