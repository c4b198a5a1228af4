use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use blueprint_core::error::{BlueprintError, Result};
use blueprint_core::event::EventBus;
use blueprint_core::types::{PipelineEvent, RunId};
use blueprint_core::{SharedState, StageKind};

use super::edge::Target;
use super::phase::Phase;
use super::workflow::WorkflowGraph;

/// Options for a single run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// How many times any single stage may execute in this run.
    pub max_steps: usize,
    pub run_id: RunId,
}

impl RunOptions {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps,
            run_id: RunId::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Result of executing a single stage.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: StageKind,
    /// Position of this execution in the run, starting at 1.
    pub step: usize,
    pub elapsed_ms: u64,
}

/// Result of a run that reached `END`.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    /// Final shared state.
    pub state: SharedState,
    /// Per-stage results in execution order.
    pub stage_results: Vec<StageResult>,
    pub total_steps: usize,
    pub total_elapsed_ms: u64,
    pub phase: Phase,
}

impl RunReport {
    /// How many times `stage` executed.
    pub fn visits(&self, stage: StageKind) -> usize {
        self.stage_results.iter().filter(|r| r.stage == stage).count()
    }

    pub fn completed_files(&self) -> Vec<String> {
        self.state.completed_files()
    }
}

/// Walks a [`WorkflowGraph`] one stage at a time.
pub struct GraphExecutor {
    graph: WorkflowGraph,
    events: Option<Arc<EventBus>>,
}

impl GraphExecutor {
    pub fn new(graph: WorkflowGraph) -> Self {
        Self {
            graph,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Run the graph from its entry stage until a route yields `END`.
    ///
    /// Before each execution the stage's visit count is checked against
    /// `max_steps`; a stage that already ran that many times aborts the run
    /// with `StepLimitExceeded`. A stage error aborts the run wrapped in
    /// `StageExecution`.
    pub async fn execute(&self, initial: SharedState, options: &RunOptions) -> Result<RunReport> {
        if options.max_steps == 0 {
            return Err(BlueprintError::Config(
                "max_steps must be at least 1".to_string(),
            ));
        }

        let start = Instant::now();
        let run_id = options.run_id.clone();
        let mut state = initial;
        let mut stage_results: Vec<StageResult> = Vec::new();
        let mut visits: HashMap<StageKind, usize> = HashMap::new();
        let mut current = self.graph.entry();
        let mut phase = Phase::of_stage(current);

        info!(run_id = %run_id, entry = %current, max_steps = options.max_steps, "Starting pipeline run");
        self.publish(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            request: state.user_prompt().unwrap_or_default().to_string(),
        });

        loop {
            let count = visits.entry(current).or_insert(0);
            if *count >= options.max_steps {
                warn!(stage = %current, max_steps = options.max_steps, "Step ceiling reached");
                let err = BlueprintError::StepLimitExceeded {
                    stage: current,
                    max_steps: options.max_steps,
                    snapshot: Box::new(state),
                };
                return Err(self.abort(&run_id, phase, err));
            }
            *count += 1;
            let visit = *count;
            let step = stage_results.len() + 1;

            let stage = match self.graph.stage(current) {
                Some(s) => s,
                None => {
                    let err = BlueprintError::Graph(format!("stage '{}' not registered", current));
                    return Err(self.abort(&run_id, phase, err));
                }
            };

            info!(stage = %current, step, visit, "Executing stage");
            self.publish(PipelineEvent::StageStarted {
                stage: current,
                step,
            });

            let stage_start = Instant::now();
            let output = match stage.execute(&state).await {
                Ok(output) => output,
                Err(e) => {
                    error!(stage = %current, step, error = %e, "Stage failed");
                    let err = BlueprintError::stage_failed(current, &state, e);
                    return Err(self.abort(&run_id, phase, err));
                }
            };
            state.merge(output);

            let elapsed_ms = stage_start.elapsed().as_millis() as u64;
            stage_results.push(StageResult {
                stage: current,
                step,
                elapsed_ms,
            });
            debug!(stage = %current, step, elapsed_ms, "Stage complete");
            self.publish(PipelineEvent::StageCompleted {
                stage: current,
                step,
                elapsed_ms,
            });

            let next = match self.graph.route(current) {
                Some(route) => route.resolve(&state),
                None => Err(BlueprintError::Graph(format!(
                    "stage '{}' has no outgoing route",
                    current
                ))),
            };
            let next = match next {
                Ok(target) => target,
                Err(e) => return Err(self.abort(&run_id, phase, e)),
            };

            debug!(from = %current, to = %next, "Routed");
            self.publish(PipelineEvent::Routed {
                from: current,
                to: next.to_string(),
            });

            let next_phase = Phase::of_target(next);
            if next_phase != phase {
                info!(from = %phase, to = %next_phase, "Phase transition");
                phase = next_phase;
            }

            match next {
                Target::End => break,
                Target::Stage(kind) => current = kind,
            }
        }

        let total_steps = stage_results.len();
        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        let files_written = state.completed_files().len();
        info!(run_id = %run_id, total_steps, files_written, total_elapsed_ms, "Pipeline run complete");
        self.publish(PipelineEvent::RunCompleted {
            run_id: run_id.clone(),
            total_steps,
            files_written,
        });

        Ok(RunReport {
            run_id,
            state,
            stage_results,
            total_steps,
            total_elapsed_ms,
            phase,
        })
    }

    fn abort(&self, run_id: &RunId, phase: Phase, err: BlueprintError) -> BlueprintError {
        warn!(run_id = %run_id, from = %phase, to = %Phase::Aborted, error = %err, "Run aborted");
        self.publish(PipelineEvent::RunFailed {
            run_id: run_id.clone(),
            error: err.to_string(),
        });
        err
    }

    fn publish(&self, event: PipelineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}
