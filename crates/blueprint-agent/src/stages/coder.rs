use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, info, warn};

use blueprint_core::artifact::{CodeUnit, TaskPlan};
use blueprint_core::error::Result;
use blueprint_core::state::{keys, STATUS_CONTINUE, STATUS_DONE};
use blueprint_core::types::PipelineEvent;
use blueprint_core::{SharedState, StageKind};

use crate::prompts::coder_prompt;
use crate::stage::{Stage, StageContext};

/// Implements the task at `current_step` of the `task_plan` per execution.
///
/// Each run writes exactly one file, appends its path to `completed_files`
/// and advances `current_step`. `status` becomes `DONE` once no task is left,
/// `CONTINUE` otherwise.
pub struct CoderStage {
    ctx: StageContext,
}

impl CoderStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

impl Stage for CoderStage {
    fn kind(&self) -> StageKind {
        StageKind::Coder
    }

    fn execute<'a>(&'a self, state: &'a SharedState) -> BoxFuture<'a, Result<SharedState>> {
        Box::pin(async move {
            let plan: TaskPlan = state.require_as(keys::TASK_PLAN)?;
            let step = state.current_step();
            let mut completed = state.completed_files();
            let mut out = SharedState::new();

            let Some(task) = plan.task_at(step) else {
                info!("No pending tasks");
                out.set_str(keys::STATUS, STATUS_DONE);
                return Ok(out);
            };

            let existing = self.ctx.fs.read_file(&task.filepath).await?;
            let project_files = self.ctx.fs.list_files(".").await?;
            debug!(
                step,
                file = %task.filepath,
                existing_bytes = existing.len(),
                project_files = project_files.len(),
                "Coding task"
            );

            let prompt = coder_prompt(task, &existing, &project_files, &plan);
            let unit: CodeUnit = self.ctx.llm.complete_as(&prompt, &CodeUnit::schema()).await?;
            if unit.path != task.filepath {
                warn!(task = %task.filepath, returned = %unit.path, "Model named a different file, writing the task's file");
            }

            self.ctx.fs.write_file(&task.filepath, &unit.contents).await?;
            self.ctx.publish(PipelineEvent::FileWritten {
                path: task.filepath.clone(),
                bytes: unit.contents.len(),
            });

            completed.push(task.filepath.clone());
            let next = step + 1;
            let remaining = plan.remaining_from(next);
            info!(file = %task.filepath, bytes = unit.contents.len(), remaining, "File written");

            out.set(keys::COMPLETED_FILES, json!(completed));
            out.set(keys::CURRENT_STEP, json!(next));
            out.set_str(
                keys::STATUS,
                if remaining == 0 {
                    STATUS_DONE
                } else {
                    STATUS_CONTINUE
                },
            );
            Ok(out)
        })
    }
}
