use futures::future::BoxFuture;
use tracing::{info, warn};

use blueprint_core::artifact::{Plan, TaskPlan};
use blueprint_core::error::Result;
use blueprint_core::state::keys;
use blueprint_core::{SharedState, StageKind};

use crate::prompts::architect_prompt;
use crate::stage::{Stage, StageContext};

/// Turns the `plan` into a [`TaskPlan`] under `task_plan`.
pub struct ArchitectStage {
    ctx: StageContext,
}

impl ArchitectStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

impl Stage for ArchitectStage {
    fn kind(&self) -> StageKind {
        StageKind::Architect
    }

    fn execute<'a>(&'a self, state: &'a SharedState) -> BoxFuture<'a, Result<SharedState>> {
        Box::pin(async move {
            let plan: Plan = state.require_as(keys::PLAN)?;

            let task_plan: TaskPlan = self
                .ctx
                .llm
                .complete_as(&architect_prompt(&plan), &TaskPlan::schema())
                .await?;

            if task_plan.implementation_steps.len() != plan.files.len() {
                warn!(
                    planned = plan.files.len(),
                    tasks = task_plan.implementation_steps.len(),
                    "Task count differs from planned file count"
                );
            }
            info!(tasks = task_plan.implementation_steps.len(), "Task plan ready");

            let mut out = SharedState::new();
            out.set_as(keys::TASK_PLAN, &task_plan)?;
            Ok(out)
        })
    }
}
