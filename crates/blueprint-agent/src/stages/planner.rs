use futures::future::BoxFuture;
use tracing::{info, warn};

use blueprint_core::artifact::Plan;
use blueprint_core::error::{BlueprintError, Result};
use blueprint_core::state::keys;
use blueprint_core::{SharedState, StageKind};

use crate::prompts::planner_prompt;
use crate::stage::{Stage, StageContext};

/// Turns the user prompt into a [`Plan`] under `plan`.
pub struct PlannerStage {
    ctx: StageContext,
}

impl PlannerStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

impl Stage for PlannerStage {
    fn kind(&self) -> StageKind {
        StageKind::Planner
    }

    fn execute<'a>(&'a self, state: &'a SharedState) -> BoxFuture<'a, Result<SharedState>> {
        Box::pin(async move {
            let request = state
                .user_prompt()
                .ok_or_else(|| BlueprintError::MissingInput {
                    key: keys::USER_PROMPT.to_string(),
                })?;

            let plan: Plan = self
                .ctx
                .llm
                .complete_as(&planner_prompt(request), &Plan::schema())
                .await?;

            if plan.files.is_empty() {
                warn!(project = %plan.name, "Plan lists no files");
            }
            info!(project = %plan.name, files = plan.files.len(), "Plan ready");

            let mut out = SharedState::new();
            out.set_as(keys::PLAN, &plan)?;
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use blueprint_llm::StructuredClient;
    use blueprint_test_utils::{sample_plan, test_model_config, MemoryFs, ScriptedLlm};

    fn stage(llm: ScriptedLlm) -> PlannerStage {
        let client = StructuredClient::new(Arc::new(llm), test_model_config());
        PlannerStage::new(StageContext::new(client, Arc::new(MemoryFs::new())))
    }

    #[tokio::test]
    async fn test_planner_writes_plan() {
        let plan = sample_plan(&["index.html", "app.js"]);
        let llm = ScriptedLlm::new().tool_call("Plan", serde_json::to_value(&plan).unwrap());
        let recorder = llm.recorder();
        let planner = stage(llm);

        let out = planner
            .execute(&SharedState::with_request("create a calculator"))
            .await
            .unwrap();

        assert_eq!(out.get_as::<Plan>(keys::PLAN).unwrap(), Some(plan));
        assert_eq!(out.len(), 1);
        let calls = recorder.lock().unwrap();
        assert_eq!(calls[0].tools, vec!["Plan"]);
        assert!(calls[0].messages[1].content.contains("create a calculator"));
    }

    #[tokio::test]
    async fn test_planner_requires_prompt() {
        let llm = ScriptedLlm::new();
        let calls = llm.call_counter();
        let err = stage(llm).execute(&SharedState::new()).await.unwrap_err();
        assert!(matches!(err, BlueprintError::MissingInput { key } if key == "user_prompt"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_planner_rejects_incomplete_plan() {
        let llm = ScriptedLlm::new().tool_call("Plan", serde_json::json!({ "name": "x" }));
        let err = stage(llm)
            .execute(&SharedState::with_request("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BlueprintError::SchemaViolation { schema, .. } if schema == "Plan"));
    }
}
