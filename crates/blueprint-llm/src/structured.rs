use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use serde::de::DeserializeOwned;
use tracing::debug;

use blueprint_core::config::ModelConfig;
use blueprint_core::error::{BlueprintError, Result};
use blueprint_core::traits::LlmClient;
use blueprint_core::types::{ChatMessage, OutputSchema, StreamDelta};

/// Schema-constrained completions on top of a streaming [`LlmClient`].
///
/// The schema is offered as the only tool, so a well-behaved model answers
/// with a tool call whose arguments are the artifact. Models that answer in
/// plain text instead are accepted when the text contains a JSON object.
#[derive(Clone)]
pub struct StructuredClient {
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl StructuredClient {
    pub fn new(llm: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { llm, config }
    }

    pub fn model(&self) -> &ModelConfig {
        &self.config
    }

    /// Ask for an object conforming to `schema`.
    ///
    /// Fails with `Upstream`/`LlmStream` when the call fails and with
    /// `SchemaViolation` when the answer is not an object carrying every
    /// required key.
    pub async fn complete_structured(
        &self,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<serde_json::Value> {
        let messages = vec![
            ChatMessage::system(format!(
                "Respond by calling the `{}` function exactly once. Its arguments must be a JSON \
                 object matching this schema:\n{}",
                schema.name, schema.schema
            )),
            ChatMessage::user(prompt),
        ];
        let tools = [schema.to_tool_definition()];

        let mut stream = self.llm.chat_stream(&self.config, messages, &tools).await?;

        let mut text = String::new();
        let mut tool_args: BTreeMap<usize, String> = BTreeMap::new();

        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::TextDelta(t) => text.push_str(&t),
                StreamDelta::ToolUseStart { index, name, .. } => {
                    debug!(index, tool = %name, "Structured tool call started");
                    tool_args.entry(index).or_default();
                }
                StreamDelta::ToolInputDelta { index, delta } => {
                    tool_args.entry(index).or_default().push_str(&delta);
                }
                StreamDelta::Usage {
                    input_tokens,
                    output_tokens,
                } => {
                    debug!(input_tokens, output_tokens, schema = %schema.name, "LLM usage");
                }
                StreamDelta::Stop(_) => {}
            }
        }

        let args = tool_args.into_values().find(|a| !a.trim().is_empty());
        let value = extract_payload(args.as_deref(), &text, &schema.name)?;
        validate_required(&value, schema)?;
        Ok(value)
    }

    /// [`complete_structured`](Self::complete_structured), deserialized into `T`.
    pub async fn complete_as<T: DeserializeOwned>(
        &self,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<T> {
        let value = self.complete_structured(prompt, schema).await?;
        serde_json::from_value(value).map_err(|e| BlueprintError::SchemaViolation {
            schema: schema.name.clone(),
            message: e.to_string(),
        })
    }
}

/// Pick the JSON payload: tool-call arguments first, then an object in the text.
fn extract_payload(
    tool_args: Option<&str>,
    text: &str,
    schema_name: &str,
) -> Result<serde_json::Value> {
    let violation = |message: String| BlueprintError::SchemaViolation {
        schema: schema_name.to_string(),
        message,
    };

    if let Some(args) = tool_args {
        return serde_json::from_str(args)
            .map_err(|e| violation(format!("tool arguments are not valid JSON: {}", e)));
    }

    let candidate = extract_json_object(text)
        .ok_or_else(|| violation("response contains no JSON object".to_string()))?;
    serde_json::from_str(candidate).map_err(|e| violation(format!("invalid JSON: {}", e)))
}

/// The outermost `{ ... }` span of `text`, ignoring any code fences around it.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn validate_required(value: &serde_json::Value, schema: &OutputSchema) -> Result<()> {
    let obj = value
        .as_object()
        .ok_or_else(|| BlueprintError::SchemaViolation {
            schema: schema.name.clone(),
            message: "expected a JSON object".to_string(),
        })?;

    let missing: Vec<&str> = schema
        .required_keys()
        .into_iter()
        .filter(|key| !obj.contains_key(*key))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(BlueprintError::SchemaViolation {
            schema: schema.name.clone(),
            message: format!("missing required keys: {}", missing.join(", ")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_core::artifact::{CodeUnit, Plan};
    use blueprint_test_utils::{sample_plan, test_model_config, ScriptedLlm};
    use serde_json::json;

    fn client(llm: ScriptedLlm) -> StructuredClient {
        StructuredClient::new(Arc::new(llm), test_model_config())
    }

    #[test]
    fn test_extract_json_object_from_fenced_text() {
        let text = "Here you go:\n```json\n{\"a\": {\"b\": 1}}\n```\n";
        assert_eq!(extract_json_object(text), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_object("no braces"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[tokio::test]
    async fn test_tool_call_payload() {
        let plan = sample_plan(&["index.html", "app.js"]);
        let llm = ScriptedLlm::new().tool_call("Plan", serde_json::to_value(&plan).unwrap());

        let parsed: Plan = client(llm).complete_as("make it", &Plan::schema()).await.unwrap();
        assert_eq!(parsed, plan);
    }

    #[tokio::test]
    async fn test_text_fallback_payload() {
        let llm = ScriptedLlm::new()
            .text("```json\n{\"path\": \"index.html\", \"contents\": \"<html></html>\"}\n```");

        let unit: CodeUnit = client(llm)
            .complete_as("write it", &CodeUnit::schema())
            .await
            .unwrap();
        assert_eq!(unit.path, "index.html");
    }

    #[tokio::test]
    async fn test_missing_required_key_is_violation() {
        let llm = ScriptedLlm::new().tool_call("CodeUnit", json!({"path": "a.js"}));

        let err = client(llm)
            .complete_structured("write it", &CodeUnit::schema())
            .await
            .unwrap_err();
        match err {
            BlueprintError::SchemaViolation { schema, message } => {
                assert_eq!(schema, "CodeUnit");
                assert!(message.contains("contents"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_prose_answer_is_violation() {
        let llm = ScriptedLlm::new().text("Sorry, I cannot help with that.");
        let err = client(llm)
            .complete_structured("plan", &Plan::schema())
            .await
            .unwrap_err();
        assert!(matches!(err, BlueprintError::SchemaViolation { .. }));
    }

    #[tokio::test]
    async fn test_wrong_field_type_is_violation() {
        let llm = ScriptedLlm::new().tool_call(
            "CodeUnit",
            json!({"path": "a.js", "contents": ["not", "a", "string"]}),
        );
        let err = client(llm)
            .complete_as::<CodeUnit>("write it", &CodeUnit::schema())
            .await
            .unwrap_err();
        assert!(matches!(err, BlueprintError::SchemaViolation { .. }));
    }

    #[tokio::test]
    async fn test_upstream_error_passes_through() {
        let llm = ScriptedLlm::new().fail_with(BlueprintError::Upstream("HTTP 401".into()));
        let err = client(llm)
            .complete_structured("plan", &Plan::schema())
            .await
            .unwrap_err();
        assert!(matches!(err, BlueprintError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_schema_offered_as_only_tool() {
        let llm = ScriptedLlm::new().tool_call("Plan", serde_json::to_value(sample_plan(&["a"])).unwrap());
        let recorded = llm.recorder();
        client(llm)
            .complete_structured("make a site", &Plan::schema())
            .await
            .unwrap();

        let calls = recorded.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tools, vec!["Plan".to_string()]);
        assert!(calls[0].messages[1].content.contains("make a site"));
    }
}
