//! Mocks and fixtures shared by the Blueprint test suites.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use blueprint_core::artifact::{ImplementationTask, Plan, PlannedFile, TaskPlan};
use blueprint_core::config::ModelConfig;
use blueprint_core::error::{BlueprintError, Result};
use blueprint_core::traits::{FileSystem, LlmClient};
use blueprint_core::types::{ChatMessage, StopReason, StreamDelta, ToolDefinition};

enum Scripted {
    Reply(Vec<StreamDelta>),
    Fail(BlueprintError),
}

/// One request seen by a [`ScriptedLlm`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
}

/// An [`LlmClient`] that replays queued replies in order and records every request.
///
/// Once the script runs out every call fails with `Upstream("script exhausted")`.
#[derive(Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Scripted>>,
    calls: Arc<AtomicUsize>,
    recorded: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain-text reply.
    pub fn text(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Reply(vec![
            StreamDelta::TextDelta(text.into()),
            StreamDelta::Stop(StopReason::EndTurn),
        ]))
    }

    /// Queue a reply that calls `name` with `args`, split across two deltas.
    pub fn tool_call(self, name: &str, args: serde_json::Value) -> Self {
        let json = args.to_string();
        let mid = json.char_indices().nth(json.chars().count() / 2).map_or(0, |(i, _)| i);
        self.push(Scripted::Reply(vec![
            StreamDelta::ToolUseStart {
                index: 0,
                id: "call_0".into(),
                name: name.into(),
            },
            StreamDelta::ToolInputDelta {
                index: 0,
                delta: json[..mid].to_string(),
            },
            StreamDelta::ToolInputDelta {
                index: 0,
                delta: json[mid..].to_string(),
            },
            StreamDelta::Stop(StopReason::ToolUse),
        ]))
    }

    /// Queue a failed request.
    pub fn fail_with(self, err: BlueprintError) -> Self {
        self.push(Scripted::Fail(err))
    }

    /// Counter of `chat_stream` calls, shared with the client.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// Requests seen so far, shared with the client.
    pub fn recorder(&self) -> Arc<Mutex<Vec<RecordedCall>>> {
        self.recorded.clone()
    }

    fn push(self, item: Scripted) -> Self {
        self.script.lock().unwrap().push_back(item);
        self
    }
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().unwrap().push(RecordedCall {
            messages,
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        let next = self.script.lock().unwrap().pop_front();

        Box::pin(async move {
            match next {
                Some(Scripted::Reply(deltas)) => {
                    let stream: BoxStream<'_, Result<StreamDelta>> =
                        stream::iter(deltas.into_iter().map(Ok::<_, BlueprintError>)).boxed();
                    Ok(stream)
                }
                Some(Scripted::Fail(e)) => Err(e),
                None => Err(BlueprintError::Upstream("script exhausted".into())),
            }
        })
    }
}

/// In-memory [`FileSystem`] rooted at a fake `/project`.
#[derive(Default, Clone)]
pub struct MemoryFs {
    files: Arc<Mutex<BTreeMap<String, String>>>,
    fail_writes: bool,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// A file system whose every write fails with `Io`.
    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_string());
        self
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

impl FileSystem for MemoryFs {
    fn write_file<'a>(&'a self, path: &'a str, contents: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.fail_writes {
                return Err(BlueprintError::Io {
                    path: path.to_string(),
                    message: "read-only file system".into(),
                });
            }
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), contents.to_string());
            Ok(())
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { Ok(self.contents(path).unwrap_or_default()) })
    }

    fn list_files<'a>(&'a self, dir: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let prefix = dir.trim_matches('/');
            Ok(self
                .paths()
                .into_iter()
                .filter(|p| prefix.is_empty() || prefix == "." || p.starts_with(&format!("{}/", prefix)))
                .collect())
        })
    }

    fn current_dir(&self) -> PathBuf {
        PathBuf::from("/project")
    }
}

/// Model config pointing nowhere, for scripted clients.
pub fn test_model_config() -> ModelConfig {
    ModelConfig {
        provider: "openai".into(),
        model_id: "test-model".into(),
        api_key: Some("sk-test".into()),
        base_url: Some("http://127.0.0.1:9/v1/chat/completions".into()),
        max_tokens: 1024,
        temperature: 0.0,
        retry: None,
        extra_headers: HashMap::new(),
    }
}

/// A plan listing `files` in order.
pub fn sample_plan(files: &[&str]) -> Plan {
    Plan {
        name: "Calculator".into(),
        description: "A simple calculator web application".into(),
        techstack: "HTML, CSS, JavaScript".into(),
        features: vec!["basic arithmetic".into(), "clear button".into()],
        files: files
            .iter()
            .map(|f| PlannedFile {
                path: f.to_string(),
                purpose: format!("implements {}", f),
            })
            .collect(),
    }
}

/// A task plan with one task per file, in order.
pub fn sample_task_plan(files: &[&str]) -> TaskPlan {
    TaskPlan {
        implementation_steps: files
            .iter()
            .map(|f| ImplementationTask {
                filepath: f.to_string(),
                task_description: format!("Write the full contents of {}", f),
            })
            .collect(),
    }
}

/// Write `content` to a temporary TOML file.
pub fn write_config(content: &str) -> tempfile::NamedTempFile {
    // Fail fast on fixtures that are not even valid TOML
    let _: toml::Table = toml::from_str(content).expect("fixture is valid TOML");
    let mut tmp = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write toml");
    tmp
}
