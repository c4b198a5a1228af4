use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BlueprintError, Result};

/// Well-known state keys written by the pipeline stages.
pub mod keys {
    pub const USER_PROMPT: &str = "user_prompt";
    pub const PLAN: &str = "plan";
    pub const TASK_PLAN: &str = "task_plan";
    pub const COMPLETED_FILES: &str = "completed_files";
    pub const CURRENT_STEP: &str = "current_step";
    pub const STATUS: &str = "status";
}

/// Status marker value that ends the coder loop.
pub const STATUS_DONE: &str = "DONE";
/// Status marker value that keeps the coder loop going.
pub const STATUS_CONTINUE: &str = "CONTINUE";

/// Shared state threaded through every stage of a run.
///
/// Keys are strings; values are JSON and opaque to the engine, which only
/// ever looks at the status marker. Stages return their contribution as
/// another `SharedState` and the executor merges it on top, so a stage can
/// overwrite a key but never remove one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedState {
    data: HashMap<String, serde_json::Value>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the initial state of a run from the user's request.
    pub fn with_request(prompt: impl Into<String>) -> Self {
        let mut state = Self::new();
        state.set_str(keys::USER_PROMPT, prompt);
        state
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Get a value by key, falling back to `default` when absent.
    pub fn get_or(&self, key: &str, default: serde_json::Value) -> serde_json::Value {
        self.data.get(key).cloned().unwrap_or(default)
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Deserialize the value under `key`.
    ///
    /// Absent keys yield `Ok(None)`; a present value of the wrong shape is a
    /// `SchemaViolation`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| BlueprintError::SchemaViolation {
                    schema: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Like [`get_as`](Self::get_as) but absence is a `MissingInput` error.
    pub fn require_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_as(key)?.ok_or_else(|| BlueprintError::MissingInput {
            key: key.to_string(),
        })
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data
            .insert(key.into(), serde_json::Value::String(value.into()));
    }

    /// Serialize `value` and store it under `key`.
    pub fn set_as<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        self.data.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Merge another state into this one (overwrites on conflict).
    pub fn merge(&mut self, other: SharedState) {
        self.data.extend(other.data);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.data.keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn user_prompt(&self) -> Option<&str> {
        self.get_str(keys::USER_PROMPT)
    }

    /// The status marker, if present and a string.
    pub fn status(&self) -> Option<&str> {
        self.get_str(keys::STATUS)
    }

    pub fn is_done(&self) -> bool {
        self.status() == Some(STATUS_DONE)
    }

    /// Paths already written by the coder, in write order.
    ///
    /// Non-string entries are skipped.
    pub fn completed_files(&self) -> Vec<String> {
        self.data
            .get(keys::COMPLETED_FILES)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Index of the next task in the task plan. Absent or non-integer is 0.
    pub fn current_step(&self) -> usize {
        self.data
            .get(keys::CURRENT_STEP)
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(0)
    }

    /// Get the underlying data map.
    pub fn data(&self) -> &HashMap<String, serde_json::Value> {
        &self.data
    }
}
