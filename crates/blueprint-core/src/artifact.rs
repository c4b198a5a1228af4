//! Artifacts the stages exchange through the shared state, and the JSON
//! schemas the LLM is asked to fill for each of them.

use serde::{Deserialize, Serialize};

use crate::types::OutputSchema;

/// A file the planner intends the project to contain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub path: String,
    pub purpose: String,
}

/// Project plan produced by the planner stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub description: String,
    pub techstack: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub files: Vec<PlannedFile>,
}

impl Plan {
    pub fn schema() -> OutputSchema {
        OutputSchema::new(
            "Plan",
            "Record the engineering plan for the requested project.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "The name of the project"
                    },
                    "description": {
                        "type": "string",
                        "description": "A one-line description of the app to build"
                    },
                    "techstack": {
                        "type": "string",
                        "description": "The technologies to be used, e.g. React, Node.js"
                    },
                    "features": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Features to implement"
                    },
                    "files": {
                        "type": "array",
                        "description": "Files to create, each with a path and purpose",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": { "type": "string" },
                                "purpose": { "type": "string" }
                            },
                            "required": ["path", "purpose"]
                        }
                    }
                },
                "required": ["name", "description", "techstack", "features", "files"]
            }),
        )
    }
}

/// One unit of work for the coder: which file to write and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationTask {
    pub filepath: String,
    pub task_description: String,
}

/// Per-file technical specification produced by the architect stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    #[serde(default)]
    pub implementation_steps: Vec<ImplementationTask>,
}

impl TaskPlan {
    pub fn schema() -> OutputSchema {
        OutputSchema::new(
            "TaskPlan",
            "Record the ordered implementation tasks, one per file.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "implementation_steps": {
                        "type": "array",
                        "description": "Ordered tasks; each names one file and what to put in it",
                        "items": {
                            "type": "object",
                            "properties": {
                                "filepath": {
                                    "type": "string",
                                    "description": "Path of the file to create or modify"
                                },
                                "task_description": {
                                    "type": "string",
                                    "description": "Detailed description of what to implement in this file"
                                }
                            },
                            "required": ["filepath", "task_description"]
                        }
                    }
                },
                "required": ["implementation_steps"]
            }),
        )
    }

    /// The task at position `step`, if any.
    ///
    /// Progress is tracked by position, so a file listed twice is worked on
    /// twice.
    pub fn task_at(&self, step: usize) -> Option<&ImplementationTask> {
        self.implementation_steps.get(step)
    }

    /// Number of tasks from position `step` onwards.
    pub fn remaining_from(&self, step: usize) -> usize {
        self.implementation_steps.len().saturating_sub(step)
    }
}

/// A single file emitted by the coder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeUnit {
    pub path: String,
    pub contents: String,
}

impl CodeUnit {
    pub fn schema() -> OutputSchema {
        OutputSchema::new(
            "CodeUnit",
            "Emit the complete contents of one file.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path of the file, relative to the project root"
                    },
                    "contents": {
                        "type": "string",
                        "description": "The full file contents"
                    }
                },
                "required": ["path", "contents"]
            }),
        )
    }
}
