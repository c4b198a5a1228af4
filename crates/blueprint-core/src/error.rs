use thiserror::Error;

use crate::state::SharedState;
use crate::types::StageKind;

#[derive(Debug, Error)]
pub enum BlueprintError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    Upstream(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("Response does not match schema {schema}: {message}")]
    SchemaViolation { schema: String, message: String },

    // Stage errors
    #[error("Missing required state key: {key}")]
    MissingInput { key: String },

    #[error("Stage {stage} failed: {source}")]
    StageExecution {
        stage: StageKind,
        snapshot: Box<SharedState>,
        source: Box<BlueprintError>,
    },

    // Engine errors
    #[error("Step limit exceeded: stage {stage} already ran {max_steps} times")]
    StepLimitExceeded {
        stage: StageKind,
        max_steps: usize,
        snapshot: Box<SharedState>,
    },

    #[error("Stage {stage} left a malformed status marker: {value}")]
    MalformedStatus { stage: StageKind, value: String },

    #[error("Workflow graph error: {0}")]
    Graph(String),

    // File system errors
    #[error("I/O error: {path}: {message}")]
    Io { path: String, message: String },

    #[error("Path escapes project root: {0}")]
    PathEscape(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BlueprintError {
    /// Wrap an error raised inside a stage, keeping the state the stage saw.
    pub fn stage_failed(stage: StageKind, snapshot: &SharedState, source: BlueprintError) -> Self {
        Self::StageExecution {
            stage,
            snapshot: Box::new(snapshot.clone()),
            source: Box::new(source),
        }
    }

    /// The stage an engine-level failure is attributed to.
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            Self::StageExecution { stage, .. }
            | Self::StepLimitExceeded { stage, .. }
            | Self::MalformedStatus { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Last known state of the run, when the failure carries one.
    pub fn snapshot(&self) -> Option<&SharedState> {
        match self {
            Self::StageExecution { snapshot, .. } | Self::StepLimitExceeded { snapshot, .. } => {
                Some(snapshot)
            }
            _ => None,
        }
    }

    /// The innermost error, looking through `StageExecution` wrappers.
    pub fn root_cause(&self) -> &BlueprintError {
        match self {
            Self::StageExecution { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_step_limit(&self) -> bool {
        matches!(self, Self::StepLimitExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, BlueprintError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failed_keeps_context() {
        let mut state = SharedState::new();
        state.set_str("user_prompt", "build a todo app");

        let err = BlueprintError::stage_failed(
            StageKind::Architect,
            &state,
            BlueprintError::Upstream("HTTP 503".into()),
        );

        assert_eq!(err.stage(), Some(StageKind::Architect));
        assert_eq!(
            err.snapshot().and_then(|s| s.get_str("user_prompt")),
            Some("build a todo app")
        );
        assert!(matches!(err.root_cause(), BlueprintError::Upstream(_)));
        assert!(err.to_string().contains("architect"));
        assert!(!err.is_step_limit());
    }

    #[test]
    fn test_step_limit_display() {
        let err = BlueprintError::StepLimitExceeded {
            stage: StageKind::Coder,
            max_steps: 10,
            snapshot: Box::default(),
        };
        assert!(err.is_step_limit());
        assert_eq!(
            err.to_string(),
            "Step limit exceeded: stage coder already ran 10 times"
        );
    }

    #[test]
    fn test_root_cause_of_plain_error() {
        let err = BlueprintError::Config("bad".into());
        assert!(matches!(err.root_cause(), BlueprintError::Config(_)));
        assert!(err.stage().is_none());
        assert!(err.snapshot().is_none());
    }
}
