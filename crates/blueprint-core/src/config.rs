use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BlueprintError, Result};

/// Top-level Blueprint configuration.
///
/// Loaded once at startup and read-only afterwards; stages receive the
/// pieces they need through their context instead of reading globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum executions of any single stage in one run.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Root directory the coder writes the generated project into.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Treat a missing or unknown status marker after the coder as an error
    /// instead of another coder turn.
    #[serde(default)]
    pub strict_status: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            output_dir: default_output_dir(),
            strict_status: false,
        }
    }
}

fn default_max_steps() -> usize { 100 }
fn default_output_dir() -> String { "generated_project".to_string() }

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Raise the default log filter to debug.
    #[serde(default)]
    pub debug: bool,
    /// Write every pipeline event to a JSONL run log.
    #[serde(default)]
    pub run_log: bool,
    /// Directory for run logs.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            run_log: false,
            log_dir: default_log_dir(),
        }
    }
}

fn default_log_dir() -> String { ".blueprint/logs".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Extra HTTP headers sent with every request (merged over preset headers).
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

fn default_provider() -> String { "groq".to_string() }
fn default_model_id() -> String { "openai/gpt-oss-120b".to_string() }
fn default_max_tokens() -> u32 { 8192 }
fn default_temperature() -> f32 { 0.0 }

impl ModelConfig {
    /// Copy with the API key masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.api_key.is_some() {
            copy.api_key = Some("***".to_string());
        }
        copy
    }
}

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| BlueprintError::ConfigNotFound(path.display().to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse config from TOML text, expanding `${ENV_VAR}` references.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| BlueprintError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to [`from_env`](Self::from_env).
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::from_env())
        }
    }

    /// Built-in defaults: Groq with the key taken from `GROQ_API_KEY`.
    pub fn from_env() -> Self {
        Self {
            model: ModelConfig {
                provider: default_provider(),
                model_id: default_model_id(),
                api_key: std::env::var("GROQ_API_KEY").ok(),
                base_url: None,
                max_tokens: default_max_tokens(),
                temperature: default_temperature(),
                retry: Some(RetryConfig::default()),
                extra_headers: HashMap::new(),
            },
            fallback_models: vec![],
            pipeline: PipelineConfig::default(),
            log: LogConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.model_id.trim().is_empty() {
            return Err(BlueprintError::Config("model.model_id must not be empty".into()));
        }
        if self.pipeline.max_steps == 0 {
            return Err(BlueprintError::Config(
                "pipeline.max_steps must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the project output directory (expand ~).
    pub fn output_dir(&self) -> PathBuf {
        expand_home(&self.pipeline.output_dir)
    }

    /// Resolve the run log directory (expand ~).
    pub fn log_dir(&self) -> PathBuf {
        expand_home(&self.log.log_dir)
    }

    /// Copy with every API key masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.model = self.model.redacted();
        copy.fallback_models = self.fallback_models.iter().map(|m| m.redacted()).collect();
        copy
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
