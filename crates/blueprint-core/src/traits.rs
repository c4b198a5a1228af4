use std::path::PathBuf;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// LLM client for OpenAI-compatible streaming chat.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// File system the coder stage writes the generated project through.
///
/// Paths are relative to the project root. Implementations reject paths
/// that resolve outside of it.
pub trait FileSystem: Send + Sync + 'static {
    /// Write `contents` to `path`, creating parent directories.
    fn write_file<'a>(&'a self, path: &'a str, contents: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Read a file. A file that does not exist reads as an empty string.
    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<String>>;

    /// List regular files under `dir`, recursively, sorted, relative to the root.
    fn list_files<'a>(&'a self, dir: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;

    /// The project root.
    fn current_dir(&self) -> PathBuf;
}
