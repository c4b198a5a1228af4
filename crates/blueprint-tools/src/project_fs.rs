use std::path::{Component, Path, PathBuf};

use futures::future::BoxFuture;
use tracing::debug;

use blueprint_core::error::{BlueprintError, Result};
use blueprint_core::traits::FileSystem;

/// File system confined to a project root directory.
///
/// Every path is resolved against the root and normalized lexically; a path
/// that ends up outside the root is rejected with `PathEscape`.
pub struct ProjectFs {
    root: PathBuf,
}

impl ProjectFs {
    /// Create a file system rooted at `root`. A relative root is anchored at
    /// the process working directory. The directory is created lazily on the
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&root))
                .unwrap_or(root)
        };
        Self {
            root: normalize(&root),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` inside the project root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let candidate = PathBuf::from(path);
        let joined = if candidate.is_absolute() {
            candidate
        } else {
            self.root.join(candidate)
        };
        let resolved = normalize(&joined);
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(BlueprintError::PathEscape(path.to_string()))
        }
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Lexically normalize `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn io_error(path: &Path, e: std::io::Error) -> BlueprintError {
    BlueprintError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

impl FileSystem for ProjectFs {
    fn write_file<'a>(&'a self, path: &'a str, contents: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            debug!(path = %full.display(), bytes = contents.len(), "Writing file");

            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error(parent, e))?;
            }

            tokio::fs::write(&full, contents)
                .await
                .map_err(|e| io_error(&full, e))
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            match tokio::fs::read_to_string(&full).await {
                Ok(content) => Ok(content),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
                Err(e) => Err(io_error(&full, e)),
            }
        })
    }

    fn list_files<'a>(&'a self, dir: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let start = self.resolve(dir)?;
            if !tokio::fs::try_exists(&start).await.unwrap_or(false) {
                return Ok(vec![]);
            }

            let mut files = Vec::new();
            let mut pending = vec![start];
            while let Some(current) = pending.pop() {
                let mut entries = tokio::fs::read_dir(&current)
                    .await
                    .map_err(|e| io_error(&current, e))?;
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| io_error(&current, e))?
                {
                    let file_type = entry
                        .file_type()
                        .await
                        .map_err(|e| io_error(&entry.path(), e))?;
                    if file_type.is_dir() {
                        pending.push(entry.path());
                    } else if file_type.is_file() {
                        files.push(self.relative(&entry.path()));
                    }
                }
            }

            files.sort();
            Ok(files)
        })
    }

    fn current_dir(&self) -> PathBuf {
        self.root.clone()
    }
}
