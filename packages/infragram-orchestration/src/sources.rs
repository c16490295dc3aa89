//! Source files and credentials consumed by the pipeline

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::error::{OrchestratorError, Result};
use crate::registry::ProjectEntry;

/// Lists and reads a project's source files
///
/// Paths are relative to the project's source root and `/`-separated.
#[async_trait]
pub trait SourceFileLister: Send + Sync {
    async fn list_source_files(&self, project: &ProjectEntry) -> Result<Vec<String>>;

    async fn read_source_file(&self, project: &ProjectEntry, path: &str) -> Result<String>;
}

/// Local checkout at `<root>/<project id>`
pub struct LocalSourceLister {
    root: PathBuf,
}

impl LocalSourceLister {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn project_root(&self, project: &ProjectEntry) -> PathBuf {
        self.root.join(&project.id)
    }
}

#[async_trait]
impl SourceFileLister for LocalSourceLister {
    async fn list_source_files(&self, project: &ProjectEntry) -> Result<Vec<String>> {
        let root = self.project_root(project);
        if !root.is_dir() {
            return Err(OrchestratorError::configuration(format!(
                "Source directory not found for project {}: {}",
                project.id,
                root.display()
            )));
        }

        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
                // Skip hidden directories (.git, .github, ...)
                e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.')
            });
            for entry in walker {
                let entry = entry.map_err(|e| OrchestratorError::Io(e.into()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Ok(relative) = entry.path().strip_prefix(&root) {
                    let parts: Vec<_> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().to_string())
                        .collect();
                    files.push(parts.join("/"));
                }
            }
            files.sort();
            Ok(files)
        })
        .await
        .map_err(|e| OrchestratorError::Other(e.into()))?
    }

    async fn read_source_file(&self, project: &ProjectEntry, path: &str) -> Result<String> {
        if path.split('/').any(|part| part == "..") {
            return Err(OrchestratorError::configuration(format!(
                "Source path escapes the project root: {}",
                path
            )));
        }
        let full = self.project_root(project).join(path);
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| OrchestratorError::step(format!("{}: {}", path, e)))
    }
}

/// Fixed in-memory source tree
#[derive(Debug, Clone, Default)]
pub struct MemorySourceLister {
    files: BTreeMap<String, String>,
}

impl MemorySourceLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }
}

#[async_trait]
impl SourceFileLister for MemorySourceLister {
    async fn list_source_files(&self, _project: &ProjectEntry) -> Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    async fn read_source_file(&self, _project: &ProjectEntry, path: &str) -> Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| OrchestratorError::step(format!("{}: file not found", path)))
    }
}

/// Enhancement credential (API key)
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

pub trait CredentialProvider: Send + Sync {
    fn get_credential(&self) -> Option<Credential>;
}

/// `INFRAGRAM_LLM_API_KEY`, then `OPENAI_API_KEY`
pub struct EnvCredentialProvider;

impl EnvCredentialProvider {
    pub const VARS: [&'static str; 2] = ["INFRAGRAM_LLM_API_KEY", "OPENAI_API_KEY"];

    /// First non-empty variable, read through `lookup`
    pub fn lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Credential> {
        Self::VARS
            .iter()
            .filter_map(|var| lookup(var))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
            .map(Credential)
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn get_credential(&self) -> Option<Credential> {
        Self::lookup(|var| std::env::var(var).ok())
    }
}
