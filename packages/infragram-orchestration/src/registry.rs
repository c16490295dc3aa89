//! Project registry (read-only input)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{ConfigError, ConfigResult};

/// Source file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileFormat {
    DockerCompose,
    Helm,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::DockerCompose => "docker-compose",
            FileFormat::Helm => "helm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Path relative to the project source root
    pub path: String,
    pub format: FileFormat,
}

/// Project registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub id: String,
    pub name: String,
    pub repo: String,
    /// Explicit sources; default file selection applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileDescriptor>>,
}

impl ProjectEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            repo: repo.into(),
            files: None,
        }
    }

    pub fn with_files(mut self, files: Vec<FileDescriptor>) -> Self {
        self.files = Some(files);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectRegistry {
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
}

impl ProjectRegistry {
    /// Load a registry file; `.json` is read as JSON, anything else as YAML
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let registry: ProjectRegistry = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> ConfigResult<()> {
        let mut seen = std::collections::HashSet::new();
        for project in &self.projects {
            if !infragram_storage::is_safe_id(&project.id) {
                return Err(ConfigError::InvalidValue {
                    field: "projects[].id".to_string(),
                    value: project.id.clone(),
                    hint: "Project ids are used as directory names: use [A-Za-z0-9._-]".to_string(),
                });
            }
            if !seen.insert(project.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "projects[].id".to_string(),
                    value: project.id.clone(),
                    hint: "Project ids must be unique".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ProjectEntry> {
        self.projects.iter().find(|p| p.id == id)
    }
}
