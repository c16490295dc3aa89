//! Orchestrator configuration (YAML file + environment overrides)
//!
//! ```yaml
//! version: 1
//! data_dir: .infragram/runs
//! source_root: .infragram/sources
//! enhance: auto          # auto | always | never
//! parallel_variants: false
//! llm:
//!   base_url: https://api.openai.com/v1
//!   model: gpt-4o-mini
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Unsupported version
    #[error("Unsupported configuration version {found}. Supported versions: {}", supported.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    /// Invalid value for a field
    #[error("Invalid value '{value}' for '{field}'. {hint}")]
    InvalidValue {
        field: String,
        value: String,
        hint: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// When the `enhance` step runs
///
/// The default is `Auto`: enhance whenever a credential is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnhancePolicy {
    /// Enhance iff a credential is available
    #[default]
    Auto,
    /// Always attempt; fails the run without a credential
    Always,
    /// Never enhance
    Never,
}

impl EnhancePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnhancePolicy::Auto => "auto",
            EnhancePolicy::Always => "always",
            EnhancePolicy::Never => "never",
        }
    }

    /// Reason to skip enhancement, if any
    pub fn skip_reason(&self, has_credential: bool) -> Option<&'static str> {
        match self {
            EnhancePolicy::Never => Some("enhancement disabled"),
            EnhancePolicy::Auto if !has_credential => Some("no enhancement credential configured"),
            _ => None,
        }
    }
}

impl FromStr for EnhancePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(EnhancePolicy::Auto),
            "always" | "true" | "on" => Ok(EnhancePolicy::Always),
            "never" | "false" | "off" => Ok(EnhancePolicy::Never),
            _ => Err(ConfigError::InvalidValue {
                field: "enhance".to_string(),
                value: s.to_string(),
                hint: "Valid values: auto, always, never".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for EnhancePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// LLM endpoint used by the enhancer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default = "LlmConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "LlmConfig::default_model")]
    pub model: String,
}

impl LlmConfig {
    fn default_base_url() -> String {
        "https://api.openai.com/v1".to_string()
    }

    fn default_model() -> String {
        "gpt-4o-mini".to_string()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            model: Self::default_model(),
        }
    }
}

/// YAML Schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileV1 {
    /// Schema version (always 1 for v1)
    pub version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhance: Option<EnhancePolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_variants: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Root of the per-(project, run) directories
    pub data_dir: PathBuf,
    /// Root of local project checkouts (`<source_root>/<project id>`)
    pub source_root: PathBuf,
    pub enhance: EnhancePolicy,
    /// Run variants concurrently (reporting stays in variant order)
    pub parallel_variants: bool,
    pub llm: LlmConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".infragram/runs"),
            source_root: PathBuf::from(".infragram/sources"),
            enhance: EnhancePolicy::default(),
            parallel_variants: false,
            llm: LlmConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub const SUPPORTED_VERSIONS: &'static [u32] = &[1];

    /// Load from a YAML file on top of the defaults
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(content)?;

        // Version check
        if !Self::SUPPORTED_VERSIONS.contains(&file.version) {
            return Err(ConfigError::UnsupportedVersion {
                found: file.version,
                supported: Self::SUPPORTED_VERSIONS.to_vec(),
            });
        }

        let mut config = Self::default();
        if let Some(data_dir) = file.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(source_root) = file.source_root {
            config.source_root = source_root;
        }
        if let Some(enhance) = file.enhance {
            config.enhance = enhance;
        }
        if let Some(parallel) = file.parallel_variants {
            config.parallel_variants = parallel;
        }
        if let Some(llm) = file.llm {
            config.llm = llm;
        }
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = ConfigFileV1 {
            version: 1,
            data_dir: Some(self.data_dir.clone()),
            source_root: Some(self.source_root.clone()),
            enhance: Some(self.enhance),
            parallel_variants: Some(self.parallel_variants),
            llm: Some(self.llm.clone()),
        };
        serde_yaml::to_string(&file).map_err(ConfigError::Yaml)
    }

    /// Apply `INFRAGRAM_*` overrides read through `lookup`
    ///
    /// `INFRAGRAM_DATA_DIR`, `INFRAGRAM_SOURCE_ROOT`, `INFRAGRAM_ENHANCE`,
    /// `INFRAGRAM_LLM_BASE_URL`, `INFRAGRAM_LLM_MODEL`.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<Self> {
        if let Some(v) = lookup("INFRAGRAM_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("INFRAGRAM_SOURCE_ROOT") {
            self.source_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("INFRAGRAM_ENHANCE") {
            self.enhance = v.parse()?;
        }
        if let Some(v) = lookup("INFRAGRAM_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("INFRAGRAM_LLM_MODEL") {
            self.llm.model = v;
        }
        Ok(self)
    }

    /// Apply overrides from the process environment
    pub fn with_process_env(self) -> ConfigResult<Self> {
        self.with_env_overrides(|key| std::env::var(key).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_enhance_policy_default_is_auto() {
        assert_eq!(EnhancePolicy::default(), EnhancePolicy::Auto);
        assert_eq!(OrchestratorConfig::default().enhance, EnhancePolicy::Auto);
    }

    #[test]
    fn test_skip_reason() {
        assert!(EnhancePolicy::Auto.skip_reason(false).is_some());
        assert!(EnhancePolicy::Auto.skip_reason(true).is_none());
        assert!(EnhancePolicy::Always.skip_reason(false).is_none());
        assert!(EnhancePolicy::Never.skip_reason(true).is_some());
    }

    #[test]
    fn test_enhance_policy_from_str() {
        assert_eq!("ALWAYS".parse::<EnhancePolicy>().unwrap(), EnhancePolicy::Always);
        assert_eq!("off".parse::<EnhancePolicy>().unwrap(), EnhancePolicy::Never);
        assert!(matches!(
            "sometimes".parse::<EnhancePolicy>(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_yaml_loading() {
        let yaml_content = r#"
version: 1
data_dir: /var/lib/infragram
enhance: never
llm:
  model: local-model
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = OrchestratorConfig::from_yaml(temp_file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/infragram"));
        assert_eq!(config.enhance, EnhancePolicy::Never);
        assert_eq!(config.llm.model, "local-model");
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.source_root, PathBuf::from(".infragram/sources"));
    }

    #[test]
    fn test_yaml_missing_version() {
        let result = OrchestratorConfig::from_yaml_str("enhance: auto\n");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_yaml_unsupported_version() {
        let result = OrchestratorConfig::from_yaml_str("version: 2\n");
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::UnsupportedVersion { found: 2, .. }
        ));
    }

    #[test]
    fn test_yaml_unknown_field_rejected() {
        let result = OrchestratorConfig::from_yaml_str("version: 1\nretries: 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = OrchestratorConfig {
            enhance: EnhancePolicy::Always,
            parallel_variants: true,
            ..Default::default()
        };
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));
        assert!(yaml.contains("enhance: always"));

        let loaded = OrchestratorConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("INFRAGRAM_DATA_DIR", "/tmp/runs"),
            ("INFRAGRAM_ENHANCE", "never"),
        ]
        .into_iter()
        .collect();

        let config = OrchestratorConfig::default()
            .with_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/runs"));
        assert_eq!(config.enhance, EnhancePolicy::Never);
    }

    #[test]
    fn test_env_override_invalid_value() {
        let result = OrchestratorConfig::default().with_env_overrides(|k| {
            (k == "INFRAGRAM_ENHANCE").then(|| "maybe".to_string())
        });
        assert!(result.is_err());
    }
}
