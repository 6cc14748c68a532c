//! Runtime configuration, loaded from TOML.
//!
//! ```toml
//! project_root = "."
//!
//! [store]
//! strict_sql = false
//!
//! [tools]
//! allowed_capabilities = ["network"]
//! denied_tools = ["shell"]
//! default_timeout_ms = 10000
//! bindings_path = ".namel3ss/tools.yaml"
//!
//! [ai]
//! max_tool_rounds = 4
//! max_agent_calls = 5
//!
//! [limits]
//! max_repeat_while = 10000
//! max_call_depth = 32
//!
//! [secrets]
//! STRIPE_KEY = "sk_test"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub store: StoreConfig,
    pub tools: ToolsConfig,
    pub ai: AiConfig,
    pub limits: LimitsConfig,
    pub secrets: BTreeMap<String, String>,
    /// Base directory for tool bindings and subprocess working directories.
    pub project_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Fail a record query instead of falling back to closure evaluation
    /// when a SQL-capable store receives a predicate that does not compile.
    pub strict_sql: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// When set, every capability a tool requires must be listed here.
    pub allowed_capabilities: Option<Vec<String>>,
    pub denied_tools: Vec<String>,
    pub default_timeout_ms: u64,
    pub python: String,
    pub node: String,
    pub bindings_path: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        ToolsConfig {
            allowed_capabilities: None,
            denied_tools: Vec::new(),
            default_timeout_ms: 10_000,
            python: "python3".to_string(),
            node: "node".to_string(),
            bindings_path: PathBuf::from(".namel3ss/tools.yaml"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub max_tool_rounds: u32,
    pub max_agent_calls: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        AiConfig {
            max_tool_rounds: 4,
            max_agent_calls: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_repeat_while: u64,
    pub max_call_depth: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_repeat_while: 10_000,
            max_call_depth: 32,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, RuntimeError> {
        toml::from_str(text).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    /// Read and parse a config file. A relative `project_root` is resolved
    /// against the file's directory.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&text)?;
        let base = path.parent().unwrap_or(Path::new("."));
        config.project_root = Some(match config.project_root.take() {
            Some(root) if root.is_absolute() => root,
            Some(root) => base.join(root),
            None => base.to_path_buf(),
        });
        tracing::debug!(path = %path.display(), "loaded runtime config");
        Ok(config)
    }

    pub fn project_root(&self) -> &Path {
        self.project_root.as_deref().unwrap_or(Path::new("."))
    }

    /// Location of the tool bindings file.
    pub fn bindings_file(&self) -> PathBuf {
        if self.tools.bindings_path.is_absolute() {
            self.tools.bindings_path.clone()
        } else {
            self.project_root().join(&self.tools.bindings_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.tools.default_timeout_ms, 10_000);
        assert_eq!(config.ai.max_tool_rounds, 4);
        assert!(!config.store.strict_sql);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [tools]
            denied_tools = ["shell"]

            [limits]
            max_call_depth = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.tools.denied_tools, vec!["shell".to_string()]);
        assert_eq!(config.tools.python, "python3");
        assert_eq!(config.limits.max_call_depth, 4);
        assert_eq!(config.limits.max_repeat_while, 10_000);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = RuntimeConfig::from_toml_str("[tools\n").unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
