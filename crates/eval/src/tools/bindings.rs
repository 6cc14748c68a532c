//! On-disk tool bindings (`.namel3ss/tools.yaml`).
//!
//! ```yaml
//! tools:
//!   get_weather: "tools.weather:get_weather"
//!   summarize:
//!     kind: node
//!     entry: "tools/summarize.js:run"
//!     purity: pure
//!     timeout_ms: 2000
//!     sha256: "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
//! ```
//!
//! The short form binds a python entry.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use namel3ss_ir::ToolKind;

use crate::error::RuntimeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBinding {
    pub kind: ToolKind,
    pub entry: String,
    pub purity: Option<String>,
    pub timeout_ms: Option<u64>,
    pub sha256: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBinding {
    Short(String),
    Full {
        kind: ToolKind,
        entry: String,
        #[serde(default)]
        purity: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        sha256: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BindingsFile {
    #[serde(default)]
    tools: BTreeMap<String, RawBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolBindings {
    tools: BTreeMap<String, ToolBinding>,
}

impl ToolBindings {
    /// Load the bindings file. A missing file means no bindings.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_yaml_str(&text)
                .map_err(|e| RuntimeError::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(RuntimeError::Config(format!("{}: {}", path.display(), e))),
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, String> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: BindingsFile = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
        let mut tools = BTreeMap::new();
        for (name, raw) in file.tools {
            let binding = match raw {
                RawBinding::Short(entry) => ToolBinding {
                    kind: ToolKind::Python,
                    entry,
                    purity: None,
                    timeout_ms: None,
                    sha256: None,
                },
                RawBinding::Full {
                    kind,
                    entry,
                    purity,
                    timeout_ms,
                    sha256,
                } => ToolBinding {
                    kind,
                    entry,
                    purity,
                    timeout_ms,
                    sha256: sha256.map(|s| s.to_ascii_lowercase()),
                },
            };
            validate(&name, &binding)?;
            tools.insert(name, binding);
        }
        Ok(ToolBindings { tools })
    }

    pub fn get(&self, tool: &str) -> Option<&ToolBinding> {
        self.tools.get(tool)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn validate(name: &str, binding: &ToolBinding) -> Result<(), String> {
    if !binding.kind.needs_binding() {
        return Err(format!("tool \"{}\": bindings must be python or node", name));
    }
    if binding.entry.trim().is_empty() {
        return Err(format!("tool \"{}\": entry is empty", name));
    }
    if let Some(purity) = &binding.purity {
        if purity != "pure" && purity != "impure" {
            return Err(format!("tool \"{}\": purity must be pure or impure", name));
        }
    }
    if binding.timeout_ms == Some(0) {
        return Err(format!("tool \"{}\": timeout_ms must be positive", name));
    }
    Ok(())
}

impl ToolBinding {
    /// Source file the entry points at, relative to the project root.
    /// Python entries are `package.module:function`; node entries are
    /// `path/to/file.js:export`.
    pub fn source_file(&self, project_root: &Path) -> PathBuf {
        let target = match self.entry.rsplit_once(':') {
            Some((target, _)) => target,
            None => self.entry.as_str(),
        };
        match self.kind {
            ToolKind::Python => project_root.join(format!("{}.py", target.replace('.', "/"))),
            ToolKind::Node | ToolKind::Builtin => project_root.join(target),
        }
    }

    /// Check the pinned digest, if any, against the entry's source file.
    pub fn verify(&self, project_root: &Path) -> bool {
        let Some(expected) = &self.sha256 else {
            return true;
        };
        let Ok(bytes) = fs::read(self.source_file(project_root)) else {
            return false;
        };
        hex(&Sha256::digest(&bytes)) == *expected
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
