//! Generated project layout, platform targets and the file writer.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::c;
use crate::plan::NumericFlowPlan;
use crate::CodegenError;

/// Platform the shared library is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Linux,
    MacOs,
    Windows,
}

impl Target {
    /// The platform this crate was compiled for. Unknown unix-likes are
    /// treated as Linux.
    pub fn host() -> Self {
        if cfg!(target_os = "windows") {
            Target::Windows
        } else if cfg!(target_os = "macos") {
            Target::MacOs
        } else {
            Target::Linux
        }
    }

    pub fn artifact_name(self, flow_slug: &str) -> String {
        match self {
            Target::Windows => format!("{}.dll", flow_slug),
            Target::MacOs => format!("lib{}.dylib", flow_slug),
            Target::Linux => format!("lib{}.so", flow_slug),
        }
    }

    pub(crate) fn compiler_flags(self) -> &'static [&'static str] {
        match self {
            Target::Windows => &["-shared", "-O2"],
            Target::MacOs => &["-dynamiclib", "-O2", "-fPIC"],
            Target::Linux => &["-shared", "-O2", "-fPIC"],
        }
    }

    fn build_command(self, flow_slug: &str) -> Vec<String> {
        let mut cmd = vec!["cc".to_string()];
        cmd.extend(self.compiler_flags().iter().map(|f| f.to_string()));
        cmd.push("-o".to_string());
        cmd.push(self.artifact_name(flow_slug));
        cmd.push(format!("{}.c", flow_slug));
        cmd.push("-lm".to_string());
        cmd
    }
}

/// Files of a generated C project, keyed by path relative to the project
/// root, plus how to build it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedProject {
    pub flow_name: String,
    pub slug: String,
    pub target: Target,
    pub files: BTreeMap<PathBuf, String>,
    /// Shared library produced by `build_command`, relative to the root.
    pub artifact: PathBuf,
    pub header: PathBuf,
    pub build_command: Vec<String>,
}

impl GeneratedProject {
    pub fn source(&self) -> Option<&str> {
        self.files
            .get(Path::new(&format!("{}.c", self.slug)))
            .map(String::as_str)
    }

    /// Write every file under `out_root/<slug>/c/` and return that directory.
    pub fn write_project(&self, out_root: &Path) -> Result<PathBuf, CodegenError> {
        let root = out_root.join(&self.slug).join("c");
        fs::create_dir_all(&root)?;
        for (relative, contents) in &self.files {
            let path = root.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)
                .map_err(|e| CodegenError::Io(format!("{}: {}", path.display(), e)))?;
        }
        tracing::debug!(
            flow = %self.flow_name,
            root = %root.display(),
            files = self.files.len(),
            "native project written"
        );
        Ok(root)
    }
}

/// Render `plan` as a C project for `target`.
pub fn generate_native_project(plan: &NumericFlowPlan, target: Target) -> GeneratedProject {
    let flow_slug = slug(&plan.flow_name);
    let artifact = target.artifact_name(&flow_slug);
    let build_command = target.build_command(&flow_slug);
    let header = PathBuf::from("namel3ss.h");

    let mut files = BTreeMap::new();
    files.insert(PathBuf::from(format!("{}.c", flow_slug)), c::render_source(plan));
    files.insert(header.clone(), c::render_header(&flow_slug));
    files.insert(
        PathBuf::from("Makefile"),
        c::render_makefile(&flow_slug, &artifact, target),
    );
    files.insert(
        PathBuf::from("README.md"),
        c::render_readme(&flow_slug, &artifact, &build_command),
    );

    GeneratedProject {
        flow_name: plan.flow_name.clone(),
        slug: flow_slug,
        target,
        files,
        artifact: PathBuf::from(artifact),
        header,
        build_command,
    }
}

/// Lowercase identifier form of a flow or field name: ASCII alphanumerics
/// kept, runs of anything else collapsed to one `_`, never empty and never
/// starting with a digit.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let mapped = if ch.is_ascii_alphanumeric() {
            ch.to_ascii_lowercase()
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        return "flow".to_string();
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        return format!("flow_{}", trimmed);
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_rules() {
        assert_eq!(slug("Price Quote"), "price_quote");
        assert_eq!(slug("__tax--rate__"), "tax_rate");
        assert_eq!(slug("2024 totals"), "flow_2024_totals");
        assert_eq!(slug("!!!"), "flow");
        assert_eq!(slug("café"), "caf");
    }

    #[test]
    fn artifact_names_follow_the_platform() {
        assert_eq!(Target::Linux.artifact_name("calc"), "libcalc.so");
        assert_eq!(Target::MacOs.artifact_name("calc"), "libcalc.dylib");
        assert_eq!(Target::Windows.artifact_name("calc"), "calc.dll");
    }

    #[test]
    fn build_command_links_libm() {
        assert_eq!(
            Target::Linux.build_command("calc"),
            vec!["cc", "-shared", "-O2", "-fPIC", "-o", "libcalc.so", "calc.c", "-lm"]
        );
        assert_eq!(Target::MacOs.build_command("calc")[1], "-dynamiclib");
    }
}
