//! Tool availability checking for the host
//!
//! Resolves the external binaries exploration shells out to: `adb` (device
//! control and UI dumps), `aapt` (package inspection) and `dot` (diagram
//! rendering). `adb` and `aapt` are required; `dot` is optional.

use std::path::{Path, PathBuf};

use droidwalk_core::prelude::*;

/// Resolved paths of external tools (run once at startup)
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    pub adb: Option<PathBuf>,
    pub aapt: Option<PathBuf>,
    pub dot: Option<PathBuf>,
}

impl ToolAvailability {
    /// Resolve each tool from its configured name or path
    pub fn check(adb: &str, aapt: &str, dot: &str) -> Self {
        let adb = resolve(adb, &Self::sdk_candidates("platform-tools", "adb"));
        let aapt = resolve(aapt, &Self::build_tools_candidates("aapt"));
        let dot = resolve(dot, &[]);

        debug!(
            "Tool availability: adb={:?} aapt={:?} dot={:?}",
            adb, aapt, dot
        );

        Self { adb, aapt, dot }
    }

    /// Fail run-fatally unless both device-side tools were found
    pub fn require(&self) -> Result<(PathBuf, PathBuf)> {
        let adb = self
            .adb
            .clone()
            .ok_or_else(|| Error::tool_not_found("adb"))?;
        let aapt = self
            .aapt
            .clone()
            .ok_or_else(|| Error::tool_not_found("aapt"))?;
        Ok((adb, aapt))
    }

    pub fn can_render_pdf(&self) -> bool {
        self.dot.is_some()
    }

    /// User-facing hint when diagrams will only be written as DOT source
    pub fn dot_unavailable_message(&self) -> Option<&'static str> {
        if self.dot.is_some() {
            None
        } else {
            Some("Graphviz `dot` not found; graph diagrams will be written as .dot only.")
        }
    }

    /// `$ANDROID_HOME/<sub>/<tool>` and `$ANDROID_SDK_ROOT/<sub>/<tool>`
    fn sdk_candidates(sub: &str, tool: &str) -> Vec<PathBuf> {
        Self::sdk_roots()
            .into_iter()
            .map(|root| root.join(sub).join(tool))
            .collect()
    }

    /// Newest `build-tools/<version>/<tool>` under each SDK root
    fn build_tools_candidates(tool: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for root in Self::sdk_roots() {
            let Ok(entries) = std::fs::read_dir(root.join("build-tools")) else {
                continue;
            };
            let mut versions: Vec<PathBuf> = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|dir| dir.join(tool).is_file())
                .collect();
            versions.sort();
            if let Some(newest) = versions.pop() {
                paths.push(newest.join(tool));
            }
        }
        paths
    }

    fn sdk_roots() -> Vec<PathBuf> {
        ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
            .iter()
            .filter_map(|var| std::env::var_os(var))
            .map(PathBuf::from)
            .collect()
    }
}

/// Configured path if it exists, then `PATH`, then SDK fallbacks
fn resolve(configured: &str, fallbacks: &[PathBuf]) -> Option<PathBuf> {
    let as_path = Path::new(configured);
    if as_path.components().count() > 1 && as_path.is_file() {
        return Some(as_path.to_path_buf());
    }

    if let Ok(found) = which::which(configured) {
        return Some(found);
    }

    fallbacks.iter().find(|p| p.is_file()).cloned()
}
