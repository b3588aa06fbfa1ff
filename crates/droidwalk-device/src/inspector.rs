//! Package Inspector: reads package metadata out of an application bundle

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use droidwalk_core::prelude::*;

static PACKAGE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"package: name='([^']*)'").expect("Invalid package name regex")
});

static LAUNCHABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"launchable-activity: name='([^']*)'").expect("Invalid launchable activity regex")
});

#[trait_variant::make(PackageInspector: Send)]
pub trait LocalPackageInspector {
    /// Package identifier declared by the bundle
    async fn package_name(&self, apk: &Path) -> Result<String>;

    /// Activities with a launcher intent filter
    async fn launchable_activities(&self, apk: &Path) -> Result<Vec<String>>;
}

/// Extract the package name from `aapt dump badging` output
pub fn parse_package_name(badging: &str) -> Option<String> {
    PACKAGE_NAME_PATTERN
        .captures(badging)
        .map(|caps| caps[1].to_string())
}

/// Extract launchable activities from `aapt dump badging` output
pub fn parse_launchable_activities(badging: &str) -> Vec<String> {
    LAUNCHABLE_PATTERN
        .captures_iter(badging)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// `aapt dump badging`
#[derive(Debug, Clone)]
pub struct Aapt {
    aapt: PathBuf,
}

impl Aapt {
    pub fn new(aapt: impl Into<PathBuf>) -> Self {
        Self { aapt: aapt.into() }
    }

    async fn badging(&self, apk: &Path) -> Result<String> {
        let output = Command::new(&self.aapt)
            .arg("dump")
            .arg("badging")
            .arg(apk)
            .output()
            .await
            .map_err(|e| Error::inspect(apk, format!("Failed to run aapt: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::inspect(apk, stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl PackageInspector for Aapt {
    async fn package_name(&self, apk: &Path) -> Result<String> {
        let badging = self.badging(apk).await?;
        parse_package_name(&badging)
            .ok_or_else(|| Error::inspect(apk, "no package name in badging output"))
    }

    async fn launchable_activities(&self, apk: &Path) -> Result<Vec<String>> {
        let badging = self.badging(apk).await?;
        Ok(parse_launchable_activities(&badging))
    }
}
