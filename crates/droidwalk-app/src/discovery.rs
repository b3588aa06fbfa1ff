//! Application bundle discovery
//!
//! Resolves the command-line path into the list of `.apk` files to test and
//! their package names.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use droidwalk_core::prelude::*;
use droidwalk_device::PackageInspector;

const APK_EXTENSION: &str = "apk";

/// An application bundle together with the package it installs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppBundle {
    pub path: PathBuf,
    pub package: String,
}

impl AppBundle {
    pub fn new(path: impl Into<PathBuf>, package: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            package: package.into(),
        }
    }

    /// File name for progress lines
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

fn is_apk(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(APK_EXTENSION))
}

/// Every `.apk` at or under `path`, sorted, without duplicates
pub fn find_apks(path: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    if path.is_file() {
        if is_apk(path) {
            found.push(path.to_path_buf());
        }
    } else if path.is_dir() {
        find_recursive(path, &mut found);
    }

    found.sort();

    // The same bundle reached through different paths is tested once
    let mut seen = HashSet::new();
    found.retain(|p| seen.insert(dunce::canonicalize(p).unwrap_or_else(|_| p.clone())));

    if found.is_empty() {
        return Err(Error::NoApplications {
            path: path.to_path_buf(),
        });
    }

    debug!("Found {} application bundle(s) under {:?}", found.len(), path);
    Ok(found)
}

fn find_recursive(dir: &Path, found: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(err) => {
            trace!("Cannot read directory {:?}: {}", dir, err);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            find_recursive(&path, found);
        } else if is_apk(&path) {
            found.push(path);
        }
    }
}

/// Read the tested-package ledger; a missing file is an empty ledger
pub fn read_tested(path: &Path) -> Result<HashSet<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashSet::new()),
        Err(e) => Err(e.into()),
    }
}

/// Resolve package names, dropping bundles that cannot be inspected and
/// those whose package is in `skip`
pub async fn resolve_bundles<I: PackageInspector>(
    apks: Vec<PathBuf>,
    inspector: &I,
    skip: &HashSet<String>,
) -> Vec<AppBundle> {
    let mut bundles = Vec::with_capacity(apks.len());
    for apk in apks {
        match inspector.package_name(&apk).await {
            Ok(package) if skip.contains(&package) => {
                info!("Skipping {} ({} already tested)", apk.display(), package);
            }
            Ok(package) => bundles.push(AppBundle::new(apk, package)),
            Err(e) => warn!("Skipping {}: {}", apk.display(), e),
        }
    }
    bundles
}
