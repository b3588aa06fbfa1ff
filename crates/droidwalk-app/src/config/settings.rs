//! Settings loading and validation

use std::path::{Path, PathBuf};

use droidwalk_core::prelude::*;

use super::types::Settings;

const CONFIG_FILENAME: &str = "config.toml";
const DROIDWALK_DIR: &str = ".droidwalk";
const TESTED_PKGS_FILENAME: &str = "tested_pkgs";

/// Path of the settings file under `base`
pub fn config_path(base: &Path) -> PathBuf {
    base.join(DROIDWALK_DIR).join(CONFIG_FILENAME)
}

/// Load settings from `.droidwalk/config.toml`
///
/// A missing or unreadable file yields defaults.
pub fn load_settings(base: &Path) -> Settings {
    let config_path = config_path(base);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

impl Settings {
    /// Reject settings that would make every attempt meaningless
    pub fn validate(&self) -> Result<()> {
        if self.run.runs_per_app == 0 {
            return Err(Error::config_invalid("run.runs_per_app must be at least 1"));
        }
        if self.run.testing_timeout_secs == 0 {
            return Err(Error::config_invalid(
                "run.testing_timeout_secs must be at least 1",
            ));
        }
        if self.output.random_text_length == 0 {
            return Err(Error::config_invalid(
                "output.random_text_length must be at least 1",
            ));
        }
        if self.timing.back_poll_ms == 0 {
            return Err(Error::config_invalid("timing.back_poll_ms must be at least 1"));
        }
        if self.timing.idle_backoff_initial_ms > self.timing.idle_backoff_max_ms {
            return Err(Error::config_invalid(
                "timing.idle_backoff_initial_ms exceeds timing.idle_backoff_max_ms",
            ));
        }
        Ok(())
    }

    /// Append-only list of package names tested so far
    pub fn tested_pkgs_path(&self) -> PathBuf {
        self.output.log_dir.join(TESTED_PKGS_FILENAME)
    }

    /// Lines for the startup banner
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            format!(" - Mode: {}", self.run.mode),
            format!(" - Random mode: {}", self.run.random),
            format!(
                " - Keep apps installed (no uninstall for login-required apps): {}",
                self.run.keep_installed
            ),
            format!(" - Runs per app: {}", self.run.runs_per_app),
            format!(" - Testing timeout: {}s", self.run.testing_timeout_secs),
        ]
    }
}
