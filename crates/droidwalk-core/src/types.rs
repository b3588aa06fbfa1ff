//! Core domain types: devices, verdicts and run records

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Devices
// ─────────────────────────────────────────────────────────────────────────────

/// Role a device plays for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    Leader,
    Follower,
    Independent,
}

impl DeviceRole {
    pub fn is_leader(&self) -> bool {
        matches!(self, DeviceRole::Leader)
    }
}

/// A connected device as seen at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// adb serial (e.g. "emulator-5554")
    pub serial: String,

    /// Android release string from `ro.build.version.release`
    pub os_version: String,

    pub role: DeviceRole,
}

impl DeviceInfo {
    pub fn new(serial: impl Into<String>, os_version: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            os_version: os_version.into(),
            role: DeviceRole::Independent,
        }
    }

    pub fn with_role(mut self, role: DeviceRole) -> Self {
        self.role = role;
        self
    }

    /// API level derived from the OS version, if known
    pub fn api_level(&self) -> Option<u32> {
        api_level(&self.os_version)
    }

    /// Line used in the settings banner
    pub fn display_line(&self) -> String {
        let mut line = match self.api_level() {
            Some(api) => format!(
                "{} (Android version: {}, API {})",
                self.serial, self.os_version, api
            ),
            None => format!("{} (Android version: {})", self.serial, self.os_version),
        };
        if self.role.is_leader() {
            line.push_str(" <- leader");
        }
        line
    }
}

/// Android release → API level
///
/// Covers 4.0 (API 14) through 12 (API 31).
pub fn api_level(os_version: &str) -> Option<u32> {
    let api = match os_version.trim() {
        "4.0" | "4.0.1" | "4.0.2" => 14,
        "4.0.3" | "4.0.4" => 15,
        "4.1" | "4.1.1" | "4.1.2" => 16,
        "4.2" | "4.2.1" | "4.2.2" => 17,
        "4.3" | "4.3.1" => 18,
        "4.4" | "4.4.1" | "4.4.2" | "4.4.3" | "4.4.4" => 19,
        "4.4W" | "4.4W.1" | "4.4W.2" => 20,
        "5.0" | "5.0.1" | "5.0.2" => 21,
        "5.1" | "5.1.1" => 22,
        "6.0" | "6.0.1" => 23,
        "7.0" => 24,
        "7.1" | "7.1.1" | "7.1.2" => 25,
        "8.0" | "8.0.0" => 26,
        "8.1" | "8.1.0" => 27,
        "9" => 28,
        "10" => 29,
        "11" => 30,
        "12" => 31,
        _ => return None,
    };
    Some(api)
}

// ─────────────────────────────────────────────────────────────────────────────
// Verdicts
// ─────────────────────────────────────────────────────────────────────────────

/// Why a finished attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Device disappeared from the connected list
    Hung,
    /// The application under test was not in the foreground
    NotForeground,
    /// A runtime-error signature was found in the captured log
    RuntimeError,
    /// Follower graph is not isomorphic to the leader's
    GraphMismatch,
}

impl FailureCause {
    /// Numeric code written to the results ledger
    pub fn code(&self) -> u8 {
        match self {
            FailureCause::Hung => 1,
            FailureCause::NotForeground => 2,
            FailureCause::RuntimeError => 3,
            FailureCause::GraphMismatch => 4,
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureCause::Hung => "hung",
            FailureCause::NotForeground => "not-foreground",
            FailureCause::RuntimeError => "runtime-error",
            FailureCause::GraphMismatch => "graph-mismatch",
        };
        f.write_str(s)
    }
}

/// Final classification of one (application, attempt, device)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict", content = "cause")]
pub enum Verdict {
    Success,
    Failed(FailureCause),
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success)
    }

    pub fn cause(&self) -> Option<FailureCause> {
        match self {
            Verdict::Success => None,
            Verdict::Failed(cause) => Some(*cause),
        }
    }
}

/// How the exploration loop of an attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum AttemptOutcome {
    /// Back-navigation reached the root with nothing left to visit
    Exhausted,
    /// The wall-clock testing timeout expired first
    TimedOut,
    /// An attempt-fatal error ended exploration
    Aborted(String),
}

impl AttemptOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, AttemptOutcome::Exhausted)
    }
}

/// Result of one (application, attempt, device); immutable once built
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Path of the application bundle as given on the command line
    pub app: PathBuf,
    pub package: String,
    pub attempt: u32,
    pub serial: String,
    pub verdict: Verdict,
    pub outcome: AttemptOutcome,
    /// Visited node ids in visitation order
    pub visited: Vec<String>,
    #[serde(skip)]
    pub log_text: String,
    pub finished_at: DateTime<Local>,
}

impl RunRecord {
    /// Line appended to `results.log`
    pub fn ledger_line(&self) -> String {
        match self.verdict {
            Verdict::Success => format!(
                "{} SUCCESS on {}, try: {}",
                self.app.display(),
                self.serial,
                self.attempt
            ),
            Verdict::Failed(cause) => format!(
                "{} FAILED ({}) on {}, try: {}",
                self.app.display(),
                cause.code(),
                self.serial,
                self.attempt
            ),
        }
    }
}
