//! Configuration types

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How devices are driven
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationMode {
    /// One leader decides, every device performs the same step
    #[default]
    LeaderFollower,
    /// Each device explores its own application on its own
    Independent,
}

impl std::fmt::Display for ExplorationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExplorationMode::LeaderFollower => write!(f, "leader-follower"),
            ExplorationMode::Independent => write!(f, "independent"),
        }
    }
}

/// Application settings (.droidwalk/config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub run: RunSettings,

    #[serde(default)]
    pub timing: TimingSettings,

    #[serde(default)]
    pub tools: ToolSettings,

    #[serde(default)]
    pub output: OutputSettings,
}

/// What to run and how often
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunSettings {
    #[serde(default)]
    pub mode: ExplorationMode,

    /// Shuffle candidates instead of visiting them in id order
    #[serde(default)]
    pub random: bool,

    #[serde(default = "default_runs_per_app")]
    pub runs_per_app: u32,

    /// Wall-clock bound of one attempt
    #[serde(default = "default_testing_timeout_secs")]
    pub testing_timeout_secs: u64,

    /// Force-stop instead of uninstall, relaunch instead of reinstall
    #[serde(default)]
    pub keep_installed: bool,

    #[serde(default)]
    pub reboot_after_each_app: bool,

    /// Skip bundles whose package is already in the tested ledger
    #[serde(default)]
    pub skip_tested: bool,

    /// Leader serial or index; prompts when unset
    #[serde(default)]
    pub leader: Option<String>,

    /// Upper bound on consecutive permission dialogs dismissed in one sweep
    #[serde(default = "default_max_popup_sweeps")]
    pub max_popup_sweeps: u32,

    /// Attempts at a UI dump before giving up on a transient failure
    #[serde(default = "default_snapshot_retries")]
    pub snapshot_retries: u32,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            mode: ExplorationMode::default(),
            random: false,
            runs_per_app: default_runs_per_app(),
            testing_timeout_secs: default_testing_timeout_secs(),
            keep_installed: false,
            reboot_after_each_app: false,
            skip_tested: false,
            leader: None,
            max_popup_sweeps: default_max_popup_sweeps(),
            snapshot_retries: default_snapshot_retries(),
        }
    }
}

impl RunSettings {
    pub fn testing_timeout(&self) -> Duration {
        Duration::from_secs(self.testing_timeout_secs)
    }
}

/// Delays and polling intervals, in milliseconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingSettings {
    /// Let the first screen load after launch
    #[serde(default = "default_wait_after_launch_ms")]
    pub wait_after_launch_ms: u64,

    #[serde(default = "default_install_delay_ms")]
    pub install_delay_ms: u64,

    /// Pause after lifecycle commands (uninstall, force-stop, logcat)
    #[serde(default = "default_action_delay_ms")]
    pub action_delay_ms: u64,

    /// Pause after a visit before checking the foreground activity
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_popup_sweep_delay_ms")]
    pub popup_sweep_delay_ms: u64,

    /// Foreground poll interval while waiting for back navigation
    #[serde(default = "default_back_poll_ms")]
    pub back_poll_ms: u64,

    #[serde(default = "default_idle_backoff_initial_ms")]
    pub idle_backoff_initial_ms: u64,

    #[serde(default = "default_idle_backoff_max_ms")]
    pub idle_backoff_max_ms: u64,

    /// Grace period after issuing a reboot
    #[serde(default = "default_reboot_settle_ms")]
    pub reboot_settle_ms: u64,

    #[serde(default = "default_reboot_poll_ms")]
    pub reboot_poll_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            wait_after_launch_ms: default_wait_after_launch_ms(),
            install_delay_ms: default_install_delay_ms(),
            action_delay_ms: default_action_delay_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            popup_sweep_delay_ms: default_popup_sweep_delay_ms(),
            back_poll_ms: default_back_poll_ms(),
            idle_backoff_initial_ms: default_idle_backoff_initial_ms(),
            idle_backoff_max_ms: default_idle_backoff_max_ms(),
            reboot_settle_ms: default_reboot_settle_ms(),
            reboot_poll_ms: default_reboot_poll_ms(),
        }
    }
}

impl TimingSettings {
    /// All delays zero; used by tests against scripted devices
    pub fn immediate() -> Self {
        Self {
            wait_after_launch_ms: 0,
            install_delay_ms: 0,
            action_delay_ms: 0,
            settle_delay_ms: 0,
            popup_sweep_delay_ms: 0,
            back_poll_ms: 1,
            idle_backoff_initial_ms: 1,
            idle_backoff_max_ms: 5,
            reboot_settle_ms: 0,
            reboot_poll_ms: 1,
        }
    }

    pub fn wait_after_launch(&self) -> Duration {
        Duration::from_millis(self.wait_after_launch_ms)
    }

    pub fn install_delay(&self) -> Duration {
        Duration::from_millis(self.install_delay_ms)
    }

    pub fn action_delay(&self) -> Duration {
        Duration::from_millis(self.action_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn popup_sweep_delay(&self) -> Duration {
        Duration::from_millis(self.popup_sweep_delay_ms)
    }

    pub fn back_poll(&self) -> Duration {
        Duration::from_millis(self.back_poll_ms)
    }

    pub fn idle_backoff_initial(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_initial_ms)
    }

    pub fn idle_backoff_max(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_max_ms)
    }

    pub fn reboot_settle(&self) -> Duration {
        Duration::from_millis(self.reboot_settle_ms)
    }

    pub fn reboot_poll(&self) -> Duration {
        Duration::from_millis(self.reboot_poll_ms)
    }
}

/// External tool locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolSettings {
    #[serde(default = "default_adb")]
    pub adb: String,

    #[serde(default = "default_aapt")]
    pub aapt: String,

    #[serde(default = "default_dot")]
    pub dot: String,

    /// Write graph diagrams at the end of every attempt
    #[serde(default = "default_true")]
    pub render_diagrams: bool,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            adb: default_adb(),
            aapt: default_aapt(),
            dot: default_dot(),
            render_diagrams: true,
        }
    }
}

/// Where results go
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputSettings {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_true")]
    pub verbose: bool,

    /// Length of generated text field input
    #[serde(default = "default_random_text_length")]
    pub random_text_length: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            verbose: true,
            random_text_length: default_random_text_length(),
        }
    }
}

fn default_runs_per_app() -> u32 {
    5
}

fn default_testing_timeout_secs() -> u64 {
    // launch wait + exploration budget
    5 + 180
}

fn default_max_popup_sweeps() -> u32 {
    10
}

fn default_snapshot_retries() -> u32 {
    3
}

fn default_wait_after_launch_ms() -> u64 {
    5_000
}

fn default_install_delay_ms() -> u64 {
    30_000
}

fn default_action_delay_ms() -> u64 {
    3_000
}

fn default_settle_delay_ms() -> u64 {
    1_000
}

fn default_popup_sweep_delay_ms() -> u64 {
    2_000
}

fn default_back_poll_ms() -> u64 {
    1_000
}

fn default_idle_backoff_initial_ms() -> u64 {
    500
}

fn default_idle_backoff_max_ms() -> u64 {
    5_000
}

fn default_reboot_settle_ms() -> u64 {
    120_000
}

fn default_reboot_poll_ms() -> u64 {
    5_000
}

fn default_adb() -> String {
    "adb".to_string()
}

fn default_aapt() -> String {
    "aapt".to_string()
}

fn default_dot() -> String {
    "dot".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("log")
}

fn default_random_text_length() -> usize {
    10
}

fn default_true() -> bool {
    true
}
