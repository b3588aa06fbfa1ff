//! droidwalk-app - Exploration sessions and multi-device orchestration
//!
//! This crate drives the per-device Session Controller state machine, runs it
//! across devices in independent or leader-follower mode, loads configuration,
//! discovers application bundles and persists run artifacts.

pub mod artifacts;
pub mod config;
pub mod discovery;
pub mod leader;
pub mod orchestrator;
pub mod report;
pub mod session;

// Re-export primary types
pub use artifacts::ArtifactStore;
pub use config::{load_settings, ExplorationMode, Settings};
pub use discovery::{find_apks, read_tested, resolve_bundles, AppBundle};
pub use leader::select_leader;
pub use orchestrator::Orchestrator;
pub use report::{summarize, CoverageReport};
pub use session::{SessionController, SessionState};

// Re-export device types for the binary
pub use droidwalk_device::{DeviceControl, ToolAvailability, UiSnapshot};
