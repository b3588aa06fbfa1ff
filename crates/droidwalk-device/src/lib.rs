//! # droidwalk-device - Device-Facing Collaborators
//!
//! Talks to Android devices and application bundles through host tools.
//!
//! Depends on [`droidwalk_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Device Control
//! - [`DeviceControl`] - Install, launch, foreground queries, input injection, logcat
//! - [`AdbDevice`] - `adb -s <serial>` implementation
//! - [`list_serials()`] - Serials of attached devices
//!
//! ### UI Snapshots
//! - [`UiSnapshot`] - Raw hierarchy dumps
//! - [`UiAutomator`] - `uiautomator dump` implementation
//! - [`parse_hierarchy()`], [`capture()`] - Flatten a dump into interactive elements
//!
//! ### Package Inspection
//! - [`PackageInspector`] - Package name and launchable activities of a bundle
//! - [`Aapt`] - `aapt dump badging` implementation
//!
//! ### Host Tools
//! - [`ToolAvailability`] - Resolve `adb`, `aapt` and `dot`
//!
//! Each service trait comes in a `Send` variant (`DeviceControl`) and a local
//! variant (`LocalDeviceControl`). Implement and bound on the `Send` variant.

pub mod adb;
pub mod control;
pub mod inspector;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tool_availability;
pub mod ui;

pub use adb::{list_serials, parse_devices, parse_window_focus, AdbDevice};
pub use control::{DeviceControl, Foreground, LocalDeviceControl};
pub use inspector::{Aapt, LocalPackageInspector, PackageInspector};
pub use tool_availability::ToolAvailability;
pub use ui::{capture, parse_hierarchy, LocalUiSnapshot, UiAutomator, UiSnapshot};
