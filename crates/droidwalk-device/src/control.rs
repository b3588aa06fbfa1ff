//! Device Control Interface
//!
//! Everything the session controller needs from a device: application
//! lifecycle, foreground queries, input injection and log capture.

use std::path::Path;

use droidwalk_core::prelude::*;
use droidwalk_core::Bounds;

/// Focused window as reported by the window manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Foreground {
    pub package: String,
    /// Fully qualified activity name, when the focused window belongs to one
    pub activity: Option<String>,
}

impl Foreground {
    pub fn new(package: impl Into<String>, activity: Option<String>) -> Self {
        Self {
            package: package.into(),
            activity,
        }
    }

    /// Activity name, or the window name for non-activity windows
    pub fn activity_or_window(&self) -> &str {
        self.activity.as_deref().unwrap_or(&self.package)
    }
}

/// Device control operations
///
/// Implemented by the `adb` backend and by scripted fakes in tests.
#[trait_variant::make(DeviceControl: Send)]
pub trait LocalDeviceControl {
    /// Device serial this handle talks to
    fn serial(&self) -> &str;

    /// Install an application bundle
    async fn install(&self, apk: &Path) -> Result<()>;

    async fn uninstall(&self, package: &str) -> Result<()>;

    async fn force_stop(&self, package: &str) -> Result<()>;

    async fn is_installed(&self, package: &str) -> Result<bool>;

    /// Bring the package's launcher activity to the foreground
    async fn launch(&self, package: &str) -> Result<()>;

    /// Focused package and activity, `None` when nothing is focused
    async fn foreground(&self) -> Result<Option<Foreground>>;

    async fn foreground_package(&self) -> Result<Option<String>>;

    async fn foreground_activity(&self) -> Result<Option<String>>;

    async fn press_back(&self) -> Result<()>;

    async fn tap(&self, x: i32, y: i32) -> Result<()>;

    /// Tap the first on-screen element whose text matches, ignoring case.
    /// Returns false if no such element is visible.
    async fn tap_text(&self, text: &str) -> Result<bool>;

    async fn long_press(&self, x: i32, y: i32) -> Result<()>;

    /// Swipe upwards inside `bounds`
    async fn swipe_up(&self, bounds: Bounds) -> Result<()>;

    /// Type into the focused field
    async fn input_text(&self, text: &str) -> Result<()>;

    async fn keyboard_is_numeric(&self) -> Result<bool>;

    async fn close_keyboard(&self) -> Result<()>;

    async fn logcat_clear(&self) -> Result<()>;

    async fn logcat_dump(&self) -> Result<String>;

    async fn os_version(&self) -> Result<String>;

    /// Serials of every device currently attached to the host
    async fn list_connected_serials(&self) -> Result<Vec<String>>;

    /// Issue a reboot; the caller waits for the device to reappear
    async fn reboot(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_or_window() {
        let fg = Foreground::new("com.example", Some("com.example.Main".to_string()));
        assert_eq!(fg.activity_or_window(), "com.example.Main");

        let popup = Foreground::new("PopupWindow:1a2b", None);
        assert_eq!(popup.activity_or_window(), "PopupWindow:1a2b");
    }
}
