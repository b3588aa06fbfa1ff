//! `adb` backend for the Device Control Interface
//!
//! Every operation is a one-shot `adb -s <serial> ...` invocation. Output
//! parsing (`adb devices`, `dumpsys window windows`, `pm list packages`) is
//! kept in free functions so it can be tested without a device.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use droidwalk_core::prelude::*;
use droidwalk_core::Bounds;

use crate::control::{DeviceControl, Foreground};
use crate::ui::{dump_hierarchy, parse_hierarchy};

/// Window-manager fields consulted for focus, in priority order
const FOCUS_FIELDS: &[&str] = &["mCurrentFocus", "mFocusedApp", "mObscuringWindow"];

/// `... u0 com.example/com.example.MainActivity ...` inside a window record
static WINDOW_OWNER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bu\d+\s+([^\s/}]+)(?:/([^\s}]+))?").expect("Invalid window owner regex")
});

/// Long-press duration for `input swipe x y x y <ms>`
const LONG_PRESS_MS: u32 = 1000;

/// Parse `adb devices` output into serials in the `device` state
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices"))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            (parts.next() == Some("device")).then(|| serial.to_string())
        })
        .collect()
}

/// Parse the focused window out of `dumpsys window windows`
///
/// Crash dialogs (`Application Error`) and empty focus records are skipped
/// so the next field is consulted instead.
pub fn parse_window_focus(dumpsys: &str) -> Option<Foreground> {
    for field in FOCUS_FIELDS {
        let candidates = dumpsys
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with(field));
        for line in candidates {
            if line.contains("Application Error") || line.ends_with("=null") {
                continue;
            }
            let Some(caps) = WINDOW_OWNER_PATTERN.captures(line) else {
                continue;
            };
            let package = caps[1].to_string();
            let activity = caps.get(2).map(|m| {
                let name = m.as_str();
                match name.strip_prefix('.') {
                    Some(rest) => format!("{}.{}", package, rest),
                    None => name.to_string(),
                }
            });
            return Some(Foreground::new(package, activity));
        }
    }
    None
}

/// Whether `pm list packages` output lists `package` exactly
pub fn package_listed(output: &str, package: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .any(|name| name == package)
}

/// `input text` treats spaces as argument separators
fn escape_input_text(text: &str) -> String {
    text.replace(' ', "%s")
}

/// List serials of attached devices using the given adb binary
pub async fn list_serials(adb: &Path) -> Result<Vec<String>> {
    let output = Command::new(adb)
        .arg("devices")
        .output()
        .await
        .map_err(|e| Error::device("host", format!("Failed to run adb devices: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::device(
            "host",
            format!("adb devices failed: {}", stderr.trim()),
        ));
    }

    Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
}

/// One device reached through `adb -s <serial>`
#[derive(Debug, Clone)]
pub struct AdbDevice {
    serial: String,
    adb: PathBuf,
}

impl AdbDevice {
    pub fn new(serial: impl Into<String>, adb: impl Into<PathBuf>) -> Self {
        Self {
            serial: serial.into(),
            adb: adb.into(),
        }
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb
    }

    /// Run `adb -s <serial> <args>` and return stdout
    async fn run(&self, args: &[&str]) -> Result<String> {
        trace!("adb -s {} {}", self.serial, args.join(" "));
        let output = Command::new(&self.adb)
            .arg("-s")
            .arg(&self.serial)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::device(&self.serial, format!("Failed to run adb: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::device(
                &self.serial,
                format!("adb {} failed: {}", args.join(" "), stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn shell(&self, args: &[&str]) -> Result<String> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("shell");
        full.extend_from_slice(args);
        self.run(&full).await
    }
}

impl DeviceControl for AdbDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    async fn install(&self, apk: &Path) -> Result<()> {
        let path = apk.to_string_lossy();
        let out = self.run(&["install", path.as_ref()]).await?;
        debug!("adb install on {}: {}", self.serial, out.trim());
        Ok(())
    }

    async fn uninstall(&self, package: &str) -> Result<()> {
        self.run(&["uninstall", package]).await.map(|_| ())
    }

    async fn force_stop(&self, package: &str) -> Result<()> {
        self.shell(&["am", "force-stop", package]).await.map(|_| ())
    }

    async fn is_installed(&self, package: &str) -> Result<bool> {
        let out = self.shell(&["pm", "list", "packages"]).await?;
        Ok(package_listed(&out, package))
    }

    async fn launch(&self, package: &str) -> Result<()> {
        self.shell(&[
            "monkey",
            "-p",
            package,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])
        .await
        .map(|_| ())
    }

    async fn foreground(&self) -> Result<Option<Foreground>> {
        let out = self.shell(&["dumpsys", "window", "windows"]).await?;
        Ok(parse_window_focus(&out))
    }

    async fn foreground_package(&self) -> Result<Option<String>> {
        Ok(self.foreground().await?.map(|fg| fg.package))
    }

    async fn foreground_activity(&self) -> Result<Option<String>> {
        Ok(self
            .foreground()
            .await?
            .map(|fg| fg.activity_or_window().to_string()))
    }

    async fn press_back(&self) -> Result<()> {
        self.shell(&["input", "keyevent", "4"]).await.map(|_| ())
    }

    async fn tap(&self, x: i32, y: i32) -> Result<()> {
        let (x, y) = (x.to_string(), y.to_string());
        self.shell(&["input", "tap", &x, &y]).await.map(|_| ())
    }

    async fn tap_text(&self, text: &str) -> Result<bool> {
        let xml = dump_hierarchy(&self.adb, &self.serial).await?;
        let target = parse_hierarchy(&xml)?
            .into_iter()
            .find(|el| el.text.eq_ignore_ascii_case(text));
        match target {
            Some(el) => {
                let (x, y) = el.bounds.center();
                self.tap(x, y).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn long_press(&self, x: i32, y: i32) -> Result<()> {
        let (x, y, ms) = (x.to_string(), y.to_string(), LONG_PRESS_MS.to_string());
        self.shell(&["input", "swipe", &x, &y, &x, &y, &ms])
            .await
            .map(|_| ())
    }

    async fn swipe_up(&self, bounds: Bounds) -> Result<()> {
        let (cx, _) = bounds.center();
        let margin = bounds.height() / 5;
        let from_y = (bounds.bottom - margin).to_string();
        let to_y = (bounds.top + margin).to_string();
        let cx = cx.to_string();
        self.shell(&["input", "swipe", &cx, &from_y, &cx, &to_y, "300"])
            .await
            .map(|_| ())
    }

    async fn input_text(&self, text: &str) -> Result<()> {
        let escaped = escape_input_text(text);
        self.shell(&["input", "text", &escaped]).await.map(|_| ())
    }

    async fn keyboard_is_numeric(&self) -> Result<bool> {
        let out = self.shell(&["dumpsys", "input_method"]).await?;
        Ok(out.contains("Keyboard mode = 5"))
    }

    async fn close_keyboard(&self) -> Result<()> {
        // KEYCODE_BACK; KEYCODE_ESCAPE is ignored by some keyboards
        self.shell(&["input", "keyevent", "4"]).await.map(|_| ())
    }

    async fn logcat_clear(&self) -> Result<()> {
        self.run(&["logcat", "-c"]).await.map(|_| ())
    }

    async fn logcat_dump(&self) -> Result<String> {
        self.run(&["logcat", "-d"]).await
    }

    async fn os_version(&self) -> Result<String> {
        let out = self
            .shell(&["getprop", "ro.build.version.release"])
            .await?;
        Ok(out.trim().to_string())
    }

    async fn list_connected_serials(&self) -> Result<Vec<String>> {
        list_serials(&self.adb).await
    }

    async fn reboot(&self) -> Result<()> {
        info!("Rebooting {}", self.serial);
        self.run(&["reboot"]).await.map(|_| ())
    }
}
