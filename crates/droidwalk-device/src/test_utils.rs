//! Test utilities: scripted in-memory devices
//!
//! [`FakeDevice`] models one application as a set of screens (activities)
//! whose widgets may open another screen, leave the app, or log a runtime
//! error when tapped. [`FakeSnapshot`] renders the current screen as
//! uiautomator XML so the real hierarchy parser is exercised.
//!
//! Widget `i` on a screen occupies `[0,100*i][1080,100*i+80]`, so a tap at
//! `y` hits widget `y / 100`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use droidwalk_core::prelude::*;
use droidwalk_core::{Bounds, UiElement};

use crate::control::{DeviceControl, Foreground};
use crate::inspector::PackageInspector;
use crate::ui::UiSnapshot;

/// Resource id of the permission dialog's allow button
pub const PERMISSION_ALLOW_ID: &str = "com.android.permissioncontroller:id/permission_allow_button";

const LAUNCHER_PACKAGE: &str = "com.android.launcher3";
const LAUNCHER_ACTIVITY: &str = "com.android.launcher3.Launcher";

/// What happens when a widget is activated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Push another activity of the same app
    Open(String),
    /// Another package takes the foreground
    Leave(String),
    /// Log a fatal runtime error; the app restarts on its root screen
    Crash,
}

#[derive(Debug, Clone)]
pub struct FakeWidget {
    pub element: UiElement,
    pub transition: Option<Transition>,
}

impl FakeWidget {
    fn new(class_name: &str, resource_id: &str) -> Self {
        Self {
            element: UiElement {
                resource_id: resource_id.to_string(),
                class_name: class_name.to_string(),
                ..Default::default()
            },
            transition: None,
        }
    }

    pub fn button(resource_id: &str) -> Self {
        let mut w = Self::new("android.widget.Button", resource_id);
        w.element.clickable = true;
        w
    }

    pub fn text_field(resource_id: &str) -> Self {
        let mut w = Self::new("android.widget.EditText", resource_id);
        w.element.clickable = true;
        w
    }

    pub fn checkbox(resource_id: &str) -> Self {
        let mut w = Self::new("android.widget.CheckBox", resource_id);
        w.element.checkable = true;
        w.element.clickable = true;
        w
    }

    pub fn list_row(resource_id: &str) -> Self {
        let mut w = Self::new("android.widget.TextView", resource_id);
        w.element.clickable = true;
        w.element.long_clickable = true;
        w
    }

    pub fn scroll_view(resource_id: &str) -> Self {
        let mut w = Self::new("android.widget.ScrollView", resource_id);
        w.element.scrollable = true;
        w
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.element.text = text.to_string();
        self
    }

    pub fn opens(mut self, activity: &str) -> Self {
        self.transition = Some(Transition::Open(activity.to_string()));
        self
    }

    pub fn leaves_app(mut self, package: &str) -> Self {
        self.transition = Some(Transition::Leave(package.to_string()));
        self
    }

    pub fn crashes(mut self) -> Self {
        self.transition = Some(Transition::Crash);
        self
    }
}

/// Screen layout of a scripted application
#[derive(Debug, Clone)]
pub struct FakeApp {
    pub package: String,
    pub root: String,
    pub screens: HashMap<String, Vec<FakeWidget>>,
}

impl FakeApp {
    pub fn new(package: &str, root: &str) -> Self {
        let mut screens = HashMap::new();
        screens.insert(root.to_string(), Vec::new());
        Self {
            package: package.to_string(),
            root: root.to_string(),
            screens,
        }
    }

    pub fn screen(mut self, activity: &str, widgets: Vec<FakeWidget>) -> Self {
        self.screens.insert(activity.to_string(), widgets);
        self
    }
}

#[derive(Debug)]
struct FakeState {
    app: FakeApp,
    os_version: String,
    installed: bool,
    install_fails: bool,
    stack: Vec<String>,
    foreground_override: Option<String>,
    connected: bool,
    pending_popups: usize,
    popups_on_launch: usize,
    numeric_keyboard: bool,
    failing_dumps: usize,
    latency: Duration,
    log: String,
    actions: Vec<String>,
    typed: Vec<String>,
}

impl FakeState {
    fn app_in_front(&self) -> bool {
        self.foreground_override.is_none() && !self.stack.is_empty()
    }

    fn current_widgets(&self) -> &[FakeWidget] {
        self.stack
            .last()
            .and_then(|activity| self.app.screens.get(activity))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn activate(&mut self, index: usize) {
        if !self.app_in_front() {
            return;
        }
        let Some(widget) = self.current_widgets().get(index).cloned() else {
            return;
        };
        match widget.transition {
            Some(Transition::Open(activity)) => self.stack.push(activity),
            Some(Transition::Leave(package)) => self.foreground_override = Some(package),
            Some(Transition::Crash) => {
                self.log.push_str(&format!(
                    "E/AndroidRuntime( 1234): FATAL EXCEPTION: main\nE/AndroidRuntime( 1234): Process: {}\n",
                    self.app.package
                ));
                self.stack = vec![self.app.root.clone()];
            }
            None => {}
        }
    }
}

fn widget_bounds(index: usize) -> Bounds {
    let top = 100 * index as i32;
    Bounds::new(0, top, 1080, top + 80)
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_node(el: &UiElement, package: &str) -> String {
    format!(
        r#"<node index="0" text="{}" resource-id="{}" class="{}" package="{}" content-desc="{}" checkable="{}" checked="false" clickable="{}" enabled="true" focusable="true" focused="false" scrollable="{}" long-clickable="{}" password="false" selected="false" bounds="{}" />"#,
        xml_escape(&el.text),
        xml_escape(&el.resource_id),
        xml_escape(&el.class_name),
        xml_escape(package),
        xml_escape(&el.content_description),
        el.checkable,
        el.clickable,
        el.scrollable,
        el.long_clickable,
        el.bounds
    )
}

/// Scripted device handle; clones share the same device
#[derive(Debug, Clone)]
pub struct FakeDevice {
    serial: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    pub fn new(serial: &str, app: FakeApp) -> Self {
        Self {
            serial: serial.to_string(),
            state: Arc::new(Mutex::new(FakeState {
                app,
                os_version: "11".to_string(),
                installed: false,
                install_fails: false,
                stack: Vec::new(),
                foreground_override: None,
                connected: true,
                pending_popups: 0,
                popups_on_launch: 0,
                numeric_keyboard: false,
                failing_dumps: 0,
                latency: Duration::ZERO,
                log: String::new(),
                actions: Vec::new(),
                typed: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// UI snapshot source bound to this device
    pub fn snapshot(&self) -> FakeSnapshot {
        FakeSnapshot {
            serial: self.serial.clone(),
            state: Arc::clone(&self.state),
        }
    }

    pub fn with_os_version(self, version: &str) -> Self {
        self.state().os_version = version.to_string();
        self
    }

    /// Show `count` permission dialogs after every launch
    pub fn with_permission_popups(self, count: usize) -> Self {
        self.state().popups_on_launch = count;
        self
    }

    /// Delay every device call by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state().latency = latency;
        self
    }

    pub fn with_numeric_keyboard(self) -> Self {
        self.state().numeric_keyboard = true;
        self
    }

    /// `install` runs but the package never shows up as installed
    pub fn failing_install(self) -> Self {
        self.state().install_fails = true;
        self
    }

    pub fn preinstalled(self) -> Self {
        self.state().installed = true;
        self
    }

    /// The next `count` hierarchy dumps fail
    pub fn fail_next_dumps(&self, count: usize) {
        self.state().failing_dumps = count;
    }

    /// Drop off the bus: every later call fails and the serial disappears
    pub fn disconnect(&self) {
        self.state().connected = false;
    }

    /// Put another package in front of the app
    pub fn bring_forward(&self, package: &str) {
        self.state().foreground_override = Some(package.to_string());
    }

    pub fn append_log(&self, line: &str) {
        let mut state = self.state();
        state.log.push_str(line);
        state.log.push('\n');
    }

    pub fn actions(&self) -> Vec<String> {
        self.state().actions.clone()
    }

    /// Text typed into fields, in order
    pub fn typed_text(&self) -> Vec<String> {
        self.state().typed.clone()
    }

    pub fn is_app_installed(&self) -> bool {
        self.state().installed
    }

    pub fn current_activity(&self) -> Option<String> {
        self.state().stack.last().cloned()
    }

    pub fn pending_popups(&self) -> usize {
        self.state().pending_popups
    }

    /// Record an action, failing when disconnected
    async fn act(&self, action: String) -> Result<()> {
        let latency = {
            let mut state = self.state();
            if !state.connected {
                return Err(Error::device(&self.serial, "device not found"));
            }
            state.actions.push(action);
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

impl DeviceControl for FakeDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    async fn install(&self, apk: &Path) -> Result<()> {
        self.act(format!("install {}", apk.display())).await?;
        let mut state = self.state();
        if !state.install_fails {
            state.installed = true;
        }
        Ok(())
    }

    async fn uninstall(&self, package: &str) -> Result<()> {
        self.act(format!("uninstall {}", package)).await?;
        let mut state = self.state();
        if state.app.package == package {
            state.installed = false;
            state.stack.clear();
        }
        Ok(())
    }

    async fn force_stop(&self, package: &str) -> Result<()> {
        self.act(format!("force-stop {}", package)).await?;
        let mut state = self.state();
        if state.app.package == package {
            state.stack.clear();
        }
        if state.foreground_override.as_deref() == Some(package) {
            state.foreground_override = None;
        }
        Ok(())
    }

    async fn is_installed(&self, package: &str) -> Result<bool> {
        self.act(format!("is-installed {}", package)).await?;
        let state = self.state();
        Ok(state.installed && state.app.package == package)
    }

    async fn launch(&self, package: &str) -> Result<()> {
        self.act(format!("launch {}", package)).await?;
        let mut state = self.state();
        if state.installed && state.app.package == package {
            state.stack = vec![state.app.root.clone()];
            state.foreground_override = None;
            state.pending_popups = state.popups_on_launch;
        }
        Ok(())
    }

    async fn foreground(&self) -> Result<Option<Foreground>> {
        let state = self.state();
        if !state.connected {
            return Err(Error::device(&self.serial, "device not found"));
        }
        let fg = match (&state.foreground_override, state.stack.last()) {
            (Some(package), _) => Foreground::new(package.clone(), None),
            (None, Some(activity)) => {
                Foreground::new(state.app.package.clone(), Some(activity.clone()))
            }
            (None, None) => {
                Foreground::new(LAUNCHER_PACKAGE, Some(LAUNCHER_ACTIVITY.to_string()))
            }
        };
        Ok(Some(fg))
    }

    async fn foreground_package(&self) -> Result<Option<String>> {
        Ok(DeviceControl::foreground(self).await?.map(|fg| fg.package))
    }

    async fn foreground_activity(&self) -> Result<Option<String>> {
        Ok(DeviceControl::foreground(self)
            .await?
            .map(|fg| fg.activity_or_window().to_string()))
    }

    async fn press_back(&self) -> Result<()> {
        self.act("back".to_string()).await?;
        let mut state = self.state();
        if state.pending_popups > 0 {
            state.pending_popups -= 1;
        } else if state.foreground_override.is_some() {
            state.foreground_override = None;
        } else {
            state.stack.pop();
        }
        Ok(())
    }

    async fn tap(&self, x: i32, y: i32) -> Result<()> {
        self.act(format!("tap {},{}", x, y)).await?;
        let mut state = self.state();
        if state.pending_popups == 0 && y >= 0 {
            state.activate((y / 100) as usize);
        }
        Ok(())
    }

    async fn tap_text(&self, text: &str) -> Result<bool> {
        self.act(format!("tap-text {}", text)).await?;
        let mut state = self.state();
        if state.pending_popups > 0 {
            if text.eq_ignore_ascii_case("allow") {
                state.pending_popups -= 1;
                return Ok(true);
            }
            return Ok(false);
        }
        let index = state
            .current_widgets()
            .iter()
            .position(|w| w.element.text.eq_ignore_ascii_case(text));
        match index {
            Some(i) => {
                state.activate(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn long_press(&self, x: i32, y: i32) -> Result<()> {
        self.act(format!("long-press {},{}", x, y)).await?;
        let mut state = self.state();
        if state.pending_popups == 0 && y >= 0 {
            state.activate((y / 100) as usize);
        }
        Ok(())
    }

    async fn swipe_up(&self, bounds: Bounds) -> Result<()> {
        self.act(format!("swipe-up {}", bounds)).await
    }

    async fn input_text(&self, text: &str) -> Result<()> {
        self.act(format!("input {}", text)).await?;
        self.state().typed.push(text.to_string());
        Ok(())
    }

    async fn keyboard_is_numeric(&self) -> Result<bool> {
        Ok(self.state().numeric_keyboard)
    }

    async fn close_keyboard(&self) -> Result<()> {
        self.act("close-keyboard".to_string()).await
    }

    async fn logcat_clear(&self) -> Result<()> {
        self.act("logcat-clear".to_string()).await?;
        self.state().log.clear();
        Ok(())
    }

    async fn logcat_dump(&self) -> Result<String> {
        self.act("logcat-dump".to_string()).await?;
        Ok(self.state().log.clone())
    }

    async fn os_version(&self) -> Result<String> {
        Ok(self.state().os_version.clone())
    }

    async fn list_connected_serials(&self) -> Result<Vec<String>> {
        let state = self.state();
        Ok(if state.connected {
            vec![self.serial.clone()]
        } else {
            Vec::new()
        })
    }

    async fn reboot(&self) -> Result<()> {
        self.act("reboot".to_string()).await?;
        let mut state = self.state();
        state.stack.clear();
        state.foreground_override = None;
        Ok(())
    }
}

/// Renders the fake device's current screen
#[derive(Debug, Clone)]
pub struct FakeSnapshot {
    serial: String,
    state: Arc<Mutex<FakeState>>,
}

impl UiSnapshot for FakeSnapshot {
    async fn dump(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.connected {
            return Err(Error::device(&self.serial, "device not found"));
        }
        if state.failing_dumps > 0 {
            state.failing_dumps -= 1;
            return Err(Error::hierarchy("ERROR: could not get idle state."));
        }

        let mut nodes = String::new();
        if state.pending_popups > 0 {
            let allow = UiElement {
                resource_id: PERMISSION_ALLOW_ID.to_string(),
                class_name: "android.widget.Button".to_string(),
                text: "Allow".to_string(),
                bounds: widget_bounds(0),
                clickable: true,
                ..Default::default()
            };
            nodes.push_str(&render_node(&allow, "com.android.permissioncontroller"));
        } else if state.app_in_front() {
            for (i, widget) in state.current_widgets().iter().enumerate() {
                let mut el = widget.element.clone();
                el.bounds = widget_bounds(i);
                nodes.push_str(&render_node(&el, &state.app.package));
            }
        }

        Ok(format!(
            r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?><hierarchy rotation="0"><node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="" content-desc="" checkable="false" checked="false" clickable="false" enabled="true" focusable="false" focused="false" scrollable="false" long-clickable="false" password="false" selected="false" bounds="[0,0][1080,1920]">{}</node></hierarchy>"#,
            nodes
        ))
    }
}

/// Package inspector backed by a lookup table
#[derive(Debug, Clone, Default)]
pub struct FakeInspector {
    packages: HashMap<PathBuf, String>,
    fallback: Option<String>,
}

impl FakeInspector {
    /// Every bundle reports `package`
    pub fn single(package: &str) -> Self {
        Self {
            packages: HashMap::new(),
            fallback: Some(package.to_string()),
        }
    }

    pub fn with_app(mut self, apk: impl Into<PathBuf>, package: &str) -> Self {
        self.packages.insert(apk.into(), package.to_string());
        self
    }
}

impl PackageInspector for FakeInspector {
    async fn package_name(&self, apk: &Path) -> Result<String> {
        self.packages
            .get(apk)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| Error::inspect(apk, "unknown bundle"))
    }

    async fn launchable_activities(&self, apk: &Path) -> Result<Vec<String>> {
        let package = PackageInspector::package_name(self, apk).await?;
        Ok(vec![format!("{}.MainActivity", package)])
    }
}
