//! Single-device session controller
//!
//! Owns one device, its UI snapshot source and the exploration graph of the
//! application currently under test. The orchestrator drives it through
//! `prepare` → `init` → (`explore` | `step`/`press_back`) → `finish`.

use std::sync::{Arc, LazyLock};

use chrono::Local;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;
use tokio::time::sleep;

use droidwalk_core::prelude::*;
use droidwalk_core::{
    element_suffix, owning_activity, AttemptOutcome, DeviceRole, ExplorationGraph, FailureCause, GraphNode, NodeId,
    RunRecord, UiElement, Verdict,
};
use droidwalk_device::{capture, DeviceControl, Foreground, UiSnapshot};

use crate::artifacts::ArtifactStore;
use crate::config::Settings;
use crate::discovery::AppBundle;

use super::state::{SessionState, VisitOutcome};

/// Resource ids of the runtime permission dialog's allow button
const PERMISSION_ALLOW_IDS: [&str; 2] = [
    "com.android.packageinstaller:id/permission_allow_button",
    "com.android.permissioncontroller:id/permission_allow_button",
];

const PERMISSION_ALLOW_TEXT: &str = "allow";

const MAX_REBOOT_POLLS: u32 = 120;

/// Fatal runtime tag in brief (`E/AndroidRuntime(`) or threadtime
/// (`E AndroidRuntime:`) logcat format
static RUNTIME_ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"E/AndroidRuntime|\bE AndroidRuntime\s*:").expect("Invalid runtime error regex")
});

/// Whether a captured log carries a runtime-error signature
pub fn has_runtime_error(log: &str) -> bool {
    RUNTIME_ERROR_REGEX.is_match(log)
}

/// Alphanumeric text field input
pub fn random_input<R: Rng>(rng: &mut R, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Map input onto digits for numeric keyboards; equal input maps equally
pub fn numeric_input(text: &str) -> String {
    text.bytes().map(|b| char::from(b'0' + b % 10)).collect()
}

fn is_permission_allow(element: &UiElement) -> bool {
    PERMISSION_ALLOW_IDS.contains(&element.resource_id.as_str())
        && element.text.eq_ignore_ascii_case(PERMISSION_ALLOW_TEXT)
}

/// Find the widget a stored element refers to in a fresh snapshot.
///
/// Prefers the element at the id's ordinal, then any element with the same
/// selector, then the ordinal position if only the text changed, then any
/// element still carrying the resource id.
fn locate(node_id: &str, stored: &UiElement, fresh: &[UiElement]) -> Option<UiElement> {
    let short_class = stored.short_class();
    let at_ordinal = element_suffix(node_id)
        .and_then(|suffix| suffix.strip_prefix(short_class.as_str()))
        .and_then(|n| n.parse::<usize>().ok())
        .and_then(|i| fresh.get(i));

    if let Some(el) = at_ordinal.filter(|el| el.same_widget(stored)) {
        return Some(el.clone());
    }
    if let Some(el) = fresh.iter().find(|el| el.same_widget(stored)) {
        return Some(el.clone());
    }
    if let Some(el) = at_ordinal
        .filter(|el| el.class_name == stored.class_name && el.resource_id == stored.resource_id)
    {
        return Some(el.clone());
    }
    if stored.resource_id.is_empty() {
        return None;
    }
    fresh
        .iter()
        .find(|el| el.resource_id == stored.resource_id)
        .cloned()
}

#[derive(Debug, Clone)]
struct Failure {
    message: String,
    cause: Option<FailureCause>,
}

/// Drives one device through the attempts assigned to it
#[derive(Debug)]
pub struct SessionController<D, S> {
    device: D,
    snapshot: S,
    settings: Arc<Settings>,
    role: DeviceRole,
    state: SessionState,
    rng: StdRng,

    // ─────────────────────────────────────────────────────────
    // Per-attempt state, cleared by `finish`
    // ─────────────────────────────────────────────────────────
    graph: ExplorationGraph,
    app: Option<AppBundle>,
    attempt: u32,
    current_activity: Option<String>,
    root_activity: Option<String>,
    /// Node ids in the order they were dispatched
    visit_log: Vec<NodeId>,
    failure: Option<Failure>,
}

impl<D: DeviceControl, S: UiSnapshot> SessionController<D, S> {
    pub fn new(device: D, snapshot: S, settings: Arc<Settings>) -> Self {
        Self {
            device,
            snapshot,
            settings,
            role: DeviceRole::Independent,
            state: SessionState::Idle,
            rng: StdRng::from_entropy(),
            graph: ExplorationGraph::new(""),
            app: None,
            attempt: 0,
            current_activity: None,
            root_activity: None,
            visit_log: Vec::new(),
            failure: None,
        }
    }

    pub fn with_role(mut self, role: DeviceRole) -> Self {
        self.role = role;
        self
    }

    /// Fixed seed for reproducible candidate shuffles and text input
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn serial(&self) -> &str {
        self.device.serial()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn graph(&self) -> &ExplorationGraph {
        &self.graph
    }

    pub fn running_app(&self) -> Option<&AppBundle> {
        self.app.as_ref()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn current_activity(&self) -> Option<&str> {
        self.current_activity.as_deref()
    }

    pub fn root_activity(&self) -> Option<&str> {
        self.root_activity.as_deref()
    }

    /// Adopt another device's root (followers use the leader's)
    pub fn set_root_activity(&mut self, root: Option<String>) {
        self.root_activity = root;
    }

    pub fn visit_log(&self) -> &[NodeId] {
        &self.visit_log
    }

    /// False once an attempt-fatal error has been recorded
    pub fn is_active(&self) -> bool {
        self.failure.is_none()
    }

    fn app_name(&self) -> String {
        self.app
            .as_ref()
            .map(AppBundle::file_name)
            .unwrap_or_default()
    }

    /// Exploration was driven from outside and ran to completion
    pub fn mark_exhausted(&mut self) {
        if self.is_active() {
            self.state = SessionState::Exhausted;
        }
    }

    /// Remember the error that ended this device's attempt
    pub fn record_failure(&mut self, err: &Error) {
        error!("{} on {}: {}", self.app_name(), self.serial(), err);
        self.failure = Some(Failure {
            message: err.to_string(),
            cause: err.failure_cause(),
        });
        self.state = SessionState::Failed;
    }

    fn reset(&mut self) {
        let package = self.graph.package().to_string();
        self.graph = ExplorationGraph::new(package);
        self.current_activity = None;
        self.root_activity = None;
        self.visit_log.clear();
        self.failure = None;
        self.state = SessionState::Idle;
    }

    /// One generated text input
    pub fn random_text(&mut self) -> String {
        random_input(&mut self.rng, self.settings.output.random_text_length)
    }

    // ─────────────────────────────────────────────────────────────
    // Device queries
    // ─────────────────────────────────────────────────────────────

    /// UI snapshot, retrying transient dump failures
    async fn snapshot(&self) -> Result<Vec<UiElement>> {
        let retries = self.settings.run.snapshot_retries.max(1);
        let mut tries = 1;
        loop {
            match capture(&self.snapshot).await {
                Ok(elements) => return Ok(elements),
                Err(e) if e.is_transient() && tries < retries => {
                    debug!("UI dump failed on {} ({}), retrying", self.serial(), e);
                    tries += 1;
                    sleep(self.settings.timing.back_poll()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn query_foreground(&self) -> Result<Option<Foreground>> {
        let retries = self.settings.run.snapshot_retries.max(1);
        let mut tries = 1;
        loop {
            match self.device.foreground().await {
                Ok(fg) => return Ok(fg),
                Err(e) if e.is_transient() && tries < retries => {
                    trace!("Foreground query failed on {} ({}), retrying", self.serial(), e);
                    tries += 1;
                    sleep(self.settings.timing.back_poll()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Foreground activity (or window) name
    pub async fn foreground_activity(&self) -> Result<Option<String>> {
        Ok(self
            .query_foreground()
            .await?
            .map(|fg| fg.activity_or_window().to_string()))
    }

    /// The foreground, failing unless the application under test is in front
    pub async fn ensure_foreground(&self) -> Result<Foreground> {
        let expected = self.graph.package();
        match self.query_foreground().await? {
            Some(fg) if fg.package == expected => Ok(fg),
            other => Err(Error::not_foreground(
                self.serial(),
                expected,
                other.map(|fg| fg.package),
            )),
        }
    }

    /// Whether the device shows the root activity
    pub async fn at_root(&self) -> Result<bool> {
        let Some(root) = self.root_activity.as_deref() else {
            return Ok(false);
        };
        Ok(self.foreground_activity().await?.as_deref() == Some(root))
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Install (or relaunch) `app` for attempt `attempt`
    pub async fn prepare(&mut self, app: &AppBundle, attempt: u32) -> Result<()> {
        self.graph = ExplorationGraph::new(app.package.clone());
        self.reset();
        self.app = Some(app.clone());
        self.attempt = attempt;
        self.state = SessionState::Preparing;

        let result = self.install_and_launch(app).await;
        if let Err(e) = &result {
            self.record_failure(e);
        }
        result
    }

    async fn install_and_launch(&self, app: &AppBundle) -> Result<()> {
        let timing = &self.settings.timing;
        let package = app.package.as_str();

        self.device.logcat_clear().await?;
        sleep(timing.action_delay()).await;

        if self.device.is_installed(package).await? {
            if self.device.foreground_package().await?.as_deref() == Some(package) {
                debug!("{} is running on {}, stopping it", package, self.serial());
                self.device.force_stop(package).await?;
                sleep(timing.action_delay()).await;
            }

            if self.settings.run.keep_installed {
                info!("Relaunching installed {} on {}", package, self.serial());
                self.device.launch(package).await?;
                sleep(timing.wait_after_launch()).await;
                return Ok(());
            }

            self.device.uninstall(package).await?;
            sleep(timing.action_delay()).await;
        }

        info!("Installing {} on {}", app.file_name(), self.serial());
        self.device.install(&app.path).await?;
        sleep(timing.install_delay()).await;

        if !self.device.is_installed(package).await? {
            return Err(Error::install_failed(self.serial(), package));
        }

        self.device.launch(package).await?;
        sleep(timing.wait_after_launch()).await;
        Ok(())
    }

    /// Wait for the application, grant permissions and record the root activity
    pub async fn init(&mut self) -> Result<()> {
        let expected = self.graph.package().to_string();
        loop {
            match self.query_foreground().await {
                Ok(Some(fg)) if fg.package == expected => break,
                Ok(fg) => trace!(
                    "Waiting for {} on {} (foreground: {:?})",
                    expected,
                    self.serial(),
                    fg.map(|f| f.package)
                ),
                Err(e) => debug!("Waiting for {} on {}: {}", expected, self.serial(), e),
            }
            sleep(self.settings.timing.back_poll()).await;
        }

        self.dismiss_permission_dialogs().await?;
        let root = self.scan(None).await?;
        info!("{}: root activity {}", self.serial(), root);
        self.root_activity = Some(root);
        Ok(())
    }

    /// Tap through runtime permission dialogs until none is showing
    pub async fn dismiss_permission_dialogs(&self) -> Result<()> {
        let max = self.settings.run.max_popup_sweeps;
        for _ in 0..max {
            sleep(self.settings.timing.popup_sweep_delay()).await;

            let elements = self.snapshot().await?;
            let Some(allow) = elements.iter().find(|e| is_permission_allow(e)) else {
                return Ok(());
            };

            debug!("Granting a permission on {}", self.serial());
            if !self.device.tap_text(&allow.text).await? {
                return Ok(());
            }
        }
        warn!(
            "{}: permission dialogs still showing after {} sweeps",
            self.serial(),
            max
        );
        Ok(())
    }

    /// Record the foreground activity, discovering its elements the first
    /// time it is seen. A new activity hangs off `parent` when given.
    pub async fn scan(&mut self, parent: Option<&str>) -> Result<String> {
        self.state = SessionState::ActivityScan;

        let activity = self.ensure_foreground().await?.activity_or_window().to_string();
        self.current_activity = Some(activity.clone());
        if self.graph.contains(&activity) {
            return Ok(activity);
        }

        self.graph.add_activity(&activity, parent);
        let elements = self.snapshot().await?;
        let added = self.graph.discover(&activity, &elements);
        debug!(
            "{}: new activity {} with {} element(s)",
            self.serial(),
            activity,
            added
        );
        Ok(activity)
    }

    /// Unvisited nodes of the current activity in visiting order
    pub fn candidates(&mut self) -> Vec<NodeId> {
        let mut nodes = match self.current_activity.as_deref() {
            Some(activity) => self.graph.unvisited(activity),
            None => Vec::new(),
        };
        if self.settings.run.random {
            nodes.shuffle(&mut self.rng);
        }
        nodes
    }

    // ─────────────────────────────────────────────────────────────
    // Visiting
    // ─────────────────────────────────────────────────────────────

    /// Act on one node. `text` goes into text fields.
    pub async fn visit(&mut self, node_id: &str, text: &str) -> Result<VisitOutcome> {
        self.state = SessionState::ElementVisit;

        let Some(node) = self.graph.get(node_id).cloned() else {
            debug!("{}: {} is not in the graph", self.serial(), node_id);
            return Ok(VisitOutcome::Unknown);
        };

        self.dismiss_permission_dialogs().await?;

        // Widgets are only matched against their own activity's screen
        let home = owning_activity(node_id);
        if self.foreground_activity().await?.as_deref() != Some(home) {
            debug!("{}: not on {}, skipping {}", self.serial(), home, node_id);
            return Ok(VisitOutcome::OffScreen);
        }
        self.visit_log.push(node_id.to_string());

        if let GraphNode::Element(stored) = node {
            let fresh = self.snapshot().await?;
            let Some(target) = locate(node_id, &stored.element, &fresh) else {
                debug!("{}: {} is gone, removing", self.serial(), node_id);
                self.graph.remove(node_id);
                return Ok(VisitOutcome::Stale);
            };
            if !self.interact(&target, text).await? {
                debug!("{}: {} has no usable action, removing", self.serial(), node_id);
                self.graph.remove(node_id);
                return Ok(VisitOutcome::Removed);
            }
        }
        self.graph.mark_visited(node_id);

        sleep(self.settings.timing.settle_delay()).await;
        let after = self.foreground_activity().await?;
        self.dismiss_permission_dialogs().await?;

        Ok(if after.as_deref() == Some(home) {
            VisitOutcome::Stayed
        } else {
            VisitOutcome::ActivityChanged
        })
    }

    /// Text entry, long press, tap or scroll, in that order of preference.
    /// Returns false when the element supports none of them.
    async fn interact(&self, target: &UiElement, text: &str) -> Result<bool> {
        let (x, y) = target.bounds.center();

        if target.is_editable() {
            self.device.tap(x, y).await?;
            let input = if self.device.keyboard_is_numeric().await? {
                numeric_input(text)
            } else {
                text.to_string()
            };
            self.device.input_text(&input).await?;
            self.device.close_keyboard().await?;
        } else if target.long_clickable {
            self.device.long_press(x, y).await?;
        } else if target.clickable || target.checkable {
            self.device.tap(x, y).await?;
        } else if target.scrollable {
            self.device.swipe_up(target.bounds).await?;
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    /// Visit one node and follow up on where it led
    ///
    /// In deterministic mode an element that leaves an activity with pending
    /// siblings is re-queued once and the device goes back, so the siblings
    /// are finished first. In random mode the device goes back as soon as the
    /// current activity has nothing left to visit.
    pub async fn step(&mut self, node_id: &str, text: &str) -> Result<VisitOutcome> {
        self.ensure_foreground().await?;
        let before = self.scan(None).await?;
        let outcome = self.visit(node_id, text).await?;

        if self.settings.run.random {
            if outcome.changed_activity() {
                self.scan(Some(node_id)).await?;
            }
            let finished = self
                .current_activity
                .as_deref()
                .map_or(true, |a| self.graph.unvisited(a).is_empty());
            if finished && self.current_activity != self.root_activity {
                self.press_back().await?;
            }
        } else if outcome.changed_activity() {
            self.scan(Some(node_id)).await?;
            let pending = !self.graph.unvisited(&before).is_empty();
            if pending && self.graph.mark_second_visit(node_id) {
                self.press_back().await?;
            }
        }

        Ok(outcome)
    }

    /// Press back and wait for the foreground activity to change
    pub async fn press_back(&mut self) -> Result<()> {
        self.state = SessionState::BackNavigating;
        let expected = self.graph.package().to_string();
        let before = self.foreground_activity().await?;

        self.device.press_back().await?;

        loop {
            match self.query_foreground().await {
                Ok(fg) => {
                    let activity = fg.as_ref().map(|f| f.activity_or_window().to_string());
                    if activity != before {
                        return match fg {
                            Some(fg) if fg.package == expected => {
                                self.current_activity = activity;
                                Ok(())
                            }
                            other => Err(Error::not_foreground(
                                self.serial(),
                                expected,
                                other.map(|f| f.package),
                            )),
                        };
                    }
                }
                Err(e) => trace!("{}: waiting for back navigation: {}", self.serial(), e),
            }
            sleep(self.settings.timing.back_poll()).await;
        }
    }

    /// Explore on this device alone until back at the root with nothing left
    pub async fn explore(&mut self) -> Result<()> {
        loop {
            self.scan(None).await?;
            let candidates = self.candidates();
            let batch_start = self.foreground_activity().await?;

            for node_id in &candidates {
                let text = self.random_text();
                debug!(
                    "{}: {} ---> {}",
                    self.serial(),
                    self.current_activity.as_deref().unwrap_or_default(),
                    element_suffix(node_id).unwrap_or(node_id.as_str())
                );
                self.step(node_id, &text).await?;
                if self.foreground_activity().await? != batch_start {
                    break;
                }
            }

            if candidates.is_empty() {
                if self.at_root().await? {
                    self.state = SessionState::Exhausted;
                    info!(
                        "{}: explored {} ({} node(s))",
                        self.serial(),
                        self.graph.package(),
                        self.graph.node_count()
                    );
                    return Ok(());
                }
                self.press_back().await?;
            }
        }
    }

    /// `init` followed by `explore`
    pub async fn run_attempt(&mut self) -> Result<()> {
        self.init().await?;
        self.explore().await
    }

    // ─────────────────────────────────────────────────────────────
    // Cleanup
    // ─────────────────────────────────────────────────────────────

    async fn reboot_and_wait(&self) -> Result<()> {
        let serial = self.serial();
        info!("Rebooting {}", serial);
        self.device.reboot().await?;
        sleep(self.settings.timing.reboot_settle()).await;

        for _ in 0..MAX_REBOOT_POLLS {
            match self.device.list_connected_serials().await {
                Ok(serials) if serials.iter().any(|s| s == serial) => {
                    info!("{} is back", serial);
                    return Ok(());
                }
                Ok(_) => trace!("{} not back yet", serial),
                Err(e) => debug!("Waiting for {}: {}", serial, e),
            }
            sleep(self.settings.timing.reboot_poll()).await;
        }
        Err(Error::device(serial, "did not reconnect after reboot"))
    }

    async fn classify(
        &self,
        package: &str,
        connected: bool,
        log_text: &str,
        cause: Option<FailureCause>,
        reference: Option<&ExplorationGraph>,
    ) -> Verdict {
        if !connected {
            return Verdict::Failed(FailureCause::Hung);
        }

        let in_front = match self.device.foreground_package().await {
            Ok(found) => found.as_deref() == Some(package),
            Err(e) => {
                debug!("Foreground query failed on {}: {}", self.serial(), e);
                false
            }
        };
        if cause == Some(FailureCause::NotForeground) || !in_front {
            return Verdict::Failed(FailureCause::NotForeground);
        }

        if has_runtime_error(log_text) {
            return Verdict::Failed(FailureCause::RuntimeError);
        }

        if reference.is_some_and(|leader| !leader.is_isomorphic_to(&self.graph)) {
            return Verdict::Failed(FailureCause::GraphMismatch);
        }

        Verdict::Success
    }

    /// Classify the attempt, write its artifacts and reset the device.
    ///
    /// `reference` is the leader's graph when this device followed one.
    /// Returns `None` when no application was prepared.
    pub async fn finish(
        &mut self,
        timed_out: bool,
        reference: Option<&ExplorationGraph>,
        store: &ArtifactStore,
    ) -> Option<RunRecord> {
        let app = self.app.take()?;
        let serial = self.serial().to_string();

        let (outcome, cause) = match self.failure.take() {
            Some(f) => (AttemptOutcome::Aborted(f.message), f.cause),
            None if timed_out => (AttemptOutcome::TimedOut, None),
            None => (AttemptOutcome::Exhausted, None),
        };

        let connected = match self.device.list_connected_serials().await {
            Ok(serials) => serials.contains(&serial),
            Err(e) => {
                warn!("Cannot list devices: {}", e);
                false
            }
        };

        let log_text = if connected {
            self.device.logcat_dump().await.unwrap_or_else(|e| {
                warn!("Log capture failed on {}: {}", serial, e);
                String::new()
            })
        } else {
            format!("Device not found in adb devices: {}", serial)
        };

        let verdict = self
            .classify(&app.package, connected, &log_text, cause, reference)
            .await;

        let record = RunRecord {
            app: app.path.clone(),
            package: app.package.clone(),
            attempt: self.attempt,
            serial: serial.clone(),
            verdict,
            outcome,
            visited: self.visit_log.clone(),
            log_text,
            finished_at: Local::now(),
        };

        if let Err(e) = store.write_attempt(&record, &self.graph).await {
            warn!("Failed to write attempt files for {}: {}", serial, e);
        }
        if let Err(e) = store.append_result(&record) {
            warn!("Failed to append result for {}: {}", serial, e);
        }

        if connected {
            let cleanup = if self.settings.run.keep_installed {
                self.device.force_stop(&app.package).await
            } else {
                self.device.uninstall(&app.package).await
            };
            if let Err(e) = cleanup {
                warn!("Cleanup of {} failed on {}: {}", app.package, serial, e);
            }
            sleep(self.settings.timing.action_delay()).await;

            let last_attempt = self.attempt + 1 >= self.settings.run.runs_per_app;
            if self.settings.run.reboot_after_each_app && last_attempt {
                if let Err(e) = self.reboot_and_wait().await {
                    warn!("{}", e);
                }
            }
        }

        if let Err(e) = store.mark_tested(&app.package) {
            warn!("Failed to update tested ledger: {}", e);
        }

        self.reset();
        Some(record)
    }
}
