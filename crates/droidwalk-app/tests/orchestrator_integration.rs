//! End-to-end runs of the orchestrator against scripted devices
//!
//! Every test wires real sessions, the artifact store and the orchestrator
//! together; only the devices are fakes.

use std::sync::Arc;
use std::time::Duration;

use droidwalk_app::config::{ExplorationMode, Settings, TimingSettings};
use droidwalk_app::{summarize, AppBundle, ArtifactStore, Orchestrator, SessionController};
use droidwalk_core::{AttemptOutcome, DeviceRole, FailureCause, RunRecord, Verdict};
use droidwalk_device::test_utils::{FakeApp, FakeDevice, FakeSnapshot, FakeWidget};
use tempfile::{tempdir, TempDir};

const PKG: &str = "com.example.todo";
const LIST: &str = "com.example.todo.ListActivity";
const DETAIL: &str = "com.example.todo.DetailActivity";

fn todo_app() -> FakeApp {
    FakeApp::new(PKG, LIST)
        .screen(
            LIST,
            vec![
                FakeWidget::list_row("com.example.todo:id/item").opens(DETAIL),
                FakeWidget::text_field("com.example.todo:id/new_item"),
                FakeWidget::checkbox("com.example.todo:id/done"),
            ],
        )
        .screen(
            DETAIL,
            vec![FakeWidget::button("com.example.todo:id/share").with_text("Share")],
        )
}

fn settings(mode: ExplorationMode, runs: u32) -> Settings {
    let mut settings = Settings::default();
    settings.timing = TimingSettings::immediate();
    settings.run.mode = mode;
    settings.run.runs_per_app = runs;
    settings.output.random_text_length = 8;
    settings
}

struct Harness {
    _temp: TempDir,
    store: Arc<ArtifactStore>,
    tested: std::path::PathBuf,
}

impl Harness {
    fn new() -> Self {
        let temp = tempdir().unwrap();
        let tested = temp.path().join("tested_pkgs");
        let store = ArtifactStore::create(temp.path(), tested.clone(), None, true).unwrap();
        Self {
            _temp: temp,
            store: Arc::new(store),
            tested,
        }
    }

    fn results(&self) -> Vec<String> {
        std::fs::read_to_string(self.store.results_path())
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    async fn run(
        &self,
        devices: &[(FakeDevice, DeviceRole)],
        settings: Settings,
        apps: Vec<AppBundle>,
    ) -> Vec<RunRecord> {
        let settings = Arc::new(settings);
        let sessions: Vec<SessionController<FakeDevice, FakeSnapshot>> = devices
            .iter()
            .enumerate()
            .map(|(i, (device, role))| {
                SessionController::new(device.clone(), device.snapshot(), Arc::clone(&settings))
                    .with_role(*role)
                    .with_seed(i as u64)
            })
            .collect();
        Orchestrator::new(sessions, settings, Arc::clone(&self.store))
            .run(apps)
            .await
            .unwrap()
    }
}

fn records_of<'a>(records: &'a [RunRecord], serial: &str) -> Vec<&'a RunRecord> {
    records.iter().filter(|r| r.serial == serial).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Independent mode
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_independent_spreads_apps_across_devices() {
    let harness = Harness::new();
    let a = FakeDevice::new("emulator-5554", todo_app());
    let b = FakeDevice::new("emulator-5556", todo_app());
    let devices = [
        (a.clone(), DeviceRole::Independent),
        (b.clone(), DeviceRole::Independent),
    ];
    let apps = vec![
        AppBundle::new("apks/todo-1.0.apk", PKG),
        AppBundle::new("apks/todo-1.1.apk", PKG),
    ];

    let records = harness
        .run(&devices, settings(ExplorationMode::Independent, 2), apps)
        .await;

    assert_eq!(records.len(), 4);
    assert_eq!(records_of(&records, "emulator-5554").len(), 2);
    assert_eq!(records_of(&records, "emulator-5556").len(), 2);
    assert!(records.iter().all(|r| r.verdict == Verdict::Success));
    assert!(records.iter().all(|r| r.outcome == AttemptOutcome::Exhausted));

    assert_eq!(harness.results().len(), 4);
    assert!(harness.results().iter().all(|l| l.contains("SUCCESS")));
    assert!(!a.is_app_installed());
    assert!(!b.is_app_installed());

    let tested = std::fs::read_to_string(&harness.tested).unwrap();
    assert!(tested.lines().all(|l| l == PKG));
}

#[tokio::test]
async fn test_independent_flags_app_that_leaves_foreground() {
    let harness = Harness::new();
    let app = FakeApp::new(PKG, LIST).screen(
        LIST,
        vec![FakeWidget::button("com.example.todo:id/settings").leaves_app("com.android.settings")],
    );
    let device = FakeDevice::new("emulator-5554", app);

    let records = harness
        .run(
            &[(device, DeviceRole::Independent)],
            settings(ExplorationMode::Independent, 1),
            vec![AppBundle::new("todo.apk", PKG)],
        )
        .await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].verdict, Verdict::Failed(FailureCause::NotForeground));
    assert!(matches!(records[0].outcome, AttemptOutcome::Aborted(_)));
    assert!(harness.results()[0].contains("FAILED (2)"));
}

#[tokio::test]
async fn test_independent_reports_crash() {
    let harness = Harness::new();
    let app = FakeApp::new(PKG, LIST).screen(
        LIST,
        vec![FakeWidget::button("com.example.todo:id/sync").crashes()],
    );
    let device = FakeDevice::new("emulator-5554", app);

    let records = harness
        .run(
            &[(device, DeviceRole::Independent)],
            settings(ExplorationMode::Independent, 2),
            vec![AppBundle::new("todo.apk", PKG)],
        )
        .await;

    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.verdict == Verdict::Failed(FailureCause::RuntimeError)));

    let report = summarize(&records);
    assert_eq!(report.get(PKG).unwrap().failure_count(FailureCause::RuntimeError), 2);
}

#[tokio::test]
async fn test_independent_install_failure_skips_remaining_tries() {
    let harness = Harness::new();
    let broken = FakeDevice::new("emulator-5554", todo_app()).failing_install();

    let records = harness
        .run(
            &[(broken, DeviceRole::Independent)],
            settings(ExplorationMode::Independent, 3),
            vec![AppBundle::new("todo.apk", PKG)],
        )
        .await;

    assert_eq!(records.len(), 1);
    assert!(matches!(records[0].outcome, AttemptOutcome::Aborted(_)));
    assert!(!records[0].verdict.is_success());
}

// ─────────────────────────────────────────────────────────────────────────────
// Leader-follower mode
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_leader_follower_devices_act_in_lockstep() {
    let harness = Harness::new();
    let leader = FakeDevice::new("emulator-5554", todo_app());
    let follower = FakeDevice::new("emulator-5556", todo_app()).with_os_version("8.1.0");
    let devices = [
        (leader.clone(), DeviceRole::Leader),
        (follower.clone(), DeviceRole::Follower),
    ];

    let records = harness
        .run(
            &devices,
            settings(ExplorationMode::LeaderFollower, 2),
            vec![AppBundle::new("todo.apk", PKG)],
        )
        .await;

    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.verdict == Verdict::Success));

    let lead = records_of(&records, "emulator-5554");
    let follow = records_of(&records, "emulator-5556");
    assert_eq!(lead[0].visited, follow[0].visited);
    assert_eq!(lead[1].visited, follow[1].visited);

    // One random string per step, typed on every device
    assert!(!leader.typed_text().is_empty());
    assert_eq!(leader.typed_text(), follower.typed_text());
}

#[tokio::test]
async fn test_leader_follower_detects_divergent_follower() {
    let harness = Harness::new();
    let leader = FakeDevice::new("emulator-5554", todo_app());
    let diverged = FakeApp::new(PKG, LIST)
        .screen(
            LIST,
            vec![
                FakeWidget::list_row("com.example.todo:id/item").opens(DETAIL),
                FakeWidget::text_field("com.example.todo:id/new_item"),
                FakeWidget::checkbox("com.example.todo:id/done"),
                FakeWidget::button("com.example.todo:id/upgrade"),
            ],
        )
        .screen(
            DETAIL,
            vec![FakeWidget::button("com.example.todo:id/share").with_text("Share")],
        );
    let follower = FakeDevice::new("emulator-5556", diverged);

    let records = harness
        .run(
            &[(leader, DeviceRole::Leader), (follower, DeviceRole::Follower)],
            settings(ExplorationMode::LeaderFollower, 1),
            vec![AppBundle::new("todo.apk", PKG)],
        )
        .await;

    assert_eq!(records_of(&records, "emulator-5554")[0].verdict, Verdict::Success);
    assert_eq!(
        records_of(&records, "emulator-5556")[0].verdict,
        Verdict::Failed(FailureCause::GraphMismatch)
    );
}

#[tokio::test]
async fn test_leader_follower_dismisses_permission_dialogs() {
    let harness = Harness::new();
    let leader = FakeDevice::new("emulator-5554", todo_app()).with_permission_popups(2);
    let follower = FakeDevice::new("emulator-5556", todo_app()).with_permission_popups(1);

    let records = harness
        .run(
            &[
                (leader.clone(), DeviceRole::Leader),
                (follower.clone(), DeviceRole::Follower),
            ],
            settings(ExplorationMode::LeaderFollower, 1),
            vec![AppBundle::new("todo.apk", PKG)],
        )
        .await;

    assert!(records.iter().all(|r| r.verdict == Verdict::Success));
    assert_eq!(leader.pending_popups(), 0);
    assert_eq!(follower.pending_popups(), 0);
}

#[tokio::test]
async fn test_leader_follower_follower_install_failure_is_isolated() {
    let harness = Harness::new();
    let leader = FakeDevice::new("emulator-5554", todo_app());
    let follower = FakeDevice::new("emulator-5556", todo_app()).failing_install();

    let records = harness
        .run(
            &[(leader, DeviceRole::Leader), (follower, DeviceRole::Follower)],
            settings(ExplorationMode::LeaderFollower, 1),
            vec![AppBundle::new("todo.apk", PKG)],
        )
        .await;

    assert_eq!(records.len(), 2);
    let lead = records_of(&records, "emulator-5554")[0];
    let follow = records_of(&records, "emulator-5556")[0];
    assert_eq!(lead.verdict, Verdict::Success);
    assert_eq!(lead.outcome, AttemptOutcome::Exhausted);
    assert!(matches!(follow.outcome, AttemptOutcome::Aborted(_)));
    assert!(!follow.verdict.is_success());
}

#[tokio::test]
async fn test_leader_follower_timeout_aborts_every_device() {
    let harness = Harness::new();
    let keypad: Vec<FakeWidget> = (0..6)
        .map(|i| FakeWidget::button(&format!("com.example.todo:id/key{}", i)))
        .collect();
    let app = FakeApp::new(PKG, LIST).screen(LIST, keypad);
    let latency = Duration::from_millis(400);
    let leader = FakeDevice::new("emulator-5554", app.clone()).with_latency(latency);
    let follower = FakeDevice::new("emulator-5556", app).with_latency(latency);

    let mut settings = settings(ExplorationMode::LeaderFollower, 1);
    settings.run.testing_timeout_secs = 1;

    let records = harness
        .run(
            &[
                (leader.clone(), DeviceRole::Leader),
                (follower.clone(), DeviceRole::Follower),
            ],
            settings,
            vec![AppBundle::new("todo.apk", PKG)],
        )
        .await;

    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| matches!(&r.outcome, AttemptOutcome::Aborted(m) if m.contains("timed out"))));
    assert!(!leader.is_app_installed());
    assert!(!follower.is_app_installed());
}
