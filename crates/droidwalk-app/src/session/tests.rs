//! Session controller tests against scripted devices

use std::path::Path;
use std::sync::Arc;

use droidwalk_core::prelude::*;
use droidwalk_core::{AttemptOutcome, ExplorationGraph, FailureCause, Verdict};
use droidwalk_device::test_utils::{FakeApp, FakeDevice, FakeSnapshot, FakeWidget};
use tempfile::tempdir;

use super::{SessionController, SessionState, VisitOutcome};
use crate::artifacts::ArtifactStore;
use crate::config::{Settings, TimingSettings};
use crate::discovery::AppBundle;

const PKG: &str = "com.example.notes";
const MAIN: &str = "com.example.notes.MainActivity";
const EDIT: &str = "com.example.notes.EditActivity";

fn settings_with(f: impl FnOnce(&mut Settings)) -> Arc<Settings> {
    let mut settings = Settings::default();
    settings.timing = TimingSettings::immediate();
    settings.output.random_text_length = 6;
    f(&mut settings);
    Arc::new(settings)
}

fn settings() -> Arc<Settings> {
    settings_with(|_| {})
}

fn notes_app() -> FakeApp {
    FakeApp::new(PKG, MAIN)
        .screen(
            MAIN,
            vec![
                FakeWidget::button("com.example.notes:id/add").opens(EDIT),
                FakeWidget::text_field("com.example.notes:id/search"),
            ],
        )
        .screen(EDIT, vec![FakeWidget::button("com.example.notes:id/save")])
}

fn bundle() -> AppBundle {
    AppBundle::new("apks/notes.apk", PKG)
}

fn controller(
    device: &FakeDevice,
    settings: Arc<Settings>,
) -> SessionController<FakeDevice, FakeSnapshot> {
    SessionController::new(device.clone(), device.snapshot(), settings).with_seed(42)
}

fn store(dir: &Path) -> ArtifactStore {
    ArtifactStore::create(dir, dir.join("tested_pkgs"), None, true).unwrap()
}

fn count_actions(device: &FakeDevice, prefix: &str) -> usize {
    device
        .actions()
        .iter()
        .filter(|a| a.starts_with(prefix))
        .count()
}

#[tokio::test]
async fn test_prepare_installs_and_launches() {
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());

    session.prepare(&bundle(), 0).await.unwrap();

    assert!(device.is_app_installed());
    assert_eq!(device.current_activity().as_deref(), Some(MAIN));
    assert_eq!(session.state(), SessionState::Preparing);
    assert_eq!(session.running_app(), Some(&bundle()));
    assert_eq!(count_actions(&device, "install"), 1);
    assert_eq!(count_actions(&device, "launch"), 1);
}

#[tokio::test]
async fn test_prepare_install_failure_is_recorded() {
    let device = FakeDevice::new("emulator-5554", notes_app()).failing_install();
    let mut session = controller(&device, settings());

    let err = session.prepare(&bundle(), 0).await.unwrap_err();

    assert!(matches!(err, Error::InstallFailed { .. }));
    assert!(err.is_attempt_fatal());
    assert_eq!(session.state(), SessionState::Failed);
    assert!(!session.is_active());
    assert_eq!(count_actions(&device, "launch"), 0);
}

#[tokio::test]
async fn test_prepare_keep_installed_relaunches() {
    let device = FakeDevice::new("emulator-5554", notes_app()).preinstalled();
    let mut session = controller(&device, settings_with(|s| s.run.keep_installed = true));

    session.prepare(&bundle(), 0).await.unwrap();

    assert_eq!(count_actions(&device, "install"), 0);
    assert_eq!(count_actions(&device, "uninstall"), 0);
    assert_eq!(device.current_activity().as_deref(), Some(MAIN));
}

#[tokio::test]
async fn test_prepare_reinstalls_existing_package() {
    let device = FakeDevice::new("emulator-5554", notes_app()).preinstalled();
    let mut session = controller(&device, settings());

    session.prepare(&bundle(), 0).await.unwrap();

    assert_eq!(count_actions(&device, "uninstall"), 1);
    assert_eq!(count_actions(&device, "install"), 1);
}

#[tokio::test]
async fn test_init_records_root_activity() {
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();

    session.init().await.unwrap();

    assert_eq!(session.root_activity(), Some(MAIN));
    assert_eq!(session.current_activity(), Some(MAIN));
    let graph = session.graph();
    assert!(graph.contains(MAIN));
    assert!(graph.contains(&format!("{}___button0", MAIN)));
    assert!(graph.contains(&format!("{}___edittext1", MAIN)));
    assert!(graph.has_edge(PKG, MAIN));
}

#[tokio::test]
async fn test_init_dismisses_permission_dialogs() {
    let device = FakeDevice::new("emulator-5554", notes_app()).with_permission_popups(2);
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();
    assert_eq!(device.pending_popups(), 2);

    session.init().await.unwrap();

    assert_eq!(device.pending_popups(), 0);
    assert_eq!(count_actions(&device, "tap-text"), 2);
    // Discovery saw the app's screen, not the dialog
    assert!(session.graph().contains(&format!("{}___edittext1", MAIN)));
}

#[tokio::test]
async fn test_init_survives_transient_dump_failures() {
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();

    device.fail_next_dumps(2);
    session.init().await.unwrap();
    assert_eq!(session.root_activity(), Some(MAIN));
}

#[tokio::test]
async fn test_init_gives_up_after_repeated_dump_failures() {
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();

    device.fail_next_dumps(10);
    let err = session.init().await.unwrap_err();
    assert!(matches!(err, Error::Hierarchy { .. }));
}

#[tokio::test]
async fn test_visit_unknown_node() {
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();
    session.init().await.unwrap();

    let outcome = session.visit("com.example.notes.Nowhere___button0", "abc").await.unwrap();

    assert_eq!(outcome, VisitOutcome::Unknown);
    assert!(session.visit_log().is_empty());
}

#[tokio::test]
async fn test_visit_text_field_types_and_closes_keyboard() {
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();
    session.init().await.unwrap();

    let id = format!("{}___edittext1", MAIN);
    let outcome = session.visit(&id, "hello1").await.unwrap();

    assert_eq!(outcome, VisitOutcome::Stayed);
    assert_eq!(device.typed_text(), vec!["hello1".to_string()]);
    assert_eq!(count_actions(&device, "close-keyboard"), 1);
    assert!(session.graph().get(&id).unwrap().is_visited());
}

#[tokio::test]
async fn test_visit_numeric_keyboard_gets_digits() {
    let device = FakeDevice::new("emulator-5554", notes_app()).with_numeric_keyboard();
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();
    session.init().await.unwrap();

    session
        .visit(&format!("{}___edittext1", MAIN), "abcXYZ")
        .await
        .unwrap();

    let typed = device.typed_text();
    assert_eq!(typed.len(), 1);
    assert_eq!(typed[0].len(), 6);
    assert!(typed[0].chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test]
async fn test_visit_reports_activity_change() {
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();
    session.init().await.unwrap();

    let outcome = session
        .visit(&format!("{}___button0", MAIN), "x")
        .await
        .unwrap();

    assert_eq!(outcome, VisitOutcome::ActivityChanged);
    assert_eq!(device.current_activity().as_deref(), Some(EDIT));
}

#[tokio::test]
async fn test_visit_skips_node_of_background_activity() {
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();
    session.init().await.unwrap();
    session
        .visit(&format!("{}___button0", MAIN), "x")
        .await
        .unwrap();

    // Device now shows the edit screen; the search field is not on it
    let id = format!("{}___edittext1", MAIN);
    let outcome = session.visit(&id, "hello").await.unwrap();

    assert_eq!(outcome, VisitOutcome::OffScreen);
    let node = session.graph().element(&id).unwrap();
    assert!(!node.visited);
    assert!(device.typed_text().is_empty());
    assert_eq!(session.visit_log().len(), 1);
}

#[tokio::test]
async fn test_step_requeues_element_and_goes_back() {
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();
    session.init().await.unwrap();

    let id = format!("{}___button0", MAIN);
    session.step(&id, "x").await.unwrap();

    // Siblings were pending: back on the main screen, button queued again
    assert_eq!(device.current_activity().as_deref(), Some(MAIN));
    assert_eq!(session.current_activity(), Some(MAIN));
    let node = session.graph().element(&id).unwrap();
    assert!(node.second_visit);
    assert!(!node.visited);
    assert!(session.graph().contains(EDIT));
    assert!(session.graph().has_edge(&id, EDIT));
}

#[tokio::test]
async fn test_explore_deterministic_exhausts_app() {
    let temp = tempdir().unwrap();
    let store = store(temp.path());
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();

    session.run_attempt().await.unwrap();

    assert_eq!(session.state(), SessionState::Exhausted);
    assert_eq!(device.current_activity().as_deref(), Some(MAIN));
    assert!(session.graph().unvisited(MAIN).is_empty());
    assert!(session.graph().unvisited(EDIT).is_empty());
    assert_eq!(
        session.visit_log(),
        &[
            MAIN.to_string(),
            format!("{}___button0", MAIN),
            format!("{}___edittext1", MAIN),
            format!("{}___button0", MAIN),
            EDIT.to_string(),
            format!("{}___button0", EDIT),
        ]
    );
    assert_eq!(device.typed_text().len(), 1);

    let record = session.finish(false, None, &store).await.unwrap();
    assert_eq!(record.verdict, Verdict::Success);
    assert_eq!(record.outcome, AttemptOutcome::Exhausted);
    assert_eq!(record.visited.len(), 6);
    assert!(!device.is_app_installed());
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.running_app().is_none());
    assert!(session.graph().is_empty());
}

#[tokio::test]
async fn test_explore_deterministic_follows_the_screen_it_landed_on() {
    const HUB: &str = "com.example.notes.Hub";
    const ZETA: &str = "com.example.notes.Zeta";
    const ALPHA: &str = "com.example.notes.Alpha";
    let app = FakeApp::new(PKG, HUB)
        .screen(
            HUB,
            vec![
                FakeWidget::button("com.example.notes:id/to_zeta").opens(ZETA),
                FakeWidget::button("com.example.notes:id/to_alpha").opens(ALPHA),
            ],
        )
        .screen(ZETA, vec![FakeWidget::button("com.example.notes:id/zeta_btn")])
        .screen(ALPHA, vec![FakeWidget::button("com.example.notes:id/alpha_btn")]);
    let device = FakeDevice::new("emulator-5554", app);
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();

    session.run_attempt().await.unwrap();

    // Zeta is explored while it is on screen, Alpha only after landing there
    assert_eq!(
        session.visit_log(),
        &[
            HUB.to_string(),
            format!("{}___button0", HUB),
            format!("{}___button1", HUB),
            format!("{}___button0", HUB),
            ZETA.to_string(),
            format!("{}___button0", ZETA),
            format!("{}___button1", HUB),
            ALPHA.to_string(),
            format!("{}___button0", ALPHA),
        ]
    );
    let alpha_btn = session.graph().element(&format!("{}___button0", ALPHA));
    assert!(alpha_btn.is_some_and(|e| e.visited));
    let zeta_btn = session.graph().element(&format!("{}___button0", ZETA));
    assert!(zeta_btn.is_some_and(|e| e.visited));
    assert_eq!(session.state(), SessionState::Exhausted);
    assert_eq!(device.current_activity().as_deref(), Some(HUB));
}

#[tokio::test]
async fn test_explore_random_exhausts_app() {
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings_with(|s| s.run.random = true));
    session.prepare(&bundle(), 0).await.unwrap();

    session.run_attempt().await.unwrap();

    assert_eq!(session.state(), SessionState::Exhausted);
    assert!(session.graph().unvisited(MAIN).is_empty());
    assert!(session.graph().unvisited(EDIT).is_empty());
    assert_eq!(device.current_activity().as_deref(), Some(MAIN));
}

#[tokio::test]
async fn test_leaving_app_is_not_foreground() {
    let temp = tempdir().unwrap();
    let store = store(temp.path());
    let app = FakeApp::new(PKG, MAIN).screen(
        MAIN,
        vec![FakeWidget::button("com.example.notes:id/share").leaves_app("com.android.chooser")],
    );
    let device = FakeDevice::new("emulator-5554", app);
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();

    let err = session.run_attempt().await.unwrap_err();
    assert!(matches!(err, Error::NotForeground { .. }));
    let taps_at_failure = count_actions(&device, "tap");

    session.record_failure(&err);
    let record = session.finish(false, None, &store).await.unwrap();

    assert_eq!(record.verdict, Verdict::Failed(FailureCause::NotForeground));
    assert!(matches!(record.outcome, AttemptOutcome::Aborted(_)));
    assert_eq!(count_actions(&device, "tap"), taps_at_failure);
    assert!(!device.is_app_installed());
}

#[tokio::test]
async fn test_crash_is_runtime_error() {
    let temp = tempdir().unwrap();
    let store = store(temp.path());
    let app = FakeApp::new(PKG, MAIN).screen(
        MAIN,
        vec![FakeWidget::button("com.example.notes:id/boom").crashes()],
    );
    let device = FakeDevice::new("emulator-5554", app);
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();

    session.run_attempt().await.unwrap();
    let record = session.finish(false, None, &store).await.unwrap();

    assert_eq!(record.verdict, Verdict::Failed(FailureCause::RuntimeError));
    assert!(record.log_text.contains("FATAL EXCEPTION"));
}

#[tokio::test]
async fn test_disconnected_device_is_hung() {
    let temp = tempdir().unwrap();
    let store = store(temp.path());
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();
    session.init().await.unwrap();

    device.disconnect();
    let err = session.explore().await.unwrap_err();
    assert!(err.is_transient());

    session.record_failure(&err);
    let record = session.finish(false, None, &store).await.unwrap();

    assert_eq!(record.verdict, Verdict::Failed(FailureCause::Hung));
    assert!(record.log_text.contains("Device not found"));
    let tested = std::fs::read_to_string(temp.path().join("tested_pkgs")).unwrap();
    assert_eq!(tested, format!("{}\n", PKG));
}

#[tokio::test]
async fn test_finish_reports_graph_mismatch_against_reference() {
    let temp = tempdir().unwrap();
    let store = store(temp.path());
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 1).await.unwrap();
    session.run_attempt().await.unwrap();

    let reference = ExplorationGraph::new(PKG);
    let record = session.finish(false, Some(&reference), &store).await.unwrap();

    assert_eq!(record.verdict, Verdict::Failed(FailureCause::GraphMismatch));
    assert_eq!(record.attempt, 1);
}

#[tokio::test]
async fn test_finish_timed_out_keeps_success_verdict() {
    let temp = tempdir().unwrap();
    let store = store(temp.path());
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());
    session.prepare(&bundle(), 0).await.unwrap();
    session.init().await.unwrap();

    let record = session.finish(true, None, &store).await.unwrap();

    assert_eq!(record.outcome, AttemptOutcome::TimedOut);
    assert_eq!(record.verdict, Verdict::Success);
}

#[tokio::test]
async fn test_finish_keep_installed_force_stops() {
    let temp = tempdir().unwrap();
    let store = store(temp.path());
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings_with(|s| s.run.keep_installed = true));
    session.prepare(&bundle(), 0).await.unwrap();
    session.run_attempt().await.unwrap();

    session.finish(false, None, &store).await.unwrap();

    assert!(device.is_app_installed());
    assert_eq!(count_actions(&device, "force-stop"), 1);
    assert_eq!(count_actions(&device, "uninstall"), 0);
}

#[tokio::test]
async fn test_finish_without_prepare_is_none() {
    let temp = tempdir().unwrap();
    let store = store(temp.path());
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(&device, settings());
    assert!(session.finish(false, None, &store).await.is_none());
}

#[tokio::test]
async fn test_reboot_after_last_attempt() {
    let temp = tempdir().unwrap();
    let store = store(temp.path());
    let device = FakeDevice::new("emulator-5554", notes_app());
    let mut session = controller(
        &device,
        settings_with(|s| {
            s.run.reboot_after_each_app = true;
            s.run.runs_per_app = 2;
        }),
    );

    session.prepare(&bundle(), 0).await.unwrap();
    session.finish(false, None, &store).await.unwrap();
    assert_eq!(count_actions(&device, "reboot"), 0);

    session.prepare(&bundle(), 1).await.unwrap();
    session.finish(false, None, &store).await.unwrap();
    assert_eq!(count_actions(&device, "reboot"), 1);
}
