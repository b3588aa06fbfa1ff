//! Leader-follower mode: synchronized exploration on every device
//!
//! Each phase (prepare, init, every node step, back navigation) runs on all
//! active sessions concurrently and completes on all of them before the next
//! phase starts. Only the leader's graph decides what to visit; followers
//! resolve the same node id against their own screen.

use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::timeout;

use droidwalk_core::prelude::*;
use droidwalk_core::{element_suffix, RunRecord};
use droidwalk_device::{DeviceControl, UiSnapshot};

use crate::artifacts::ArtifactStore;
use crate::config::Settings;
use crate::discovery::AppBundle;
use crate::session::{random_input, SessionController};

pub(super) async fn run<D, S>(
    mut sessions: Vec<SessionController<D, S>>,
    apps: Vec<AppBundle>,
    settings: &Settings,
    store: &ArtifactStore,
) -> Vec<RunRecord>
where
    D: DeviceControl + Sync,
    S: UiSnapshot + Sync,
{
    let leader = match sessions.iter().position(|s| s.role().is_leader()) {
        Some(i) => i,
        None => {
            warn!("No leader assigned, using {}", sessions[0].serial());
            0
        }
    };
    let mut rng = StdRng::from_entropy();
    let mut records = Vec::new();

    for app in &apps {
        for attempt in 0..settings.run.runs_per_app {
            let done =
                run_attempt(&mut sessions, leader, app, attempt, settings, store, &mut rng).await;
            records.extend(done);
        }
    }
    records
}

/// One synchronized attempt of `app` on every device
#[allow(clippy::too_many_arguments)]
async fn run_attempt<D, S>(
    sessions: &mut [SessionController<D, S>],
    leader: usize,
    app: &AppBundle,
    attempt: u32,
    settings: &Settings,
    store: &ArtifactStore,
    rng: &mut StdRng,
) -> Vec<RunRecord>
where
    D: DeviceControl + Sync,
    S: UiSnapshot + Sync,
{
    info!(
        "{} try {} on {} device(s), leader {}",
        app.file_name(),
        attempt,
        sessions.len(),
        sessions[leader].serial()
    );

    // prepare() records its own failures
    join_all(sessions.iter_mut().map(|s| s.prepare(app, attempt))).await;

    if sessions[leader].is_active() {
        let secs = settings.run.testing_timeout_secs;
        let text_len = settings.output.random_text_length;
        match timeout(
            settings.run.testing_timeout(),
            lead(sessions, leader, rng, text_len),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let halted = Error::device(
                    sessions[leader].serial(),
                    format!("leader stopped: {}", e),
                );
                sessions[leader].record_failure(&e);
                for s in sessions.iter_mut().filter(|s| s.is_active()) {
                    s.record_failure(&halted);
                }
            }
            Err(_) => {
                let err = Error::Timeout { secs };
                for s in sessions.iter_mut().filter(|s| s.is_active()) {
                    s.record_failure(&err);
                }
            }
        }
    } else {
        warn!(
            "Leader {} could not prepare {}, skipping exploration",
            sessions[leader].serial(),
            app.file_name()
        );
    }

    let reference = sessions[leader].graph().clone();
    let finished = join_all(sessions.iter_mut().enumerate().map(|(i, s)| {
        let reference = (i != leader).then_some(&reference);
        s.finish(false, reference, store)
    }))
    .await;

    finished.into_iter().flatten().collect()
}

/// Bench followers whose phase failed; return the leader's error, if any
fn settle<D, S, T>(
    sessions: &mut [SessionController<D, S>],
    leader: usize,
    results: Vec<(usize, Result<T>)>,
) -> Result<()>
where
    D: DeviceControl,
    S: UiSnapshot,
{
    let mut leader_error = None;
    for (i, result) in results {
        if let Err(e) = result {
            if i == leader {
                leader_error = Some(e);
            } else {
                sessions[i].record_failure(&e);
            }
        }
    }
    match leader_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Init every device, then explore from the leader's graph until the
/// leader is back at its root with nothing left to visit
async fn lead<D, S>(
    sessions: &mut [SessionController<D, S>],
    leader: usize,
    rng: &mut StdRng,
    text_len: usize,
) -> Result<()>
where
    D: DeviceControl + Sync,
    S: UiSnapshot + Sync,
{
    let results = join_all(
        sessions
            .iter_mut()
            .enumerate()
            .filter(|(_, s)| s.is_active())
            .map(|(i, s)| async move { (i, s.init().await) }),
    )
    .await;
    settle(sessions, leader, results)?;

    let root = sessions[leader].root_activity().map(String::from);
    for (i, s) in sessions.iter_mut().enumerate() {
        if i != leader {
            s.set_root_activity(root.clone());
        }
    }

    loop {
        sessions[leader].scan(None).await?;
        let candidates = sessions[leader].candidates();
        let batch_start = sessions[leader].foreground_activity().await?;

        for node_id in &candidates {
            let text = random_input(rng, text_len);
            debug!(
                "{} ---> {}",
                sessions[leader].current_activity().unwrap_or_default(),
                element_suffix(node_id).unwrap_or(node_id.as_str())
            );

            let node = node_id.as_str();
            let input = text.as_str();
            let results = join_all(
                sessions
                    .iter_mut()
                    .enumerate()
                    .filter(|(_, s)| s.is_active())
                    .map(|(i, s)| async move { (i, s.step(node, input).await) }),
            )
            .await;
            settle(sessions, leader, results)?;

            if sessions[leader].foreground_activity().await? != batch_start {
                break;
            }
        }

        if candidates.is_empty() {
            if sessions[leader].at_root().await? {
                for s in sessions.iter_mut() {
                    s.mark_exhausted();
                }
                info!(
                    "Leader {} explored {} node(s)",
                    sessions[leader].serial(),
                    sessions[leader].graph().node_count()
                );
                return Ok(());
            }

            let results = join_all(
                sessions
                    .iter_mut()
                    .enumerate()
                    .filter(|(_, s)| s.is_active())
                    .map(|(i, s)| async move { (i, s.press_back().await) }),
            )
            .await;
            settle(sessions, leader, results)?;
        }
    }
}
