//! Independent mode: one task per (device, application)
//!
//! Idle sessions wait in a channel. Each application is handed to the first
//! idle session; the spawned task owns that session until all attempts of
//! the application are done, then returns it to the pool.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, timeout};

use droidwalk_core::prelude::*;
use droidwalk_core::RunRecord;
use droidwalk_device::{DeviceControl, UiSnapshot};

use crate::artifacts::ArtifactStore;
use crate::config::Settings;
use crate::discovery::AppBundle;
use crate::session::SessionController;

type Pool<D, S> = mpsc::UnboundedReceiver<SessionController<D, S>>;

pub(super) async fn run<D, S>(
    sessions: Vec<SessionController<D, S>>,
    apps: Vec<AppBundle>,
    settings: Arc<Settings>,
    store: Arc<ArtifactStore>,
) -> Result<Vec<RunRecord>>
where
    D: DeviceControl + Sync + 'static,
    S: UiSnapshot + Sync + 'static,
{
    let (idle_tx, mut idle_rx) = mpsc::unbounded_channel();
    for session in sessions {
        idle_tx.send(session).map_err(|_| Error::ChannelClosed)?;
    }

    let mut tasks: JoinSet<Vec<RunRecord>> = JoinSet::new();
    let mut records = Vec::new();

    for app in apps {
        let mut session =
            next_idle(&mut idle_rx, &mut tasks, &mut records, &settings).await?;
        info!("Assigning {} to {}", app.file_name(), session.serial());

        let idle_tx = idle_tx.clone();
        let settings = Arc::clone(&settings);
        let store = Arc::clone(&store);
        tasks.spawn(async move {
            let done = run_app(&mut session, &app, &settings, &store).await;
            if idle_tx.send(session).is_err() {
                debug!("Idle pool closed before {} finished", app.file_name());
            }
            done
        });
    }

    while let Some(joined) = tasks.join_next().await {
        collect(joined, &mut records);
    }
    Ok(records)
}

/// Busy-poll the pool with exponential backoff until a session is idle
async fn next_idle<D, S>(
    idle_rx: &mut Pool<D, S>,
    tasks: &mut JoinSet<Vec<RunRecord>>,
    records: &mut Vec<RunRecord>,
    settings: &Settings,
) -> Result<SessionController<D, S>> {
    let mut backoff = settings.timing.idle_backoff_initial();
    loop {
        match idle_rx.try_recv() {
            Ok(session) => return Ok(session),
            Err(TryRecvError::Disconnected) => return Err(Error::ChannelClosed),
            Err(TryRecvError::Empty) => {}
        }

        while let Some(joined) = tasks.try_join_next() {
            collect(joined, records);
        }

        // Every task has ended; a session still out was lost with its task
        if tasks.is_empty() {
            return match idle_rx.try_recv() {
                Ok(session) => Ok(session),
                Err(_) => Err(Error::NoDevices),
            };
        }

        trace!("No idle device, retrying in {:?}", backoff);
        sleep(backoff).await;
        backoff = (backoff * 2).min(settings.timing.idle_backoff_max());
    }
}

fn collect(joined: std::result::Result<Vec<RunRecord>, JoinError>, records: &mut Vec<RunRecord>) {
    match joined {
        Ok(done) => records.extend(done),
        Err(e) => error!("Device task ended abnormally: {}", e),
    }
}

/// All attempts of one application on one device
async fn run_app<D, S>(
    session: &mut SessionController<D, S>,
    app: &AppBundle,
    settings: &Settings,
    store: &ArtifactStore,
) -> Vec<RunRecord>
where
    D: DeviceControl + Sync,
    S: UiSnapshot + Sync,
{
    let limit = settings.run.testing_timeout();
    let mut records = Vec::new();

    for attempt in 0..settings.run.runs_per_app {
        info!("{} try {} on {}", app.file_name(), attempt, session.serial());

        let mut timed_out = false;
        let mut install_failed = false;
        match session.prepare(app, attempt).await {
            Ok(()) => match timeout(limit, session.run_attempt()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => session.record_failure(&e),
                Err(_) => {
                    warn!(
                        "{} timed out on {} after {}s",
                        app.file_name(),
                        session.serial(),
                        limit.as_secs()
                    );
                    timed_out = true;
                }
            },
            Err(e) => install_failed = matches!(e, Error::InstallFailed { .. }),
        }

        if let Some(record) = session.finish(timed_out, None, store).await {
            records.push(record);
        }

        if install_failed {
            warn!(
                "Skipping remaining tries of {} on {}",
                app.file_name(),
                session.serial()
            );
            break;
        }
    }
    records
}
