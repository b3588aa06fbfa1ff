//! Run orchestration across devices
//!
//! - [`independent`]: every device explores on its own; applications are
//!   handed to whichever device goes idle first
//! - [`leader_follower`]: all devices run the same application, the leader
//!   picks each node and every device performs it in lockstep

mod independent;
mod leader_follower;

use std::sync::Arc;

use droidwalk_core::prelude::*;
use droidwalk_core::RunRecord;
use droidwalk_device::{DeviceControl, UiSnapshot};

use crate::artifacts::ArtifactStore;
use crate::config::{ExplorationMode, Settings};
use crate::discovery::AppBundle;
use crate::session::SessionController;

/// Owns every session for the lifetime of a run
pub struct Orchestrator<D, S> {
    sessions: Vec<SessionController<D, S>>,
    settings: Arc<Settings>,
    store: Arc<ArtifactStore>,
}

impl<D, S> Orchestrator<D, S>
where
    D: DeviceControl + Sync + 'static,
    S: UiSnapshot + Sync + 'static,
{
    pub fn new(
        sessions: Vec<SessionController<D, S>>,
        settings: Arc<Settings>,
        store: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            sessions,
            settings,
            store,
        }
    }

    pub fn device_count(&self) -> usize {
        self.sessions.len()
    }

    /// Test every application `runs_per_app` times and return all records
    pub async fn run(self, apps: Vec<AppBundle>) -> Result<Vec<RunRecord>> {
        if self.sessions.is_empty() {
            return Err(Error::NoDevices);
        }

        info!(
            "Testing {} application(s) on {} device(s) in {} mode",
            apps.len(),
            self.sessions.len(),
            self.settings.run.mode
        );

        let records = match self.settings.run.mode {
            ExplorationMode::Independent => {
                independent::run(self.sessions, apps, self.settings, self.store).await?
            }
            ExplorationMode::LeaderFollower => {
                leader_follower::run(self.sessions, apps, &self.settings, &self.store).await
            }
        };

        info!("Run complete: {} record(s)", records.len());
        Ok(records)
    }
}
