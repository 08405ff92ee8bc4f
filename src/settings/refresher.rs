// Settings refresher - keeps published settings in step with the persisted copy

use crate::job::{jittered, wait_or_shutdown};
use crate::settings::SettingsStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Background task calling [`SettingsStore::reload`] on a bounded interval
pub struct SettingsRefresher {
    store: Arc<SettingsStore>,
    interval: Duration,
    jitter: Duration,
}

impl SettingsRefresher {
    pub fn new(store: Arc<SettingsStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Run until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        while wait_or_shutdown(jittered(self.interval, self.jitter), &mut shutdown).await {
            match self.store.reload().await {
                Ok(true) => debug!(version = self.store.get().version, "settings refreshed"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "settings refresh failed"),
            }
        }
        debug!("settings refresher stopped");
    }
}
