// Settings store - versioned, persisted, hot-reloadable commission settings
//
// One writer publishes through a watch channel; every consumer holds a
// SettingsView and snapshots it at the start of an operation.

use crate::primitives::UserId;
use crate::settings::{CommissionSettings, SettingsError, SettingsPatch};
use crate::storage::StoreError;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, instrument};

/// Where settings are persisted
pub trait SettingsBackend: Send + Sync {
    fn load_settings(&self) -> Result<Option<CommissionSettings>, StoreError>;
    fn save_settings(&self, settings: &CommissionSettings) -> Result<(), StoreError>;
}

/// Proof that the caller was verified as an admin by the auth collaborator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminCaller {
    id: UserId,
}

impl AdminCaller {
    /// Only construct this from an identity the auth layer has already verified
    pub fn verified(id: UserId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> &UserId {
        &self.id
    }
}

/// Read-only handle onto the current settings
#[derive(Clone, Debug)]
pub struct SettingsView {
    rx: watch::Receiver<Arc<CommissionSettings>>,
}

impl SettingsView {
    /// Settings as of now; callers keep this for the whole operation
    pub fn snapshot(&self) -> Arc<CommissionSettings> {
        self.rx.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.rx.borrow().version
    }

    /// Resolves on the next published change; `false` once the store is gone
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Process-wide owner of the commission settings
pub struct SettingsStore {
    backend: Arc<dyn SettingsBackend>,
    tx: watch::Sender<Arc<CommissionSettings>>,
    /// Serializes read-modify-write of the persisted settings
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Load persisted settings, seeding them with `initial` on first start
    pub fn open(
        backend: Arc<dyn SettingsBackend>,
        initial: CommissionSettings,
    ) -> Result<Self, SettingsError> {
        let settings = match backend.load_settings()? {
            Some(persisted) => persisted,
            None => {
                initial.validate()?;
                backend.save_settings(&initial)?;
                info!(version = initial.version, "seeded commission settings");
                initial
            }
        };
        let (tx, _) = watch::channel(Arc::new(settings));
        Ok(Self {
            backend,
            tx,
            write_lock: Mutex::new(()),
        })
    }

    pub fn get(&self) -> Arc<CommissionSettings> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> SettingsView {
        SettingsView {
            rx: self.tx.subscribe(),
        }
    }

    /// Apply an admin patch. The whole patch is rejected if any field is invalid.
    #[instrument(name = "settings.set", skip(self, patch), fields(admin = %admin.id()))]
    pub async fn set(
        &self,
        admin: &AdminCaller,
        patch: &SettingsPatch,
    ) -> Result<Arc<CommissionSettings>, SettingsError> {
        let _guard = self.write_lock.lock().await;
        let current = self.latest()?;
        let next = Arc::new(patch.apply(&current)?);
        self.backend.save_settings(&next)?;
        self.tx.send_replace(next.clone());
        info!(
            version = next.version,
            percentage = %next.percentage,
            on_deposits = next.on_deposits,
            on_transfers = next.on_transfers,
            "commission settings updated"
        );
        Ok(next)
    }

    /// Publish persisted settings if they are newer than the current ones
    pub async fn reload(&self) -> Result<bool, SettingsError> {
        let _guard = self.write_lock.lock().await;
        let Some(persisted) = self.backend.load_settings()? else {
            return Ok(false);
        };
        if persisted.version <= self.tx.borrow().version {
            return Ok(false);
        }
        info!(version = persisted.version, "reloaded commission settings");
        self.tx.send_replace(Arc::new(persisted));
        Ok(true)
    }

    /// Newest of the published and persisted settings
    fn latest(&self) -> Result<Arc<CommissionSettings>, SettingsError> {
        let published = self.get();
        match self.backend.load_settings()? {
            Some(persisted) if persisted.version > published.version => Ok(Arc::new(persisted)),
            _ => Ok(published),
        }
    }
}
