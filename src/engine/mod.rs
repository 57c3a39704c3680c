use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::engine::guard::Conflict;
use crate::engine::models::{
    Installation, InstallationUpdate, ValidationError, validate_name, validate_start_params,
    validate_version,
};
use crate::engine::ports::{BackupRunner, CloseInhibitor, GameExecutor, Notifier, VersionInstaller};
use crate::engine::state::{
    InstallSource, NewInstallation, Notification, PlayState, Severity, UserAction,
};
use crate::env::LauncherPaths;
use crate::store::{Acquire, AcquireError, ConfigAction, ConfigStore, Missing};
use crate::tasks::{PreventClose, TaskKind, TaskQueue};

pub mod guard;
pub mod models;
pub mod ports;
pub mod state;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("{0}")]
    NotFound(Missing),
    #[error("resource busy: {0}")]
    ResourceBusy(Conflict),
    #[error("backup failed")]
    BackupFailed,
    #[error("failed to execute game: {0}")]
    LaunchFailed(String),
    #[error("game exited with errors")]
    NonCleanExit,
    #[error("failed to install version: {0}")]
    InstallFailed(String),
    #[error("failed to delete version: {0}")]
    DeleteFailed(String),
    #[error("game version {0} is already installed")]
    AlreadyInstalled(String),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl From<AcquireError> for EngineError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::NotFound(missing) => EngineError::NotFound(missing),
            AcquireError::Busy(conflict) => EngineError::ResourceBusy(conflict),
            AcquireError::AlreadyInstalled(version) => EngineError::AlreadyInstalled(version),
        }
    }
}

impl EngineError {
    /// How the failure is surfaced; `None` when another component already told the user.
    fn severity(&self) -> Option<Severity> {
        match self {
            EngineError::BackupFailed => None,
            EngineError::NotFound(_)
            | EngineError::AlreadyInstalled(_)
            | EngineError::Invalid(_) => Some(Severity::Warning),
            EngineError::ResourceBusy(_)
            | EngineError::LaunchFailed(_)
            | EngineError::NonCleanExit
            | EngineError::InstallFailed(_)
            | EngineError::DeleteFailed(_) => Some(Severity::Error),
        }
    }
}

/// External collaborators the engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn GameExecutor>,
    pub backup: Arc<dyn BackupRunner>,
    pub installer: Arc<dyn VersionInstaller>,
    pub notifier: Arc<dyn Notifier>,
    pub close: Arc<dyn CloseInhibitor>,
}

/// Orchestrates every long operation against the config store.
///
/// Cheap to clone; each operation can run on its own tokio task.
#[derive(Clone)]
pub struct LauncherEngine {
    store: ConfigStore,
    tasks: TaskQueue,
    paths: LauncherPaths,
    executor: Arc<dyn GameExecutor>,
    backup: Arc<dyn BackupRunner>,
    installer: Arc<dyn VersionInstaller>,
    notifier: Arc<dyn Notifier>,
    close: Arc<dyn CloseInhibitor>,
}

impl LauncherEngine {
    pub fn new(
        store: ConfigStore,
        tasks: TaskQueue,
        paths: LauncherPaths,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            store,
            tasks,
            paths,
            executor: collaborators.executor,
            backup: collaborators.backup,
            installer: collaborators.installer,
            notifier: collaborators.notifier,
            close: collaborators.close,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    pub async fn handle_action(
        &self,
        action: UserAction,
        updates: &mpsc::UnboundedSender<PlayState>,
    ) -> Result<(), EngineError> {
        match action {
            UserAction::ClickPlay { installation } => {
                info!("action: ClickPlay {:?}", installation);
                self.play(installation.as_deref(), updates).await
            }
            UserAction::InstallVersion { version, source } => {
                info!("action: InstallVersion {} from {}", version, source.location);
                self.install_version(&version, &source).await
            }
            UserAction::DeleteVersion { version } => {
                info!("action: DeleteVersion {}", version);
                self.delete_version(&version).await
            }
            UserAction::BackupInstallation { installation } => {
                info!("action: BackupInstallation {}", installation);
                self.backup_installation(&installation).await
            }
            UserAction::AddInstallation(new) => {
                info!("action: AddInstallation {}", new.name);
                self.add_installation(new).map(|_| ())
            }
            UserAction::EditInstallation { id, update } => {
                info!("action: EditInstallation {}", id);
                self.edit_installation(&id, update)
            }
            UserAction::RemoveInstallation { id } => {
                info!("action: RemoveInstallation {}", id);
                self.remove_installation(&id)
            }
            UserAction::SelectInstallation { id } => {
                info!("action: SelectInstallation {}", id);
                self.select_installation(&id)
            }
        }
    }

    /// Validate, optionally back up, run the game and reset every flag afterwards.
    ///
    /// With no id the last used installation is played.
    pub async fn play(
        &self,
        installation_id: Option<&str>,
        updates: &mpsc::UnboundedSender<PlayState>,
    ) -> Result<(), EngineError> {
        let _prevent_close = PreventClose::register(self.close.clone(), "Started playing.");
        updates.send(PlayState::Validating).ok();

        let id = match installation_id {
            Some(id) => id.to_owned(),
            None => match self.store.snapshot().last_used_installation.clone() {
                Some(id) => id,
                None => {
                    return Err(self.abort(
                        updates,
                        EngineError::NotFound(Missing::NoInstallationSelected),
                    ));
                }
            },
        };

        // Guard check and flag set happen in one store write; no await in between.
        let lease = match self.store.try_acquire(Acquire::Play {
            installation: id.clone(),
        }) {
            Ok(lease) => lease,
            Err(err) => return Err(self.abort(updates, err.into())),
        };
        let play_task = self.tasks.start(TaskKind::Play, id.as_str());

        let (Some(installation), Some(version)) =
            (lease.installation().cloned(), lease.game_version().cloned())
        else {
            return Err(self.abort(updates, EngineError::NotFound(Missing::Installation(id))));
        };
        info!(
            "play: {} ({}) on version {}",
            installation.name, installation.id, version.version
        );

        if installation.backups_auto {
            updates.send(PlayState::BackingUp).ok();
            let backed_up = {
                let _backup_task = self.tasks.start(TaskKind::Backup, id.as_str());
                self.backup.run_backup(&id).await
            };
            if !backed_up {
                warn!("play: backup of {} failed; not launching", id);
                updates.send(PlayState::Finalizing).ok();
                drop(play_task);
                lease.release();
                updates.send(PlayState::Aborted).ok();
                return Err(EngineError::BackupFailed);
            }
        }

        updates.send(PlayState::Launching).ok();
        self.store.dispatch(ConfigAction::EditInstallation {
            id: id.clone(),
            update: InstallationUpdate {
                last_time_played: Some(Utc::now()),
                ..InstallationUpdate::default()
            },
        });
        updates.send(PlayState::Running).ok();
        let result = self.executor.execute(&version, &installation).await;

        updates.send(PlayState::Finalizing).ok();
        drop(play_task);
        lease.release();

        let outcome = match result {
            Ok(true) => {
                info!("play: {} exited cleanly", id);
                Ok(())
            }
            Ok(false) => Err(EngineError::NonCleanExit),
            Err(err) => Err(EngineError::LaunchFailed(err)),
        };
        if let Err(err) = &outcome {
            error!("play: {} failed: {}", id, err);
            self.report(err);
        }
        updates.send(PlayState::Idle).ok();
        outcome
    }

    pub async fn install_version(
        &self,
        version: &str,
        source: &InstallSource,
    ) -> Result<(), EngineError> {
        // The version names a directory under the versions root.
        validate_version(version).map_err(|err| self.fail(err.into()))?;
        let _prevent_close =
            PreventClose::register(self.close.clone(), &format!("Installing version {version}."));
        let dest = self.paths.game_version_dir(version);
        let mut lease = self
            .store
            .try_acquire(Acquire::Install {
                version: version.to_owned(),
                path: dest.clone(),
            })
            .map_err(|err| self.fail(err.into()))?;
        let _task = self.tasks.start(TaskKind::Install, version);

        info!("install: {} into {}", version, dest.display());
        match self.installer.install(version, source, &dest).await {
            Ok(()) => {
                lease.set_release(vec![ConfigAction::EditGameVersion {
                    version: version.to_owned(),
                    update: models::GameVersionUpdate::state(models::ResourceState::Idle),
                }]);
                info!("install: {} ready", version);
                self.notifier.notify(Notification::new(
                    Severity::Success,
                    format!("Version {version} installed."),
                ));
                Ok(())
            }
            // The lease still drops the half-installed record.
            Err(err) => Err(self.fail(EngineError::InstallFailed(err))),
        }
    }

    pub async fn delete_version(&self, version: &str) -> Result<(), EngineError> {
        let _prevent_close =
            PreventClose::register(self.close.clone(), &format!("Deleting version {version}."));
        let mut lease = self
            .store
            .try_acquire(Acquire::Delete {
                version: version.to_owned(),
            })
            .map_err(|err| self.fail(err.into()))?;
        let _task = self.tasks.start(TaskKind::Delete, version);

        let Some(record) = lease.game_version().cloned() else {
            return Err(self.fail(EngineError::NotFound(Missing::GameVersion(
                version.to_owned(),
            ))));
        };
        let dependents = self.store.snapshot().installations_on(version).count();
        if dependents > 0 {
            warn!(
                "delete: {} is still referenced by {} installation(s)",
                version, dependents
            );
        }

        match self.installer.remove(&record).await {
            Ok(()) => {
                lease.set_release(vec![ConfigAction::RemoveGameVersion {
                    version: version.to_owned(),
                }]);
                info!("delete: {} removed", version);
                self.notifier.notify(Notification::new(
                    Severity::Success,
                    format!("Version {version} deleted."),
                ));
                Ok(())
            }
            Err(err) => Err(self.fail(EngineError::DeleteFailed(err))),
        }
    }

    /// Standalone backup, guarded like the other long operations.
    pub async fn backup_installation(&self, installation_id: &str) -> Result<(), EngineError> {
        let _prevent_close = PreventClose::register(self.close.clone(), "Backing up installation.");
        let lease = self
            .store
            .try_acquire(Acquire::Backup {
                installation: installation_id.to_owned(),
            })
            .map_err(|err| self.fail(err.into()))?;
        let _task = self.tasks.start(TaskKind::Backup, installation_id);

        let backed_up = self.backup.run_backup(installation_id).await;
        lease.release();
        if backed_up {
            self.notifier
                .notify(Notification::new(Severity::Success, "Backup created."));
            Ok(())
        } else {
            Err(EngineError::BackupFailed)
        }
    }

    pub fn add_installation(&self, new: NewInstallation) -> Result<String, EngineError> {
        validate_name(&new.name).map_err(|err| self.fail(err.into()))?;
        validate_start_params(&new.start_params).map_err(|err| self.fail(err.into()))?;

        let id = Uuid::new_v4().to_string();
        let installation = Installation {
            id: id.clone(),
            name: new.name,
            version: new.version.clone(),
            path: self.paths.installation_dir(&id),
            mods: new.mods,
            start_params: new.start_params,
            backups_auto: new.backups_auto,
            backups_limit: new.backups_limit,
            last_time_played: None,
            state: models::ResourceState::Idle,
        };
        let version = new.version;
        self.store
            .try_dispatch(ConfigAction::AddInstallation(installation), |config| {
                match config.find_game_version(&version) {
                    Some(_) => Ok(()),
                    None => Err(EngineError::Invalid(ValidationError::UnknownVersion(
                        version.clone(),
                    ))),
                }
            })
            .map_err(|err| self.fail(err))?;
        // Only select the new installation when nothing is selected yet.
        let selected = self.store.try_dispatch(
            ConfigAction::SetLastUsedInstallation {
                id: Some(id.clone()),
            },
            |config| match config.last_used_installation {
                Some(_) => Err(()),
                None => Ok(()),
            },
        );
        debug!("installation {} selected by default: {}", id, selected.is_ok());
        info!("installation {} created", id);
        Ok(id)
    }

    pub fn edit_installation(
        &self,
        id: &str,
        mut update: InstallationUpdate,
    ) -> Result<(), EngineError> {
        // Runtime state is owned by the orchestrators.
        update.state = None;
        update.last_time_played = None;
        if !update.edits_profile() {
            debug!("installation {} edit carries no changes", id);
            return Ok(());
        }
        if let Some(name) = &update.name {
            validate_name(name).map_err(|err| self.fail(err.into()))?;
        }
        if let Some(params) = &update.start_params {
            validate_start_params(params).map_err(|err| self.fail(err.into()))?;
        }

        let new_version = update.version.clone();
        let changed = self
            .store
            .try_dispatch(
                ConfigAction::EditInstallation {
                    id: id.to_owned(),
                    update,
                },
                |config| {
                    let current = config
                        .find_installation(id)
                        .ok_or_else(|| EngineError::NotFound(Missing::Installation(id.to_owned())))?;
                    guard::check_installation_idle(current).map_err(EngineError::ResourceBusy)?;
                    if let Some(version) = &new_version
                        && config.find_game_version(version).is_none()
                    {
                        return Err(EngineError::Invalid(ValidationError::UnknownVersion(
                            version.clone(),
                        )));
                    }
                    Ok(())
                },
            )
            .map_err(|err| self.fail(err))?;
        debug!("installation {} edited (changed={})", id, changed);
        Ok(())
    }

    pub fn remove_installation(&self, id: &str) -> Result<(), EngineError> {
        self.store
            .try_dispatch(ConfigAction::RemoveInstallation { id: id.to_owned() }, |config| {
                let current = config
                    .find_installation(id)
                    .ok_or_else(|| EngineError::NotFound(Missing::Installation(id.to_owned())))?;
                guard::check_installation_idle(current).map_err(EngineError::ResourceBusy)
            })
            .map_err(|err| self.fail(err))?;
        info!("installation {} removed", id);
        Ok(())
    }

    pub fn select_installation(&self, id: &str) -> Result<(), EngineError> {
        self.store
            .try_dispatch(
                ConfigAction::SetLastUsedInstallation {
                    id: Some(id.to_owned()),
                },
                |config| match config.find_installation(id) {
                    Some(_) => Ok(()),
                    None => Err(EngineError::NotFound(Missing::Installation(id.to_owned()))),
                },
            )
            .map_err(|err| self.fail(err))?;
        Ok(())
    }

    fn abort(
        &self,
        updates: &mpsc::UnboundedSender<PlayState>,
        err: EngineError,
    ) -> EngineError {
        warn!("play: aborted: {}", err);
        updates.send(PlayState::Aborted).ok();
        self.fail(err)
    }

    fn fail(&self, err: EngineError) -> EngineError {
        self.report(&err);
        err
    }

    fn report(&self, err: &EngineError) {
        if let Some(severity) = err.severity() {
            let message = match err {
                EngineError::LaunchFailed(_) => format!("Error executing the game. {err}"),
                _ => err.to_string(),
            };
            self.notifier.notify(Notification::new(severity, message));
        }
    }
}
