use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::watch;

use crate::engine::guard::{self, Conflict};
use crate::engine::models::{
    Config, GameVersion, GameVersionUpdate, Installation, InstallationUpdate, ResourceState,
};

/// The closed set of mutations the config store accepts.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigAction {
    AddInstallation(Installation),
    EditInstallation {
        id: String,
        update: InstallationUpdate,
    },
    RemoveInstallation {
        id: String,
    },
    AddGameVersion(GameVersion),
    EditGameVersion {
        version: String,
        update: GameVersionUpdate,
    },
    RemoveGameVersion {
        version: String,
    },
    SetLastUsedInstallation {
        id: Option<String>,
    },
}

/// Apply one action to a snapshot. `None` means the action is a no-op.
pub fn reduce(config: &Config, action: &ConfigAction) -> Option<Config> {
    match action {
        ConfigAction::AddInstallation(installation) => {
            if config.find_installation(&installation.id).is_some() {
                return None;
            }
            let mut next = config.clone();
            next.installations.push(installation.clone());
            Some(next)
        }
        ConfigAction::EditInstallation { id, update } => {
            let idx = config.installations.iter().position(|i| &i.id == id)?;
            let mut next = config.clone();
            update.apply(&mut next.installations[idx]);
            (next != *config).then_some(next)
        }
        ConfigAction::RemoveInstallation { id } => {
            let idx = config.installations.iter().position(|i| &i.id == id)?;
            let mut next = config.clone();
            next.installations.remove(idx);
            if next.last_used_installation.as_deref() == Some(id.as_str()) {
                next.last_used_installation = None;
            }
            Some(next)
        }
        ConfigAction::AddGameVersion(version) => {
            if config.find_game_version(&version.version).is_some() {
                return None;
            }
            let mut next = config.clone();
            next.game_versions.push(version.clone());
            Some(next)
        }
        ConfigAction::EditGameVersion { version, update } => {
            let idx = config
                .game_versions
                .iter()
                .position(|gv| &gv.version == version)?;
            let mut next = config.clone();
            update.apply(&mut next.game_versions[idx]);
            (next != *config).then_some(next)
        }
        ConfigAction::RemoveGameVersion { version } => {
            let idx = config
                .game_versions
                .iter()
                .position(|gv| &gv.version == version)?;
            let mut next = config.clone();
            next.game_versions.remove(idx);
            Some(next)
        }
        ConfigAction::SetLastUsedInstallation { id } => {
            if let Some(id) = id
                && config.find_installation(id).is_none()
            {
                return None;
            }
            if config.last_used_installation == *id {
                return None;
            }
            let mut next = config.clone();
            next.last_used_installation = id.clone();
            Some(next)
        }
    }
}

/// A request to take one or more entities for a long operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Acquire {
    Play { installation: String },
    Install { version: String, path: PathBuf },
    Delete { version: String },
    Backup { installation: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Missing {
    Installation(String),
    GameVersion(String),
    NoInstallationSelected,
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Installation(id) => write!(f, "installation {id} not found"),
            Missing::GameVersion(version) => write!(f, "game version {version} is not installed"),
            Missing::NoInstallationSelected => f.write_str("no installation selected"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcquireError {
    NotFound(Missing),
    Busy(Conflict),
    AlreadyInstalled(String),
}

/// Single-writer container for the launcher configuration.
///
/// Every mutation goes through [`ConfigStore::dispatch`] or [`ConfigStore::try_acquire`];
/// readers get immutable `Arc<Config>` snapshots.
#[derive(Clone)]
pub struct ConfigStore {
    tx: Arc<watch::Sender<Arc<Config>>>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(config));
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.tx.subscribe()
    }

    pub fn find_installation(&self, id: &str) -> Option<Installation> {
        self.snapshot().find_installation(id).cloned()
    }

    #[cfg(test)]
    pub fn find_game_version(&self, version: &str) -> Option<GameVersion> {
        self.snapshot().find_game_version(version).cloned()
    }

    /// Apply one action atomically. Returns whether a new snapshot was published.
    pub fn dispatch(&self, action: ConfigAction) -> bool {
        let changed = self.tx.send_if_modified(|current| match reduce(current, &action) {
            Some(next) => {
                *current = Arc::new(next);
                true
            }
            None => false,
        });
        if !changed {
            debug!("store: no-op action {:?}", action);
        }
        changed
    }

    /// Dispatch `action` only if `check` accepts the current snapshot; both happen
    /// under the same write lock.
    pub fn try_dispatch<E>(
        &self,
        action: ConfigAction,
        check: impl FnOnce(&Config) -> Result<(), E>,
    ) -> Result<bool, E> {
        let mut outcome = Ok(false);
        self.tx.send_if_modified(|current| {
            if let Err(err) = check(current) {
                outcome = Err(err);
                return false;
            }
            match reduce(current, &action) {
                Some(next) => {
                    *current = Arc::new(next);
                    outcome = Ok(true);
                    true
                }
                None => false,
            }
        });
        outcome
    }

    /// Check the conflict table and set the resource flags in one step.
    ///
    /// The closure runs under the channel's write lock with no suspension point, so two
    /// operations can never both pass the check for the same entity.
    pub fn try_acquire(&self, request: Acquire) -> Result<ResourceLease, AcquireError> {
        let mut outcome = None;
        self.tx.send_if_modified(|current| {
            let result = plan_acquire(current, &request);
            let modified = match &result {
                Ok(plan) => {
                    let mut next = (**current).clone();
                    for action in &plan.apply {
                        if let Some(reduced) = reduce(&next, action) {
                            next = reduced;
                        }
                    }
                    *current = Arc::new(next);
                    true
                }
                Err(_) => false,
            };
            outcome = Some(result);
            modified
        });

        match outcome {
            Some(Ok(plan)) => Ok(ResourceLease {
                store: self.clone(),
                release: plan.release,
                installation: plan.installation,
                game_version: plan.game_version,
            }),
            Some(Err(err)) => Err(err),
            None => unreachable!("send_if_modified always runs its closure"),
        }
    }
}

struct AcquirePlan {
    apply: Vec<ConfigAction>,
    release: Vec<ConfigAction>,
    installation: Option<Installation>,
    game_version: Option<GameVersion>,
}

fn set_installation_state(id: &str, state: ResourceState) -> ConfigAction {
    ConfigAction::EditInstallation {
        id: id.to_owned(),
        update: InstallationUpdate::state(state),
    }
}

fn set_version_state(version: &str, state: ResourceState) -> ConfigAction {
    ConfigAction::EditGameVersion {
        version: version.to_owned(),
        update: GameVersionUpdate::state(state),
    }
}

fn plan_acquire(config: &Config, request: &Acquire) -> Result<AcquirePlan, AcquireError> {
    match request {
        Acquire::Play { installation } => {
            let inst = config
                .find_installation(installation)
                .ok_or_else(|| AcquireError::NotFound(Missing::Installation(installation.clone())))?;
            let version = config
                .find_game_version(&inst.version)
                .ok_or_else(|| AcquireError::NotFound(Missing::GameVersion(inst.version.clone())))?;
            guard::check_play(inst, version).map_err(AcquireError::Busy)?;

            let mut playing_inst = inst.clone();
            playing_inst.state = ResourceState::Playing;
            let mut playing_version = version.clone();
            playing_version.state = ResourceState::Playing;
            Ok(AcquirePlan {
                apply: vec![
                    set_installation_state(&inst.id, ResourceState::Playing),
                    set_version_state(&version.version, ResourceState::Playing),
                ],
                release: vec![
                    set_installation_state(&inst.id, ResourceState::Idle),
                    set_version_state(&version.version, ResourceState::Idle),
                ],
                installation: Some(playing_inst),
                game_version: Some(playing_version),
            })
        }
        Acquire::Install { version, path } => {
            let existing = config.find_game_version(version);
            guard::check_install(existing).map_err(AcquireError::Busy)?;
            if existing.is_some() {
                return Err(AcquireError::AlreadyInstalled(version.clone()));
            }
            let record = GameVersion {
                state: ResourceState::Installing,
                ..GameVersion::new(version.clone(), path.clone())
            };
            Ok(AcquirePlan {
                apply: vec![ConfigAction::AddGameVersion(record.clone())],
                // Until the install is committed, dropping the lease forgets the record.
                release: vec![ConfigAction::RemoveGameVersion {
                    version: version.clone(),
                }],
                installation: None,
                game_version: Some(record),
            })
        }
        Acquire::Delete { version } => {
            let existing = config
                .find_game_version(version)
                .ok_or_else(|| AcquireError::NotFound(Missing::GameVersion(version.clone())))?;
            guard::check_delete(existing).map_err(AcquireError::Busy)?;
            let mut record = existing.clone();
            record.state = ResourceState::Deleting;
            Ok(AcquirePlan {
                apply: vec![set_version_state(version, ResourceState::Deleting)],
                release: vec![set_version_state(version, ResourceState::Idle)],
                installation: None,
                game_version: Some(record),
            })
        }
        Acquire::Backup { installation } => {
            let inst = config
                .find_installation(installation)
                .ok_or_else(|| AcquireError::NotFound(Missing::Installation(installation.clone())))?;
            guard::check_installation_idle(inst).map_err(AcquireError::Busy)?;
            let mut record = inst.clone();
            record.state = ResourceState::BackingUp;
            Ok(AcquirePlan {
                apply: vec![set_installation_state(&inst.id, ResourceState::BackingUp)],
                release: vec![set_installation_state(&inst.id, ResourceState::Idle)],
                installation: Some(record),
                game_version: None,
            })
        }
    }
}

/// Flags taken by [`ConfigStore::try_acquire`]. Dropping the lease dispatches its
/// release actions, so flags are reset on every exit path.
pub struct ResourceLease {
    store: ConfigStore,
    release: Vec<ConfigAction>,
    installation: Option<Installation>,
    game_version: Option<GameVersion>,
}

impl ResourceLease {
    /// The installation as it was when the lease was taken.
    pub fn installation(&self) -> Option<&Installation> {
        self.installation.as_ref()
    }

    /// The game version as it was when the lease was taken.
    pub fn game_version(&self) -> Option<&GameVersion> {
        self.game_version.as_ref()
    }

    /// Replace what happens when the lease ends (e.g. an install that succeeded).
    pub fn set_release(&mut self, actions: Vec<ConfigAction>) {
        self.release = actions;
    }

    /// End the lease now rather than at scope exit.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        for action in self.release.drain(..) {
            if !self.store.dispatch(action.clone()) {
                warn!("store: release action had no effect: {:?}", action);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::DEFAULT_BACKUPS_LIMIT;

    fn installation(id: &str, version: &str) -> Installation {
        Installation {
            id: id.into(),
            name: "TestWorld".into(),
            version: version.into(),
            path: PathBuf::from(format!("/tmp/{id}")),
            mods: vec![],
            start_params: String::new(),
            backups_auto: false,
            backups_limit: DEFAULT_BACKUPS_LIMIT,
            last_time_played: None,
            state: ResourceState::Idle,
        }
    }

    fn seeded_store() -> ConfigStore {
        ConfigStore::new(Config {
            installations: vec![installation("a", "1.19.0"), installation("b", "1.19.0")],
            game_versions: vec![GameVersion::new("1.19.0", "/tmp/v")],
            last_used_installation: Some("a".into()),
        })
    }

    #[test]
    fn actions_on_missing_ids_are_noops() {
        let store = seeded_store();
        let before = store.snapshot();
        let actions = [
            ConfigAction::EditInstallation {
                id: "nope".into(),
                update: InstallationUpdate::state(ResourceState::Playing),
            },
            ConfigAction::RemoveInstallation { id: "nope".into() },
            ConfigAction::EditGameVersion {
                version: "0.0.1".into(),
                update: GameVersionUpdate::state(ResourceState::Deleting),
            },
            ConfigAction::RemoveGameVersion {
                version: "0.0.1".into(),
            },
            ConfigAction::SetLastUsedInstallation {
                id: Some("nope".into()),
            },
        ];
        for action in actions {
            assert!(!store.dispatch(action));
        }
        let after = store.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(*before, *after);
    }

    #[test]
    fn edit_publishes_new_snapshot_and_leaves_old_intact() {
        let store = seeded_store();
        let before = store.snapshot();
        assert!(store.dispatch(ConfigAction::EditInstallation {
            id: "a".into(),
            update: InstallationUpdate {
                name: Some("Other world".into()),
                ..InstallationUpdate::default()
            },
        }));
        let after = store.snapshot();
        assert_eq!(before.find_installation("a").unwrap().name, "TestWorld");
        assert_eq!(after.find_installation("a").unwrap().name, "Other world");
        assert_eq!(after.find_installation("b"), before.find_installation("b"));
    }

    #[test]
    fn adding_duplicate_keys_is_ignored() {
        let store = seeded_store();
        assert!(!store.dispatch(ConfigAction::AddInstallation(installation("a", "9.9.9"))));
        assert!(!store.dispatch(ConfigAction::AddGameVersion(GameVersion::new(
            "1.19.0", "/elsewhere"
        ))));
        assert_eq!(store.snapshot().installations.len(), 2);
    }

    #[test]
    fn removing_last_used_installation_clears_selection() {
        let store = seeded_store();
        store.dispatch(ConfigAction::RemoveInstallation { id: "a".into() });
        assert_eq!(store.snapshot().last_used_installation, None);
    }

    #[test]
    fn play_lease_sets_and_resets_both_flags() {
        let store = seeded_store();
        let lease = store
            .try_acquire(Acquire::Play {
                installation: "a".into(),
            })
            .unwrap();
        let snap = store.snapshot();
        assert!(snap.find_installation("a").unwrap().playing());
        assert!(snap.find_game_version("1.19.0").unwrap().playing());
        assert_eq!(lease.game_version().unwrap().version, "1.19.0");

        let err = store
            .try_acquire(Acquire::Play {
                installation: "b".into(),
            })
            .err();
        assert_eq!(err, Some(AcquireError::Busy(Conflict::VersionPlaying)));

        drop(lease);
        let snap = store.snapshot();
        assert!(snap.find_installation("a").unwrap().state.is_idle());
        assert!(snap.find_game_version("1.19.0").unwrap().state.is_idle());
    }

    #[test]
    fn failed_acquire_leaves_snapshot_untouched() {
        let store = seeded_store();
        store.dispatch(ConfigAction::EditGameVersion {
            version: "1.19.0".into(),
            update: GameVersionUpdate::state(ResourceState::Installing),
        });
        let before = store.snapshot();
        let err = store
            .try_acquire(Acquire::Play {
                installation: "a".into(),
            })
            .err();
        assert_eq!(err, Some(AcquireError::Busy(Conflict::VersionInstalling)));
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn install_lease_forgets_record_unless_committed() {
        let store = seeded_store();
        let lease = store
            .try_acquire(Acquire::Install {
                version: "1.20.0".into(),
                path: PathBuf::from("/tmp/v2"),
            })
            .unwrap();
        assert!(store.find_game_version("1.20.0").unwrap().installing());
        drop(lease);
        assert!(store.find_game_version("1.20.0").is_none());

        let mut lease = store
            .try_acquire(Acquire::Install {
                version: "1.20.0".into(),
                path: PathBuf::from("/tmp/v2"),
            })
            .unwrap();
        lease.set_release(vec![ConfigAction::EditGameVersion {
            version: "1.20.0".into(),
            update: GameVersionUpdate::state(ResourceState::Idle),
        }]);
        lease.release();
        assert!(store.find_game_version("1.20.0").unwrap().state.is_idle());

        assert_eq!(
            store
                .try_acquire(Acquire::Install {
                    version: "1.20.0".into(),
                    path: PathBuf::from("/tmp/v2"),
                })
                .err(),
            Some(AcquireError::AlreadyInstalled("1.20.0".into()))
        );
    }

    #[test]
    fn missing_records_report_not_found() {
        let store = seeded_store();
        assert_eq!(
            store
                .try_acquire(Acquire::Play {
                    installation: "zzz".into()
                })
                .err(),
            Some(AcquireError::NotFound(Missing::Installation("zzz".into())))
        );
        store.dispatch(ConfigAction::RemoveGameVersion {
            version: "1.19.0".into(),
        });
        assert_eq!(
            store
                .try_acquire(Acquire::Play {
                    installation: "a".into()
                })
                .err(),
            Some(AcquireError::NotFound(Missing::GameVersion("1.19.0".into())))
        );
    }

    #[test]
    fn rejected_checked_dispatch_changes_nothing() {
        let store = seeded_store();
        let before = store.snapshot();
        let result = store.try_dispatch(
            ConfigAction::RemoveInstallation { id: "a".into() },
            |_| Err("busy"),
        );
        assert_eq!(result, Err("busy"));
        assert!(Arc::ptr_eq(&before, &store.snapshot()));

        let removed = store.try_dispatch(
            ConfigAction::RemoveInstallation { id: "a".into() },
            |_| Ok::<(), &str>(()),
        );
        assert_eq!(removed, Ok(true));
        assert!(store.find_installation("a").is_none());
    }

    #[tokio::test]
    async fn subscribers_observe_new_snapshots() {
        let store = seeded_store();
        let mut rx = store.subscribe();
        store.dispatch(ConfigAction::SetLastUsedInstallation {
            id: Some("b".into()),
        });
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow_and_update().last_used_installation.as_deref(),
            Some("b")
        );
    }
}
