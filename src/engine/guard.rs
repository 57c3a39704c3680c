//! Conflict table consulted before any long operation takes an entity.

use std::fmt;

use crate::engine::models::{GameVersion, Installation};

/// The specific flag that blocked an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conflict {
    InstallationPlaying,
    InstallationBackingUp,
    VersionInstalling,
    VersionDeleting,
    VersionPlaying,
}

impl Conflict {
    pub fn flag(self) -> &'static str {
        match self {
            Conflict::InstallationPlaying => "installation.playing",
            Conflict::InstallationBackingUp => "installation.backingUp",
            Conflict::VersionInstalling => "version.installing",
            Conflict::VersionDeleting => "version.deleting",
            Conflict::VersionPlaying => "version.playing",
        }
    }

    fn from_installation(installation: &Installation) -> Option<Self> {
        if installation.playing() {
            Some(Conflict::InstallationPlaying)
        } else if installation.backing_up() {
            Some(Conflict::InstallationBackingUp)
        } else {
            None
        }
    }

    fn from_version(version: &GameVersion) -> Option<Self> {
        if version.installing() {
            Some(Conflict::VersionInstalling)
        } else if version.deleting() {
            Some(Conflict::VersionDeleting)
        } else if version.playing() {
            Some(Conflict::VersionPlaying)
        } else {
            None
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag())
    }
}

/// Play needs both the installation and its version idle.
pub fn check_play(installation: &Installation, version: &GameVersion) -> Result<(), Conflict> {
    if let Some(conflict) = Conflict::from_installation(installation) {
        return Err(conflict);
    }
    match Conflict::from_version(version) {
        Some(conflict) => Err(conflict),
        None => Ok(()),
    }
}

/// Installing over a version that is mid-install or mid-delete is refused.
/// A version that is merely being played is reported as already installed by the caller.
pub fn check_install(version: Option<&GameVersion>) -> Result<(), Conflict> {
    match version {
        Some(gv) if gv.installing() => Err(Conflict::VersionInstalling),
        Some(gv) if gv.deleting() => Err(Conflict::VersionDeleting),
        _ => Ok(()),
    }
}

pub fn check_delete(version: &GameVersion) -> Result<(), Conflict> {
    match Conflict::from_version(version) {
        Some(conflict) => Err(conflict),
        None => Ok(()),
    }
}

/// Standalone backups and profile edits both need an idle installation.
pub fn check_installation_idle(installation: &Installation) -> Result<(), Conflict> {
    match Conflict::from_installation(installation) {
        Some(conflict) => Err(conflict),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::engine::models::ResourceState;

    fn installation(state: ResourceState) -> Installation {
        Installation {
            id: "a".into(),
            name: "TestWorld".into(),
            version: "1.19.0".into(),
            path: PathBuf::from("/tmp/a"),
            mods: vec![],
            start_params: String::new(),
            backups_auto: false,
            backups_limit: 3,
            last_time_played: None,
            state,
        }
    }

    fn version(state: ResourceState) -> GameVersion {
        GameVersion {
            state,
            ..GameVersion::new("1.19.0", "/tmp/v")
        }
    }

    #[test]
    fn play_conflict_table() {
        let idle = installation(ResourceState::Idle);
        assert_eq!(check_play(&idle, &version(ResourceState::Idle)), Ok(()));
        assert_eq!(
            check_play(&idle, &version(ResourceState::Installing)),
            Err(Conflict::VersionInstalling)
        );
        assert_eq!(
            check_play(&idle, &version(ResourceState::Deleting)),
            Err(Conflict::VersionDeleting)
        );
        assert_eq!(
            check_play(&idle, &version(ResourceState::Playing)),
            Err(Conflict::VersionPlaying)
        );
        assert_eq!(
            check_play(
                &installation(ResourceState::Playing),
                &version(ResourceState::Playing)
            ),
            Err(Conflict::InstallationPlaying)
        );
    }

    #[test]
    fn install_and_delete_conflict_table() {
        assert_eq!(check_install(None), Ok(()));
        assert_eq!(
            check_install(Some(&version(ResourceState::Installing))),
            Err(Conflict::VersionInstalling)
        );
        assert_eq!(
            check_install(Some(&version(ResourceState::Deleting))),
            Err(Conflict::VersionDeleting)
        );
        assert_eq!(check_delete(&version(ResourceState::Idle)), Ok(()));
        assert_eq!(
            check_delete(&version(ResourceState::Playing)),
            Err(Conflict::VersionPlaying)
        );
        assert_eq!(
            check_delete(&version(ResourceState::Installing)),
            Err(Conflict::VersionInstalling)
        );
    }

    #[test]
    fn conflicts_name_their_flag() {
        assert_eq!(Conflict::VersionPlaying.to_string(), "version.playing");
        assert_eq!(
            check_installation_idle(&installation(ResourceState::BackingUp))
                .unwrap_err()
                .flag(),
            "installation.backingUp"
        );
    }
}
