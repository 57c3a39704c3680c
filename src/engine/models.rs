use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Launch flag that would override the managed data directory.
pub const RESERVED_DATA_PATH_FLAG: &str = "--dataPath";
pub const NAME_MIN_CHARS: usize = 5;
pub const NAME_MAX_CHARS: usize = 50;
pub const DEFAULT_BACKUPS_LIMIT: u32 = 3;

/// Which long operation currently holds an entity. Runtime only, never persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResourceState {
    #[default]
    Idle,
    Installing,
    Deleting,
    Playing,
    BackingUp,
}

impl ResourceState {
    pub fn is_idle(self) -> bool {
        self == ResourceState::Idle
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameVersion {
    pub version: String,
    pub path: PathBuf,
    #[serde(skip)]
    pub state: ResourceState,
}

impl GameVersion {
    pub fn new(version: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            path: path.into(),
            state: ResourceState::Idle,
        }
    }

    pub fn installing(&self) -> bool {
        self.state == ResourceState::Installing
    }

    pub fn deleting(&self) -> bool {
        self.state == ResourceState::Deleting
    }

    pub fn playing(&self) -> bool {
        self.state == ResourceState::Playing
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    pub id: String,
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    #[serde(default)]
    pub mods: Vec<String>,
    #[serde(default)]
    pub start_params: String,
    #[serde(default)]
    pub backups_auto: bool,
    #[serde(default = "default_backups_limit")]
    pub backups_limit: u32,
    #[serde(default)]
    pub last_time_played: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub state: ResourceState,
}

fn default_backups_limit() -> u32 {
    DEFAULT_BACKUPS_LIMIT
}

impl Installation {
    pub fn playing(&self) -> bool {
        self.state == ResourceState::Playing
    }

    pub fn backing_up(&self) -> bool {
        self.state == ResourceState::BackingUp
    }
}

/// Persisted launcher configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub installations: Vec<Installation>,
    #[serde(default)]
    pub game_versions: Vec<GameVersion>,
    #[serde(default)]
    pub last_used_installation: Option<String>,
}

impl Config {
    pub fn find_installation(&self, id: &str) -> Option<&Installation> {
        self.installations.iter().find(|inst| inst.id == id)
    }

    pub fn find_game_version(&self, version: &str) -> Option<&GameVersion> {
        self.game_versions.iter().find(|gv| gv.version == version)
    }

    pub fn installations_on(&self, version: &str) -> impl Iterator<Item = &Installation> {
        self.installations
            .iter()
            .filter(move |inst| inst.version == version)
    }
}

/// Field-wise replacement for an installation; `None` leaves the field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstallationUpdate {
    pub name: Option<String>,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
    pub mods: Option<Vec<String>>,
    pub start_params: Option<String>,
    pub backups_auto: Option<bool>,
    pub backups_limit: Option<u32>,
    pub last_time_played: Option<DateTime<Utc>>,
    pub state: Option<ResourceState>,
}

impl InstallationUpdate {
    pub fn state(state: ResourceState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn apply(&self, target: &mut Installation) {
        if let Some(name) = &self.name {
            target.name = name.clone();
        }
        if let Some(version) = &self.version {
            target.version = version.clone();
        }
        if let Some(path) = &self.path {
            target.path = path.clone();
        }
        if let Some(mods) = &self.mods {
            target.mods = mods.clone();
        }
        if let Some(params) = &self.start_params {
            target.start_params = params.clone();
        }
        if let Some(auto) = self.backups_auto {
            target.backups_auto = auto;
        }
        if let Some(limit) = self.backups_limit {
            target.backups_limit = limit;
        }
        if let Some(at) = self.last_time_played {
            target.last_time_played = Some(at);
        }
        if let Some(state) = self.state {
            target.state = state;
        }
    }

    /// True when the update touches user-editable fields rather than runtime state only.
    pub fn edits_profile(&self) -> bool {
        self.name.is_some()
            || self.version.is_some()
            || self.path.is_some()
            || self.mods.is_some()
            || self.start_params.is_some()
            || self.backups_auto.is_some()
            || self.backups_limit.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GameVersionUpdate {
    pub path: Option<PathBuf>,
    pub state: Option<ResourceState>,
}

impl GameVersionUpdate {
    pub fn state(state: ResourceState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn apply(&self, target: &mut GameVersion) {
        if let Some(path) = &self.path {
            target.path = path.clone();
        }
        if let Some(state) = self.state {
            target.state = state;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("installation name must be {min}-{max} characters (got {0})", min = NAME_MIN_CHARS, max = NAME_MAX_CHARS)]
    NameLength(usize),
    #[error("start parameters may not contain {flag}", flag = RESERVED_DATA_PATH_FLAG)]
    ReservedStartParam,
    #[error("game version {0} is not installed")]
    UnknownVersion(String),
    #[error("invalid game version {0:?}")]
    InvalidVersion(String),
}

pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&len) {
        return Err(ValidationError::NameLength(len));
    }
    Ok(())
}

/// A version string names one directory under the versions root, nothing else.
pub fn validate_version(version: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidVersion(version.to_owned());
    if version.trim().is_empty() || version.contains(['/', '\\']) {
        return Err(invalid());
    }
    let mut components = Path::new(version).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

pub fn validate_start_params(params: &str) -> Result<(), ValidationError> {
    if params.contains(RESERVED_DATA_PATH_FLAG) {
        return Err(ValidationError::ReservedStartParam);
    }
    Ok(())
}
