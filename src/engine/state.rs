use std::fmt;

use crate::engine::models::InstallationUpdate;

// States a single Play operation moves through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayState {
    Idle,
    Validating,
    BackingUp,
    Launching,
    Running,
    Finalizing,
    Aborted,
}

impl PlayState {
    pub fn label(self) -> &'static str {
        match self {
            PlayState::Idle => "idle",
            PlayState::Validating => "validating",
            PlayState::BackingUp => "backing up",
            PlayState::Launching => "launching",
            PlayState::Running => "running",
            PlayState::Finalizing => "finalizing",
            PlayState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn title(self) -> &'static str {
        match self {
            Severity::Success => "Success",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl Notification {
    /// Titled after its severity.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            title: severity.title().to_owned(),
            message: message.into(),
            severity,
        }
    }
}

/// Where a game version archive comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallSource {
    /// Local archive path or http(s) URL.
    pub location: String,
    pub sha256: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewInstallation {
    pub name: String,
    pub version: String,
    pub mods: Vec<String>,
    pub start_params: String,
    pub backups_auto: bool,
    pub backups_limit: u32,
}

// Actions triggered by the user from the CLI layer.
#[derive(Clone, Debug)]
pub enum UserAction {
    ClickPlay {
        installation: Option<String>,
    },
    InstallVersion {
        version: String,
        source: InstallSource,
    },
    DeleteVersion {
        version: String,
    },
    BackupInstallation {
        installation: String,
    },
    AddInstallation(NewInstallation),
    EditInstallation {
        id: String,
        update: InstallationUpdate,
    },
    RemoveInstallation {
        id: String,
    },
    SelectInstallation {
        id: String,
    },
}
