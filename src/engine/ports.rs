//! Collaborators the engine drives but does not implement itself.

use std::path::Path;

use futures_util::future::BoxFuture;
use log::{error, info, warn};

use crate::engine::models::{GameVersion, Installation};
use crate::engine::state::{InstallSource, Notification, Severity};

/// Runs the game for an installation and resolves when the process exits.
pub trait GameExecutor: Send + Sync {
    /// `Ok(true)` for a clean exit, `Ok(false)` for a failing exit status,
    /// `Err` when the game could not be executed at all.
    fn execute<'a>(
        &'a self,
        version: &'a GameVersion,
        installation: &'a Installation,
    ) -> BoxFuture<'a, Result<bool, String>>;
}

pub trait BackupRunner: Send + Sync {
    /// Back up one installation; reports its own failures to the user.
    fn run_backup<'a>(&'a self, installation_id: &'a str) -> BoxFuture<'a, bool>;
}

pub trait VersionInstaller: Send + Sync {
    fn install<'a>(
        &'a self,
        version: &'a str,
        source: &'a InstallSource,
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<(), String>>;

    fn remove<'a>(&'a self, version: &'a GameVersion) -> BoxFuture<'a, Result<(), String>>;
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Host hook that keeps the application open while work is in flight.
pub trait CloseInhibitor: Send + Sync {
    fn register(&self, id: &str, reason: &str);
    fn unregister(&self, id: &str);
}

/// Notifier for headless runs: everything goes to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        let Notification {
            title,
            message,
            severity,
        } = notification;
        match severity {
            Severity::Error => error!("{title}: {message}"),
            Severity::Warning => warn!("{title}: {message}"),
            Severity::Success => info!("{title}: {message}"),
        }
    }
}
