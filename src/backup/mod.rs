use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::engine::ports::{BackupRunner, Notifier};
use crate::engine::state::{Notification, Severity};
use crate::env::LauncherPaths;
use crate::store::ConfigStore;
use crate::util::{backup_stamp, format_size};

const ARCHIVE_EXT: &str = "zip";

/// Zips installation data directories and keeps the newest `backups_limit` archives.
#[derive(Clone)]
pub struct BackupManager {
    store: ConfigStore,
    notifier: Arc<dyn Notifier>,
    paths: LauncherPaths,
}

impl BackupManager {
    pub fn new(store: ConfigStore, notifier: Arc<dyn Notifier>, paths: LauncherPaths) -> Self {
        Self {
            store,
            notifier,
            paths,
        }
    }

    pub async fn backup(&self, installation_id: &str) -> Result<PathBuf, String> {
        let installation = self
            .store
            .find_installation(installation_id)
            .ok_or_else(|| format!("installation {installation_id} not found"))?;
        let dest_dir = self.paths.installation_backups_dir(installation_id);
        let source = installation.path.clone();
        let limit = installation.backups_limit;
        info!(
            "backup: {} from {} into {}",
            installation.name,
            source.display(),
            dest_dir.display()
        );

        tokio::task::spawn_blocking(move || {
            let archive = next_archive_path(&dest_dir)?;
            let written = match write_archive(&source, &archive) {
                Ok(written) => written,
                Err(err) => {
                    let _ = fs::remove_file(&archive);
                    return Err(err);
                }
            };
            debug!(
                "backup: wrote {} ({} uncompressed)",
                archive.display(),
                format_size(written)
            );
            prune(&dest_dir, limit)?;
            Ok(archive)
        })
        .await
        .map_err(|e| format!("backup task failed: {e}"))?
    }
}

impl BackupRunner for BackupManager {
    fn run_backup<'a>(&'a self, installation_id: &'a str) -> BoxFuture<'a, bool> {
        async move {
            match self.backup(installation_id).await {
                Ok(archive) => {
                    info!("backup: created {}", archive.display());
                    true
                }
                Err(err) => {
                    warn!("backup: {installation_id} failed: {err}");
                    self.notifier.notify(Notification::new(
                        Severity::Error,
                        format!("Error creating backup. {err}"),
                    ));
                    false
                }
            }
        }
        .boxed()
    }
}

fn next_archive_path(dest_dir: &Path) -> Result<PathBuf, String> {
    fs::create_dir_all(dest_dir).map_err(|e| format!("unable to create backup dir: {e}"))?;
    let stamp = backup_stamp(Utc::now());
    for seq in 0..100u32 {
        let candidate = dest_dir.join(format!("{stamp}-{seq:02}.{ARCHIVE_EXT}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(format!("too many backups created at {stamp}"))
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Returns the number of uncompressed bytes archived.
fn write_archive(source: &Path, archive: &Path) -> Result<u64, String> {
    let file = fs::File::create(archive).map_err(|e| format!("backup create error: {e}"))?;
    let mut zip = ZipWriter::new(file);
    let mut total = 0u64;

    // An installation that never ran has no data dir yet; that is an empty backup.
    if source.exists() {
        for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| format!("backup walk error: {e}"))?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| format!("backup path error: {e}"))?;
            let name = relative.to_string_lossy().replace('\\', "/");
            if entry.file_type().is_dir() {
                zip.add_directory(name, entry_options())
                    .map_err(|e| format!("backup dir entry error: {e}"))?;
                continue;
            }
            zip.start_file(name, entry_options())
                .map_err(|e| format!("backup file entry error: {e}"))?;
            let mut input =
                fs::File::open(entry.path()).map_err(|e| format!("backup read error: {e}"))?;
            total += io::copy(&mut input, &mut zip).map_err(|e| format!("backup write error: {e}"))?;
        }
    } else {
        debug!("backup: {} does not exist yet", source.display());
    }

    zip.finish()
        .map_err(|e| format!("backup finalize error: {e}"))?;
    Ok(total)
}

/// Delete the oldest archives beyond `limit`. A limit of 0 keeps everything.
fn prune(dest_dir: &Path, limit: u32) -> Result<(), String> {
    if limit == 0 {
        return Ok(());
    }
    let mut archives: Vec<PathBuf> = fs::read_dir(dest_dir)
        .map_err(|e| format!("backup list error: {e}"))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == ARCHIVE_EXT))
        .collect();
    archives.sort();

    let excess = archives.len().saturating_sub(limit as usize);
    for old in archives.into_iter().take(excess) {
        debug!("backup: pruning {}", old.display());
        fs::remove_file(&old).map_err(|e| format!("backup prune error: {e}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::engine::models::{Config, Installation, ResourceState};

    #[derive(Default)]
    struct Collect(Mutex<Vec<Notification>>);

    impl Notifier for Collect {
        fn notify(&self, notification: Notification) {
            self.0.lock().unwrap().push(notification);
        }
    }

    fn manager(root: &Path, data: &Path, limit: u32) -> (BackupManager, Arc<Collect>) {
        let store = ConfigStore::new(Config {
            installations: vec![Installation {
                id: "a".into(),
                name: "TestWorld".into(),
                version: "1.19.0".into(),
                path: data.to_path_buf(),
                mods: vec![],
                start_params: String::new(),
                backups_auto: true,
                backups_limit: limit,
                last_time_played: None,
                state: ResourceState::Idle,
            }],
            ..Config::default()
        });
        let notes = Arc::new(Collect::default());
        let manager = BackupManager::new(store, notes.clone(), LauncherPaths::under(root));
        (manager, notes)
    }

    fn archives(dir: &Path) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        found.sort();
        found
    }

    #[tokio::test]
    async fn archives_data_dir_and_applies_retention() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("installations").join("a");
        fs::create_dir_all(data.join("Saves")).unwrap();
        fs::write(data.join("Saves").join("world.vcdbs"), b"save data").unwrap();
        fs::write(data.join("clientsettings.json"), b"{}").unwrap();
        let (manager, notes) = manager(root.path(), &data, 2);

        for _ in 0..3 {
            assert!(manager.run_backup("a").await);
        }

        let dir = root.path().join("backups").join("a");
        let kept = archives(&dir);
        assert_eq!(kept.len(), 2);
        let mut zip = zip::ZipArchive::new(fs::File::open(&kept[1]).unwrap()).unwrap();
        let mut names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["Saves/", "Saves/world.vcdbs", "clientsettings.json"]
        );
        assert!(notes.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_installation_fails_and_notifies() {
        let root = tempfile::tempdir().unwrap();
        let (manager, notes) = manager(root.path(), &root.path().join("data"), 2);
        assert!(!manager.run_backup("ghost").await);
        let notes = notes.0.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn never_played_installation_gets_empty_archive() {
        let root = tempfile::tempdir().unwrap();
        let (manager, _notes) = manager(root.path(), &root.path().join("missing"), 0);
        let archive = manager.backup("a").await.unwrap();
        let zip = zip::ZipArchive::new(fs::File::open(archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 0);
    }
}
