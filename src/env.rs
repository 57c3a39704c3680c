use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const HOME_OVERRIDE_VAR: &str = "VS_LAUNCHER_HOME";
const CONFIG_FILE: &str = "config.json";

/// Returns the root directory used by the launcher.
pub fn default_app_dir() -> PathBuf {
    if let Some(dir) = env::var_os(HOME_OVERRIDE_VAR).filter(|value| !value.is_empty()) {
        return PathBuf::from(dir);
    }

    let base = match env::consts::OS {
        "windows" => env::var_os("LOCALAPPDATA")
            .or_else(|| env::var_os("APPDATA"))
            .map(PathBuf::from),
        "macos" => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".local").join("share")),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join("vs-launcher")
}

/// Directory layout under one app root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LauncherPaths {
    pub root: PathBuf,
    pub cache_dir: PathBuf,
    pub versions_dir: PathBuf,
    pub installations_dir: PathBuf,
    pub backups_dir: PathBuf,
}

impl LauncherPaths {
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            cache_dir: root.join("cache"),
            versions_dir: root.join("versions"),
            installations_dir: root.join("installations"),
            backups_dir: root.join("backups"),
            root,
        }
    }

    pub fn current() -> Self {
        Self::under(default_app_dir())
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn game_version_dir(&self, version: &str) -> PathBuf {
        self.versions_dir.join(version)
    }

    pub fn installation_dir(&self, id: &str) -> PathBuf {
        self.installations_dir.join(id)
    }

    pub fn installation_backups_dir(&self, id: &str) -> PathBuf {
        self.backups_dir.join(id)
    }

    /// Create the on-disk folder layout expected by the launcher.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        let folders = [
            &self.root,
            &self.cache_dir,
            &self.versions_dir,
            &self.installations_dir,
            &self.backups_dir,
        ];

        for dir in folders {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
