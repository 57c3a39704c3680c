use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, warn};
use tokio::fs;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::models::Config;

/// Reads and writes the persisted launcher configuration.
#[derive(Clone)]
pub struct StorageManager {
    config_path: PathBuf,
}

impl StorageManager {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    /// A missing or unreadable file yields an empty configuration.
    pub async fn load_config(&self) -> Config {
        let bytes = match fs::read(&self.config_path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(
                    "storage: no config at {} ({err}); starting empty",
                    self.config_path.display()
                );
                return Config::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(config) => config,
            Err(err) => {
                warn!(
                    "storage: config at {} is corrupt ({err}); starting empty",
                    self.config_path.display()
                );
                Config::default()
            }
        }
    }

    pub async fn save_config(&self, config: &Config) -> Result<(), String> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("unable to create config dir: {e}"))?;
        }
        let json = serde_json::to_vec_pretty(config)
            .map_err(|e| format!("unable to serialize config: {e}"))?;
        // Write beside the target and rename so readers never see a torn file.
        let tmp = self.config_path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| format!("unable to write config: {e}"))?;
        fs::rename(&tmp, &self.config_path)
            .await
            .map_err(|e| format!("unable to persist config: {e}"))
    }

    /// Persist every snapshot the store publishes until the store goes away.
    pub fn spawn_persister(&self, mut snapshots: watch::Receiver<Arc<Config>>) -> JoinHandle<()> {
        let storage = self.clone();
        tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                match storage.save_config(&snapshot).await {
                    Ok(()) => debug!("storage: config persisted"),
                    Err(err) => warn!("storage: {err}"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::GameVersion;
    use crate::store::{ConfigAction, ConfigStore};

    #[tokio::test]
    async fn round_trips_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path().join("nested").join("config.json"));
        assert_eq!(storage.load_config().await, Config::default());

        let config = Config {
            game_versions: vec![GameVersion::new("1.19.0", "/v")],
            ..Config::default()
        };
        storage.save_config(&config).await.unwrap();
        assert_eq!(storage.load_config().await, config);
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let storage = StorageManager::new(&path);
        assert_eq!(storage.load_config().await, Config::default());
    }

    #[tokio::test]
    async fn persister_writes_published_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path().join("config.json"));
        let store = ConfigStore::new(Config::default());
        let handle = storage.spawn_persister(store.subscribe());

        store.dispatch(ConfigAction::AddGameVersion(GameVersion::new("1.19.0", "/v")));
        drop(store);
        handle.await.unwrap();

        let saved = storage.load_config().await;
        assert_eq!(saved.game_versions.len(), 1);
    }
}
