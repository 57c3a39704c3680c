use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use tokio::process::Command;

use crate::engine::models::{GameVersion, Installation, RESERVED_DATA_PATH_FLAG};
use crate::engine::ports::GameExecutor;
use crate::util::split_start_params;

/// Spawns the game client and waits for it to exit.
#[derive(Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    pub async fn launch(
        &self,
        version: &GameVersion,
        installation: &Installation,
    ) -> Result<bool, String> {
        let client_path = client_path(&version.path);
        if !client_path.exists() {
            warn!("launch: client not found at {}", client_path.display());
            return Err(format!(
                "game client not found at {}",
                client_path.display()
            ));
        }

        tokio::fs::create_dir_all(&installation.path)
            .await
            .map_err(|e| format!("failed to ensure installation data dir: {e}"))?;

        let args = launch_args(installation);
        info!(
            "launch: starting version {} for installation {}",
            version.version, installation.name
        );
        debug!(
            "launch: client={} data_path={} args={:?}",
            client_path.display(),
            installation.path.display(),
            args
        );

        let mut cmd = Command::new(&client_path);
        cmd.args(&args);
        cmd.current_dir(&version.path);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        #[cfg(target_os = "linux")]
        {
            let ld = std::env::var("LD_LIBRARY_PATH").unwrap_or_default();
            let new_ld = format!("{}:{}", version.path.display(), ld);
            cmd.env("LD_LIBRARY_PATH", new_ld);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("failed to start game process: {e}"))?;
        info!("launch: process started (pid {:?})", child.id());

        let status = child
            .wait()
            .await
            .map_err(|e| format!("failed to wait for game process: {e}"))?;
        if status.success() {
            info!("launch: game exited cleanly");
        } else {
            warn!("launch: game exited with {}", status);
        }
        Ok(status.success())
    }
}

impl GameExecutor for ProcessLauncher {
    fn execute<'a>(
        &'a self,
        version: &'a GameVersion,
        installation: &'a Installation,
    ) -> BoxFuture<'a, Result<bool, String>> {
        self.launch(version, installation).boxed()
    }
}

fn client_path(version_dir: &Path) -> PathBuf {
    if cfg!(target_os = "windows") {
        version_dir.join("Vintagestory.exe")
    } else {
        version_dir.join("Vintagestory")
    }
}

/// The managed data path always comes first; user parameters follow.
fn launch_args(installation: &Installation) -> Vec<String> {
    let mut args = vec![
        RESERVED_DATA_PATH_FLAG.to_string(),
        installation.path.display().to_string(),
    ];
    args.extend(split_start_params(&installation.start_params));
    args
}
