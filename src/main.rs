use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::backup::BackupManager;
use crate::engine::models::{DEFAULT_BACKUPS_LIMIT, InstallationUpdate};
use crate::engine::ports::LogNotifier;
use crate::engine::state::{InstallSource, NewInstallation, PlayState, UserAction};
use crate::engine::{Collaborators, LauncherEngine};
use crate::env::LauncherPaths;
use crate::process::ProcessLauncher;
use crate::storage::StorageManager;
use crate::store::ConfigStore;
use crate::tasks::{CloseRegistry, TaskQueue};
use crate::versions::ArchiveInstaller;

mod backup;
mod engine;
mod env;
mod process;
mod storage;
mod store;
mod tasks;
mod util;
mod versions;

#[derive(Parser, Debug)]
#[command(
    name = "VS Launcher",
    author,
    version,
    about = "Headless launcher for Vintage Story installations and game versions"
)]
struct Cli {
    /// Print launcher version and exit.
    #[arg(long)]
    version_only: bool,

    /// Use this directory instead of the per-user app directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show installations and installed game versions.
    List,
    /// Create a new installation profile.
    AddInstallation(InstallationArgs),
    /// Change fields of an existing installation.
    EditInstallation {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        game_version: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        start_params: Option<String>,
        #[arg(long)]
        backups_auto: Option<bool>,
        #[arg(long)]
        backups_limit: Option<u32>,
    },
    RemoveInstallation {
        id: String,
    },
    /// Mark an installation as the one `play` starts by default.
    Select {
        id: String,
    },
    /// Install a game version from a local archive or an http(s) URL.
    InstallVersion {
        version: String,
        source: String,
        #[arg(long)]
        sha256: Option<String>,
    },
    DeleteVersion {
        version: String,
    },
    /// Back up an installation's data directory.
    Backup {
        id: String,
    },
    /// Launch an installation (the last used one by default) and wait for it to exit.
    Play {
        id: Option<String>,
    },
}

#[derive(Args, Debug)]
struct InstallationArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    game_version: String,
    #[arg(long = "mod")]
    mods: Vec<String>,
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    start_params: String,
    #[arg(long)]
    backups_auto: bool,
    #[arg(long, default_value_t = DEFAULT_BACKUPS_LIMIT)]
    backups_limit: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if cli.version_only {
        println!("VS Launcher {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let paths = match &cli.data_dir {
        Some(dir) => LauncherPaths::under(dir),
        None => LauncherPaths::current(),
    };
    // Best-effort directory creation; failures are surfaced on write.
    if let Err(err) = paths.ensure_dirs() {
        warn!("unable to create {}: {err}", paths.root.display());
    }

    let storage = StorageManager::new(paths.config_path());
    let store = ConfigStore::new(storage.load_config().await);
    let persister = storage.spawn_persister(store.subscribe());
    let close = CloseRegistry::new();
    let notifier = Arc::new(LogNotifier);
    let engine = LauncherEngine::new(
        store.clone(),
        TaskQueue::new(),
        paths.clone(),
        Collaborators {
            executor: Arc::new(ProcessLauncher::new()),
            backup: Arc::new(BackupManager::new(store.clone(), notifier.clone(), paths.clone())),
            installer: Arc::new(ArchiveInstaller::new(&paths)),
            notifier,
            close: Arc::new(close.clone()),
        },
    );

    let code = match cli.command {
        None | Some(Command::List) => {
            print_overview(&store);
            ExitCode::SUCCESS
        }
        Some(command) => match into_action(command) {
            Some(action) => run(&engine, action).await,
            None => ExitCode::SUCCESS,
        },
    };

    if !engine.tasks().can_exit() || close.is_blocked() {
        warn!("exiting with work still registered: {:?}", close.reasons());
        for task in engine.tasks().snapshot() {
            warn!(
                "  {} {} running since {}",
                task.kind, task.target, task.started_at
            );
        }
    }
    persister.abort();
    if let Err(err) = storage.save_config(&store.snapshot()).await {
        error!("failed to save config: {err}");
        return ExitCode::FAILURE;
    }
    code
}

fn into_action(command: Command) -> Option<UserAction> {
    let action = match command {
        Command::List => return None,
        Command::AddInstallation(args) => UserAction::AddInstallation(NewInstallation {
            name: args.name,
            version: args.game_version,
            mods: args.mods,
            start_params: args.start_params,
            backups_auto: args.backups_auto,
            backups_limit: args.backups_limit,
        }),
        Command::EditInstallation {
            id,
            name,
            game_version,
            start_params,
            backups_auto,
            backups_limit,
        } => UserAction::EditInstallation {
            id,
            update: InstallationUpdate {
                name,
                version: game_version,
                start_params,
                backups_auto,
                backups_limit,
                ..InstallationUpdate::default()
            },
        },
        Command::RemoveInstallation { id } => UserAction::RemoveInstallation { id },
        Command::Select { id } => UserAction::SelectInstallation { id },
        Command::InstallVersion {
            version,
            source,
            sha256,
        } => UserAction::InstallVersion {
            version,
            source: InstallSource {
                location: source,
                sha256,
            },
        },
        Command::DeleteVersion { version } => UserAction::DeleteVersion { version },
        Command::Backup { id } => UserAction::BackupInstallation { installation: id },
        Command::Play { id } => UserAction::ClickPlay { installation: id },
    };
    Some(action)
}

async fn run(engine: &LauncherEngine, action: UserAction) -> ExitCode {
    let (tx, mut rx) = mpsc::unbounded_channel::<PlayState>();
    let watcher = tokio::spawn(async move {
        while let Some(state) = rx.recv().await {
            debug!("play state: {state}");
        }
    });
    let mut tasks_rx = engine.tasks().subscribe();
    let task_watcher = tokio::spawn(async move {
        while tasks_rx.changed().await.is_ok() {
            let running: Vec<String> = tasks_rx
                .borrow_and_update()
                .iter()
                .map(|task| format!("{} {}", task.kind, task.target))
                .collect();
            debug!("tasks running: {:?}", running);
        }
    });

    let result = engine.handle_action(action, &tx).await;
    drop(tx);
    let _ = watcher.await;
    task_watcher.abort();

    match result {
        Ok(()) => {
            info!("done");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn print_overview(store: &ConfigStore) {
    let config = store.snapshot();
    println!("Game versions:");
    if config.game_versions.is_empty() {
        println!("  (none installed)");
    }
    for gv in &config.game_versions {
        println!("  {:<12} {}", gv.version, gv.path.display());
    }

    println!("Installations:");
    if config.installations.is_empty() {
        println!("  (none)");
    }
    for inst in &config.installations {
        let marker = if config.last_used_installation.as_deref() == Some(inst.id.as_str()) {
            '*'
        } else {
            ' '
        };
        let mods = if inst.mods.is_empty() {
            String::new()
        } else {
            format!(" ({} mods)", inst.mods.len())
        };
        let last_played = inst
            .last_time_played
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".into());
        println!(
            "{} {} {} [{}]{} last played: {}",
            marker, inst.id, inst.name, inst.version, mods, last_played
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_and_edit_commands() {
        let cli = Cli::parse_from(["vs-launcher", "--data-dir", "/tmp/x", "play"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(
            into_action(cli.command.unwrap()).unwrap(),
            UserAction::ClickPlay { installation: None }
        ));

        let cli = Cli::parse_from([
            "vs-launcher",
            "edit-installation",
            "abc",
            "--start-params",
            "--tracelog",
            "--backups-auto",
            "true",
        ]);
        match into_action(cli.command.unwrap()).unwrap() {
            UserAction::EditInstallation { id, update } => {
                assert_eq!(id, "abc");
                assert_eq!(update.start_params.as_deref(), Some("--tracelog"));
                assert_eq!(update.backups_auto, Some(true));
                assert!(update.name.is_none());
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn add_installation_defaults() {
        let cli = Cli::parse_from([
            "vs-launcher",
            "add-installation",
            "--name",
            "My world",
            "--game-version",
            "1.19.0",
            "--mod",
            "primitivesurvival",
        ]);
        match into_action(cli.command.unwrap()).unwrap() {
            UserAction::AddInstallation(new) => {
                assert_eq!(new.mods, vec!["primitivesurvival"]);
                assert_eq!(new.backups_limit, DEFAULT_BACKUPS_LIMIT);
                assert!(!new.backups_auto);
                assert!(new.start_params.is_empty());
            }
            other => panic!("unexpected action {other:?}"),
        }
    }
}
