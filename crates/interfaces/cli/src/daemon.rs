use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use fs2::FileExt;
use tokio::sync::watch;
use tracing::{info, warn};

use spendbot_config::AppConfig;
use spendbot_runtime::BotService;
use spendbot_telegram::{TelegramApi, TelegramTransport, run_bot};

#[derive(Debug, Clone)]
pub(crate) struct RuntimePaths {
    runtime_dir: PathBuf,
    pub(crate) pid_file: PathBuf,
    pub(crate) lock_file: PathBuf,
}

pub(crate) fn runtime_paths(config: &AppConfig) -> RuntimePaths {
    let runtime_dir = Path::new(&config.runtime.runtime_dir).to_path_buf();
    RuntimePaths {
        pid_file: runtime_dir.join("bot.pid"),
        lock_file: runtime_dir.join("bot.lock"),
        runtime_dir,
    }
}

/// Hold the single-instance lock and write the pid file.  The lock is
/// released when the returned file is dropped.
pub(crate) fn acquire_instance_lock(paths: &RuntimePaths) -> Result<File> {
    fs::create_dir_all(&paths.runtime_dir)?;
    let lock_file = File::create(&paths.lock_file)?;
    if lock_file.try_lock_exclusive().is_err() {
        bail!(
            "another spendbot instance is already running (lock held at {})",
            paths.lock_file.display()
        );
    }
    fs::write(&paths.pid_file, std::process::id().to_string())?;
    Ok(lock_file)
}

/// Remove the pid file, then let go of the lock.  The lock file itself stays
/// so the next instance locks the same inode.
pub(crate) fn release_instance_lock(paths: &RuntimePaths, lock: File) {
    if let Err(err) = fs::remove_file(&paths.pid_file) {
        warn!(%err, path = %paths.pid_file.display(), "could not remove pid file");
    }
    drop(lock);
}

pub(crate) async fn run_bot_process(config: AppConfig) -> Result<()> {
    config.validate()?;
    let chat_id = config.telegram.chat_id;
    if chat_id == 0 {
        bail!("telegram.chat_id is not set; set it in the config file or TELEGRAM_CHAT_ID");
    }

    let paths = runtime_paths(&config);
    let lock = acquire_instance_lock(&paths)?;

    let api = Arc::new(TelegramApi::from_env(&config)?);
    let transport = Arc::new(TelegramTransport::new(api.clone(), chat_id));
    let service = BotService::open(config, transport)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = service.spawn_background(&shutdown_tx);
    let bot = run_bot(service, api, chat_id, shutdown_rx);

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = async {
        tokio::signal::ctrl_c().await?;
        Ok::<(), anyhow::Error>(())
    };

    info!(pid = std::process::id(), "spendbot started");
    let outcome = tokio::select! {
        result = bot => result,
        result = terminate => {
            info!("shutdown signal received");
            result
        }
    };

    let _ = shutdown_tx.send(true);
    for handle in background {
        if let Err(err) = handle.await {
            warn!(%err, "background task ended abnormally");
        }
    }

    release_instance_lock(&paths, lock);
    info!("spendbot stopped");
    outcome
}
