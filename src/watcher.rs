//! Filesystem watch on the config file, feeding the same reload path as
//! the control socket and SIGHUP (§4.H, §6). A `RecommendedWatcher`
//! delivers change events over a channel; the channel bridges the
//! blocking `notify` callback into the async `Server::reload` call.

use std::path::{Path, PathBuf};

use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::Result;
use crate::server::Server;

/// Runs forever, reloading `server` every time `config_path` changes on
/// disk. A change that fails to parse is logged and otherwise ignored --
/// the previous generation keeps serving, matching SIGHUP's behavior. The
/// `RecommendedWatcher` is kept alive for the lifetime of this future;
/// dropping it would silently stop delivery.
pub async fn watch(config_path: PathBuf, server: Server) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _watcher = build_watcher(&config_path, tx)?;

    log::info!(target: "watcher", "watching {} for changes", config_path.display());

    while rx.recv().await.is_some() {
        match reload(&config_path) {
            Ok(config) => {
                if let Err(e) = server.reload(&config, None).await {
                    log::error!(target: "watcher", "reload failed, keeping previous generation: {}", e);
                }
            }
            Err(e) => {
                log::error!(target: "watcher", "failed to read changed config: {}", e);
            }
        }
    }

    Ok(())
}

fn reload(config_path: &Path) -> Result<Config> {
    let bytes = std::fs::read(config_path)?;
    Config::try_from(bytes.as_slice())
}

/// The notify callback runs on `notify`'s own background thread; it only
/// needs to wake the async loop above, not interpret the event.
fn build_watcher(path: &Path, tx: mpsc::UnboundedSender<()>) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                let _ = tx.send(());
            }
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
