//! Hot reload of the configuration file.
//!
//! The parent directory is watched rather than the file itself: editors and
//! config management tools usually replace the file by renaming a temporary
//! over it, which drops a watch placed on the old inode. Events are filtered
//! to the config file name, and a burst of events is coalesced into a single
//! reload once the directory has been quiet for `QUIET_PERIOD`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::RelayConfig;

const QUIET_PERIOD: Duration = Duration::from_millis(250);

/// Watches one configuration file and publishes each valid reload.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<RelayConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiver that reloaded configurations arrive on.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<RelayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Must be called inside a Tokio runtime.
    ///
    /// The returned watcher must be kept alive for as long as reloads are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let file_name = self
            .path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| notify::Error::generic("config path has no file name"))?;
        let directory = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches_file(&event, &file_name) => {
                    let _ = signal_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        let path = self.path;
        let update_tx = self.update_tx;
        tracing::info!(path = %path.display(), "Config watcher started");

        tokio::spawn(coalesce_reloads(signal_rx, QUIET_PERIOD, move || {
            match load_config(&path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Configuration reloaded");
                    update_tx.send(config).is_ok()
                }
                Err(e) => {
                    tracing::error!(error = %e, "Config reload failed, keeping current configuration");
                    true
                }
            }
        }));

        Ok(watcher)
    }
}

/// Whether `event` writes, creates or renames onto the watched file.
fn touches_file(event: &Event, file_name: &OsString) -> bool {
    let relevant_kind = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some_and(|name| name == file_name.as_os_str()))
}

/// Call `reload` once per burst of signals, after `quiet` has passed with no
/// new signal. Stops when the signal source is gone or `reload` returns false.
async fn coalesce_reloads<F>(mut signals: mpsc::UnboundedReceiver<()>, quiet: Duration, mut reload: F)
where
    F: FnMut() -> bool,
{
    while signals.recv().await.is_some() {
        loop {
            match tokio::time::timeout(quiet, signals.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        if !reload() {
            tracing::debug!("Config update receiver dropped, watcher stopping");
            return;
        }
    }
}
