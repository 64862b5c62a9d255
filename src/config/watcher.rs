//! Hot reload of the `[debugbar]` section.
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by writing a temp file and renaming it are still picked up.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::DebugBarConfig;

/// Emits the debug bar configuration each time the file changes it.
pub struct ConfigWatcher {
    path: PathBuf,
    current: DebugBarConfig,
    update_tx: mpsc::UnboundedSender<DebugBarConfig>,
}

impl ConfigWatcher {
    /// `current` is the configuration already in effect; reloads equal to
    /// it are not forwarded.
    pub fn new(
        path: &Path,
        current: DebugBarConfig,
    ) -> (Self, mpsc::UnboundedReceiver<DebugBarConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            current,
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            current,
            update_tx,
        } = self;

        let file_name: OsString = path.file_name().map(OsStr::to_os_string).unwrap_or_default();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let last = Mutex::new(current);
        let reload_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, &file_name) => {
                    reload(&reload_path, &last, &update_tx);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

/// Re-read `path` and forward its `[debugbar]` section when it differs
/// from `last`. Returns whether an update was sent.
fn reload(
    path: &Path,
    last: &Mutex<DebugBarConfig>,
    update_tx: &mpsc::UnboundedSender<DebugBarConfig>,
) -> bool {
    let reloaded = match load_config(path) {
        Ok(config) => config.debugbar,
        Err(e) => {
            tracing::error!(error = %e, "Config reload rejected, keeping current configuration");
            return false;
        }
    };

    let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
    if *last == reloaded {
        tracing::debug!(path = ?path, "Config file touched, debug bar section unchanged");
        return false;
    }
    *last = reloaded.clone();
    tracing::info!(path = ?path, "Debug bar configuration reloaded");
    update_tx.send(reloaded).is_ok()
}

/// Whether `event` writes or creates the watched file.
fn touches(event: &Event, file_name: &OsStr) -> bool {
    (event.kind.is_modify() || event.kind.is_create())
        && event.paths.iter().any(|p| p.file_name() == Some(file_name))
}
