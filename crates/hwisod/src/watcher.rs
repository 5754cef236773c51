//! Guard file change watcher.
//!
//! Watches the directory holding the guard record file and signals
//! the manager whenever the file is touched. The signal carries no
//! payload; the manager always re-reads the full store. The watcher
//! can be suspended around bulk clears so the daemon does not race
//! its own writes.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct GuardFileWatcher {
    watcher: RecommendedWatcher,
    watch_dir: PathBuf,
}

impl GuardFileWatcher {
    /// Watch the guard file at `guard_file`, sending a unit signal
    /// for every relevant filesystem event.
    pub fn new(guard_file: &Path, tx: mpsc::UnboundedSender<()>) -> Result<Self> {
        let watch_dir = guard_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&watch_dir)
            .with_context(|| format!("failed to create {}", watch_dir.display()))?;

        let file_name: OsString = guard_file
            .file_name()
            .context("guard file path has no file name")?
            .to_os_string();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        return;
                    }
                    if event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()))
                    {
                        debug!("guard file changed");
                        let _ = tx.send(());
                    }
                }
                Err(e) => warn!("guard file watch error: {e}"),
            })?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", watch_dir.display()))?;

        info!(file = %guard_file.display(), "guard file watcher initialized");

        Ok(Self { watcher, watch_dir })
    }

    /// Stop delivering change signals. Used around bulk clears.
    pub fn suspend(&mut self) -> Result<()> {
        self.watcher
            .unwatch(&self.watch_dir)
            .with_context(|| format!("failed to unwatch {}", self.watch_dir.display()))
    }

    /// Resume change signal delivery after a suspend.
    pub fn resume(&mut self) -> Result<()> {
        self.watcher
            .watch(&self.watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to rewatch {}", self.watch_dir.display()))
    }
}
