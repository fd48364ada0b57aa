use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};

/// Watches a scheme directory for external edits
pub struct SchemeDirWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    dir: PathBuf,
}

impl SchemeDirWatcher {
    /// Start watching `dir`, creating it if needed
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {:?}", dir))?;

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx)
            .context("Failed to create scheme directory watcher")?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch scheme directory {:?}", dir))?;

        log::info!("Watching scheme directory: {:?}", dir);

        Ok(SchemeDirWatcher {
            _watcher: watcher,
            rx,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drain pending events without blocking
    /// Returns true if any scheme file was created, modified or removed
    pub fn has_changes(&self) -> bool {
        let mut has_changes = false;

        while let Ok(result) = self.rx.try_recv() {
            match result {
                Ok(event) => {
                    if is_scheme_change(&event) {
                        log::debug!("Scheme directory changed: {:?}", event.paths);
                        has_changes = true;
                    }
                }
                Err(e) => {
                    log::warn!("File watcher error: {}", e);
                }
            }
        }

        has_changes
    }
}

/// Only finished writes to `.toml` files count; temp files from atomic
/// saves are ignored
fn is_scheme_change(event: &Event) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );

    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.extension().and_then(|s| s.to_str()) == Some("toml"))
}
