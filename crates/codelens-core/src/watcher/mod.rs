//! File walker and watcher.
//!
//! `enumerate()` performs a pure, synchronous recursive walk of the project
//! root, pruning ignored directories without descending into them.
//! `watch()` subscribes to filesystem change notifications for the same
//! file set, debouncing duplicate events per path and suppressing events
//! that originate from inside the state directory (where the store and
//! generated bundles live) to avoid feedback loops.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use tokio::sync::{mpsc, watch};

use crate::config::WatcherConfig;
use crate::error::{OmniError, OmniResult};
use crate::ignore::IgnoreEngine;
use crate::types::{Language, PipelineEvent};

/// Recursive file enumerator and debounced change watcher over one project
/// root.
pub struct FileWatcher {
    config: WatcherConfig,
    root: PathBuf,
    state_dir: PathBuf,
    ignore: Arc<IgnoreEngine>,
}

impl FileWatcher {
    /// `state_dir` is excluded from both enumeration and watch events; it
    /// holds the store and generated bundle artifacts, which would
    /// otherwise feed back into the pipeline as spurious file events.
    pub fn new(root: &Path, config: &WatcherConfig, state_dir: &Path, ignore: Arc<IgnoreEngine>) -> Self {
        Self {
            config: config.clone(),
            root: root.to_path_buf(),
            state_dir: state_dir.to_path_buf(),
            ignore,
        }
    }

    /// All non-ignored, indexable files under the root, as POSIX-separated
    /// paths relative to it. Pruned directories are never descended into.
    pub fn enumerate(&self) -> OmniResult<Vec<String>> {
        let mut files = Vec::new();
        self.walk_dir(&self.root, "", &mut files)?;
        files.sort();
        Ok(files)
    }

    fn walk_dir(&self, abs_dir: &Path, rel_dir: &str, out: &mut Vec<String>) -> OmniResult<()> {
        let entries = match std::fs::read_dir(abs_dir) {
            Ok(entries) => entries,
            // A directory can vanish between being listed and being read
            // (e.g. a deleted symlink target); skip it rather than fail
            // the whole walk.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(OmniError::Io(e)),
        };

        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel_path = if rel_dir.is_empty() { name.clone() } else { format!("{rel_dir}/{name}") };

            if self.is_under_state_dir(&entry.path()) {
                continue;
            }

            if file_type.is_dir() {
                if self.ignore.should_prune_dir(&rel_path) {
                    continue;
                }
                self.walk_dir(&entry.path(), &rel_path, out)?;
            } else if file_type.is_file() {
                if self.ignore.is_ignored(&rel_path) {
                    continue;
                }
                if is_indexable(&entry.path()) {
                    out.push(rel_path);
                }
            }
        }
        Ok(())
    }

    fn is_under_state_dir(&self, abs_path: &Path) -> bool {
        abs_path.starts_with(&self.state_dir)
    }

    /// Subscribe to filesystem changes for the same set `enumerate()`
    /// covers. Runs until `shutdown` reports `true`, at which point the
    /// underlying OS watch handles are dropped and no further events are
    /// delivered. Duplicate events for the same path arriving within the
    /// configured debounce window are coalesced by the debouncer itself.
    pub async fn watch(&self, tx: mpsc::Sender<PipelineEvent>, mut shutdown: watch::Receiver<bool>) -> OmniResult<()> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<DebounceEventResult>(256);
        let debounce = Duration::from_millis(self.config.debounce_ms);

        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            let _ = raw_tx.blocking_send(result);
        })
        .map_err(|e| OmniError::Internal(format!("failed to start file watcher: {e}")))?;

        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| OmniError::Internal(format!("failed to watch {}: {e}", self.root.display())))?;

        tracing::info!(root = %self.root.display(), "file watcher started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                maybe_result = raw_rx.recv() => {
                    match maybe_result {
                        None => break,
                        Some(result) => self.dispatch(result, &tx).await,
                    }
                }
            }
        }

        drop(debouncer);
        tracing::info!("file watcher stopped");
        Ok(())
    }

    async fn dispatch(&self, result: DebounceEventResult, tx: &mpsc::Sender<PipelineEvent>) {
        let events = match result {
            Ok(events) => events,
            Err(error) => {
                tracing::warn!(%error, "file watcher error");
                return;
            }
        };

        for event in events {
            let Some(rel_path) = self.relative_posix_path(&event.path) else {
                continue;
            };
            if self.is_under_state_dir(&event.path) {
                continue;
            }

            // notify-debouncer-mini reports "something changed at this
            // path" without distinguishing create/modify/delete; whether
            // the path still exists tells us which pipeline event to emit.
            let pipeline_event = if event.path.exists() {
                if self.ignore.is_ignored(&rel_path) || !is_indexable(&event.path) {
                    continue;
                }
                PipelineEvent::FileChanged { path: PathBuf::from(&rel_path) }
            } else {
                PipelineEvent::FileDeleted { path: PathBuf::from(&rel_path) }
            };

            if tx.send(pipeline_event).await.is_err() {
                tracing::debug!("pipeline event channel closed, stopping watcher dispatch");
                return;
            }
        }
    }

    fn relative_posix_path(&self, abs_path: &Path) -> Option<String> {
        let rel = abs_path.strip_prefix(&self.root).ok()?;
        let posix = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
        if posix.is_empty() {
            None
        } else {
            Some(posix)
        }
    }
}

/// True if the file's extension maps to a supported code or document
/// language (the set the chunker and document analyzer can both handle).
fn is_indexable(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let language = Language::from_extension(ext);
    language.is_code() || language.is_document()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ignore_engine() -> Arc<IgnoreEngine> {
        Arc::new(IgnoreEngine::with_builtins_only())
    }

    #[test]
    fn test_enumerate_prunes_ignored_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("node_modules/left-pad")).expect("mkdir");
        std::fs::write(dir.path().join("node_modules/left-pad/index.js"), "module.exports = 1;").expect("write");
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").expect("write");

        let watcher = FileWatcher::new(
            dir.path(),
            &WatcherConfig::default(),
            &dir.path().join(".codelens"),
            ignore_engine(),
        );
        let files = watcher.enumerate().expect("enumerate");
        assert_eq!(files, vec!["main.rs".to_string()]);
    }

    #[test]
    fn test_enumerate_excludes_state_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state_dir = dir.path().join(".codelens");
        std::fs::create_dir_all(&state_dir).expect("mkdir");
        std::fs::write(state_dir.join("bundles.db"), "not code").expect("write");
        std::fs::write(dir.path().join("lib.rs"), "fn lib() {}").expect("write");

        let watcher = FileWatcher::new(dir.path(), &WatcherConfig::default(), &state_dir, ignore_engine());
        let files = watcher.enumerate().expect("enumerate");
        assert_eq!(files, vec!["lib.rs".to_string()]);
    }

    #[test]
    fn test_enumerate_skips_non_indexable_extensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).expect("write");
        std::fs::write(dir.path().join("app.py"), "def f(): pass").expect("write");

        let watcher = FileWatcher::new(
            dir.path(),
            &WatcherConfig::default(),
            &dir.path().join(".codelens"),
            ignore_engine(),
        );
        let files = watcher.enumerate().expect("enumerate");
        assert_eq!(files, vec!["app.py".to_string()]);
    }

    #[tokio::test]
    async fn test_watch_stops_on_shutdown_signal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let watcher = FileWatcher::new(
            dir.path(),
            &WatcherConfig::default(),
            &dir.path().join(".codelens"),
            ignore_engine(),
        );
        let (tx, _rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { watcher.watch(tx, shutdown_rx).await });
        shutdown_tx.send(true).expect("send shutdown");
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("watch task exited before timeout")
            .expect("task did not panic");
        assert!(result.is_ok());
    }
}
