//! Pipeline orchestrator.
//!
//! Wires the ignore engine, walker/watcher, chunker, classifier, embedder,
//! and store into the file state machine:
//!
//! ```text
//!  [Unknown] --enumerate--> [Indexed(clean)]
//!  [Indexed(clean)] --change event--> [Indexed(dirty)]
//!  [Indexed(dirty)] --reparse+embed+commit--> [Indexed(clean)]
//!  [Indexed(clean)] --delete event--> [Gone] (chunks cascade)
//! ```
//!
//! The orchestrator owns the store and passes immutable views to the
//! chunker, classifier, and embedder rather than sharing a live backing
//! structure with them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use tokio::sync::{mpsc, watch, Semaphore};
use xxhash_rust::xxh3::xxh3_64;

use crate::bundle;
use crate::chunker;
use crate::config::Config;
use crate::embedder::{format_chunk_for_embedding, Embedder};
use crate::error::{OmniError, OmniResult};
use crate::ignore::IgnoreEngine;
use crate::fanout::Fanout;
use crate::index::MetadataIndex;
use crate::parser;
use crate::types::{Chunk, FanoutEvent, FileFingerprint, Language, PipelineEvent};
use crate::watcher::FileWatcher;

/// Coalescing window before an individual file's change is actually
/// reparsed; adjacent events for the same file within this window collapse
/// into one reparse.
const EVENT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Starting and ceiling backoff for embedding backfill retries while the
/// model is unavailable.
const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// The main engine. Owns the store, the embedder, the ignore engine, and
/// the live-update fanout; drives the initial scan and reacts to watcher
/// events.
pub struct Engine {
    config: Config,
    state_dir: PathBuf,
    index: Mutex<MetadataIndex>,
    embedder: Embedder,
    ignore: Arc<IgnoreEngine>,
    fanout: Arc<Fanout>,
    /// Per-file cached chunk list, invalidated on reparse. Guards against
    /// concurrent readers seeing torn state via replace-pointer semantics
    /// (DashMap entries are replaced wholesale, never mutated in place).
    analysis_cache: DashMap<String, Vec<Chunk>>,
    /// Last-committed (fingerprint, content hash) per file. The fingerprint
    /// alone catches spurious watcher events (no size/mtime change); the
    /// hash additionally catches a real mtime bump with unchanged bytes
    /// (e.g. a touch, or a save that restores prior content), so neither
    /// case pays for a reparse/classify/embed pass it doesn't need.
    fingerprints: DashMap<String, (FileFingerprint, u64)>,
    /// Bounds concurrent embedder calls to the logical CPU count, clamped
    /// to [1, 8].
    embed_permits: Semaphore,
}

impl Engine {
    /// Load configuration for `repo_path` and build an engine from it.
    pub fn new(repo_path: &Path) -> OmniResult<Self> {
        let config = Config::load(repo_path)?;
        Self::with_config(config)
    }

    /// Build an engine from an explicit configuration (used by tests and by
    /// callers that have already resolved config precedence themselves).
    pub fn with_config(config: Config) -> OmniResult<Self> {
        let state_dir = config.data_dir();
        std::fs::create_dir_all(&state_dir)?;

        let index = MetadataIndex::open(&state_dir.join("bundles.db"))?;
        let embedder = Embedder::new(&config.embedding)?;
        let ignore = Arc::new(Self::build_ignore_engine(&config)?);
        let fanout = Arc::new(Fanout::new());

        let embed_budget = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).clamp(1, 8);

        Ok(Self {
            config,
            state_dir,
            index: Mutex::new(index),
            embedder,
            ignore,
            fanout,
            analysis_cache: DashMap::new(),
            fingerprints: DashMap::new(),
            embed_permits: Semaphore::new(embed_budget),
        })
    }

    fn build_ignore_engine(config: &Config) -> OmniResult<IgnoreEngine> {
        let manifest_path = config.repo_path.join(".codelensignore");
        let manifest = std::fs::read_to_string(&manifest_path).unwrap_or_default();
        IgnoreEngine::build(&[], &config.indexing.exclude_patterns, &manifest)
    }

    fn watcher(&self) -> FileWatcher {
        FileWatcher::new(&self.config.repo_path, &self.config.watcher, &self.state_dir, Arc::clone(&self.ignore))
    }

    pub fn fanout(&self) -> Arc<Fanout> {
        Arc::clone(&self.fanout)
    }

    /// All non-ignored, indexable files under the project root, as the
    /// bundle layer's candidate set -- independent of which files happen
    /// to have produced chunks.
    pub fn enumerate_files(&self) -> OmniResult<Vec<String>> {
        self.watcher().enumerate()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the full lifecycle: initial scan (if the store is empty),
    /// embedding backfill, and the watch loop. Returns once `shutdown`
    /// reports `true`.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> OmniResult<()> {
        if self.chunk_count()? == 0 {
            self.initial_scan().await?;
        }
        self.publish_status_snapshot()?;

        let backfill_engine = Arc::clone(&self);
        let mut backfill_shutdown = shutdown.clone();
        let backfill_handle = tokio::spawn(async move {
            backfill_engine.backfill_loop(&mut backfill_shutdown).await;
        });

        let (tx, rx) = mpsc::channel(256);
        let watcher = self.watcher();
        let mut watch_shutdown = shutdown.clone();
        let watch_handle = tokio::spawn(async move { watcher.watch(tx, watch_shutdown.clone()).await });

        self.clone().event_loop(rx, shutdown).await;

        let _ = watch_handle.await;
        backfill_handle.abort();
        Ok(())
    }

    /// Enumerate the project, parse every file, classify and persist the
    /// resulting chunks. Runs parsing in parallel across files (CPU-bound,
    /// independent work) but serializes store writes.
    pub async fn initial_scan(&self) -> OmniResult<usize> {
        let files = self.watcher().enumerate()?;
        let config = self.config.clone();

        let per_file: Vec<(String, OmniResult<Vec<Chunk>>)> = tokio::task::spawn_blocking(move || {
            files
                .into_par_iter()
                .map(|file| {
                    let result = analyze_file(&config, &file);
                    (file, result)
                })
                .collect()
        })
        .await
        .map_err(|e| OmniError::Internal(format!("initial scan join error: {e}")))?;

        let mut indexed = 0;
        for (file, result) in per_file {
            match result {
                Ok(chunks) => {
                    if let Ok(identity) = fingerprint_and_hash(&file, &self.config.repo_path.join(&file)) {
                        self.fingerprints.insert(file.clone(), identity);
                    }
                    self.commit_chunks(&file, chunks)?;
                    indexed += 1;
                }
                Err(e) => tracing::warn!(file = %file, error = %e, "skipping file for this cycle"),
            }
        }
        tracing::info!(files = indexed, "initial scan complete");
        Ok(indexed)
    }

    fn commit_chunks(&self, file: &str, chunks: Vec<Chunk>) -> OmniResult<()> {
        self.index.lock().upsert_file_chunks(file, &chunks)?;
        self.analysis_cache.insert(file.to_string(), chunks);
        self.mark_bundles_touching(file)?;
        Ok(())
    }

    fn mark_bundles_touching(&self, file: &str) -> OmniResult<()> {
        let mut index = self.index.lock();
        index.mark_matching_bundles_dirty(|patterns| bundle::matches_any_pattern(patterns, file))
    }

    /// Scan for chunks missing an embedding and backfill them, retrying
    /// with exponential backoff while the model is unavailable. Runs until
    /// `shutdown` reports `true`.
    async fn backfill_loop(&self, shutdown: &mut watch::Receiver<bool>) {
        let mut backoff = BACKOFF_START;
        loop {
            if *shutdown.borrow() {
                return;
            }
            match self.backfill_once().await {
                Ok(filled) if filled > 0 => {
                    backoff = BACKOFF_START;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, backoff_ms = backoff.as_millis(), "embedding backfill failed, backing off");
                }
            }

            if !self.embedder.is_available() {
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => {}
                }
                backoff = (backoff * 2).min(BACKOFF_CAP);
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    async fn backfill_once(&self) -> OmniResult<usize> {
        if !self.embedder.is_available() {
            return Ok(0);
        }
        let pending = { self.index.lock().chunks_without_embeddings()? };
        if pending.is_empty() {
            return Ok(0);
        }

        let mut filled = 0;
        for chunk in pending {
            let _permit = self.embed_permits.acquire().await.map_err(|e| OmniError::Internal(e.to_string()))?;
            let text = format_chunk_for_embedding(&chunk.name, &chunk.purpose, &chunk.code, crate::embedder::DEFAULT_MAX_INPUT_BYTES);
            match self.embedder.embed_single(&text) {
                Ok(vector) => {
                    self.index.lock().store_embedding(&chunk.id, &vector)?;
                    filled += 1;
                }
                Err(e) => {
                    tracing::warn!(chunk_id = %chunk.id, error = %e, "failed to embed chunk");
                }
            }
        }
        Ok(filled)
    }

    async fn event_loop(self: Arc<Self>, mut rx: mpsc::Receiver<PipelineEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut pending: HashMap<String, tokio::task::JoinHandle<()>> = HashMap::new();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = rx.recv() => {
                    match event {
                        None => break,
                        Some(PipelineEvent::Shutdown) => break,
                        Some(PipelineEvent::FullScan) => {
                            if let Err(e) = self.initial_scan().await {
                                tracing::warn!(error = %e, "full scan failed");
                            }
                        }
                        Some(event @ (PipelineEvent::FileChanged { .. } | PipelineEvent::FileDeleted { .. })) => {
                            let key = event_key(&event);
                            if let Some(handle) = pending.remove(&key) {
                                handle.abort();
                            }
                            let engine = Arc::clone(&self);
                            let handle = tokio::spawn(async move {
                                tokio::time::sleep(EVENT_DEBOUNCE).await;
                                engine.process_event(event).await;
                            });
                            pending.insert(key, handle);
                        }
                    }
                }
            }
        }

        for (_, handle) in pending {
            handle.abort();
        }
    }

    async fn process_event(&self, event: PipelineEvent) {
        let result = match event {
            PipelineEvent::FileChanged { path } => self.reparse_file(&path).await,
            PipelineEvent::FileDeleted { path } => self.remove_file(&path),
            PipelineEvent::FullScan | PipelineEvent::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to process file event");
        }
    }

    async fn reparse_file(&self, relative_path: &Path) -> OmniResult<()> {
        let file = relative_path.to_string_lossy().into_owned();
        let abs_path = self.config.repo_path.join(&file);

        if let Ok(identity) = fingerprint_and_hash(&file, &abs_path) {
            if let Some(cached) = self.fingerprints.get(&file) {
                if *cached == identity {
                    tracing::trace!(file = %file, "watcher event for unchanged fingerprint, skipping reparse");
                    return Ok(());
                }
                if cached.1 == identity.1 {
                    drop(cached);
                    tracing::debug!(file = %file, "content hash unchanged despite fingerprint change, skipping reparse");
                    self.fingerprints.insert(file, identity);
                    return Ok(());
                }
            }
            self.fingerprints.insert(file.clone(), identity);
        } else {
            self.fingerprints.remove(&file);
        }

        self.mark_bundles_touching(&file)?;
        self.analysis_cache.remove(&file);

        let config = self.config.clone();
        let file_owned = file.clone();
        let chunks = tokio::task::spawn_blocking(move || analyze_file(&config, &file_owned))
            .await
            .map_err(|e| OmniError::Internal(format!("reparse join error: {e}")))??;

        self.commit_chunks(&file, chunks)?;
        self.fanout.publish(FanoutEvent::FileChanged { path: file });
        self.publish_status_snapshot()?;
        Ok(())
    }

    fn remove_file(&self, relative_path: &Path) -> OmniResult<()> {
        let file = relative_path.to_string_lossy().into_owned();
        self.fingerprints.remove(&file);
        self.mark_bundles_touching(&file)?;
        self.analysis_cache.remove(&file);
        self.index.lock().delete_file(&file)?;
        self.fanout.publish(FanoutEvent::FileChanged { path: file });
        self.publish_status_snapshot()?;
        Ok(())
    }

    fn publish_status_snapshot(&self) -> OmniResult<()> {
        let all_files = self.enumerate_files()?;
        let index = self.index.lock();
        let snapshot = FanoutEvent::StatusSnapshot {
            file_count: index.file_count()?,
            chunk_count: index.chunk_count()?,
            bundle_count: bundle::list_bundles(&index, &all_files)?.len(),
        };
        drop(index);
        self.fanout.publish(snapshot);
        Ok(())
    }

    pub fn chunk_count(&self) -> OmniResult<usize> {
        self.index.lock().chunk_count()
    }

    pub fn file_count(&self) -> OmniResult<usize> {
        self.index.lock().file_count()
    }

    /// Force-regenerate one bundle's materialized artifact, clearing its
    /// dirty flag. Returns `NotFound` for an unrecognized bundle name.
    pub fn regenerate_bundle(&self, name: &str) -> OmniResult<String> {
        self.fanout.publish(FanoutEvent::BundleSyncStarted { name: name.to_string() });

        let result = self.regenerate_bundle_inner(name);
        match &result {
            Ok(_) => self.fanout.publish(FanoutEvent::BundleSyncCompleted { name: name.to_string() }),
            Err(e) => self.fanout.publish(FanoutEvent::BundleSyncFailed {
                name: name.to_string(),
                message: e.to_string(),
            }),
        }
        result
    }

    fn regenerate_bundle_inner(&self, name: &str) -> OmniResult<String> {
        let files = {
            let index = self.index.lock();
            if let Some(manual) = index.manual_bundle(name)? {
                drop(index);
                let all_files = self.enumerate_files()?;
                bundle::resolve_manual(&manual, &all_files, &[])?
            } else if name.starts_with("smart:") {
                bundle::resolve_smart(&index, name)?
            } else {
                return Err(OmniError::NotFound { entity: format!("bundle `{name}`") });
            }
        };

        let mut file_contents = Vec::with_capacity(files.len());
        let mut chunks_by_file = std::collections::BTreeMap::new();
        for file in &files {
            let abs_path = self.config.repo_path.join(file);
            let content = std::fs::read_to_string(&abs_path).unwrap_or_default();
            file_contents.push((file.clone(), content));
            let chunks = self.index.lock().chunks_for_file(file)?;
            chunks_by_file.insert(file.clone(), chunks);
        }

        let generated_ms = now_ms();
        let artifact = bundle::materialize(
            name,
            &self.config.repo_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            env!("CARGO_PKG_VERSION"),
            &file_contents,
            &chunks_by_file,
            generated_ms,
        )?;

        let size_bytes = artifact.len() as u64;
        {
            let mut index = self.index.lock();
            if index.manual_bundle(name)?.is_some() {
                index.mark_bundle_clean(name, size_bytes, generated_ms)?;
            }
        }
        self.fanout.publish(FanoutEvent::BundleUpdated {
            name: name.to_string(),
            file_count: files.len(),
            size_bytes,
        });
        Ok(artifact)
    }

    pub fn index(&self) -> &Mutex<MetadataIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }
}

fn event_key(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::FileChanged { path } | PipelineEvent::FileDeleted { path } => path.to_string_lossy().into_owned(),
        PipelineEvent::FullScan => "*full-scan*".to_string(),
        PipelineEvent::Shutdown => "*shutdown*".to_string(),
    }
}

/// Stat and hash a file in one read, for the reparse fast path. `file` is
/// the POSIX-relative path used as the fingerprint's identity; `abs_path`
/// is where it's actually read from disk.
fn fingerprint_and_hash(file: &str, abs_path: &Path) -> OmniResult<(FileFingerprint, u64)> {
    let metadata = std::fs::metadata(abs_path)?;
    let modified_ms = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let fingerprint = FileFingerprint {
        path: file.to_string(),
        size: metadata.len(),
        modified_ms,
    };
    let content = std::fs::read(abs_path)?;
    Ok((fingerprint, xxh3_64(&content)))
}

/// Parse, chunk, and classify one file. Pure with respect to the store:
/// reads only from disk, returns the chunk set for the caller to commit.
fn analyze_file(config: &Config, file: &str) -> OmniResult<Vec<Chunk>> {
    let abs_path = config.repo_path.join(file);
    let metadata = std::fs::metadata(&abs_path)?;
    if metadata.len() > config.indexing.max_file_size {
        return Ok(Vec::new());
    }

    let source = std::fs::read(&abs_path)?;
    let language = Language::from_extension(abs_path.extension().and_then(|e| e.to_str()).unwrap_or(""));
    if language == Language::Unknown {
        return Ok(Vec::new());
    }

    let elements = parser::parse_file(&abs_path, &source, language)?;
    let imports = parser::parse_imports(&abs_path, &source, language)?;
    Ok(chunker::chunk_elements(&elements, file, &imports, config))
}

/// Unix millis for artifact timestamps. Callers at the orchestration layer
/// own the only `now()` call so materialization itself stays pure and
/// testable with an injected timestamp.
fn now_ms() -> i64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_else(|_| COUNTER.fetch_add(1, Ordering::Relaxed) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(repo_dir: &Path) -> Config {
        let mut config = Config::defaults(repo_dir);
        config.repo_path = repo_dir.to_path_buf();
        std::env::set_var("OMNI_SKIP_MODEL_DOWNLOAD", "1");
        config
    }

    #[tokio::test]
    async fn test_initial_scan_indexes_source_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("lib.rs"),
            "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n",
        )
        .expect("write");

        let config = test_config(dir.path());
        let engine = Engine::with_config(config).expect("engine");
        let indexed = engine.initial_scan().await.expect("scan");
        assert_eq!(indexed, 1);
        assert!(engine.chunk_count().expect("count") >= 1);
    }

    #[tokio::test]
    async fn test_reparse_file_replaces_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file_path = dir.path().join("lib.rs");
        std::fs::write(&file_path, "pub fn one() -> i32 {\n    1\n}\n").expect("write");

        let config = test_config(dir.path());
        let engine = Engine::with_config(config).expect("engine");
        engine.initial_scan().await.expect("scan");
        let before = engine.chunk_count().expect("count");
        assert!(before >= 1);

        std::fs::write(&file_path, "pub fn two() -> i32 {\n    2\n}\n\npub fn three() -> i32 {\n    3\n}\n")
            .expect("rewrite");
        engine.reparse_file(Path::new("lib.rs")).await.expect("reparse");

        let chunks = engine.index.lock().chunks_for_file("lib.rs").expect("chunks");
        assert!(chunks.iter().any(|c| c.name == "two"));
        assert!(chunks.iter().any(|c| c.name == "three"));
        assert!(!chunks.iter().any(|c| c.name == "one"));
    }

    #[tokio::test]
    async fn test_remove_file_cascades_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file_path = dir.path().join("lib.rs");
        std::fs::write(&file_path, "pub fn gone() -> i32 {\n    0\n}\n").expect("write");

        let config = test_config(dir.path());
        let engine = Engine::with_config(config).expect("engine");
        engine.initial_scan().await.expect("scan");
        assert!(engine.chunk_count().expect("count") >= 1);

        engine.remove_file(Path::new("lib.rs")).expect("remove");
        let chunks = engine.index.lock().chunks_for_file("lib.rs").expect("chunks");
        assert!(chunks.is_empty());
    }
}
