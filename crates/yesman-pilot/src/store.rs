//! Persisted learned-pattern store.
//!
//! Patterns live in memory as an arena of individually locked records:
//! lookups take the map's read lock, updates lock only the record they
//! touch, and the map write lock is taken only to insert a new signature.
//!
//! On disk the store is a flat JSON object keyed by signature. Writes are
//! batched: updates set a dirty flag and a background flusher thread writes
//! the snapshot (tmp file + rename) on an interval.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use yesman_types::StoreError;

/// One learned (signature, response) association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    /// Map key on disk; not repeated inside the record.
    #[serde(skip)]
    pub signature: String,
    pub response_value: String,
    pub hit_count: u64,
    pub confidence: f64,
    pub last_used_at: DateTime<Utc>,
}

impl LearnedPattern {
    /// A record that has never been recorded against.
    fn vacant(signature: &str) -> Self {
        Self {
            signature: signature.to_string(),
            response_value: String::new(),
            hit_count: 0,
            confidence: 0.0,
            last_used_at: Utc::now(),
        }
    }

    /// Whether the record has been filled in by at least one outcome.
    pub fn is_vacant(&self) -> bool {
        self.hit_count == 0
    }
}

type Arena = HashMap<String, Arc<Mutex<LearnedPattern>>>;

/// Thread-safe learned-pattern store with batched persistence.
pub struct PatternStore {
    path: Option<PathBuf>,
    patterns: RwLock<Arena>,
    dirty: AtomicBool,
    /// Set after a write failed twice; the rest of the run is memory-only.
    memory_only: AtomicBool,
}

impl PatternStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            patterns: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
            memory_only: AtomicBool::new(true),
        }
    }

    /// Open the store at `path`.
    ///
    /// Never fails: a missing file yields an empty store, and an unreadable
    /// or malformed one is logged (and, if malformed, moved aside to
    /// `<name>.corrupt`) before starting empty.
    pub fn open(path: &Path) -> Self {
        let patterns = match load(path) {
            Ok(patterns) => {
                if !patterns.is_empty() {
                    info!(path = %path.display(), count = patterns.len(), "loaded learned patterns");
                }
                patterns
            }
            Err(StoreError::Corrupt(reason)) => {
                let aside = corrupt_path(path);
                warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    reason = %reason,
                    "learned pattern store is corrupt, starting empty"
                );
                if let Err(e) = std::fs::rename(path, &aside) {
                    warn!(error = %e, "failed to move corrupt pattern store aside");
                }
                HashMap::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read learned pattern store, starting empty");
                HashMap::new()
            }
        };

        Self {
            path: Some(path.to_path_buf()),
            patterns: RwLock::new(patterns),
            dirty: AtomicBool::new(false),
            memory_only: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether changes are still being written to disk.
    pub fn is_persistent(&self) -> bool {
        self.path.is_some() && !self.memory_only.load(Ordering::Relaxed)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    fn arena(&self) -> std::sync::RwLockReadGuard<'_, Arena> {
        self.patterns.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a pattern by signature.
    pub fn get(&self, signature: &str) -> Option<LearnedPattern> {
        let record = self.arena().get(signature).cloned()?;
        let pattern = record.lock().unwrap_or_else(|e| e.into_inner()).clone();
        (!pattern.is_vacant()).then_some(pattern)
    }

    /// Apply `f` to the record for `signature`, creating a vacant one first
    /// if the signature is new. Returns the updated record.
    pub fn update(&self, signature: &str, f: impl FnOnce(&mut LearnedPattern)) -> LearnedPattern {
        let existing = self.arena().get(signature).cloned();
        let record = match existing {
            Some(record) => record,
            None => {
                let mut arena = self.patterns.write().unwrap_or_else(|e| e.into_inner());
                arena
                    .entry(signature.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(LearnedPattern::vacant(signature))))
                    .clone()
            }
        };

        let mut pattern = record.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut pattern);
        self.dirty.store(true, Ordering::Relaxed);
        pattern.clone()
    }

    /// Number of stored patterns.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All patterns, sorted by signature.
    pub fn snapshot(&self) -> Vec<LearnedPattern> {
        let records: Vec<Arc<Mutex<LearnedPattern>>> = self.arena().values().cloned().collect();
        let mut patterns: Vec<LearnedPattern> = records
            .iter()
            .map(|r| r.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .filter(|p| !p.is_vacant())
            .collect();
        patterns.sort_by(|a, b| a.signature.cmp(&b.signature));
        patterns
    }

    /// Known signatures containing `partial`, most used first.
    pub fn suggestions(&self, partial: &str, limit: usize) -> Vec<String> {
        let partial = partial.to_lowercase();
        let mut matches: Vec<LearnedPattern> = self
            .snapshot()
            .into_iter()
            .filter(|p| p.signature.contains(&partial))
            .collect();
        matches.sort_by(|a, b| b.hit_count.cmp(&a.hit_count));
        matches.into_iter().take(limit).map(|p| p.signature).collect()
    }

    /// Write the store to disk if it has unsaved changes.
    ///
    /// A failed write is retried once. If the retry also fails the store
    /// stops persisting for the rest of the run and keeps working in memory.
    pub fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        if self.memory_only.load(Ordering::Relaxed) {
            return Ok(());
        }
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let records: BTreeMap<String, LearnedPattern> = self
            .snapshot()
            .into_iter()
            .map(|p| (p.signature.clone(), p))
            .collect();

        let result = write_atomic(path, &records).or_else(|first| {
            debug!(error = %first, "pattern store write failed, retrying once");
            write_atomic(path, &records)
        });

        match result {
            Ok(()) => {
                debug!(path = %path.display(), count = records.len(), "flushed learned patterns");
                Ok(())
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to persist learned patterns, continuing in memory only"
                );
                self.memory_only.store(true, Ordering::Relaxed);
                self.dirty.store(true, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Spawn the background flusher. Call [`Flusher::shutdown`] to stop it
    /// and write any remaining changes.
    pub fn start_flusher(self: &Arc<Self>, interval: Duration) -> Flusher {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let store = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("yesman-store-flush".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let _ = store.flush();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to spawn pattern store flusher, flushing on shutdown only");
                None
            }
        };

        Flusher {
            store: Arc::clone(self),
            stop_tx,
            handle,
        }
    }
}

/// Handle to the background flusher thread.
pub struct Flusher {
    store: Arc<PatternStore>,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Flusher {
    /// Stop the flusher and write pending changes.
    pub fn shutdown(mut self) -> Result<(), StoreError> {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.store.flush()
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".corrupt");
    path.with_file_name(name)
}

fn load(path: &Path) -> Result<Arena, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(StoreError::Io(e)),
    };
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let records: BTreeMap<String, LearnedPattern> =
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(records
        .into_iter()
        .map(|(signature, mut pattern)| {
            pattern.signature = signature.clone();
            pattern.confidence = pattern.confidence.clamp(0.0, 1.0);
            (signature, Arc::new(Mutex::new(pattern)))
        })
        .collect())
}

fn write_atomic(path: &Path, records: &BTreeMap<String, LearnedPattern>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json =
        serde_json::to_string_pretty(records).map_err(|e| StoreError::Serialize(e.to_string()))?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
