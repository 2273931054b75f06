//! File-backed identity store with atomic, crash-consistent commits.
//!
//! The whole mapping lives in one text file (see [`super::codec`]). Every
//! commit writes a complete new file next to the old one, fsyncs it and
//! atomically renames it into place, so a crash leaves either the previous
//! or the new file visible and never a mix.
//!
//! ## Concurrency
//!
//! * A per-identifier mutex linearizes updates to one key, including running
//!   the mutator.
//! * A store-wide commit lock serializes the file replacement itself.
//! * The decoded index is an `Arc<BTreeMap>` swapped after each successful
//!   rename; readers only clone the `Arc`.
//!
//! The commit runs on its own task. If the caller's deadline passes the
//! caller gets [`StoreError::DeadlineExceeded`] but the commit still finishes
//! (or fails) on its own, with the identifier lock held until it does.
//!
//! ## Corrupt entries
//!
//! Lines that fail to decode at open are skipped. The first commit rewrites
//! the file from the index, so before it does, those lines are appended
//! verbatim to a `<file>.corrupt` sidecar and the move is audited.

use super::codec;
use super::record::{apply_mutator, IdentityRecord};
use super::{IdentityStore, Mutator, Scan};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::identifier::Identifier;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

type Index = BTreeMap<Identifier, IdentityRecord>;

/// Production [`IdentityStore`] persisting to a single checksummed file.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    index: RwLock<Arc<Index>>,
    key_locks: DashMap<Identifier, Arc<Mutex<()>>>,
    commit_lock: Mutex<()>,
    /// Odd while a commit is replacing the file, bumped again once the index matches
    generation: AtomicU64,
    /// Undecodable lines from open still present in the file
    quarantine: Mutex<Vec<String>>,
    write_timeout: Duration,
}

/// What a commit does to the entry for its identifier.
enum Change {
    Put(IdentityRecord),
    Delete,
}

impl FileIdentityStore {
    /// Opens (or prepares to create) the store at `path`.
    ///
    /// A missing file is an empty store; nothing is written until the first
    /// commit. Corrupt entries are skipped with a warning.
    ///
    /// # Errors
    ///
    /// [`StoreError::IoFailure`] if the file exists but cannot be read.
    pub async fn open(path: impl Into<PathBuf>, write_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.into();
        let text = read_store_file(&path).await?;

        let mut index = Index::new();
        let mut scan = Scan::from_text(text.unwrap_or_default());
        for record in scan.by_ref() {
            if index.contains_key(&record.identifier) {
                warn!("⚠️ Duplicate identity entry for '{}' in {}; keeping the later one", record.identifier, path.display());
            }
            index.insert(record.identifier.clone(), record);
        }

        info!(
            "📂 Identity store opened at {} ({} records, {} skipped)",
            path.display(),
            index.len(),
            scan.skipped()
        );
        let quarantine = scan.corrupt_entries().iter().map(|c| c.raw.clone()).collect();

        Ok(Self {
            inner: Arc::new(Inner {
                path,
                index: RwLock::new(Arc::new(index)),
                key_locks: DashMap::new(),
                commit_lock: Mutex::new(()),
                generation: AtomicU64::new(0),
                quarantine: Mutex::new(quarantine),
                write_timeout,
            }),
        })
    }

    /// Opens the store described by a [`StoreConfig`].
    pub async fn open_with_config(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::open(&config.path, Duration::from_millis(config.write_timeout_ms)).await
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Sidecar file receiving undecodable lines before they are rewritten away.
    pub fn quarantine_path(&self) -> PathBuf {
        quarantine_path(&self.inner.path)
    }

    /// Number of records currently indexed.
    pub async fn len(&self) -> usize {
        self.inner.index.read().await.len()
    }

    async fn lock_key(&self, id: &Identifier) -> OwnedMutexGuard<()> {
        let lock = self
            .inner
            .key_locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    async fn snapshot(&self) -> Arc<Index> {
        Arc::clone(&*self.inner.index.read().await)
    }

    /// Hands `change` to a commit task and waits for it, bounded by the write timeout.
    async fn commit(&self, id: Identifier, change: Change, key_guard: OwnedMutexGuard<()>) -> Result<(), StoreError> {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = inner.commit(&id, change).await;
            drop(key_guard);
            inner.key_locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
            result
        });

        match tokio::time::timeout(self.inner.write_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(StoreError::from(std::io::Error::other(format!(
                "commit task failed: {join_error}"
            )))),
            Err(_) => {
                warn!("⏱️ Identity store commit exceeded {:?}; it may still complete", self.inner.write_timeout);
                Err(StoreError::DeadlineExceeded)
            }
        }
    }

    async fn write(
        &self,
        id: &Identifier,
        expected_version: Option<Option<u64>>,
        mutator: Mutator,
    ) -> Result<IdentityRecord, StoreError> {
        let guard = self.lock_key(id).await;
        let current = self.snapshot().await.get(id).cloned();

        if let Some(expected) = expected_version {
            let found = current.as_ref().map(|r| r.version);
            if found != expected {
                debug!("Version check failed for '{}': expected {:?}, found {:?}", id, expected, found);
                return Err(StoreError::ConcurrentConflict { expected, found });
            }
        }

        let next = apply_mutator(id, current, mutator)?;
        self.commit(id.clone(), Change::Put(next.clone()), guard).await?;
        Ok(next)
    }
}

impl Inner {
    async fn commit(&self, id: &Identifier, change: Change) -> Result<(), StoreError> {
        let _commit = self.commit_lock.lock().await;

        self.quarantine_corrupt_lines().await?;

        self.generation.fetch_add(1, Ordering::SeqCst);
        let result = self.replace_file(id, change).await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Moves lines skipped at open into the sidecar. Caller holds the commit lock.
    async fn quarantine_corrupt_lines(&self) -> Result<(), StoreError> {
        let mut pending = self.quarantine.lock().await;
        if pending.is_empty() {
            return Ok(());
        }

        let sidecar = quarantine_path(&self.path);
        let lines = pending.clone();
        let target = sidecar.clone();
        let source = self.path.clone();
        let moved = tokio::task::spawn_blocking(move || append_quarantined(&target, &source, &lines))
            .await
            .map_err(|e| std::io::Error::other(format!("quarantine writer panicked: {e}")))?;

        if let Err(e) = moved {
            error!("❌ Failed to quarantine corrupt entries to {}: {}", sidecar.display(), e);
            return Err(e.into());
        }

        warn!(
            target: "audit",
            count = pending.len(),
            sidecar = %sidecar.display(),
            "corrupt identity entries moved out of the store file"
        );
        pending.clear();
        Ok(())
    }

    async fn replace_file(&self, id: &Identifier, change: Change) -> Result<(), StoreError> {
        let mut next = Index::clone(&*self.index.read().await);
        match change {
            Change::Put(record) => {
                next.insert(id.clone(), record);
            }
            Change::Delete => {
                next.remove(id);
            }
        }

        let contents = codec::encode_all(next.values()).map_err(std::io::Error::from)?;
        let path = self.path.clone();
        let written = tokio::task::spawn_blocking(move || write_atomically(&path, contents.as_bytes()))
            .await
            .map_err(|e| std::io::Error::other(format!("store writer panicked: {e}")))?;

        if let Err(e) = written {
            error!("❌ Failed to persist identity store {}: {}", self.path.display(), e);
            return Err(e.into());
        }

        *self.index.write().await = Arc::new(next);
        debug!("💾 Committed identity store change for '{}'", id);
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn get(&self, id: &Identifier) -> Result<IdentityRecord, StoreError> {
        self.snapshot()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn upsert(&self, id: &Identifier, mutator: Mutator) -> Result<IdentityRecord, StoreError> {
        self.write(id, None, mutator).await
    }

    async fn compare_and_upsert(
        &self,
        id: &Identifier,
        expected_version: Option<u64>,
        mutator: Mutator,
    ) -> Result<IdentityRecord, StoreError> {
        self.write(id, Some(expected_version), mutator).await
    }

    async fn remove(&self, id: &Identifier, reason: &str) -> Result<IdentityRecord, StoreError> {
        let guard = self.lock_key(id).await;
        let existing = self
            .snapshot()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        self.commit(id.clone(), Change::Delete, guard).await?;
        info!(target: "audit", identifier = %id, reason, version = existing.version, "identity record deleted");
        Ok(existing)
    }

    async fn scan(&self) -> Result<Scan, StoreError> {
        // Pair the file with the index it was written from; retry if a
        // commit replaced either in between.
        loop {
            let before = self.inner.generation.load(Ordering::SeqCst);
            if before % 2 == 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
                continue;
            }

            let snapshot = self.snapshot().await;
            let text = read_store_file(&self.inner.path).await?;
            if self.inner.generation.load(Ordering::SeqCst) != before {
                continue;
            }

            return Ok(match text {
                Some(text) => Scan::from_text(text).keeping_latest(snapshot),
                None => Scan::empty(),
            });
        }
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".corrupt");
    PathBuf::from(name)
}

/// Appends `lines` to the sidecar under a header naming their origin.
fn append_quarantined(sidecar: &Path, source: &Path, lines: &[String]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(sidecar)?;
    let mut block = format!(
        "# quarantined from {} at {}\n",
        source.display(),
        crate::utils::current_timestamp_millis()
    );
    for line in lines {
        block.push_str(line);
        block.push('\n');
    }
    file.write_all(block.as_bytes())?;
    file.sync_all()
}

/// Reads the store file; `None` if it does not exist yet.
async fn read_store_file(path: &Path) -> Result<Option<String>, StoreError> {
    let path = path.to_path_buf();
    let read = tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    })
    .await
    .map_err(|e| std::io::Error::other(format!("store reader panicked: {e}")))?;
    Ok(read?)
}

/// Replaces `path` with `contents` via a synced temporary file in the same directory.
fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".identity-store.")
        .suffix(".tmp")
        .tempfile_in(&dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    // Make the rename itself durable.
    #[cfg(unix)]
    std::fs::File::open(&dir)?.sync_all()?;

    Ok(())
}
