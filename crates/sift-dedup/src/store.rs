//! Near-duplicate store: the `seen` and `blacklist` component sets.
//!
//! [`DedupStore`] is the single-owner source of truth. [`SharedStore`] puts it
//! behind one mutex for file-level parallelism, and
//! [`StoreBroker`](crate::broker::StoreBroker) hands it to a dedicated owner
//! thread. Both implement [`DedupBackend`], which is what the dedup filter
//! talks to.
//!
//! Invariants maintained here:
//! - `seen` and `blacklist` only grow during a run.
//! - a component enters `blacklist` only when a document carrying it is
//!   rejected because the component was already in `seen`.
//! - with `seed_seen` (the default), `blacklist ⊆ seen` always holds.

use crate::signature::Signature;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the dedup store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on blacklist {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Blacklist file not found: {0} (pass recreate to start a new one)")]
    BlacklistMissing(PathBuf),

    #[error("Store lock poisoned by a panicked worker")]
    Poisoned,

    #[error("Store broker is no longer running")]
    BrokerUnavailable,

    #[error("Failed to start store broker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

const TMP_SUFFIX: &str = ".tmp";

/// How a store is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Blacklist file to load at startup and save to.
    pub blacklist_path: Option<PathBuf>,
    /// Truncate the blacklist file before loading.
    pub recreate: bool,
    /// Also seed `seen` with the loaded blacklist.
    pub seed_seen: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            blacklist_path: None,
            recreate: false,
            seed_seen: true,
        }
    }
}

impl StoreConfig {
    /// Config persisting to `path`.
    pub fn with_blacklist(path: impl Into<PathBuf>) -> Self {
        Self {
            blacklist_path: Some(path.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn recreate(mut self, recreate: bool) -> Self {
        self.recreate = recreate;
        self
    }

    #[must_use]
    pub fn seed_seen(mut self, seed_seen: bool) -> Self {
        self.seed_seen = seed_seen;
        self
    }
}

/// Set sizes, as reported in run summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub seen: usize,
    pub blacklist: usize,
}

/// A copy of the store contents at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub seen: HashSet<String>,
    pub blacklist: HashSet<String>,
}

/// The `seen`/`blacklist` sets plus blacklist persistence.
#[derive(Debug, Default)]
pub struct DedupStore {
    seen: HashSet<String>,
    blacklist: HashSet<String>,
    path: Option<PathBuf>,
    dirty: bool,
}

impl DedupStore {
    /// An empty, in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store, loading the blacklist file when one is configured.
    ///
    /// With `recreate`, the file is truncated first. Without it, a missing
    /// file is an error.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let Some(path) = &config.blacklist_path else {
            return Ok(Self::new());
        };

        if config.recreate {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
            }
            File::create(path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            info!(path = %path.display(), "Recreated blacklist");
        }

        let blacklist = load_blacklist(path)?;
        let seen = if config.seed_seen {
            blacklist.clone()
        } else {
            HashSet::new()
        };

        info!(
            path = %path.display(),
            entries = blacklist.len(),
            seed_seen = config.seed_seen,
            "Loaded blacklist"
        );

        Ok(Self {
            seen,
            blacklist,
            path: Some(path.clone()),
            dirty: false,
        })
    }

    /// Register a document's signature and decide whether it is a duplicate.
    ///
    /// Every component is visited in order: a component already in `seen` is
    /// added to `blacklist` and marks the document as a duplicate, and every
    /// component is then added to `seen`. Visiting continues after the first
    /// hit. Returns `true` when the document is a duplicate.
    pub fn check_and_insert(&mut self, signature: &Signature) -> bool {
        let mut duplicate = false;
        for component in signature.iter() {
            if self.seen.contains(component) {
                duplicate = true;
                if self.blacklist.insert(component.to_string()) {
                    self.dirty = true;
                }
            } else {
                self.seen.insert(component.to_string());
            }
        }
        duplicate
    }

    /// The full per-document dedup decision. Returns `true` to reject.
    ///
    /// A document with an already blacklisted component is rejected. When
    /// `online`, the signature is then registered with
    /// [`check_and_insert`](Self::check_and_insert), which may reject it too.
    /// Offline, the store is only read.
    pub fn decide(&mut self, signature: &Signature, online: bool) -> bool {
        let blacklisted = self.is_blacklisted(signature);
        let duplicate = online && self.check_and_insert(signature);
        blacklisted || duplicate
    }

    /// Whether any component of the signature is blacklisted.
    #[must_use]
    pub fn is_blacklisted(&self, signature: &Signature) -> bool {
        signature.iter().any(|c| self.blacklist.contains(c))
    }

    #[must_use]
    pub fn contains(&self, component: &str) -> bool {
        self.seen.contains(component)
    }

    #[must_use]
    pub fn seen(&self) -> &HashSet<String> {
        &self.seen
    }

    #[must_use]
    pub fn blacklist(&self) -> &HashSet<String> {
        &self.blacklist
    }

    #[must_use]
    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }

    /// Whether the blacklist has grown since the last save.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            seen: self.seen.len(),
            blacklist: self.blacklist.len(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            seen: self.seen.clone(),
            blacklist: self.blacklist.clone(),
        }
    }

    /// Rewrite the blacklist file if there were new rejections.
    ///
    /// Returns whether the file was written. Stores without a path never
    /// write.
    pub fn save(&mut self) -> Result<bool> {
        let Some(path) = self.path.clone() else {
            return Ok(false);
        };
        if !self.dirty {
            return Ok(false);
        }
        self.write_to(&path)?;
        self.dirty = false;
        debug!(path = %path.display(), entries = self.blacklist.len(), "Saved blacklist");
        Ok(true)
    }

    /// Write the full blacklist to `path`, one component per line.
    ///
    /// Goes through a sibling temp file and a rename so a crash never leaves
    /// a truncated blacklist behind.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut entries: Vec<&String> = self.blacklist.iter().collect();
        entries.sort_unstable();

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);
        {
            let file = File::create(&tmp).map_err(io_err)?;
            let mut writer = BufWriter::new(file);
            for entry in entries {
                writeln!(writer, "{entry}").map_err(io_err)?;
            }
            writer.flush().map_err(io_err)?;
        }
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }
}

/// Read a blacklist file: one component per line, trimmed, blanks skipped.
pub fn load_blacklist(path: &Path) -> Result<HashSet<String>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::BlacklistMissing(path.to_path_buf()))
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut entries = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            entries.insert(trimmed.to_string());
        }
    }
    Ok(entries)
}

/// Operations the dedup filter needs from a store, whichever thread owns it.
///
/// `decide` must be atomic with respect to every other call on the same
/// backend: the whole per-document decide-and-update runs as one step.
pub trait DedupBackend: Send + Sync {
    /// See [`DedupStore::decide`].
    fn decide(&self, signature: &Signature, online: bool) -> Result<bool>;

    /// Full copy of both sets.
    fn snapshot(&self) -> Result<StoreSnapshot>;

    fn stats(&self) -> Result<StoreStats>;

    /// Persist the blacklist if dirty. Returns whether a write happened.
    fn save(&self) -> Result<bool>;
}

/// A store shared by worker threads under one mutex.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<DedupStore>>,
}

impl SharedStore {
    #[must_use]
    pub fn new(store: DedupStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, DedupStore>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Take the store back once all other handles are gone.
    ///
    /// Returns `self` unchanged if other clones are still alive.
    pub fn into_inner(self) -> std::result::Result<DedupStore, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => Ok(mutex.into_inner().unwrap_or_else(|p| p.into_inner())),
            Err(inner) => Err(Self { inner }),
        }
    }
}

impl DedupBackend for SharedStore {
    fn decide(&self, signature: &Signature, online: bool) -> Result<bool> {
        Ok(self.lock()?.decide(signature, online))
    }

    fn snapshot(&self) -> Result<StoreSnapshot> {
        Ok(self.lock()?.snapshot())
    }

    fn stats(&self) -> Result<StoreStats> {
        Ok(self.lock()?.stats())
    }

    fn save(&self) -> Result<bool> {
        self.lock()?.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn sig(components: &[&str]) -> Signature {
        Signature::from_components(components.iter().map(|c| c.to_string()).collect())
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_seen_is_accepted() {
        let mut store = DedupStore::new();
        assert!(!store.check_and_insert(&sig(&["0+a", "1+b"])));
        assert_eq!(store.seen_len(), 2);
        assert_eq!(store.blacklist_len(), 0);
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_shared_component_rejects_and_blacklists() {
        let mut store = DedupStore::new();
        assert!(!store.check_and_insert(&sig(&["0+a", "1+b"])));
        assert!(store.check_and_insert(&sig(&["0+a", "1+c"])));

        assert_eq!(store.blacklist(), &set(&["0+a"]));
        // The rejected document's other components are still recorded.
        assert!(store.contains("1+c"));
        assert!(store.is_dirty());
    }

    #[test]
    fn test_all_components_visited_after_hit() {
        let mut store = DedupStore::new();
        store.check_and_insert(&sig(&["0+a", "1+b", "2+c"]));
        assert!(store.check_and_insert(&sig(&["0+a", "1+b", "2+z"])));

        assert_eq!(store.blacklist(), &set(&["0+a", "1+b"]));
        assert!(store.contains("2+z"));
    }

    #[test]
    fn test_monotonic_and_subset() {
        let mut store = DedupStore::new();
        let mut last_seen = 0;
        for sigs in [["0+a", "1+b"], ["0+a", "1+c"], ["0+d", "1+c"], ["0+a", "1+b"]] {
            store.check_and_insert(&sig(&sigs));
            assert!(store.seen_len() >= last_seen);
            assert!(store.blacklist().is_subset(store.seen()));
            last_seen = store.seen_len();
        }
    }

    #[test]
    fn test_is_blacklisted() {
        let mut store = DedupStore::new();
        store.check_and_insert(&sig(&["0+a"]));
        store.check_and_insert(&sig(&["0+a"]));

        assert!(store.is_blacklisted(&sig(&["9+x", "0+a"])));
        assert!(!store.is_blacklisted(&sig(&["9+x"])));
    }

    #[test]
    fn test_decide_offline_only_reads() {
        let mut store = DedupStore::new();
        store.check_and_insert(&sig(&["0+a"]));
        store.check_and_insert(&sig(&["0+a"]));

        assert!(store.decide(&sig(&["0+a", "1+q"]), false));
        assert!(!store.decide(&sig(&["0+b"]), false));
        assert!(!store.decide(&sig(&["0+b"]), false));
        assert_eq!(store.seen(), &set(&["0+a"]));
    }

    #[test]
    fn test_decide_online_blacklisted_still_registers() {
        let mut store = DedupStore::new();
        store.check_and_insert(&sig(&["0+a"]));
        store.check_and_insert(&sig(&["0+a"]));

        assert!(store.decide(&sig(&["0+a", "1+new"]), true));
        assert!(store.contains("1+new"));
    }

    #[test]
    fn test_save_leaves_sibling_files_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blacklist.txt");
        let sibling = dir.path().join("blacklist.tmp");
        fs::write(&sibling, "unrelated\n").unwrap();

        let mut store = DedupStore::open(&StoreConfig::with_blacklist(&path).recreate(true)).unwrap();
        store.check_and_insert(&sig(&["0+a"]));
        store.check_and_insert(&sig(&["0+a"]));
        assert!(store.save().unwrap());

        assert_eq!(fs::read_to_string(&sibling).unwrap(), "unrelated\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "0+a\n");
    }

    #[test]
    fn test_save_blacklist_named_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.tmp");

        let mut store = DedupStore::open(&StoreConfig::with_blacklist(&path).recreate(true)).unwrap();
        for c in ["b", "a"] {
            store.check_and_insert(&sig(&[c]));
            store.check_and_insert(&sig(&[c]));
        }
        assert!(store.save().unwrap());

        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\n");
        assert!(!dir.path().join("state.tmp.tmp").exists());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blacklist.txt");

        let mut store = DedupStore::open(&StoreConfig::with_blacklist(&path).recreate(true)).unwrap();
        for c in ["a", "b", "c"] {
            store.check_and_insert(&sig(&[c]));
            store.check_and_insert(&sig(&[c]));
        }
        assert!(store.save().unwrap());

        let reloaded = DedupStore::open(&StoreConfig::with_blacklist(&path)).unwrap();
        assert_eq!(reloaded.blacklist(), &set(&["a", "b", "c"]));
        assert_eq!(reloaded.seen(), &set(&["a", "b", "c"]));
    }

    #[test]
    fn test_save_only_when_dirty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blacklist.txt");
        fs::write(&path, "x\ny\n").unwrap();

        let mut store = DedupStore::open(&StoreConfig::with_blacklist(&path)).unwrap();
        store.check_and_insert(&sig(&["fresh"]));
        assert!(!store.save().unwrap());

        store.check_and_insert(&sig(&["x"]));
        // "x" was already blacklisted, so nothing new to persist.
        assert!(!store.save().unwrap());

        store.check_and_insert(&sig(&["fresh"]));
        assert!(store.save().unwrap());
        assert!(!store.is_dirty());

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "fresh\nx\ny\n");
    }

    #[test]
    fn test_idempotent_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blacklist.txt");
        fs::write(&path, "  b \n\na\nc\n").unwrap();

        let store = DedupStore::open(&StoreConfig::with_blacklist(&path)).unwrap();
        let copy = dir.path().join("copy.txt");
        store.write_to(&copy).unwrap();

        assert_eq!(load_blacklist(&copy).unwrap(), load_blacklist(&path).unwrap());
    }

    #[test]
    fn test_recreate_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blacklist.txt");
        fs::write(&path, "stale\n").unwrap();

        let store = DedupStore::open(&StoreConfig::with_blacklist(&path).recreate(true)).unwrap();
        assert_eq!(store.blacklist_len(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_missing_blacklist_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.txt");

        let err = DedupStore::open(&StoreConfig::with_blacklist(&path)).unwrap_err();
        assert!(matches!(err, StoreError::BlacklistMissing(p) if p == path));
    }

    #[test]
    fn test_seed_seen_disabled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blacklist.txt");
        fs::write(&path, "a\n").unwrap();

        let mut store =
            DedupStore::open(&StoreConfig::with_blacklist(&path).seed_seen(false)).unwrap();
        assert!(store.seen().is_empty());
        // Not a duplicate by `seen`, but still blacklisted.
        assert!(!store.check_and_insert(&sig(&["a"])));
        assert!(store.is_blacklisted(&sig(&["a"])));
    }

    #[test]
    fn test_shared_store_one_accept_one_reject() {
        let shared = SharedStore::default();
        let signature = sig(&["0+a", "1+b", "2+c"]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = shared.clone();
                let signature = signature.clone();
                thread::spawn(move || store.decide(&signature, true).unwrap())
            })
            .collect();

        let duplicates = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&dup| dup)
            .count();
        assert_eq!(duplicates, 7);

        let store = shared.into_inner().unwrap();
        assert_eq!(store.blacklist_len(), 3);
    }
}
