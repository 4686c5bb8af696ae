//! Incremental stylesheet cache.
//!
//! Caches the compiled, post-processed CSS of every root stylesheet, keyed by
//! path, together with an explicit include graph.
//!
//! # How It Works
//!
//! 1. A root is compiled once; its CSS, source hash and includes are stored
//! 2. The include edges (`main.scss` → `_mid.scss` → `_base.scss`) are
//!    recorded in a [`DependencyGraph`]
//! 3. When a file changes, [`IncrementalCache::invalidate`] drops its entry
//!    and every entry that reaches it through the graph
//! 4. The next run recompiles only roots without a valid entry
//!
//! An entry also remembers the content hash of every file the root included.
//! A lookup is only a hit once those files still hash the same, so an edit
//! that never reached [`IncrementalCache::invalidate`] is still caught.
//!
//! Every invalidation bumps an epoch. A stage that started compiling before
//! an invalidation stores its result with [`IncrementalCache::put_if_current`],
//! which discards the now-stale entry.
//!
//! # Example
//!
//! ```ignore
//! let cache = shared_cache();
//! let ctx = StageContext::new(config, root)?.with_cache(cache.clone());
//! run_stage(AssetCategory::Stylesheet, &ctx).await;   // compiles
//! lock_cache(&cache).invalidate(&base_partial);       // drops main.scss
//! ```

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Cached compilation result for one root stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Content hash of the root source
    pub source_hash: String,
    /// Compiled, post-processed CSS
    pub css: String,
    /// Content hash of every file the root includes, transitively
    pub includes: BTreeMap<PathBuf, String>,
}

impl CacheEntry {
    /// Whether every included file still has the content the entry was
    /// compiled from. A file that is gone or unreadable counts as changed.
    pub async fn includes_unchanged(&self) -> bool {
        for (path, digest) in &self.includes {
            match tokio::fs::read(path).await {
                Ok(bytes) if content_hash(&bytes) == *digest => {}
                _ => {
                    tracing::debug!("include changed since caching: {}", path.display());
                    return false;
                }
            }
        }
        true
    }
}

/// Explicit include graph: who includes whom.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    includes: HashMap<PathBuf, BTreeSet<PathBuf>>,
    dependents: HashMap<PathBuf, BTreeSet<PathBuf>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `includer` includes `included`.
    pub fn record(&mut self, includer: &Path, included: &Path) {
        self.includes.entry(includer.to_path_buf()).or_default().insert(included.to_path_buf());
        self.dependents.entry(included.to_path_buf()).or_default().insert(includer.to_path_buf());
    }

    /// Forget every include edge leaving `includer`.
    pub fn clear(&mut self, includer: &Path) {
        let Some(targets) = self.includes.remove(includer) else {
            return;
        };
        for target in targets {
            if let Some(set) = self.dependents.get_mut(&target) {
                set.remove(includer);
                if set.is_empty() {
                    self.dependents.remove(&target);
                }
            }
        }
    }

    /// Files that include `path` directly.
    pub fn dependents_of(&self, path: &Path) -> Vec<&Path> {
        self.dependents.get(path).map(|s| s.iter().map(PathBuf::as_path).collect()).unwrap_or_default()
    }

    /// Every file that reaches `path` through one or more include edges.
    ///
    /// Cycle-safe; `path` itself is only returned if it includes itself
    /// through a cycle. Sorted.
    pub fn transitive_dependents(&self, path: &Path) -> Vec<PathBuf> {
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<&Path> = VecDeque::from([path]);

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents_of(current) {
                if seen.insert(dependent.to_path_buf()) {
                    queue.push_back(dependent);
                }
            }
        }

        let mut out: Vec<PathBuf> = seen.into_iter().collect();
        out.sort();
        out
    }

    pub fn edge_count(&self) -> usize {
        self.includes.values().map(BTreeSet::len).sum()
    }
}

/// Per-root stylesheet cache with dependency-aware invalidation.
#[derive(Debug, Clone, Default)]
pub struct IncrementalCache {
    entries: HashMap<PathBuf, CacheEntry>,
    deps: DependencyGraph,
    epoch: u64,
}

impl IncrementalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&CacheEntry> {
        self.entries.get(path)
    }

    /// The entry for `path` if the root's own hash still matches.
    ///
    /// Callers confirm the includes with [`CacheEntry::includes_unchanged`]
    /// before using it.
    pub fn lookup(&self, path: &Path, source_hash: &str) -> Option<&CacheEntry> {
        self.entries.get(path).filter(|e| e.source_hash == source_hash)
    }

    pub fn put(&mut self, path: &Path, entry: CacheEntry) {
        self.entries.insert(path.to_path_buf(), entry);
    }

    /// Current invalidation epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Store `entry` only if no invalidation happened since `epoch` was read.
    ///
    /// Returns whether the entry was stored.
    pub fn put_if_current(&mut self, path: &Path, entry: CacheEntry, epoch: u64) -> bool {
        if self.epoch != epoch {
            tracing::debug!("discarding stale cache entry for {}", path.display());
            return false;
        }
        self.put(path, entry);
        true
    }

    /// Drop the entry for `path` and every entry that transitively includes
    /// it. Returns the paths whose entries were removed, sorted.
    pub fn invalidate(&mut self, path: &Path) -> Vec<PathBuf> {
        self.epoch += 1;

        let mut affected = self.deps.transitive_dependents(path);
        affected.push(path.to_path_buf());

        let mut removed: Vec<PathBuf> =
            affected.into_iter().filter(|p| self.entries.remove(p).is_some()).collect();
        removed.sort();
        removed.dedup();

        if !removed.is_empty() {
            tracing::debug!("invalidated {} cached stylesheet(s) via {}", removed.len(), path.display());
        }
        removed
    }

    pub fn record_dependency(&mut self, includer: &Path, included: &Path) {
        self.deps.record(includer, included);
    }

    /// Call before re-recording a recompiled file's includes.
    pub fn clear_dependencies(&mut self, includer: &Path) {
        self.deps.clear(includer);
    }

    pub fn dependencies(&self) -> &DependencyGraph {
        &self.deps
    }

    /// Forget entries for roots that no longer exist.
    pub fn retain_roots(&mut self, roots: &[PathBuf]) {
        let keep: HashSet<&PathBuf> = roots.iter().collect();
        let gone: Vec<PathBuf> = self.entries.keys().filter(|p| !keep.contains(p)).cloned().collect();
        for path in gone {
            self.entries.remove(&path);
            self.deps.clear(&path);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> IncrementalStats {
        IncrementalStats {
            entries: self.entries.len(),
            edges: self.deps.edge_count(),
            epoch: self.epoch,
        }
    }
}

/// Shared handle used by stages and the watch loop.
///
/// The lock is coarse and never held across an `.await`.
pub type SharedCache = Arc<Mutex<IncrementalCache>>;

pub fn shared_cache() -> SharedCache {
    Arc::new(Mutex::new(IncrementalCache::new()))
}

/// Lock the shared cache. A panic in another holder leaves the cache usable.
pub fn lock_cache(cache: &SharedCache) -> MutexGuard<'_, IncrementalCache> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Hex SHA-256 of file content.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Snapshot of cache size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncrementalStats {
    /// Cached roots
    pub entries: usize,
    /// Include edges tracked
    pub edges: usize,
    /// Invalidations so far
    pub epoch: u64,
}

impl std::fmt::Display for IncrementalStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} cached, {} include edges, epoch {}", self.entries, self.edges, self.epoch)
    }
}
