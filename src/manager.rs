use super::*;
use crate::{cache::with_thread_cache, table::LockTable};
use std::{fmt, sync::Arc, time::Duration};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(9);
pub const MINIMUM_BUCKET_COUNT: usize = 64;
pub const CACHED_HOLDERS_PER_THREAD: usize = 8;

/// Serializes access to the entries of a tree-structured namespace.
///
/// Callers ask for a read, write, or subtree-write lock on a path and get a
/// `LockHandle` back, or `None` once the configured timeout elapses.
/// Acquisition walks the ancestor chain root-to-target taking each subtree
/// lock in shared mode, so operations on disjoint subtrees proceed in
/// parallel while a subtree write excludes everything at or below it.
pub struct LockManager<K: PathKey> {
    table: Arc<LockTable<K>>,
    lock_timeout: Duration,
    cache_capacity: usize,
}

impl<K: PathKey> LockManager<K> {
    pub fn new(lock_timeout: Duration, bucket_count_hint: usize) -> Self {
        Self {
            table: Arc::new(LockTable::new(bucket_count_hint)),
            lock_timeout,
            cache_capacity: CACHED_HOLDERS_PER_THREAD,
        }
    }

    /// A manager with the given timeout and the default bucket count.
    pub fn with_timeout(lock_timeout: Duration) -> Self {
        Self::new(lock_timeout, default_bucket_hint())
    }

    /// Caps the number of holders each thread keeps cached. Zero disables
    /// the cache; every request then goes straight to the table. Set this
    /// before the manager is shared.
    pub fn thread_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Takes a read lock on the entry at `path`, shared with other readers
    /// of the same entry.
    pub fn try_read_lock(&self, path: &K) -> Option<LockHandle<K>> {
        self.lock(path, LockKind::ReadEntry)
    }

    /// Takes an exclusive write lock on the entry at `path`. Descendants
    /// stay lockable; use `try_write_lock_subtree` for structural changes.
    pub fn try_write_lock(&self, path: &K) -> Option<LockHandle<K>> {
        self.lock(path, LockKind::WriteEntry)
    }

    /// Takes an exclusive lock on `path` and everything below it.
    pub fn try_write_lock_subtree(&self, path: &K) -> Option<LockHandle<K>> {
        self.lock(path, LockKind::WriteSubtree)
    }

    fn lock(&self, path: &K, kind: LockKind) -> Option<LockHandle<K>> {
        let holder = with_thread_cache(&self.table, self.cache_capacity, |cache| {
            cache.get_or_create(&self.table, path)
        });
        LockHandle::acquire(holder, kind, self.lock_timeout, self.table.clone())
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }

    /// The number of holders currently registered in the table. Diagnostic:
    /// counts paths referenced by live handles, in-flight acquisitions,
    /// thread caches, and their ancestor chains.
    pub fn resident_holders(&self) -> usize {
        self.table.resident_holders()
    }
}

impl<K: PathKey> Default for LockManager<K> {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT, default_bucket_hint())
    }
}

impl<K: PathKey> fmt::Debug for LockManager<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("lock_timeout", &self.lock_timeout)
            .field("bucket_count", &self.bucket_count())
            .field("thread_cache_capacity", &self.cache_capacity)
            .field("resident_holders", &self.resident_holders())
            .finish()
    }
}

fn default_bucket_hint() -> usize {
    num_cpus::get() * 8
}
