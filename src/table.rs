use super::*;
use crate::{cache::HolderCache, holder::LockHolder};
use parking_lot::Mutex;
use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hasher},
    sync::{atomic::*, Arc},
};
use tracing::trace;

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(0);

type Bucket<K> = Vec<Arc<LockHolder<K>>>;

// The authoritative registry of live holders. A holder is listed in its
// bucket exactly while its refcount is above zero; buckets are only ever
// locked one at a time.
pub(crate) struct LockTable<K: PathKey> {
    buckets: Box<[Mutex<Bucket<K>>]>,
    mask: usize,
    hasher: RandomState,
    id: u64,
}

impl<K: PathKey> LockTable<K> {
    pub(crate) fn new(bucket_count_hint: usize) -> Self {
        let bucket_count = bucket_count_hint
            .next_power_of_two()
            .max(MINIMUM_BUCKET_COUNT);
        let buckets = (0..bucket_count)
            .map(|_| Mutex::new(Vec::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buckets,
            mask: bucket_count - 1,
            hasher: RandomState::new(),
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn resident_holders(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.lock().len()).sum()
    }

    fn bucket_for(&self, path: &K) -> &Mutex<Bucket<K>> {
        let mut hasher = self.hasher.build_hasher();
        path.hash(&mut hasher);
        &self.buckets[(hasher.finish() as usize) & self.mask]
    }

    // scan one bucket; on a hit, move to front and take a reference
    fn find_in(holders: &mut Bucket<K>, path: &K) -> Option<Arc<LockHolder<K>>> {
        let ix = holders.iter().position(|h| h.path == *path)?;
        let holder = holders.remove(ix);
        holders.insert(0, holder.clone());
        holder.refcount.fetch_add(1, Ordering::AcqRel);
        Some(holder)
    }

    // Returns the holder for `path` with one reference owned by the caller,
    // creating it and its ancestor chain on demand.
    pub(crate) fn find_or_create(&self, cache: &mut HolderCache<K>, path: &K) -> Arc<LockHolder<K>> {
        let bucket = self.bucket_for(path);
        {
            let mut holders = bucket.lock();
            if let Some(found) = Self::find_in(&mut holders, path) {
                return found;
            }
        }

        // miss: resolve the parent chain before relocking this bucket, so
        // that no two bucket locks are ever held at once
        let parent = match path.parent() {
            Some(ref p) => Some(cache.get_or_create(self, p)),
            None => None,
        };

        let mut holders = bucket.lock();
        if let Some(found) = Self::find_in(&mut holders, path) {
            // a concurrent thread inserted first; the spare parent reference
            // has to go back, and never under this bucket's lock
            drop(holders);
            if let Some(spare) = parent {
                self.dereference(&spare);
            }
            return found;
        }

        let holder = Arc::new(LockHolder::new(path.clone(), parent));
        holders.insert(0, holder.clone());
        drop(holders);
        trace!(path = ?path, "holder_created");
        holder
    }

    // Gives back one reference. A holder whose count reaches zero is removed
    // from its bucket after a re-check under the bucket lock, since a
    // concurrent find_or_create may have taken a new reference in between.
    // Removal unlinks the parent, whose own reference is then returned with
    // no bucket lock held.
    pub(crate) fn dereference(&self, holder: &Arc<LockHolder<K>>) {
        let mut current = holder.clone();
        loop {
            if current.refcount.fetch_sub(1, Ordering::AcqRel) != 1 {
                return;
            }
            let removed = {
                let mut holders = self.bucket_for(&current.path).lock();
                match holders.iter().position(|h| Arc::ptr_eq(h, &current)) {
                    Some(ix) if current.refcount.load(Ordering::Acquire) == 0 => {
                        holders.remove(ix);
                        true
                    }
                    _ => false,
                }
            };
            if !removed {
                return;
            }
            trace!(path = ?current.path, "holder_removed");
            match current.parent.clone() {
                Some(parent) => current = parent,
                None => return,
            }
        }
    }
}
