use super::*;
use crate::{holder::LockHolder, table::LockTable};
use std::{
    any::Any,
    cell::RefCell,
    sync::{atomic::*, Arc, Weak},
};
use tracing::trace;

thread_local! {
    // one slot per lock manager this thread has touched; dropping the slot
    // (thread exit, or the manager going away) drains its references
    static CACHES: RefCell<Vec<Box<dyn CacheSlot>>> = RefCell::new(Vec::new());
}

trait CacheSlot {
    fn table_id(&self) -> u64;
    fn table_alive(&self) -> bool;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// A small per-thread list of recently used holders, most recent first. The
// cache owns one reference to each resident holder, on top of whatever the
// caller receives. Purely an optimization over going to the table: with
// capacity zero every request falls through and nothing is retained.
pub(crate) struct HolderCache<K: PathKey> {
    table: Weak<LockTable<K>>,
    table_id: u64,
    capacity: usize,
    holders: Vec<Arc<LockHolder<K>>>,
}

impl<K: PathKey> HolderCache<K> {
    fn new(table: &Arc<LockTable<K>>, capacity: usize) -> Self {
        Self {
            table: Arc::downgrade(table),
            table_id: table.id(),
            capacity,
            holders: Vec::with_capacity(capacity),
        }
    }

    // Hands out the holder for `path` with one caller-owned reference,
    // consulting the cache before the table.
    pub(crate) fn get_or_create(&mut self, table: &LockTable<K>, path: &K) -> Arc<LockHolder<K>> {
        if let Some(ix) = self.holders.iter().position(|h| h.path == *path) {
            let holder = self.holders.remove(ix);
            self.holders.insert(0, holder.clone());
            // the caller's reference; the cache's own was taken at insertion
            holder.refcount.fetch_add(1, Ordering::AcqRel);
            return holder;
        }

        let holder = table.find_or_create(self, path);
        if self.capacity == 0 {
            // cache disabled: the find_or_create reference goes straight to
            // the caller
            return holder;
        }

        // the find_or_create reference becomes the cache's
        self.holders.insert(0, holder.clone());
        if self.holders.len() > self.capacity {
            if let Some(evicted) = self.holders.pop() {
                trace!(path = ?evicted.path, "cache_evict");
                table.dereference(&evicted);
            }
        }
        holder.refcount.fetch_add(1, Ordering::AcqRel);
        holder
    }
}

impl<K: PathKey> CacheSlot for HolderCache<K> {
    fn table_id(&self) -> u64 {
        self.table_id
    }

    fn table_alive(&self) -> bool {
        self.table.strong_count() > 0
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<K: PathKey> Drop for HolderCache<K> {
    fn drop(&mut self) {
        // an exiting thread gives back its cached references; if the whole
        // manager is already gone there is no table left to update
        if let Some(table) = self.table.upgrade() {
            for holder in self.holders.drain(..) {
                table.dereference(&holder);
            }
        }
    }
}

pub(crate) fn with_thread_cache<K: PathKey, R>(
    table: &Arc<LockTable<K>>,
    capacity: usize,
    f: impl FnOnce(&mut HolderCache<K>) -> R,
) -> R {
    CACHES.with(|slots| {
        let mut slots = slots.borrow_mut();
        slots.retain(|slot| slot.table_alive());
        let ix = match slots.iter().position(|slot| slot.table_id() == table.id()) {
            Some(ix) => ix,
            None => {
                slots.push(Box::new(HolderCache::new(table, capacity)));
                slots.len() - 1
            }
        };
        let cache = slots[ix]
            .as_any_mut()
            .downcast_mut::<HolderCache<K>>()
            .expect("thread cache slot bound to a different key type");
        f(cache)
    })
}
