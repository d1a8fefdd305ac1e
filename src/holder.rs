use super::*;
use crate::table::LockTable;
use parking_lot::{
    lock_api::{RawRwLock as RawRwLockTrait, RawRwLockTimed},
    RawRwLock,
};
use std::{
    fmt,
    marker::PhantomData,
    sync::{atomic::*, Arc},
    time::Duration,
};
use tracing::trace;

#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum LockKind {
    ReadEntry,
    WriteEntry,
    WriteSubtree,
}

pub(crate) struct LockHolder<K: PathKey> {
    pub(crate) path: K,
    pub(crate) parent: Option<Arc<LockHolder<K>>>,
    pub(crate) refcount: AtomicUsize,
    subtree_lock: RawRwLock,
    entry_lock: RawRwLock,
}

impl<K: PathKey> LockHolder<K> {
    pub(crate) fn new(path: K, parent: Option<Arc<LockHolder<K>>>) -> Self {
        Self {
            path,
            parent,
            // the requester's reference
            refcount: AtomicUsize::new(1),
            subtree_lock: RawRwLock::INIT,
            entry_lock: RawRwLock::INIT,
        }
    }

    // Takes the subtree lock of every strict ancestor in shared mode, root
    // first. Walking top-down from the root on every call is what makes
    // deadlock impossible: no two callers ever request these locks in a
    // different relative order.
    fn lock_ancestors(&self, timeout: Duration) -> bool {
        match &self.parent {
            None => true,
            Some(parent) => {
                if !parent.lock_ancestors(timeout) {
                    return false;
                }
                if parent.subtree_lock.try_lock_shared_for(timeout) {
                    true
                } else {
                    parent.unlock_ancestors();
                    false
                }
            }
        }
    }

    // reverse of lock_ancestors: nearest ancestor first, up to the root
    fn unlock_ancestors(&self) {
        if let Some(parent) = &self.parent {
            parent.subtree_lock.unlock_shared();
            parent.unlock_ancestors();
        }
    }
}

/// A held lock on one path.
///
/// Releasing is single-shot by construction: `unlock` consumes the handle,
/// and dropping it without calling `unlock` releases the same locks. The
/// handle stays on the thread that acquired it.
pub struct LockHandle<K: PathKey> {
    holder: Arc<LockHolder<K>>,
    kind: LockKind,
    table: Arc<LockTable<K>>,
    // primitive locks must be released on the acquiring thread
    _thread_bound: PhantomData<*const ()>,
}

impl<K: PathKey> LockHandle<K> {
    // The uniform acquisition protocol: ancestors in shared mode from the
    // root down, then the target's subtree lock, then (for entry kinds) the
    // target's entry lock. Each step gets the full timeout; any failure
    // unwinds every lock taken so far and gives back the caller's holder
    // reference.
    pub(crate) fn acquire(
        holder: Arc<LockHolder<K>>,
        kind: LockKind,
        timeout: Duration,
        table: Arc<LockTable<K>>,
    ) -> Option<Self> {
        if !holder.lock_ancestors(timeout) {
            trace!(kind = ?kind, path = ?holder.path, phase = "ancestor", "lock_timeout");
            table.dereference(&holder);
            return None;
        }

        let tree_locked = match kind {
            LockKind::WriteSubtree => holder.subtree_lock.try_lock_exclusive_for(timeout),
            _ => holder.subtree_lock.try_lock_shared_for(timeout),
        };
        if !tree_locked {
            holder.unlock_ancestors();
            trace!(kind = ?kind, path = ?holder.path, phase = "subtree", "lock_timeout");
            table.dereference(&holder);
            return None;
        }

        let entry_locked = match kind {
            LockKind::ReadEntry => holder.entry_lock.try_lock_shared_for(timeout),
            LockKind::WriteEntry => holder.entry_lock.try_lock_exclusive_for(timeout),
            LockKind::WriteSubtree => true,
        };
        if !entry_locked {
            holder.subtree_lock.unlock_shared();
            holder.unlock_ancestors();
            trace!(kind = ?kind, path = ?holder.path, phase = "entry", "lock_timeout");
            table.dereference(&holder);
            return None;
        }

        Some(LockHandle {
            holder,
            kind,
            table,
            _thread_bound: PhantomData,
        })
    }

    /// Releases the lock. Dropping the handle is equivalent.
    pub fn unlock(self) {}

    pub fn kind(&self) -> LockKind {
        self.kind
    }

    pub fn path(&self) -> &K {
        &self.holder.path
    }
}

impl<K: PathKey> Drop for LockHandle<K> {
    fn drop(&mut self) {
        // target primitives first, then the ancestor chain, then the
        // reference obtained at acquisition
        match self.kind {
            LockKind::ReadEntry => {
                self.holder.entry_lock.unlock_shared();
                self.holder.subtree_lock.unlock_shared();
            }
            LockKind::WriteEntry => {
                self.holder.entry_lock.unlock_exclusive();
                self.holder.subtree_lock.unlock_shared();
            }
            LockKind::WriteSubtree => {
                self.holder.subtree_lock.unlock_exclusive();
            }
        }
        self.holder.unlock_ancestors();
        self.table.dereference(&self.holder);
    }
}

impl<K: PathKey> fmt::Debug for LockHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("path", &self.holder.path)
            .field("kind", &self.kind)
            .finish()
    }
}
