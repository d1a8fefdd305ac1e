use std::{fmt::Debug, hash::Hash};

pub mod manager;
pub use manager::*;

mod holder;
pub use holder::{LockHandle, LockKind};

mod cache;
mod table;

/// A hierarchical key: the DN of an entry in the tree.
///
/// Keys are opaque to the lock manager. They only need equality, hashing,
/// and a `parent` accessor, and should be cheap to clone and hash since a
/// holder is created per referenced path.
pub trait PathKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// The immediate ancestor, or `None` for a root.
    fn parent(&self) -> Option<Self>;
}
