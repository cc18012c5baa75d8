//! Watch registry
//!
//! Pure in-memory bookkeeping of the native watches currently of
//! interest. Keyed by handle identity so structural mutation from inside
//! a dispatch handler can never corrupt an in-progress traversal: callers
//! snapshot the registry, then re-validate membership per entry.

use std::collections::BTreeMap;
use std::rc::Rc;

use super::session::WatchHandle;

/// Identity of a native watch handle (its allocation address). A snapshot
/// keeps the `Rc` alive, so a key cannot be reused while it is still
/// being traversed.
pub type WatchKey = usize;

pub fn watch_key(watch: &Rc<dyn WatchHandle>) -> WatchKey {
    Rc::as_ptr(watch) as *const () as WatchKey
}

#[derive(Default)]
pub struct WatchRegistry {
    watches: BTreeMap<WatchKey, Rc<dyn WatchHandle>>,
}

impl WatchRegistry {
    /// Idempotent add: a handle already present is left untouched.
    /// Always succeeds; the boolean mirrors the library's registration
    /// contract, where `false` means allocation failure.
    pub fn add(&mut self, watch: Rc<dyn WatchHandle>) -> bool {
        self.watches.entry(watch_key(&watch)).or_insert(watch);
        true
    }

    /// Unlink a handle exactly once; removing an absent handle is a no-op.
    pub fn remove(&mut self, watch: &Rc<dyn WatchHandle>) {
        self.watches.remove(&watch_key(watch));
    }

    pub fn contains(&self, key: WatchKey) -> bool {
        self.watches.contains_key(&key)
    }

    pub fn watches(&self) -> impl Iterator<Item = &Rc<dyn WatchHandle>> {
        self.watches.values()
    }

    /// Stable copy of the current membership for reentrant-safe traversal.
    pub fn snapshot(&self) -> Vec<(WatchKey, Rc<dyn WatchHandle>)> {
        self.watches
            .iter()
            .map(|(k, w)| (*k, Rc::clone(w)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }
}
