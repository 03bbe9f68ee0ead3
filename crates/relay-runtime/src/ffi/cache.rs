//! Callable cache - one trampoline per (callable, signature)
//!
//! Binding the same callable against the same signature always yields the
//! same trampoline, so native code sees a stable address and two bindings
//! compare equal. Entries hold the callable weakly; entries whose callable
//! is gone are dropped by [`CallableCache::sweep`], which also runs
//! automatically every `sweep_interval` insertions.

use crate::ffi::signature::SignatureKey;
use crate::ffi::trampoline::Trampoline;
use crate::value::{Callable, CallableId, WeakCallable};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Trampolines generated for one callable
pub struct CallableBinding {
    callable: WeakCallable,
    /// Strong handle for callables native code obtained outside any foreign call
    pinned: Option<Callable>,
    trampolines: HashMap<SignatureKey, Arc<Trampoline>>,
}

impl CallableBinding {
    fn new(callable: &Callable) -> Self {
        Self {
            callable: callable.downgrade(),
            pinned: None,
            trampolines: HashMap::new(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.callable.is_alive()
    }

    pub fn len(&self) -> usize {
        self.trampolines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trampolines.is_empty()
    }
}

pub struct CallableCache {
    entries: RwLock<HashMap<CallableId, CallableBinding>>,
    insertions: AtomicUsize,
    sweep_interval: usize,
}

impl CallableCache {
    pub fn new(sweep_interval: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            insertions: AtomicUsize::new(0),
            sweep_interval: sweep_interval.max(1),
        }
    }

    /// Existing trampoline for the pair, or the one built by `factory`.
    ///
    /// At most one trampoline is ever created per pair, even when several
    /// threads race on the same lookup.
    pub fn lookup_or_insert<F>(&self, callable: &Callable, key: &SignatureKey, factory: F) -> Arc<Trampoline>
    where
        F: FnOnce() -> Trampoline,
    {
        let id = callable.id();

        if let Some(existing) = self
            .entries
            .read()
            .get(&id)
            .and_then(|binding| binding.trampolines.get(key))
        {
            tracing::trace!(signature = %key, "trampoline cache hit");
            return existing.clone();
        }

        let mut entries = self.entries.write();
        let binding = entries
            .entry(id)
            .or_insert_with(|| CallableBinding::new(callable));
        if let Some(existing) = binding.trampolines.get(key) {
            return existing.clone();
        }

        let trampoline = Arc::new(factory());
        binding.trampolines.insert(key.clone(), trampoline.clone());

        let inserted = self.insertions.fetch_add(1, Ordering::Relaxed) + 1;
        if inserted % self.sweep_interval == 0 {
            Self::sweep_locked(&mut entries);
        }

        trampoline
    }

    /// Number of signatures cached for `callable`
    pub fn bindings_for(&self, callable: &Callable) -> usize {
        self.entries
            .read()
            .get(&callable.id())
            .map_or(0, CallableBinding::len)
    }

    /// Keep a bound callable alive until [`unpin_all`](Self::unpin_all)
    ///
    /// Returns `false` if `callable` has no entry.
    pub fn pin(&self, callable: &Callable) -> bool {
        match self.entries.write().get_mut(&callable.id()) {
            Some(binding) => {
                binding.pinned = Some(callable.clone());
                true
            }
            None => false,
        }
    }

    /// Drop every pin; returns how many callables were pinned
    pub fn unpin_all(&self) -> usize {
        let released: Vec<Callable> = self
            .entries
            .write()
            .values_mut()
            .filter_map(|binding| binding.pinned.take())
            .collect();
        released.len()
    }

    /// Drop entries whose callable is gone; returns how many were removed
    pub fn sweep(&self) -> usize {
        Self::sweep_locked(&mut self.entries.write())
    }

    fn sweep_locked(entries: &mut HashMap<CallableId, CallableBinding>) -> usize {
        let before = entries.len();
        entries.retain(|_, binding| binding.is_alive());
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = entries.len(), "swept callable cache");
        }
        removed
    }

    /// Number of callables with cached trampolines
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Total trampolines across all callables
    pub fn trampoline_count(&self) -> usize {
        self.entries.read().values().map(CallableBinding::len).sum()
    }
}
