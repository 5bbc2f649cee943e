use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Weak,
    },
};

use parking_lot::{const_mutex, Mutex};
use tracing::debug;

/// Something that must be stopped before the process exits.
pub(crate) trait ExitHook: Send + Sync {
    fn on_exit(&self);
}

/// Weak handles to everything that should be stopped at exit, keyed by a unique ID.
pub(crate) struct ExitRegistry {
    next_id: AtomicU64,
    hooks: Mutex<Option<HashMap<u64, Weak<dyn ExitHook>>>>,
}

static EXIT_HOOKS: ExitRegistry = ExitRegistry::new();

impl ExitRegistry {
    const fn new() -> Self {
        Self { next_id: AtomicU64::new(1), hooks: const_mutex(None) }
    }

    /// Returns the process-wide registry.
    pub fn global() -> &'static ExitRegistry {
        &EXIT_HOOKS
    }

    /// Allocates a new, unique hook ID.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a hook under `id`, replacing any hook already registered under it.
    pub fn register(&self, id: u64, hook: Weak<dyn ExitHook>) {
        self.hooks.lock().get_or_insert_with(HashMap::new).insert(id, hook);
    }

    /// Deregisters the hook under `id`, if any.
    pub fn deregister(&self, id: u64) {
        if let Some(hooks) = self.hooks.lock().as_mut() {
            hooks.remove(&id);
        }
    }

    /// Runs every hook whose owner is still alive, and clears the registry.
    pub fn run_all(&self) {
        // Take the hooks out before running them, since a hook may deregister itself.
        let hooks = self.hooks.lock().take().unwrap_or_default();
        debug!(hooks = hooks.len(), "Stopping live clients before exit.");

        for hook in hooks.into_values().filter_map(|hook| hook.upgrade()) {
            hook.on_exit();
        }
    }
}

/// Stops every client that is still running, flushing whatever metrics they have queued.
///
/// Rust doesn't run destructors for values that are still alive when `main` returns or `std::process::exit` is called,
/// so clients that are never dropped or explicitly stopped would lose their last batch of metrics. Calling this at the
/// end of `main` covers those clients.
///
/// This is a best-effort fallback: scoping clients with [`StatsdClient::scope`][crate::StatsdClient::scope], or
/// calling [`StatsdClient::stop`][crate::StatsdClient::stop], is the primary way to flush. Nothing can flush metrics if
/// the process is killed or aborts.
pub fn shutdown() {
    ExitRegistry::global().run_all();
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    };

    use super::{ExitHook, ExitRegistry};

    struct CountingHook(AtomicUsize);

    impl ExitHook for CountingHook {
        fn on_exit(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn runs_live_hooks_once() {
        let registry = ExitRegistry::new();
        let live = Arc::new(CountingHook(AtomicUsize::new(0)));
        let removed = Arc::new(CountingHook(AtomicUsize::new(0)));
        let dropped = Arc::new(CountingHook(AtomicUsize::new(0)));

        let live_id = registry.next_id();
        let removed_id = registry.next_id();
        let dropped_id = registry.next_id();
        assert_ne!(live_id, removed_id);

        registry.register(live_id, Arc::downgrade(&live) as Weak<dyn ExitHook>);
        registry.register(removed_id, Arc::downgrade(&removed) as Weak<dyn ExitHook>);
        registry.register(dropped_id, Arc::downgrade(&dropped) as Weak<dyn ExitHook>);
        registry.deregister(removed_id);
        drop(dropped);

        registry.run_all();
        registry.run_all();

        assert_eq!(live.0.load(Ordering::SeqCst), 1);
        assert_eq!(removed.0.load(Ordering::SeqCst), 0);
    }
}
