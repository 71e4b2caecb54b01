//! Observation Context
//!
//! The observation context tracks which dependency watcher (a computed
//! observer) is currently evaluating. While a watcher is on the stack, every
//! observer handed out through a tracked read reports itself as a dependency
//! of that watcher.
//!
//! # Implementation
//!
//! The stack lives on the context instance rather than in module state, so
//! independent runtimes in one process never interfere; each observer
//! locator owns one context. Entering returns a guard that pops on drop,
//! which keeps the stack consistent even if an evaluation panics, and
//! supports nested computations (a computed member reading another computed
//! member).

use std::sync::{Arc, RwLock};

use super::observer::Observer;
use super::subscribers::SubscriberId;

/// A party that collects dependencies while it evaluates.
pub trait DependencyWatcher: Send + Sync {
    /// The watcher's subscriber ID.
    fn watcher_id(&self) -> SubscriberId;

    /// Record `observer` as a dependency of the current evaluation pass.
    fn observe_dependency(&self, observer: Arc<dyn Observer>);
}

/// Stack of currently-evaluating dependency watchers.
pub struct ObservationContext {
    stack: RwLock<Vec<Arc<dyn DependencyWatcher>>>,
    self_ref: std::sync::Weak<ObservationContext>,
}

impl ObservationContext {
    /// Create an empty context.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            stack: RwLock::new(Vec::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Push `watcher` for the duration of the returned guard.
    pub fn enter(&self, watcher: Arc<dyn DependencyWatcher>) -> WatchGuard {
        let id = watcher.watcher_id();
        self.stack
            .write()
            .expect("context stack lock poisoned")
            .push(watcher);
        WatchGuard {
            context: self.self_ref.upgrade().expect("context dropped"),
            watcher_id: id,
        }
    }

    /// True while any watcher is evaluating.
    pub fn is_active(&self) -> bool {
        !self
            .stack
            .read()
            .expect("context stack lock poisoned")
            .is_empty()
    }

    /// The innermost evaluating watcher, if any.
    pub fn current(&self) -> Option<Arc<dyn DependencyWatcher>> {
        self.stack
            .read()
            .expect("context stack lock poisoned")
            .last()
            .cloned()
    }

    /// Report a tracked read to the innermost watcher.
    pub fn report(&self, observer: Arc<dyn Observer>) {
        if let Some(watcher) = self.current() {
            watcher.observe_dependency(observer);
        }
    }
}

/// Guard that pops the watcher stack when dropped.
pub struct WatchGuard {
    context: Arc<ObservationContext>,
    watcher_id: SubscriberId,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        let popped = self
            .context
            .stack
            .write()
            .expect("context stack lock poisoned")
            .pop();

        // Catch mismatched enter/drop pairs early in debug builds.
        if let Some(watcher) = popped {
            debug_assert_eq!(
                watcher.watcher_id(),
                self.watcher_id,
                "observation context mismatch"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::batch::BatchQueue;
    use crate::observation::property::PropertyObserver;
    use crate::observation::value::ObjectData;
    use std::sync::atomic::{AtomicI32, Ordering};

    struct MockWatcher {
        id: SubscriberId,
        reports: AtomicI32,
    }

    impl MockWatcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: SubscriberId::new(),
                reports: AtomicI32::new(0),
            })
        }
    }

    impl DependencyWatcher for MockWatcher {
        fn watcher_id(&self) -> SubscriberId {
            self.id
        }

        fn observe_dependency(&self, _observer: Arc<dyn Observer>) {
            self.reports.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn context_tracks_current_watcher() {
        let context = ObservationContext::new();
        let watcher = MockWatcher::new();

        assert!(!context.is_active());
        {
            let _guard = context.enter(watcher.clone());
            assert!(context.is_active());
            assert_eq!(
                context.current().map(|w| w.watcher_id()),
                Some(watcher.watcher_id())
            );
        }
        assert!(!context.is_active());
        assert!(context.current().is_none());
    }

    #[test]
    fn nested_watchers_unwind_in_order() {
        let context = ObservationContext::new();
        let outer = MockWatcher::new();
        let inner = MockWatcher::new();

        let _outer_guard = context.enter(outer.clone());
        {
            let _inner_guard = context.enter(inner.clone());
            assert_eq!(
                context.current().map(|w| w.watcher_id()),
                Some(inner.watcher_id())
            );
        }
        assert_eq!(
            context.current().map(|w| w.watcher_id()),
            Some(outer.watcher_id())
        );
    }

    #[test]
    fn report_reaches_only_the_innermost_watcher() {
        let context = ObservationContext::new();
        let outer = MockWatcher::new();
        let inner = MockWatcher::new();

        let observer = PropertyObserver::new(ObjectData::new(), "x", Arc::new(BatchQueue::new()));

        let _outer_guard = context.enter(outer.clone());
        let _inner_guard = context.enter(inner.clone());
        context.report(observer);

        assert_eq!(outer.reports.load(Ordering::SeqCst), 0);
        assert_eq!(inner.reports.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn report_without_watcher_is_a_no_op() {
        let context = ObservationContext::new();
        let observer = PropertyObserver::new(ObjectData::new(), "x", Arc::new(BatchQueue::new()));
        context.report(observer);
    }
}
