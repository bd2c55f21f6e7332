#![forbid(unsafe_code)]

//! Listener registries and subscription guards.
//!
//! A registry never owns its callbacks. It stores [`Weak`] references and
//! hands the strong reference back to the caller inside a [`Subscription`].
//! Dropping the subscription is how a listener is removed; dead entries are
//! pruned lazily the next time the registry is walked.
//!
//! # Invariants
//!
//! 1. Callbacks are returned in registration order.
//! 2. A callback whose subscription was dropped is never returned by a
//!    snapshot taken afterwards.
//! 3. Walking a registry never holds its lock while a callback runs.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use asyncfx_dispatch::Dispatcher;
use parking_lot::Mutex;

/// Invalidation callback.
pub type InvalidationFn = dyn Fn() + Send + Sync;

/// Change callback receiving `(old, new)`.
pub type ChangeFn<T> = dyn Fn(&T, &T) + Send + Sync;

/// Internal change hook used by bindings and path resolution. Always runs
/// synchronously on the thread that committed the change.
pub type ChangeHook<T> = Arc<ChangeFn<T>>;

struct Entry<F: ?Sized> {
    callback: Weak<F>,
    dispatcher: Option<Dispatcher>,
}

pub(crate) struct Registry<F: ?Sized> {
    entries: Mutex<Vec<Entry<F>>>,
}

impl<F: ?Sized + Send + Sync + 'static> Registry<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, callback: Arc<F>, dispatcher: Option<Dispatcher>) -> Subscription {
        self.entries.lock().push(Entry {
            callback: Arc::downgrade(&callback),
            dispatcher,
        });
        Subscription::new(callback)
    }

    /// Live callbacks with their dispatcher overrides, pruning dead entries.
    pub(crate) fn snapshot(&self) -> Vec<(Arc<F>, Option<Dispatcher>)> {
        let mut entries = self.entries.lock();
        let mut live = Vec::with_capacity(entries.len());
        entries.retain(|entry| match entry.callback.upgrade() {
            Some(callback) => {
                live.push((callback, entry.dispatcher.clone()));
                true
            }
            None => false,
        });
        live
    }

    pub(crate) fn has_live(&self) -> bool {
        let mut entries = self.entries.lock();
        entries.retain(|entry| entry.callback.strong_count() > 0);
        !entries.is_empty()
    }
}

/// Run `call` on `dispatcher`, inline when there is none or when the caller is
/// already inside it.
pub(crate) fn deliver(dispatcher: Option<&Dispatcher>, call: impl FnOnce() + Send + 'static) {
    match dispatcher {
        Some(d) if !d.is_current() => d.run_later(call),
        _ => call(),
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// RAII guard keeping a listener registered.
///
/// Dropping the guard removes the listener before the next notification.
#[must_use = "dropping a Subscription removes the listener immediately"]
pub struct Subscription {
    keepalive: Vec<Box<dyn Any + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new<T: Any + Send + Sync>(keepalive: T) -> Self {
        Self {
            keepalive: vec![Box::new(keepalive)],
        }
    }

    /// A subscription that keeps nothing alive.
    pub fn empty() -> Self {
        Self {
            keepalive: Vec::new(),
        }
    }

    /// Merge several subscriptions into one guard.
    pub fn combine(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        Self {
            keepalive: subscriptions
                .into_iter()
                .flat_map(|s| s.into_parts())
                .collect(),
        }
    }

    /// Remove the listener now. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {}

    fn into_parts(mut self) -> Vec<Box<dyn Any + Send + Sync>> {
        std::mem::take(&mut self.keepalive)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("parts", &self.keepalive.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ListenerScope
// ---------------------------------------------------------------------------

/// Collects subscriptions for a logical owner (a view model, a window).
///
/// # Invariants
///
/// 1. Subscriptions are released in reverse registration order on drop.
/// 2. After `clear()` or drop, no listener held by the scope fires again.
#[derive(Default)]
pub struct ListenerScope {
    subscriptions: Vec<Subscription>,
}

impl ListenerScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `subscription` alive until the scope is cleared or dropped.
    pub fn hold(&mut self, subscription: Subscription) -> &mut Self {
        self.subscriptions.push(subscription);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Release every held subscription; the scope stays usable.
    pub fn clear(&mut self) {
        while let Some(sub) = self.subscriptions.pop() {
            drop(sub);
        }
    }
}

impl Drop for ListenerScope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for ListenerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerScope")
            .field("len", &self.subscriptions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_fn(counter: &Arc<AtomicUsize>) -> Arc<InvalidationFn> {
        let counter = Arc::clone(counter);
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn fire(registry: &Registry<InvalidationFn>) {
        for (callback, _) in registry.snapshot() {
            callback();
        }
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let registry: Registry<InvalidationFn> = Registry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sub = registry.register(counter_fn(&count), None);
        fire(&registry);
        drop(sub);
        fire(&registry);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!registry.has_live());
    }

    #[test]
    fn snapshot_keeps_registration_order() {
        let registry: Registry<dyn Fn() -> u8 + Send + Sync> = Registry::new();
        let _a = registry.register(Arc::new(|| 1), None);
        let _b = registry.register(Arc::new(|| 2), None);
        let _c = registry.register(Arc::new(|| 3), None);
        let order: Vec<u8> = registry.snapshot().iter().map(|(f, _)| f()).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn combined_subscription_releases_all_parts() {
        let registry: Registry<InvalidationFn> = Registry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let combined = Subscription::combine([
            registry.register(counter_fn(&count), None),
            registry.register(counter_fn(&count), None),
        ]);
        fire(&registry);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        combined.unsubscribe();
        fire(&registry);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn scope_clear_releases_everything() {
        let registry: Registry<InvalidationFn> = Registry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let mut scope = ListenerScope::new();
        scope
            .hold(registry.register(counter_fn(&count), None))
            .hold(registry.register(counter_fn(&count), None));
        assert_eq!(scope.len(), 2);
        scope.clear();
        assert!(scope.is_empty());
        fire(&registry);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn deliver_without_dispatcher_runs_inline() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        deliver(None, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
