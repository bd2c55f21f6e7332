#![forbid(unsafe_code)]

//! Unidirectional, converting and bidirectional bindings.
//!
//! A binding keeps the target in step with a source. Propagation is
//! marshaled to the target's dispatcher and re-reads the source there, so
//! the target always ends up with the source's latest value even when
//! intermediate updates are coalesced.
//!
//! # Invariants
//!
//! 1. A bound target rejects `set` until `unbind`.
//! 2. Re-binding replaces the previous binding; a pending update from the old
//!    binding is discarded when it arrives.
//! 3. Bindings never keep their target alive; sources are held strongly.
//! 4. Bidirectional propagation stops at the first hop back to the thread
//!    that started it, so a pair of properties never ping-pongs.
//!
//! # Failure Modes
//!
//! - Propagation into a bidirectional peer that is itself bound: logged at
//!   `warn` and skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{PropertyError, Result};
use crate::listener::{ChangeHook, Subscription};
use crate::property::{Property, PropertyId, PropertyValue, WeakProperty};

/// A readable, watchable value that can drive a binding.
pub trait ObservableValue<T>: Send + Sync + 'static {
    /// The latest committed value.
    fn current(&self) -> T;

    /// Run `hook` synchronously after every committed change.
    fn watch(&self, hook: ChangeHook<T>) -> Subscription;

    /// Identity used to reject self-bindings.
    fn source_id(&self) -> Option<PropertyId> {
        None
    }
}

impl<T: PropertyValue> ObservableValue<T> for Property<T> {
    fn current(&self) -> T {
        self.get_uncritical()
    }

    fn watch(&self, hook: ChangeHook<T>) -> Subscription {
        self.add_hook(hook)
    }

    fn source_id(&self) -> Option<PropertyId> {
        Some(self.id())
    }
}

/// Converts source values into target values that own resources.
///
/// The converted value is created once per binding, refreshed in place while
/// bound, and released only when the target stops holding it.
pub trait LifecycleValueConverter<S, T>: Send + Sync + 'static {
    fn convert(&self, source: &S) -> T;
    fn update(&self, source: &S, target: &T);
    fn remove(&self, target: &T);
}

static NEXT_BINDING_TOKEN: AtomicU64 = AtomicU64::new(1);

/// The active unidirectional binding of a property.
pub(crate) struct BindingRecord {
    token: u64,
    _subscription: Subscription,
}

/// Run `apply` on the target's dispatcher, inline when already there.
pub(crate) fn pump<T: PropertyValue>(target: &WeakProperty<T>, apply: impl FnOnce(&Property<T>) + Send + 'static) {
    let Some(property) = target.upgrade() else {
        return;
    };
    match property.dispatcher() {
        Some(dispatcher) if !dispatcher.is_current() => dispatcher.run_later(move || apply(&property)),
        _ => apply(&property),
    }
}

impl<T: PropertyValue> Property<T> {
    pub(crate) fn check_bind_target(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(PropertyError::ReadOnly { property: self.name() });
        }
        if self.is_grouped() {
            return Err(PropertyError::GroupedBindingTarget { property: self.name() });
        }
        Ok(())
    }

    fn check_unidirectional_target(&self) -> Result<()> {
        self.check_bind_target()?;
        if !self.inner.bidi.lock().is_empty() {
            return Err(PropertyError::BidirectionallyBound { property: self.name() });
        }
        Ok(())
    }

    fn is_binding(&self, token: u64) -> bool {
        self.inner.binding.lock().as_ref().is_some_and(|b| b.token == token)
    }

    fn install_binding(&self, token: u64, subscription: Subscription) {
        let previous = self.inner.binding.lock().replace(BindingRecord {
            token,
            _subscription: subscription,
        });
        drop(previous);
    }

    fn apply_bound(&self, token: u64, value: T) {
        if !self.is_binding(token) {
            return;
        }
        if let Err(err) = self.write_internal(value, false, None) {
            warn!(property = %self.name(), error = %err, "binding update failed");
        }
    }

    /// Make this property follow `source`.
    ///
    /// The current source value is copied immediately (on this property's
    /// dispatcher), then every later change. Fails while the property is
    /// part of a bidirectional binding.
    pub fn bind<S>(&self, source: &S) -> Result<()>
    where
        S: ObservableValue<T> + Clone,
    {
        self.check_unidirectional_target()?;
        if source.source_id() == Some(self.id()) {
            return Err(PropertyError::SelfBinding);
        }
        self.unbind();

        let token = NEXT_BINDING_TOKEN.fetch_add(1, Ordering::Relaxed);
        let source: Arc<dyn ObservableValue<T>> = Arc::new(source.clone());
        let sync: Arc<dyn Fn() + Send + Sync> = {
            let (source, target) = (Arc::clone(&source), self.downgrade());
            Arc::new(move || {
                let source = Arc::clone(&source);
                pump(&target, move |t| t.apply_bound(token, source.current()));
            })
        };

        let hook: ChangeHook<T> = {
            let sync = Arc::clone(&sync);
            Arc::new(move |_: &T, _: &T| sync())
        };
        self.install_binding(token, source.watch(hook));
        sync();
        Ok(())
    }

    /// Bind through a [`LifecycleValueConverter`].
    ///
    /// The converted value is written once; later source changes call
    /// `update` on it in place. After `unbind` the target keeps the value;
    /// `remove` runs when the target replaces it or is dropped.
    pub fn bind_with_converter<S, Src, C>(&self, source: &Src, converter: C) -> Result<()>
    where
        S: PropertyValue,
        Src: ObservableValue<S> + Clone,
        C: LifecycleValueConverter<S, T>,
    {
        self.check_unidirectional_target()?;
        self.unbind();

        let token = NEXT_BINDING_TOKEN.fetch_add(1, Ordering::Relaxed);
        let converter = Arc::new(converter);
        let source: Arc<dyn ObservableValue<S>> = Arc::new(source.clone());
        let target = self.downgrade();

        let hook: ChangeHook<S> = {
            let (converter, source, target) = (Arc::clone(&converter), Arc::clone(&source), target.clone());
            Arc::new(move |_: &S, _: &S| {
                let (converter, source) = (Arc::clone(&converter), Arc::clone(&source));
                pump(&target, move |t| {
                    if t.is_binding(token) {
                        converter.update(&source.current(), &t.get_uncritical());
                    }
                });
            })
        };
        self.install_binding(token, source.watch(hook));

        pump(&target, move |t| {
            if !t.is_binding(token) {
                return;
            }
            let value = converter.convert(&source.current());
            let retire = {
                let (converter, value) = (Arc::clone(&converter), value.clone());
                Box::new(move || converter.remove(&value))
            };
            if let Err(err) = t.write_internal(value, true, Some(retire)) {
                warn!(property = %t.name(), error = %err, "converted binding update failed");
            }
        });
        Ok(())
    }

    /// Remove the unidirectional binding, keeping the current value.
    pub fn unbind(&self) {
        let previous = self.inner.binding.lock().take();
        drop(previous);
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.inner.binding.lock().is_some()
    }

    /// Keep this property and `other` equal in both directions.
    ///
    /// This property adopts `other`'s value first. Both sides stay settable.
    pub fn bind_bidirectional(&self, other: &Property<T>) -> Result<()> {
        if self.ptr_eq(other) {
            return Err(PropertyError::SelfBinding);
        }
        self.check_bind_target()?;
        other.check_bind_target()?;
        self.unbind_bidirectional(other);

        let link = Arc::new(BidiLink {
            ends: (self.id(), other.id()),
            propagating: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        });
        let forward = other.watch(BidiLink::hook(&link, other.downgrade(), self.downgrade()));
        let backward = self.watch(BidiLink::hook(&link, self.downgrade(), other.downgrade()));
        link.subscriptions.lock().extend([forward, backward]);

        self.inner.bidi.lock().push(Arc::clone(&link));
        other.inner.bidi.lock().push(Arc::clone(&link));

        BidiLink::propagate(&link, &other.downgrade(), &self.downgrade());
        Ok(())
    }

    /// Remove a bidirectional binding created with either argument order.
    pub fn unbind_bidirectional(&self, other: &Property<T>) {
        let ends = (self.id(), other.id());
        let removed: Vec<Arc<BidiLink>> = {
            let mut links = self.inner.bidi.lock();
            let (removed, kept) = links.drain(..).partition(|l| l.connects(ends));
            *links = kept;
            removed
        };
        other.inner.bidi.lock().retain(|l| !l.connects(ends));
        drop(removed);
    }

    fn apply_peer(&self, value: T) {
        if self.is_bound() {
            warn!(property = %self.name(), "bidirectional peer is bound; update skipped");
            return;
        }
        if let Err(err) = self.write_internal(value, false, None) {
            warn!(property = %self.name(), error = %err, "bidirectional update failed");
        }
    }
}

/// Shared state of one bidirectional binding.
///
/// Owned by both properties; the hooks only hold weak references.
pub(crate) struct BidiLink {
    ends: (PropertyId, PropertyId),
    propagating: Mutex<Option<ThreadId>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl BidiLink {
    fn connects(&self, (a, b): (PropertyId, PropertyId)) -> bool {
        self.ends == (a, b) || self.ends == (b, a)
    }

    fn hook<T: PropertyValue>(link: &Arc<Self>, from: WeakProperty<T>, to: WeakProperty<T>) -> ChangeHook<T> {
        let link = Arc::downgrade(link);
        Arc::new(move |_: &T, _: &T| {
            if let Some(link) = link.upgrade() {
                Self::propagate(&link, &from, &to);
            }
        })
    }

    fn propagate<T: PropertyValue>(link: &Arc<Self>, from: &WeakProperty<T>, to: &WeakProperty<T>) {
        if *link.propagating.lock() == Some(thread::current().id()) {
            return;
        }
        let (link, from): (Weak<Self>, WeakProperty<T>) = (Arc::downgrade(link), from.clone());
        pump(to, move |target| {
            let (Some(link), Some(from)) = (link.upgrade(), from.upgrade()) else {
                return;
            };
            let previous = link.propagating.lock().replace(thread::current().id());
            target.apply_peer(from.get_uncritical());
            *link.propagating.lock() = previous;
        });
    }
}
