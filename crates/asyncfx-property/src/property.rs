#![forbid(unsafe_code)]

//! The observable property core.
//!
//! A [`Property<T>`] is a shared handle to a value plus its listeners. The
//! same type covers free-threaded and context-affine properties: affinity is
//! a [`Dispatcher`] chosen through [`PropertyMetadata`], not a subtype.
//!
//! # Notification
//!
//! After a value is committed, listeners run in this order:
//!
//! 1. internal hooks (bindings, paths, subtree tracking), synchronously;
//! 2. invalidation listeners, if the property was valid;
//! 3. change listeners, receiving `(old, new)`;
//! 4. the objects containing the property, unless it is a root property.
//!
//! Listeners without a dispatcher of their own are delivered on the
//! property's dispatcher, or inline when the property has none.
//!
//! # Invariants
//!
//! 1. A property is valid after `get()` and after a listener is registered.
//!    Invalidation listeners fire only on the valid-to-invalid transition.
//! 2. Writing a value equal to the committed one is a no-op.
//! 3. All invalidation listeners run before any change listener, and each
//!    list runs in registration order.
//! 4. Values change only while the thread holds the property's consistency
//!    group, either through an enclosing [`CriticalSection`] or for the
//!    duration of a single write.
//!
//! # Failure Modes
//!
//! - Write to a bound property: [`PropertyError::Bound`].
//! - Access from outside the dispatcher: [`PropertyError::ThreadAffinity`].
//! - Grouped property accessed outside a section:
//!   [`PropertyError::OutsideCriticalSection`].
//!
//! [`CriticalSection`]: crate::CriticalSection

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use asyncfx_dispatch::Dispatcher;
use parking_lot::Mutex;

use crate::binding::{BidiLink, BindingRecord};
use crate::critical::{self, Access, Commit, ConsistencyGroup, Lockable, Notification};
use crate::error::{PropertyError, Result};
use crate::listener::{ChangeFn, ChangeHook, InvalidationFn, Registry, Subscription, deliver};
use crate::metadata::PropertyMetadata;
use crate::object::{TreeEvent, TreeFn};

/// Values a property can hold.
pub trait PropertyValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> PropertyValue for T {}

static NEXT_PROPERTY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique property identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(u64);

impl PropertyId {
    fn next() -> Self {
        Self(NEXT_PROPERTY_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cleanup attached to the committed value; runs once that value is replaced
/// or the property is dropped.
pub(crate) type RetireFn = Box<dyn FnOnce() + Send>;

struct Staged<T> {
    value: T,
    force: bool,
    retire: Option<RetireFn>,
}

struct ValueState<T> {
    value: T,
    staged: Option<Staged<T>>,
    retire: Option<RetireFn>,
}

pub(crate) struct PropertyInner<T> {
    id: PropertyId,
    metadata: ArcSwap<PropertyMetadata<T>>,
    group: ConsistencyGroup,
    grouped: bool,
    read_only: bool,
    eq: fn(&T, &T) -> bool,
    state: Mutex<ValueState<T>>,
    valid: AtomicBool,
    invalidation: Registry<InvalidationFn>,
    change: Registry<ChangeFn<T>>,
    hooks: Registry<ChangeFn<T>>,
    tree: Registry<TreeFn>,
    pub(crate) binding: Mutex<Option<BindingRecord>>,
    pub(crate) bidi: Mutex<Vec<Arc<BidiLink>>>,
}

impl<T: PropertyValue> PropertyInner<T> {
    fn display_name(&self) -> String {
        match self.metadata.load().name() {
            Some(name) => name.to_owned(),
            None => format!("property{}", self.id),
        }
    }

    fn committed(&self) -> T {
        self.state.lock().value.clone()
    }

    fn staged_or_committed(&self) -> T {
        let state = self.state.lock();
        match &state.staged {
            Some(staged) => staged.value.clone(),
            None => state.value.clone(),
        }
    }

    fn outside_section(&self) -> PropertyError {
        PropertyError::OutsideCriticalSection {
            property: self.display_name(),
            group: self.group.name().to_owned(),
        }
    }

    fn stage(&self, value: T, force: bool, retire: Option<RetireFn>) {
        let discarded = {
            let mut state = self.state.lock();
            let previous = state.staged.take();
            let force = force || previous.as_ref().is_some_and(|p| p.force);
            state.staged = Some(Staged { value, force, retire });
            previous.and_then(|p| p.retire)
        };
        if let Some(retire) = discarded {
            retire();
        }
    }

    fn write(self: &Arc<Self>, value: T, force: bool, retire: Option<RetireFn>) -> Result<()> {
        match critical::access(&self.group) {
            Access::Held => {
                self.stage(value, force, retire);
                critical::touch(self.id.0, Arc::clone(self) as Arc<dyn Commit>);
                Ok(())
            }
            Access::Free if self.grouped => Err(self.outside_section()),
            Access::Free => {
                let notification = {
                    let _guard = self.group.acquire_guard();
                    self.stage(value, force, retire);
                    Arc::clone(self).commit()
                };
                if let Some(notify) = notification {
                    critical::tick(notify);
                }
                Ok(())
            }
        }
    }

    fn notify(&self, old: &T, new: &T) {
        for (hook, _) in self.hooks.snapshot() {
            hook(old, new);
        }

        let metadata = self.metadata.load_full();
        let home = metadata.dispatcher();
        if self.valid.swap(false, Ordering::AcqRel) {
            for (listener, dispatcher) in self.invalidation.snapshot() {
                deliver(dispatcher.as_ref().or(home), move || listener());
            }
        }

        let change = self.change.snapshot();
        if !change.is_empty() {
            self.valid.store(true, Ordering::Release);
            for (listener, dispatcher) in change {
                let (old, new) = (old.clone(), new.clone());
                deliver(dispatcher.as_ref().or(home), move || listener(&old, &new));
            }
        }

        if !metadata.is_root() {
            self.emit_tree(TreeEvent::Invalidated);
            self.emit_tree(TreeEvent::Changed);
        }
    }

    pub(crate) fn emit_tree(&self, event: TreeEvent) {
        for (parent, _) in self.tree.snapshot() {
            parent(event);
        }
    }
}

impl<T: PropertyValue> Commit for PropertyInner<T> {
    fn commit(self: Arc<Self>) -> Option<Notification> {
        let mut state = self.state.lock();
        let staged = state.staged.take()?;
        if !staged.force && (self.eq)(&state.value, &staged.value) {
            drop(state);
            if let Some(retire) = staged.retire {
                retire();
            }
            return None;
        }
        let old = std::mem::replace(&mut state.value, staged.value);
        let new = state.value.clone();
        let retired = std::mem::replace(&mut state.retire, staged.retire);
        drop(state);

        Some(Box::new(move || {
            self.notify(&old, &new);
            if let Some(retire) = retired {
                retire();
            }
        }))
    }
}

impl<T> Drop for PropertyInner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(retire) = state.staged.take().and_then(|s| s.retire) {
            retire();
        }
        if let Some(retire) = state.retire.take() {
            retire();
        }
    }
}

// ---------------------------------------------------------------------------
// Property<T>
// ---------------------------------------------------------------------------

/// An observable, optionally thread-affine value.
///
/// Cloning yields another handle to the same property.
pub struct Property<T: PropertyValue> {
    pub(crate) inner: Arc<PropertyInner<T>>,
}

impl<T: PropertyValue> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: PropertyValue + Default + PartialEq> Property<T> {
    /// Create a property configured by `metadata`.
    #[must_use]
    pub fn new(metadata: PropertyMetadata<T>) -> Self {
        Self::with_equality(metadata, <T as PartialEq>::eq)
    }

    /// Create an unconfigured property holding `value`.
    #[must_use]
    pub fn with_value(value: T) -> Self {
        Self::new(PropertyMetadata::builder().initial_value(value).build())
    }
}

impl<T: PropertyValue + Default + PartialEq> Default for Property<T> {
    fn default() -> Self {
        Self::new(PropertyMetadata::default())
    }
}

impl<T: PropertyValue + Default> Property<T> {
    /// Create a property that decides "unchanged" with `eq` instead of
    /// `PartialEq` (identity comparison for shared objects, for example).
    #[must_use]
    pub fn with_equality(metadata: PropertyMetadata<T>, eq: fn(&T, &T) -> bool) -> Self {
        Self::build(metadata, eq, false)
    }

    /// A property only this crate can write (derived size/empty properties).
    pub(crate) fn derived(metadata: PropertyMetadata<T>, eq: fn(&T, &T) -> bool) -> Self {
        Self::build(metadata, eq, true)
    }

    fn build(metadata: PropertyMetadata<T>, eq: fn(&T, &T) -> bool, read_only: bool) -> Self {
        let id = PropertyId::next();
        let (group, grouped) = match metadata.consistency_group() {
            Some(group) => (group.clone(), true),
            None => (
                ConsistencyGroup::new(metadata.name().unwrap_or("property").to_owned()),
                false,
            ),
        };
        let value = metadata.initial_value().cloned().unwrap_or_default();
        Self {
            inner: Arc::new(PropertyInner {
                id,
                metadata: ArcSwap::from_pointee(metadata),
                group,
                grouped,
                read_only,
                eq,
                state: Mutex::new(ValueState {
                    value,
                    staged: None,
                    retire: None,
                }),
                valid: AtomicBool::new(true),
                invalidation: Registry::new(),
                change: Registry::new(),
                hooks: Registry::new(),
                tree: Registry::new(),
                binding: Mutex::new(None),
                bidi: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl<T: PropertyValue> Property<T> {
    #[must_use]
    pub fn id(&self) -> PropertyId {
        self.inner.id
    }

    /// Display name from metadata, or a synthetic one based on the id.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.display_name()
    }

    #[must_use]
    pub fn metadata(&self) -> Arc<PropertyMetadata<T>> {
        self.inner.metadata.load_full()
    }

    /// Merge `overrides` into the current metadata.
    pub fn override_metadata(&self, overrides: &PropertyMetadata<T>) {
        let merged = self.inner.metadata.load().merge(overrides);
        self.inner.metadata.store(Arc::new(merged));
    }

    /// The dispatcher this property is pinned to, if any.
    #[must_use]
    pub fn dispatcher(&self) -> Option<Dispatcher> {
        self.inner.metadata.load().dispatcher().cloned()
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Whether the property belongs to an explicit consistency group.
    #[must_use]
    pub fn is_grouped(&self) -> bool {
        self.inner.grouped
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read the value.
    ///
    /// # Panics
    ///
    /// Panics on misuse; see [`Property::try_get`].
    #[must_use]
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Read the value, reporting thread-affinity and critical-section misuse.
    ///
    /// Inside a section holding the property's group, this sees the value
    /// staged by that section.
    pub fn try_get(&self) -> Result<T> {
        self.check_affinity()?;
        let value = match critical::access(&self.inner.group) {
            Access::Held => self.inner.staged_or_committed(),
            Access::Free if self.inner.grouped => return Err(self.inner.outside_section()),
            Access::Free => self.inner.committed(),
        };
        self.inner.valid.store(true, Ordering::Release);
        Ok(value)
    }

    /// Read without thread-affinity or consistency checks.
    ///
    /// Never fails, but a reader may observe a group half-way through an
    /// update by another thread.
    #[must_use]
    pub fn get_uncritical(&self) -> T {
        match critical::access(&self.inner.group) {
            Access::Held => self.inner.staged_or_committed(),
            Access::Free => self.inner.committed(),
        }
    }

    /// Replace the value.
    pub fn set(&self, value: T) -> Result<()> {
        if self.inner.read_only {
            return Err(PropertyError::ReadOnly {
                property: self.name(),
            });
        }
        if self.is_bound() {
            return Err(PropertyError::Bound {
                property: self.name(),
            });
        }
        self.check_affinity()?;
        self.inner.write(value, false, None)
    }

    /// Write bypassing the bound and read-only checks.
    pub(crate) fn write_internal(&self, value: T, force: bool, retire: Option<RetireFn>) -> Result<()> {
        self.check_affinity()?;
        self.inner.write(value, force, retire)
    }

    pub(crate) fn check_affinity(&self) -> Result<()> {
        let metadata = self.inner.metadata.load();
        match metadata.dispatcher() {
            Some(dispatcher) if !dispatcher.is_current() => Err(PropertyError::ThreadAffinity {
                property: self.name(),
                dispatcher: dispatcher.name().to_owned(),
            }),
            _ => Ok(()),
        }
    }

    pub fn add_invalidation_listener(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.register_invalidation(Arc::new(listener), None)
    }

    /// Like [`Property::add_invalidation_listener`], delivered on `dispatcher`.
    pub fn add_invalidation_listener_on(
        &self,
        dispatcher: Dispatcher,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.register_invalidation(Arc::new(listener), Some(dispatcher))
    }

    pub fn add_change_listener(&self, listener: impl Fn(&T, &T) + Send + Sync + 'static) -> Subscription {
        self.register_change(Arc::new(listener), None)
    }

    /// Like [`Property::add_change_listener`], delivered on `dispatcher`.
    pub fn add_change_listener_on(
        &self,
        dispatcher: Dispatcher,
        listener: impl Fn(&T, &T) + Send + Sync + 'static,
    ) -> Subscription {
        self.register_change(Arc::new(listener), Some(dispatcher))
    }

    fn register_invalidation(&self, listener: Arc<InvalidationFn>, dispatcher: Option<Dispatcher>) -> Subscription {
        let sub = self.inner.invalidation.register(listener, dispatcher);
        self.inner.valid.store(true, Ordering::Release);
        sub
    }

    fn register_change(&self, listener: Arc<ChangeFn<T>>, dispatcher: Option<Dispatcher>) -> Subscription {
        let sub = self.inner.change.register(listener, dispatcher);
        self.inner.valid.store(true, Ordering::Release);
        sub
    }

    /// Synchronous hook run on the committing thread before any listener.
    pub(crate) fn add_hook(&self, hook: ChangeHook<T>) -> Subscription {
        self.inner.hooks.register(hook, None)
    }

    pub(crate) fn add_tree_parent(&self, parent: Arc<TreeFn>) -> Subscription {
        self.inner.tree.register(parent, None)
    }

    pub(crate) fn downgrade(&self) -> WeakProperty<T> {
        WeakProperty {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<T: PropertyValue> Lockable for Property<T> {
    fn consistency_group(&self) -> &ConsistencyGroup {
        &self.inner.group
    }
}

impl<T: PropertyValue + fmt::Debug> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.inner.id)
            .field("name", &self.name())
            .field("value", &self.inner.committed())
            .finish()
    }
}

/// Non-owning handle used by bindings and listeners to avoid cycles.
pub(crate) struct WeakProperty<T> {
    inner: Weak<PropertyInner<T>>,
}

impl<T> Clone for WeakProperty<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T: PropertyValue> WeakProperty<T> {
    pub(crate) fn upgrade(&self) -> Option<Property<T>> {
        self.inner.upgrade().map(|inner| Property { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_change(p: &Property<i32>) -> (Arc<Mutex<Vec<(i32, i32)>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let sub = p.add_change_listener(move |old, new| log.lock().push((*old, *new)));
        (seen, sub)
    }

    #[test]
    fn initial_value_comes_from_metadata() {
        let p = Property::new(PropertyMetadata::builder().initial_value(5).build());
        assert_eq!(p.get(), 5);
        assert_eq!(Property::<i32>::default().get(), 0);
    }

    #[test]
    fn change_listener_sees_old_and_new() {
        let p = Property::with_value(1);
        let (seen, _sub) = counting_change(&p);
        p.set(2).unwrap();
        p.set(3).unwrap();
        assert_eq!(*seen.lock(), vec![(1, 2), (2, 3)]);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let p = Property::with_value(4);
        let (seen, _sub) = counting_change(&p);
        p.set(4).unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn invalidation_fires_once_until_revalidated() {
        let p = Property::with_value(0);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let _sub = p.add_invalidation_listener(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        p.set(1).unwrap();
        p.set(2).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let _ = p.get();
        p.set(3).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidation_listeners_run_before_change_listeners() {
        let p = Property::with_value(0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = Arc::clone(&order);
        let _c = p.add_change_listener(move |_, _| o1.lock().push("change"));
        let o2 = Arc::clone(&order);
        let _i = p.add_invalidation_listener(move || o2.lock().push("invalidation"));
        p.set(1).unwrap();
        assert_eq!(*order.lock(), vec!["invalidation", "change"]);
    }

    #[test]
    fn dropped_subscription_stops_notifications() {
        let p = Property::with_value(0);
        let (seen, sub) = counting_change(&p);
        p.set(1).unwrap();
        drop(sub);
        p.set(2).unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn override_metadata_keeps_unset_fields() {
        let p: Property<i32> = Property::new(PropertyMetadata::builder().name("alt").build());
        p.override_metadata(&PropertyMetadata::builder().initial_value(9).build());
        assert_eq!(p.name(), "alt");
        assert_eq!(p.metadata().initial_value(), Some(&9));
    }

    #[test]
    fn unnamed_property_gets_synthetic_name() {
        let p = Property::with_value(0_u8);
        assert!(p.name().starts_with("property#"));
    }

    #[test]
    fn retire_runs_when_value_is_replaced() {
        let p = Property::with_value(1);
        let retired = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&retired);
        p.write_internal(2, true, Some(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })))
        .unwrap();
        assert_eq!(retired.load(Ordering::SeqCst), 0);
        p.set(3).unwrap();
        assert_eq!(retired.load(Ordering::SeqCst), 1);
        p.set(4).unwrap();
        assert_eq!(retired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn derived_property_rejects_set() {
        let p = Property::derived(PropertyMetadata::builder().name("size").build(), <usize as PartialEq>::eq);
        assert_eq!(
            p.set(3),
            Err(PropertyError::ReadOnly {
                property: "size".into()
            })
        );
        p.write_internal(3, false, None).unwrap();
        assert_eq!(p.get(), 3);
    }
}
