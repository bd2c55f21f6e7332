#![forbid(unsafe_code)]

//! Object-valued properties that observe the properties of their value.
//!
//! An [`ObjectProperty<B>`] holds an `Arc<B>` whose type exposes its own
//! properties through [`PropertyObject`]. Changes anywhere below the value
//! bubble up as *sub-invalidation* and *sub-change* events.
//!
//! # Invariants
//!
//! 1. A sub-invalidation event fires at most once per tick (see
//!    [`critical`](crate::critical)), however many properties below the
//!    value change in it. The subtree is valid again when the tick ends, or
//!    earlier when a listener reads the property with `get()`.
//! 2. A valid node never has an invalid descendant, so validation stops at
//!    the first node that is already valid.
//! 3. Sub-change listeners fire for every change below the property.
//! 4. A property marked root in its metadata reports changes to its own
//!    listeners but never to the object containing it.
//! 5. An event reaching a node that is already relaying it on the same
//!    thread stops there, so cyclic graphs terminate.

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use asyncfx_dispatch::Dispatcher;
use parking_lot::Mutex;
use tracing::trace;

use crate::binding::ObservableValue;
use crate::critical::{self, ConsistencyGroup, Lockable};
use crate::error::Result;
use crate::listener::{ChangeHook, InvalidationFn, Registry, Subscription, deliver};
use crate::metadata::PropertyMetadata;
use crate::property::{Property, PropertyId, PropertyValue, WeakProperty};

/// Event sent from a property to the objects containing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEvent {
    Invalidated,
    Changed,
}

pub type TreeFn = dyn Fn(TreeEvent) + Send + Sync;

/// A node of an object graph that can report to a parent.
pub trait SubtreeNode {
    /// Forward this node's tree events to `parent` while the subscription lives.
    fn attach_parent(&self, parent: Arc<TreeFn>) -> Subscription;

    /// Mark this node and everything below it valid.
    fn validate_subtree(&self) {}
}

impl<T: PropertyValue> SubtreeNode for Property<T> {
    fn attach_parent(&self, parent: Arc<TreeFn>) -> Subscription {
        self.add_tree_parent(parent)
    }
}

/// A type whose fields are properties.
///
/// Implement by hand, or with [`property_object!`](crate::property_object)
/// when every field to observe is a single property.
pub trait PropertyObject: Send + Sync + 'static {
    fn visit_properties(&self, _visit: &mut dyn FnMut(&dyn SubtreeNode)) {}
}

/// Implement [`PropertyObject`] by listing the property fields.
///
/// ```ignore
/// struct Vehicle {
///     speed: Property<f64>,
///     driver: ObjectProperty<Driver>,
/// }
/// property_object!(Vehicle { speed, driver });
/// ```
#[macro_export]
macro_rules! property_object {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::PropertyObject for $ty {
            fn visit_properties(&self, visit: &mut dyn FnMut(&dyn $crate::SubtreeNode)) {
                $( visit(&self.$field); )*
            }
        }
    };
}

thread_local! {
    static RELAYING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

struct RelayGuard(usize);

impl Drop for RelayGuard {
    fn drop(&mut self) {
        RELAYING.with(|cell| cell.borrow_mut().retain(|key| *key != self.0));
    }
}

/// Run `relay` unless the node identified by `key` is already relaying a
/// tree event on this thread.
pub(crate) fn relay_once(key: usize, relay: impl FnOnce()) {
    let entered = RELAYING.with(|cell| {
        let mut active = cell.borrow_mut();
        if active.contains(&key) {
            return false;
        }
        active.push(key);
        true
    });
    if !entered {
        trace!("tree event reached a node already relaying it; cycle cut");
        return;
    }
    let _guard = RelayGuard(key);
    relay();
}

type Value<B> = Option<Arc<B>>;
type SubChangeFn<B> = dyn Fn(&Value<B>) + Send + Sync;

pub(crate) fn same_object<B>(a: &Value<B>, b: &Value<B>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

struct Subtree<B> {
    owner: WeakProperty<Value<B>>,
    valid: AtomicBool,
    current: Mutex<Value<B>>,
    children: Mutex<Vec<Subscription>>,
    sub_invalidation: Registry<InvalidationFn>,
    sub_change: Registry<SubChangeFn<B>>,
    rewire: Mutex<Option<Subscription>>,
}

impl<B: PropertyObject> Subtree<B> {
    /// Observe the properties of `value` instead of the previous value.
    fn rewire(self: &Arc<Self>, value: Value<B>) {
        let mut children = Vec::new();
        if let Some(object) = &value {
            object.visit_properties(&mut |node: &dyn SubtreeNode| {
                let subtree = Arc::downgrade(self);
                let parent: Arc<TreeFn> = Arc::new(move |event: TreeEvent| {
                    if let Some(subtree) = subtree.upgrade() {
                        subtree.on_child(event);
                    }
                });
                children.push(node.attach_parent(parent));
            });
        }
        *self.current.lock() = value;
        let previous = std::mem::replace(&mut *self.children.lock(), children);
        drop(previous);

        self.valid.store(false, Ordering::Release);
        self.validate();
    }

    fn validate(&self) {
        if self.valid.swap(true, Ordering::AcqRel) {
            return;
        }
        let current = self.current.lock().clone();
        if let Some(object) = current {
            object.visit_properties(&mut |node: &dyn SubtreeNode| node.validate_subtree());
        }
    }

    fn home(&self) -> Option<Dispatcher> {
        self.owner.upgrade().and_then(|p| p.dispatcher())
    }

    fn on_child(self: &Arc<Self>, event: TreeEvent) {
        let key = Arc::as_ptr(self).cast::<()>() as usize;
        relay_once(key, || self.relay(event));
    }

    fn relay(self: &Arc<Self>, event: TreeEvent) {
        match event {
            TreeEvent::Invalidated => {
                if !self.valid.swap(false, Ordering::AcqRel) {
                    return;
                }
                let weak = Arc::downgrade(self);
                critical::at_tick_end(Box::new(move || {
                    if let Some(subtree) = weak.upgrade() {
                        subtree.validate();
                    }
                }));
                let home = self.home();
                for (listener, dispatcher) in self.sub_invalidation.snapshot() {
                    deliver(dispatcher.as_ref().or(home.as_ref()), move || listener());
                }
            }
            TreeEvent::Changed => {
                let listeners = self.sub_change.snapshot();
                if !listeners.is_empty() {
                    let home = self.home();
                    let value = self.current.lock().clone();
                    for (listener, dispatcher) in listeners {
                        let value = value.clone();
                        deliver(dispatcher.as_ref().or(home.as_ref()), move || listener(&value));
                    }
                }
            }
        }
        if let Some(owner) = self.owner.upgrade()
            && !owner.metadata().is_root()
        {
            owner.inner.emit_tree(event);
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectProperty
// ---------------------------------------------------------------------------

/// A property holding a shared object whose own properties are observed.
///
/// Dereferences to the underlying [`Property`], so `set`, `bind` and the
/// plain listeners are available directly. Values are compared by identity.
pub struct ObjectProperty<B: PropertyObject> {
    property: Property<Value<B>>,
    subtree: Arc<Subtree<B>>,
}

impl<B: PropertyObject> ObjectProperty<B> {
    #[must_use]
    pub fn new(metadata: PropertyMetadata<Value<B>>) -> Self {
        let property = Property::with_equality(metadata, same_object::<B>);
        let subtree = Arc::new(Subtree {
            owner: property.downgrade(),
            valid: AtomicBool::new(true),
            current: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            sub_invalidation: Registry::new(),
            sub_change: Registry::new(),
            rewire: Mutex::new(None),
        });

        let weak = Arc::downgrade(&subtree);
        let hook: ChangeHook<Value<B>> = Arc::new(move |_: &Value<B>, new: &Value<B>| {
            if let Some(subtree) = weak.upgrade() {
                subtree.rewire(new.clone());
            }
        });
        *subtree.rewire.lock() = Some(property.add_hook(hook));
        subtree.rewire(property.get_uncritical());

        Self { property, subtree }
    }

    #[must_use]
    pub fn with_value(value: Arc<B>) -> Self {
        Self::new(PropertyMetadata::builder().initial_value(Some(value)).build())
    }

    /// The underlying property.
    #[must_use]
    pub fn property(&self) -> &Property<Value<B>> {
        &self.property
    }

    /// Read the value and validate the subtree below it.
    ///
    /// # Panics
    ///
    /// Panics on misuse; see [`ObjectProperty::try_get`].
    #[must_use]
    pub fn get(&self) -> Value<B> {
        let value = self.property.get();
        self.subtree.validate();
        value
    }

    pub fn try_get(&self) -> Result<Value<B>> {
        let value = self.property.try_get()?;
        self.subtree.validate();
        Ok(value)
    }

    /// Notified at most once per tick when anything below the value changes.
    pub fn add_sub_invalidation_listener(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let sub = self.subtree.sub_invalidation.register(Arc::new(listener), None);
        self.subtree.validate();
        sub
    }

    pub fn add_sub_invalidation_listener_on(
        &self,
        dispatcher: Dispatcher,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        let sub = self
            .subtree
            .sub_invalidation
            .register(Arc::new(listener), Some(dispatcher));
        self.subtree.validate();
        sub
    }

    /// Notified with the current value on every change below it.
    pub fn add_sub_change_listener(&self, listener: impl Fn(&Value<B>) + Send + Sync + 'static) -> Subscription {
        let sub = self.subtree.sub_change.register(Arc::new(listener), None);
        self.subtree.validate();
        sub
    }

    pub fn add_sub_change_listener_on(
        &self,
        dispatcher: Dispatcher,
        listener: impl Fn(&Value<B>) + Send + Sync + 'static,
    ) -> Subscription {
        let sub = self.subtree.sub_change.register(Arc::new(listener), Some(dispatcher));
        self.subtree.validate();
        sub
    }
}

impl<B: PropertyObject> Default for ObjectProperty<B> {
    fn default() -> Self {
        Self::new(PropertyMetadata::default())
    }
}

impl<B: PropertyObject> Clone for ObjectProperty<B> {
    fn clone(&self) -> Self {
        Self {
            property: self.property.clone(),
            subtree: Arc::clone(&self.subtree),
        }
    }
}

impl<B: PropertyObject> Deref for ObjectProperty<B> {
    type Target = Property<Value<B>>;

    fn deref(&self) -> &Self::Target {
        &self.property
    }
}

impl<B: PropertyObject> Lockable for ObjectProperty<B> {
    fn consistency_group(&self) -> &ConsistencyGroup {
        self.property.consistency_group()
    }
}

impl<B: PropertyObject> SubtreeNode for ObjectProperty<B> {
    fn attach_parent(&self, parent: Arc<TreeFn>) -> Subscription {
        self.property.add_tree_parent(parent)
    }

    fn validate_subtree(&self) {
        self.subtree.validate();
    }
}

impl<B: PropertyObject> ObservableValue<Value<B>> for ObjectProperty<B> {
    fn current(&self) -> Value<B> {
        self.property.get_uncritical()
    }

    fn watch(&self, hook: ChangeHook<Value<B>>) -> Subscription {
        self.property.add_hook(hook)
    }

    fn source_id(&self) -> Option<PropertyId> {
        Some(self.property.id())
    }
}

impl<B: PropertyObject> fmt::Debug for ObjectProperty<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectProperty")
            .field("id", &self.property.id())
            .field("name", &self.property.name())
            .field("valid", &self.subtree.valid.load(Ordering::Acquire))
            .finish()
    }
}
