#![forbid(unsafe_code)]

//! Property paths: observing a property reached through a chain of objects.
//!
//! ```ignore
//! let street = PropertyPath::from_root(&person)
//!     .select(|p: &Person| p.address.clone())
//!     .select_value(|a: &Address| a.street.clone());
//! ```
//!
//! A path watches every intermediate property on the chain. When one of them
//! changes, the chain is walked again and the endpoint re-resolves to the new
//! leaf, or becomes unresolved if any link is empty.
//!
//! # Invariants
//!
//! 1. While unresolved, reads return the default value, writes are dropped
//!    and `override_metadata` does nothing.
//! 2. A binding or bidirectional binding made on an endpoint is re-applied to
//!    every leaf the path resolves to, and removed from the previous leaf.
//!    Binding a resolved endpoint bidirectionally makes the leaf adopt the
//!    peer's value, like [`Property::bind_bidirectional`]; on every later
//!    resolution the peer adopts the new leaf's value.
//! 3. Re-resolution to a leaf with a different value notifies the endpoint's
//!    listeners as a change from the old value to the new one.
//! 4. Bindings are applied after the endpoint's own state lock is released.
//! 5. Concurrent re-resolutions settle on the walk that started last; an
//!    older walk finishing late is discarded.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use asyncfx_dispatch::Dispatcher;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::binding::ObservableValue;
use crate::collections::{ListChange, ListChangeFn, ListEdit, ListProperty, ListSource, LockedList, ObservableList, SnapshotFn};
use crate::error::Result;
use crate::listener::{ChangeFn, ChangeHook, InvalidationFn, Registry, Subscription, deliver};
use crate::metadata::PropertyMetadata;
use crate::object::{ObjectProperty, PropertyObject, same_object};
use crate::property::{Property, PropertyId, PropertyValue, WeakProperty};

/// Where a path endpoint currently points.
#[derive(Clone)]
pub enum Resolution<L> {
    /// Some link of the chain is empty.
    Unresolved,
    /// The chain reaches this leaf.
    Resolved(L),
}

impl<L> Resolution<L> {
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    #[must_use]
    pub fn leaf(&self) -> Option<&L> {
        match self {
            Self::Resolved(leaf) => Some(leaf),
            Self::Unresolved => None,
        }
    }

    fn into_leaf(self) -> Option<L> {
        match self {
            Self::Resolved(leaf) => Some(leaf),
            Self::Unresolved => None,
        }
    }
}

impl<L> From<Option<L>> for Resolution<L> {
    fn from(leaf: Option<L>) -> Self {
        leaf.map_or(Self::Unresolved, Self::Resolved)
    }
}

impl<L> fmt::Debug for Resolution<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved => f.write_str("Unresolved"),
            Self::Resolved(_) => f.write_str("Resolved"),
        }
    }
}

// ---------------------------------------------------------------------------
// Walking
// ---------------------------------------------------------------------------

/// Collects the hooks placed on intermediate properties during one walk.
pub(crate) struct PathWatch {
    trigger: Arc<dyn Fn() + Send + Sync>,
    subscriptions: Vec<Subscription>,
}

impl PathWatch {
    fn observe<T: PropertyValue>(&mut self, property: &Property<T>) {
        let trigger = Arc::clone(&self.trigger);
        let hook: ChangeHook<T> = Arc::new(move |_: &T, _: &T| trigger());
        self.subscriptions.push(property.add_hook(hook));
    }
}

type Walk<L> = Arc<dyn Fn(&mut PathWatch) -> Option<L> + Send + Sync>;

/// A chain of object properties starting at a root.
pub struct PropertyPath<B> {
    walk: Walk<Arc<B>>,
}

impl<B: PropertyObject> PropertyPath<B> {
    /// Start a path at `root`.
    #[must_use]
    pub fn from_root(root: &ObjectProperty<B>) -> Self {
        let root = root.clone();
        Self {
            walk: Arc::new(move |watch: &mut PathWatch| {
                watch.observe(root.property());
                root.get_uncritical()
            }),
        }
    }

    /// Follow an object property of the current object.
    #[must_use]
    pub fn select<C: PropertyObject>(
        self,
        selector: impl Fn(&B) -> ObjectProperty<C> + Send + Sync + 'static,
    ) -> PropertyPath<C> {
        let walk = self.walk;
        PropertyPath {
            walk: Arc::new(move |watch: &mut PathWatch| {
                let object = walk(watch)?;
                let next = selector(&object);
                watch.observe(next.property());
                next.get_uncritical()
            }),
        }
    }

    /// End the path at a value property.
    #[must_use]
    pub fn select_value<T: PropertyValue + Default + PartialEq>(
        self,
        selector: impl Fn(&B) -> Property<T> + Send + Sync + 'static,
    ) -> PathEndpoint<T> {
        self.select_value_with_equality(selector, <T as PartialEq>::eq)
    }

    /// End the path at an object property; compared by identity.
    #[must_use]
    pub fn select_object<C: PropertyObject>(
        self,
        selector: impl Fn(&B) -> ObjectProperty<C> + Send + Sync + 'static,
    ) -> PathEndpoint<Option<Arc<C>>> {
        self.select_value_with_equality(move |b| selector(b).property().clone(), same_object::<C>)
    }

    fn select_value_with_equality<T: PropertyValue + Default>(
        self,
        selector: impl Fn(&B) -> Property<T> + Send + Sync + 'static,
        eq: fn(&T, &T) -> bool,
    ) -> PathEndpoint<T> {
        let walk = self.walk;
        PathEndpoint::new(Arc::new(move |watch: &mut PathWatch| walk(watch).map(|object| selector(&object))), eq)
    }

    /// End the path at a list property.
    #[must_use]
    pub fn select_list<T: PropertyValue>(
        self,
        selector: impl Fn(&B) -> ListProperty<T> + Send + Sync + 'static,
    ) -> ListEndpoint<T> {
        let walk = self.walk;
        ListEndpoint::new(Arc::new(move |watch: &mut PathWatch| walk(watch).map(|object| selector(&object))))
    }
}

// ---------------------------------------------------------------------------
// Shared re-resolution
// ---------------------------------------------------------------------------

struct Slot<L> {
    resolution: Resolution<L>,
    forward: Option<Subscription>,
    watch: Vec<Subscription>,
    /// Ticket of the walk that produced `resolution`.
    generation: u64,
}

impl<L> Slot<L> {
    fn new() -> Self {
        Self {
            resolution: Resolution::Unresolved,
            forward: None,
            watch: Vec::new(),
            generation: 0,
        }
    }
}

trait Endpoint: Send + Sync + Sized + 'static {
    type Leaf: Clone + Send + Sync + 'static;

    fn walk(&self, watch: &mut PathWatch) -> Option<Self::Leaf>;
    fn slot(&self) -> &Mutex<Slot<Self::Leaf>>;
    /// Hands out walk tickets in start order.
    fn tickets(&self) -> &AtomicU64;
    fn same_leaf(a: &Self::Leaf, b: &Self::Leaf) -> bool;
    /// Start forwarding the leaf's notifications.
    fn connect(self: &Arc<Self>, leaf: &Self::Leaf) -> Subscription;
    /// React to a new resolution; called without the slot lock.
    fn switched(self: &Arc<Self>, old: Option<Self::Leaf>, new: Option<Self::Leaf>);

    fn resolved(&self) -> Option<Self::Leaf> {
        self.slot().lock().resolution.leaf().cloned()
    }
}

fn relink<E: Endpoint>(endpoint: &Arc<E>) {
    let weak = Arc::downgrade(endpoint);
    let mut watch = PathWatch {
        trigger: Arc::new(move || {
            if let Some(endpoint) = weak.upgrade() {
                relink(&endpoint);
            }
        }),
        subscriptions: Vec::new(),
    };
    let ticket = endpoint.tickets().fetch_add(1, Ordering::AcqRel) + 1;
    let leaf = endpoint.walk(&mut watch);

    let mut slot = endpoint.slot().lock();
    if slot.generation > ticket {
        drop(slot);
        trace!(ticket, "superseded property path walk discarded");
        return;
    }
    slot.generation = ticket;
    let stale_watch = std::mem::replace(&mut slot.watch, watch.subscriptions);
    let unchanged = match (&slot.resolution, &leaf) {
        (Resolution::Resolved(current), Some(next)) => E::same_leaf(current, next),
        (Resolution::Unresolved, None) => true,
        _ => false,
    };
    if unchanged {
        drop(slot);
        drop(stale_watch);
        return;
    }
    let forward = leaf.as_ref().map(|l| endpoint.connect(l));
    let old = std::mem::replace(&mut slot.resolution, Resolution::from(leaf.clone()));
    let stale_forward = std::mem::replace(&mut slot.forward, forward);
    drop(slot);
    drop((stale_watch, stale_forward));

    trace!(resolved = leaf.is_some(), "property path re-resolved");
    endpoint.switched(old.into_leaf(), leaf);
}

// ---------------------------------------------------------------------------
// PathEndpoint
// ---------------------------------------------------------------------------

type Binder<L> = Arc<dyn Fn(&L) -> Result<()> + Send + Sync>;

struct ValueCore<T: PropertyValue> {
    walk: Walk<Property<T>>,
    slot: Mutex<Slot<Property<T>>>,
    tickets: AtomicU64,
    eq: fn(&T, &T) -> bool,
    fallback: PropertyMetadata<T>,
    valid: AtomicBool,
    invalidation: Registry<InvalidationFn>,
    change: Registry<ChangeFn<T>>,
    hooks: Registry<ChangeFn<T>>,
    binder: Mutex<Option<Binder<Property<T>>>>,
    peers: Mutex<Vec<WeakProperty<T>>>,
}

impl<T: PropertyValue + Default> ValueCore<T> {
    fn value_of(leaf: Option<&Property<T>>) -> T {
        leaf.map_or_else(T::default, Property::get_uncritical)
    }

    fn fire(&self, old: &T, new: &T) {
        for (hook, _) in self.hooks.snapshot() {
            hook(old, new);
        }
        let home = self.resolved().and_then(|leaf| leaf.dispatcher());
        if self.valid.swap(false, Ordering::AcqRel) {
            for (listener, dispatcher) in self.invalidation.snapshot() {
                deliver(dispatcher.as_ref().or(home.as_ref()), move || listener());
            }
        }
        let change = self.change.snapshot();
        if !change.is_empty() {
            self.valid.store(true, Ordering::Release);
            for (listener, dispatcher) in change {
                let (old, new) = (old.clone(), new.clone());
                deliver(dispatcher.as_ref().or(home.as_ref()), move || listener(&old, &new));
            }
        }
    }

    fn live_peers(&self) -> Vec<Property<T>> {
        let mut peers = self.peers.lock();
        peers.retain(|p| p.upgrade().is_some());
        peers.iter().filter_map(WeakProperty::upgrade).collect()
    }
}

impl<T: PropertyValue + Default> Endpoint for ValueCore<T> {
    type Leaf = Property<T>;

    fn walk(&self, watch: &mut PathWatch) -> Option<Property<T>> {
        (self.walk)(watch)
    }

    fn slot(&self) -> &Mutex<Slot<Property<T>>> {
        &self.slot
    }

    fn tickets(&self) -> &AtomicU64 {
        &self.tickets
    }

    fn same_leaf(a: &Property<T>, b: &Property<T>) -> bool {
        a.ptr_eq(b)
    }

    fn connect(self: &Arc<Self>, leaf: &Property<T>) -> Subscription {
        let core = Arc::downgrade(self);
        leaf.add_hook(Arc::new(move |old: &T, new: &T| {
            if let Some(core) = core.upgrade() {
                core.fire(old, new);
            }
        }))
    }

    fn switched(self: &Arc<Self>, old: Option<Property<T>>, new: Option<Property<T>>) {
        let old_value = Self::value_of(old.as_ref());
        let new_value = Self::value_of(new.as_ref());
        if !(self.eq)(&old_value, &new_value) {
            self.fire(&old_value, &new_value);
        }

        let binder = self.binder.lock().clone();
        let peers = self.live_peers();
        if let Some(old) = &old {
            if binder.is_some() {
                old.unbind();
            }
            for peer in &peers {
                peer.unbind_bidirectional(old);
            }
        }
        if let Some(new) = &new {
            if let Some(bind) = &binder
                && let Err(err) = bind(new)
            {
                warn!(property = %new.name(), error = %err, "path binding could not be applied");
            }
            for peer in &peers {
                if let Err(err) = peer.bind_bidirectional(new) {
                    warn!(property = %new.name(), error = %err, "path bidirectional binding could not be applied");
                }
            }
        }
    }
}

/// The value end of a [`PropertyPath`].
///
/// Behaves like a property that transparently follows whatever leaf the path
/// currently resolves to.
pub struct PathEndpoint<T: PropertyValue + Default> {
    core: Arc<ValueCore<T>>,
}

impl<T: PropertyValue + Default> PathEndpoint<T> {
    fn new(walk: Walk<Property<T>>, eq: fn(&T, &T) -> bool) -> Self {
        let core = Arc::new(ValueCore {
            walk,
            slot: Mutex::new(Slot::new()),
            tickets: AtomicU64::new(0),
            eq,
            fallback: PropertyMetadata::default(),
            valid: AtomicBool::new(true),
            invalidation: Registry::new(),
            change: Registry::new(),
            hooks: Registry::new(),
            binder: Mutex::new(None),
            peers: Mutex::new(Vec::new()),
        });
        relink(&core);
        Self { core }
    }

    #[must_use]
    pub fn resolution(&self) -> Resolution<Property<T>> {
        self.core.slot.lock().resolution.clone()
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.core.slot.lock().resolution.is_resolved()
    }

    /// The leaf's value, or the default while unresolved.
    ///
    /// # Panics
    ///
    /// Panics on misuse of the leaf; see [`Property::try_get`].
    #[must_use]
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_get(&self) -> Result<T> {
        let value = match self.core.resolved() {
            Some(leaf) => leaf.try_get()?,
            None => T::default(),
        };
        self.core.valid.store(true, Ordering::Release);
        Ok(value)
    }

    /// Write through to the leaf; dropped while unresolved.
    pub fn set(&self, value: T) -> Result<()> {
        match self.core.resolved() {
            Some(leaf) => leaf.set(value),
            None => {
                debug!("property path unresolved; write dropped");
                Ok(())
            }
        }
    }

    /// Metadata of the leaf, or defaults while unresolved.
    #[must_use]
    pub fn metadata(&self) -> Arc<PropertyMetadata<T>> {
        match self.core.resolved() {
            Some(leaf) => leaf.metadata(),
            None => Arc::new(self.core.fallback.clone()),
        }
    }

    /// Override the leaf's metadata; no effect while unresolved.
    pub fn override_metadata(&self, overrides: &PropertyMetadata<T>) {
        match self.core.resolved() {
            Some(leaf) => leaf.override_metadata(overrides),
            None => debug!("property path unresolved; metadata override ignored"),
        }
    }

    pub fn add_invalidation_listener(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let sub = self.core.invalidation.register(Arc::new(listener), None);
        self.core.valid.store(true, Ordering::Release);
        sub
    }

    pub fn add_invalidation_listener_on(
        &self,
        dispatcher: Dispatcher,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        let sub = self.core.invalidation.register(Arc::new(listener), Some(dispatcher));
        self.core.valid.store(true, Ordering::Release);
        sub
    }

    pub fn add_change_listener(&self, listener: impl Fn(&T, &T) + Send + Sync + 'static) -> Subscription {
        let sub = self.core.change.register(Arc::new(listener), None);
        self.core.valid.store(true, Ordering::Release);
        sub
    }

    pub fn add_change_listener_on(
        &self,
        dispatcher: Dispatcher,
        listener: impl Fn(&T, &T) + Send + Sync + 'static,
    ) -> Subscription {
        let sub = self.core.change.register(Arc::new(listener), Some(dispatcher));
        self.core.valid.store(true, Ordering::Release);
        sub
    }

    /// Bind every leaf the path resolves to, now and later, to `source`.
    pub fn bind<S>(&self, source: &S) -> Result<()>
    where
        S: ObservableValue<T> + Clone,
    {
        let source = source.clone();
        let binder: Binder<Property<T>> = Arc::new(move |leaf: &Property<T>| leaf.bind(&source));
        *self.core.binder.lock() = Some(Arc::clone(&binder));
        match self.core.resolved() {
            Some(leaf) => binder(&leaf),
            None => Ok(()),
        }
    }

    /// Remove the path binding; the current leaf keeps its value.
    pub fn unbind(&self) {
        let previous = self.core.binder.lock().take();
        if previous.is_some()
            && let Some(leaf) = self.core.resolved()
        {
            leaf.unbind();
        }
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.core.binder.lock().is_some()
    }

    /// Keep `peer` and every leaf the path resolves to equal.
    ///
    /// The current leaf adopts `peer`'s value; each leaf resolved later
    /// hands its value to `peer` instead.
    pub fn bind_bidirectional(&self, peer: &Property<T>) -> Result<()> {
        self.core.peers.lock().push(peer.downgrade());
        match self.core.resolved() {
            Some(leaf) => leaf.bind_bidirectional(peer),
            None => Ok(()),
        }
    }

    pub fn unbind_bidirectional(&self, peer: &Property<T>) {
        self.core
            .peers
            .lock()
            .retain(|p| p.upgrade().is_some_and(|p| !p.ptr_eq(peer)));
        if let Some(leaf) = self.core.resolved() {
            peer.unbind_bidirectional(&leaf);
        }
    }
}

impl<T: PropertyValue + Default> Clone for PathEndpoint<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: PropertyValue + Default> ObservableValue<T> for PathEndpoint<T> {
    fn current(&self) -> T {
        ValueCore::value_of(self.core.resolved().as_ref())
    }

    fn watch(&self, hook: ChangeHook<T>) -> Subscription {
        self.core.hooks.register(hook, None)
    }

    fn source_id(&self) -> Option<PropertyId> {
        None
    }
}

impl<T: PropertyValue + Default> fmt::Debug for PathEndpoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathEndpoint")
            .field("resolution", &self.resolution())
            .field("bound", &self.is_bound())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ListEndpoint
// ---------------------------------------------------------------------------

type Instance<T> = Option<ObservableList<T>>;

struct ListCore<T: PropertyValue> {
    walk: Walk<ListProperty<T>>,
    slot: Mutex<Slot<ListProperty<T>>>,
    tickets: AtomicU64,
    fallback: PropertyMetadata<Instance<T>>,
    listeners: Registry<ListChangeFn<T>>,
    size: Property<usize>,
    empty: Property<bool>,
    binder: Mutex<Option<Binder<ListProperty<T>>>>,
    content: Mutex<Option<Binder<ListProperty<T>>>>,
    peers: Mutex<Vec<WeakProperty<Instance<T>>>>,
}

impl<T: PropertyValue> ListCore<T> {
    fn fire(&self, change: ListChange<T>) {
        let home = self.resolved().and_then(|leaf| leaf.dispatcher());
        let change = Arc::new(change);
        for (listener, dispatcher) in self.listeners.snapshot() {
            let change = Arc::clone(&change);
            deliver(dispatcher.as_ref().or(home.as_ref()), move || listener(&change));
        }
    }

    fn live_peers(&self) -> Vec<Property<Instance<T>>> {
        let mut peers = self.peers.lock();
        peers.retain(|p| p.upgrade().is_some());
        peers.iter().filter_map(WeakProperty::upgrade).collect()
    }

    fn refresh_counts(&self) {
        let len = self.resolved().map_or(0, |leaf| leaf.len());
        for err in [
            self.size.write_internal(len, false, None),
            self.empty.write_internal(len == 0, false, None),
        ]
        .into_iter()
        .filter_map(|r| r.err())
        {
            warn!(error = %err, "failed to update path list size");
        }
    }
}

impl<T: PropertyValue> Endpoint for ListCore<T> {
    type Leaf = ListProperty<T>;

    fn walk(&self, watch: &mut PathWatch) -> Option<ListProperty<T>> {
        (self.walk)(watch)
    }

    fn slot(&self) -> &Mutex<Slot<ListProperty<T>>> {
        &self.slot
    }

    fn tickets(&self) -> &AtomicU64 {
        &self.tickets
    }

    fn same_leaf(a: &ListProperty<T>, b: &ListProperty<T>) -> bool {
        a.property().ptr_eq(b.property())
    }

    fn connect(self: &Arc<Self>, leaf: &ListProperty<T>) -> Subscription {
        let core = Arc::downgrade(self);
        leaf.add_list_change_listener_on(Dispatcher::immediate(), move |change| {
            if let Some(core) = core.upgrade() {
                core.fire(change.clone());
                core.refresh_counts();
            }
        })
    }

    fn switched(self: &Arc<Self>, old: Option<ListProperty<T>>, new: Option<ListProperty<T>>) {
        let removed: Vec<ListEdit<T>> = old
            .as_ref()
            .map(ListProperty::to_vec)
            .unwrap_or_default()
            .into_iter()
            .map(|item| ListEdit::Removed { index: 0, item })
            .collect();
        let added: Vec<ListEdit<T>> = new
            .as_ref()
            .map(ListProperty::to_vec)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, item)| ListEdit::Added { index, item })
            .collect();
        for edits in [removed, added] {
            if !edits.is_empty() {
                self.fire(ListChange::new(edits));
            }
        }
        self.refresh_counts();

        let binder = self.binder.lock().clone();
        let content = self.content.lock().clone();
        let peers = self.live_peers();
        if let Some(old) = &old {
            if binder.is_some() {
                old.unbind();
            }
            if content.is_some() {
                old.unbind_content();
            }
            for peer in &peers {
                peer.unbind_bidirectional(old.property());
            }
        }
        let Some(new) = &new else {
            return;
        };
        for (bind, what) in [(binder, "binding"), (content, "content binding")] {
            if let Some(bind) = bind
                && let Err(err) = bind(new)
            {
                warn!(property = %new.name(), error = %err, "path {what} could not be applied");
            }
        }
        for peer in &peers {
            if let Err(err) = peer.bind_bidirectional(new.property()) {
                warn!(property = %new.name(), error = %err, "path bidirectional binding could not be applied");
            }
        }
    }
}

/// The list end of a [`PropertyPath`].
pub struct ListEndpoint<T: PropertyValue> {
    core: Arc<ListCore<T>>,
}

impl<T: PropertyValue> ListEndpoint<T> {
    fn new(walk: Walk<ListProperty<T>>) -> Self {
        let core = Arc::new(ListCore {
            walk,
            slot: Mutex::new(Slot::new()),
            tickets: AtomicU64::new(0),
            fallback: PropertyMetadata::default(),
            listeners: Registry::new(),
            size: Property::derived(
                PropertyMetadata::builder().name("path.size").build(),
                <usize as PartialEq>::eq,
            ),
            empty: Property::derived(
                PropertyMetadata::builder()
                    .name("path.empty")
                    .initial_value(true)
                    .build(),
                <bool as PartialEq>::eq,
            ),
            binder: Mutex::new(None),
            content: Mutex::new(None),
            peers: Mutex::new(Vec::new()),
        });
        relink(&core);
        Self { core }
    }

    #[must_use]
    pub fn resolution(&self) -> Resolution<ListProperty<T>> {
        self.core.slot.lock().resolution.clone()
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.core.slot.lock().resolution.is_resolved()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.core.resolved().map_or(0, |leaf| leaf.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.core.resolved().map(|leaf| leaf.to_vec()).unwrap_or_default()
    }

    /// The leaf's list instance; `None` while unresolved.
    ///
    /// # Panics
    ///
    /// Panics on misuse of the leaf; see [`Property::try_get`].
    #[must_use]
    pub fn get(&self) -> Instance<T> {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_get(&self) -> Result<Instance<T>> {
        match self.core.resolved() {
            Some(leaf) => leaf.try_get(),
            None => Ok(None),
        }
    }

    /// Replace the leaf's list instance; dropped while unresolved.
    pub fn set(&self, list: Instance<T>) -> Result<()> {
        match self.core.resolved() {
            Some(leaf) => leaf.set(list),
            None => {
                debug!("property path unresolved; list write dropped");
                Ok(())
            }
        }
    }

    /// Metadata of the leaf, or defaults while unresolved.
    #[must_use]
    pub fn metadata(&self) -> Arc<PropertyMetadata<Instance<T>>> {
        match self.core.resolved() {
            Some(leaf) => leaf.metadata(),
            None => Arc::new(self.core.fallback.clone()),
        }
    }

    /// Override the leaf's metadata; no effect while unresolved.
    pub fn override_metadata(&self, overrides: &PropertyMetadata<Instance<T>>) {
        match self.core.resolved() {
            Some(leaf) => leaf.override_metadata(overrides),
            None => debug!("property path unresolved; metadata override ignored"),
        }
    }

    /// Bind the list instance of every leaf the path resolves to.
    pub fn bind<S>(&self, source: &S) -> Result<()>
    where
        S: ObservableValue<Instance<T>> + Clone,
    {
        let source = source.clone();
        let binder: Binder<ListProperty<T>> = Arc::new(move |leaf: &ListProperty<T>| leaf.bind(&source));
        *self.core.binder.lock() = Some(Arc::clone(&binder));
        match self.core.resolved() {
            Some(leaf) => binder(&leaf),
            None => Ok(()),
        }
    }

    /// Remove the path binding; the current leaf keeps its list.
    pub fn unbind(&self) {
        let previous = self.core.binder.lock().take();
        if previous.is_some()
            && let Some(leaf) = self.core.resolved()
        {
            leaf.unbind();
        }
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.core.binder.lock().is_some()
    }

    /// Keep `peer` and the list instance of every resolved leaf equal.
    ///
    /// Same direction rules as [`PathEndpoint::bind_bidirectional`].
    pub fn bind_bidirectional(&self, peer: &Property<Instance<T>>) -> Result<()> {
        self.core.peers.lock().push(peer.downgrade());
        match self.core.resolved() {
            Some(leaf) => leaf.bind_bidirectional(peer),
            None => Ok(()),
        }
    }

    pub fn unbind_bidirectional(&self, peer: &Property<Instance<T>>) {
        self.core
            .peers
            .lock()
            .retain(|p| p.upgrade().is_some_and(|p| !p.ptr_eq(peer)));
        if let Some(leaf) = self.core.resolved() {
            peer.unbind_bidirectional(leaf.property());
        }
    }

    /// Lock the leaf's list; detached while unresolved.
    pub fn lock(&self) -> Result<LockedList<T>> {
        match self.core.resolved() {
            Some(leaf) => leaf.lock(),
            None => Ok(LockedList::detached("unresolved path".to_owned())),
        }
    }

    pub fn add(&self, item: T) -> Result<()> {
        self.lock()?.add(item)
    }

    pub fn add_list_change_listener(
        &self,
        listener: impl Fn(&ListChange<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.core.listeners.register(Arc::new(listener), None)
    }

    pub fn add_list_change_listener_on(
        &self,
        dispatcher: Dispatcher,
        listener: impl Fn(&ListChange<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.core.listeners.register(Arc::new(listener), Some(dispatcher))
    }

    #[must_use]
    pub fn size_property(&self) -> Property<usize> {
        self.core.size.clone()
    }

    #[must_use]
    pub fn empty_property(&self) -> Property<bool> {
        self.core.empty.clone()
    }

    /// Content-bind every leaf the path resolves to, now and later.
    pub fn bind_content<S>(&self, source: &S) -> Result<()>
    where
        S: ListSource<T> + Clone + 'static,
    {
        let source = source.clone();
        let binder: Binder<ListProperty<T>> = Arc::new(move |leaf: &ListProperty<T>| leaf.bind_content(&source));
        *self.core.content.lock() = Some(Arc::clone(&binder));
        match self.core.resolved() {
            Some(leaf) => binder(&leaf),
            None => Ok(()),
        }
    }

    pub fn unbind_content(&self) {
        let previous = self.core.content.lock().take();
        if previous.is_some()
            && let Some(leaf) = self.core.resolved()
        {
            leaf.unbind_content();
        }
    }
}

impl<T: PropertyValue> ListSource<T> for ListEndpoint<T> {
    fn observe_content(&self, init: SnapshotFn<T>, hook: Arc<ListChangeFn<T>>) -> Subscription {
        let list = self.core.resolved().and_then(|leaf| leaf.get_uncritical());
        let view = list.as_ref().map(ObservableList::lock);
        let subscription = self
            .core
            .listeners
            .register(hook, Some(Dispatcher::immediate()));
        init(view.as_ref().map(LockedList::to_vec).unwrap_or_default());
        drop(view);
        subscription
    }
}

impl<T: PropertyValue> Clone for ListEndpoint<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: PropertyValue> fmt::Debug for ListEndpoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListEndpoint")
            .field("resolution", &self.resolution())
            .field("len", &self.len())
            .finish()
    }
}
