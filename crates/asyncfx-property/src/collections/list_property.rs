#![forbid(unsafe_code)]

//! A property holding an [`ObservableList`].
//!
//! Besides the usual property semantics for the list *instance*, a
//! [`ListProperty`] forwards content changes of whichever list it currently
//! holds. Replacing the instance is reported as a reset: one removal batch
//! for the old contents, one add batch for the new.
//!
//! A list property built with [`ListProperty::of_objects`] also observes the
//! properties of every element, so changes inside an element bubble up to
//! the objects containing the list.
//!
//! # Invariants
//!
//! 1. The size and empty properties follow the current list, updated on the
//!    property's dispatcher.
//! 2. Content-binding edits are replayed on the target's dispatcher in the
//!    order they happened on the source.
//! 3. A list property without a list ignores content-binding edits.
//! 4. A converting content binding owns the elements it created: each one is
//!    passed to [`LifecycleValueConverter::remove`] exactly once, when it
//!    leaves the target or when the binding is torn down.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use asyncfx_dispatch::Dispatcher;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::binding::{LifecycleValueConverter, pump};
use crate::collections::change::{ListChange, ListEdit};
use crate::collections::list::{ListChangeFn, ListSource, LockedList, ObservableList, SnapshotFn};
use crate::critical::{ConsistencyGroup, Lockable};
use crate::error::Result;
use crate::listener::{ChangeHook, Registry, Subscription, deliver};
use crate::metadata::PropertyMetadata;
use crate::object::{PropertyObject, SubtreeNode, TreeEvent, TreeFn, relay_once};
use crate::property::{Property, PropertyValue, WeakProperty};

type Instance<T> = Option<ObservableList<T>>;

/// Visits the properties of one list element.
pub type ElementVisitor<T> = dyn Fn(&T, &mut dyn FnMut(&dyn SubtreeNode)) + Send + Sync;

fn same_list<T: PropertyValue>(a: &Instance<T>, b: &Instance<T>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.ptr_eq(b),
        (None, None) => true,
        _ => false,
    }
}

/// Build size/empty metadata sharing the owner's name and dispatcher.
pub(crate) fn derived_metadata<V>(
    owner: Option<&str>,
    suffix: &str,
    initial: V,
    dispatcher: Option<&Dispatcher>,
) -> PropertyMetadata<V> {
    let mut builder = PropertyMetadata::builder()
        .name(format!("{}.{suffix}", owner.unwrap_or("collection")))
        .initial_value(initial);
    if let Some(dispatcher) = dispatcher {
        builder = builder.dispatcher(dispatcher.clone());
    }
    builder.build()
}

struct ListShared<T: PropertyValue> {
    owner: WeakProperty<Instance<T>>,
    listeners: Registry<ListChangeFn<T>>,
    size: Property<usize>,
    empty: Property<bool>,
    forward: Mutex<Option<Subscription>>,
    rewire: Mutex<Option<Subscription>>,
    content: Mutex<Option<Subscription>>,
    elements: Option<Arc<ElementVisitor<T>>>,
    /// One subscription per element, in list order.
    members: Mutex<Vec<Subscription>>,
}

impl<T: PropertyValue> ListShared<T> {
    fn current(&self) -> Instance<T> {
        self.owner.upgrade().and_then(|p| p.get_uncritical())
    }

    fn attach(self: &Arc<Self>, old: Option<&ObservableList<T>>, new: Option<&ObservableList<T>>) {
        let forward = new.map(|list| {
            let shared = Arc::downgrade(self);
            list.add_listener(move |change| {
                if let Some(shared) = shared.upgrade() {
                    shared.forward(change);
                }
            })
        });
        let previous = std::mem::replace(&mut *self.forward.lock(), forward);
        drop(previous);
        self.observe_all(new);

        let removed: Vec<ListEdit<T>> = old
            .map(ObservableList::to_vec)
            .unwrap_or_default()
            .into_iter()
            .map(|item| ListEdit::Removed { index: 0, item })
            .collect();
        let added: Vec<ListEdit<T>> = new
            .map(ObservableList::to_vec)
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
    }

    fn forward(self: &Arc<Self>, change: &ListChange<T>) {
        self.track(change);
        self.fire(change.clone());
        self.refresh_counts();
        if let Some(owner) = self.owner.upgrade()
            && !owner.metadata().is_root()
        {
            owner.inner.emit_tree(TreeEvent::Invalidated);
            owner.inner.emit_tree(TreeEvent::Changed);
        }
    }

    fn observe(self: &Arc<Self>, visitor: &ElementVisitor<T>, item: &T) -> Subscription {
        let mut subscriptions = Vec::new();
        visitor(item, &mut |node: &dyn SubtreeNode| {
            let shared = Arc::downgrade(self);
            let parent: Arc<TreeFn> = Arc::new(move |event: TreeEvent| {
                if let Some(shared) = shared.upgrade() {
                    shared.on_element(event);
                }
            });
            subscriptions.push(node.attach_parent(parent));
        });
        Subscription::combine(subscriptions)
    }

    fn observe_all(self: &Arc<Self>, list: Option<&ObservableList<T>>) {
        let Some(visitor) = &self.elements else {
            return;
        };
        let members: Vec<Subscription> = list
            .map(ObservableList::to_vec)
            .unwrap_or_default()
            .iter()
            .map(|item| self.observe(&**visitor, item))
            .collect();
        let previous = std::mem::replace(&mut *self.members.lock(), members);
        drop(previous);
    }

    /// Follow the element subscriptions through one batch of edits.
    fn track(self: &Arc<Self>, change: &ListChange<T>) {
        let Some(visitor) = &self.elements else {
            return;
        };
        let mut members = self.members.lock();
        let mut retired = Vec::new();
        for edit in change.edits() {
            match edit {
                ListEdit::Added { index, item } if *index <= members.len() => {
                    members.insert(*index, self.observe(&**visitor, item));
                }
                ListEdit::Removed { index, .. } if *index < members.len() => {
                    retired.push(members.remove(*index));
                }
                ListEdit::Replaced { index, new, .. } if *index < members.len() => {
                    retired.push(std::mem::replace(&mut members[*index], self.observe(&**visitor, new)));
                }
                _ => {
                    drop(members);
                    debug!("element subscriptions out of step; observing the list again");
                    self.observe_all(self.current().as_ref());
                    return;
                }
            }
        }
        drop(members);
        drop(retired);
    }

    fn on_element(self: &Arc<Self>, event: TreeEvent) {
        let key = Arc::as_ptr(self).cast::<()>() as usize;
        relay_once(key, || {
            if let Some(owner) = self.owner.upgrade()
                && !owner.metadata().is_root()
            {
                owner.inner.emit_tree(event);
            }
        });
    }

    fn validate_elements(&self) {
        let (Some(visitor), Some(list)) = (&self.elements, self.current()) else {
            return;
        };
        for item in list.to_vec() {
            visitor(&item, &mut |node: &dyn SubtreeNode| node.validate_subtree());
        }
    }

    fn fire(&self, change: ListChange<T>) {
        let home = self.owner.upgrade().and_then(|p| p.dispatcher());
        let change = Arc::new(change);
        for (listener, dispatcher) in self.listeners.snapshot() {
            let change = Arc::clone(&change);
            deliver(dispatcher.as_ref().or(home.as_ref()), move || listener(&change));
        }
    }

    fn refresh_counts(self: &Arc<Self>) {
        let shared: Weak<Self> = Arc::downgrade(self);
        pump(&self.size.downgrade(), move |size| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let len = shared.current().map_or(0, |list| list.len());
            let results = [
                size.write_internal(len, false, None),
                shared.empty.write_internal(len == 0, false, None),
            ];
            for err in results.into_iter().filter_map(|r| r.err()) {
                warn!(error = %err, "failed to update list size");
            }
        });
    }
}

/// A property whose value is an observable list.
pub struct ListProperty<T: PropertyValue> {
    property: Property<Instance<T>>,
    shared: Arc<ListShared<T>>,
}

impl<T: PropertyValue> ListProperty<T> {
    #[must_use]
    pub fn new(metadata: PropertyMetadata<Instance<T>>) -> Self {
        Self::build(metadata, None)
    }

    /// A list property that also observes the properties of each element
    /// through `visitor`.
    #[must_use]
    pub fn observing(
        metadata: PropertyMetadata<Instance<T>>,
        visitor: impl Fn(&T, &mut dyn FnMut(&dyn SubtreeNode)) + Send + Sync + 'static,
    ) -> Self {
        Self::build(metadata, Some(Arc::new(visitor)))
    }

    fn build(metadata: PropertyMetadata<Instance<T>>, elements: Option<Arc<ElementVisitor<T>>>) -> Self {
        let name = metadata.name().map(str::to_owned);
        let dispatcher = metadata.dispatcher().cloned();
        let property = Property::with_equality(metadata, same_list::<T>);
        let size = Property::derived(
            derived_metadata(name.as_deref(), "size", 0, dispatcher.as_ref()),
            <usize as PartialEq>::eq,
        );
        let empty = Property::derived(
            derived_metadata(name.as_deref(), "empty", true, dispatcher.as_ref()),
            <bool as PartialEq>::eq,
        );
        let shared = Arc::new(ListShared {
            owner: property.downgrade(),
            listeners: Registry::new(),
            size,
            empty,
            forward: Mutex::new(None),
            rewire: Mutex::new(None),
            content: Mutex::new(None),
            elements,
            members: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&shared);
        let hook: ChangeHook<Instance<T>> = Arc::new(move |old: &Instance<T>, new: &Instance<T>| {
            if let Some(shared) = weak.upgrade() {
                shared.attach(old.as_ref(), new.as_ref());
            }
        });
        *shared.rewire.lock() = Some(property.add_hook(hook));
        shared.attach(None, property.get_uncritical().as_ref());

        Self { property, shared }
    }

    /// A list property holding a new list with `items`.
    #[must_use]
    pub fn with_items(items: Vec<T>) -> Self {
        Self::new(
            PropertyMetadata::builder()
                .initial_value(Some(ObservableList::from_vec(items)))
                .build(),
        )
    }

    #[must_use]
    pub fn property(&self) -> &Property<Instance<T>> {
        &self.property
    }

    /// Lock the current list for a batch of edits.
    ///
    /// Checks thread affinity. Without a list the view is detached: it reads
    /// as empty and drops writes.
    pub fn lock(&self) -> Result<LockedList<T>> {
        let label = self.property.name();
        Ok(match self.property.try_get()? {
            Some(list) => list.lock_labeled(label),
            None => LockedList::detached(label),
        })
    }

    /// Number of items in the current list (0 without a list).
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.current().map_or(0, |list| list.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.shared.current().map(|list| list.to_vec()).unwrap_or_default()
    }

    /// Append one item in its own lock scope.
    pub fn add(&self, item: T) -> Result<()> {
        self.lock()?.add(item)
    }

    pub fn insert(&self, index: usize, item: T) -> Result<()> {
        self.lock()?.insert(index, item)
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.lock()?.extend(items)
    }

    pub fn remove_at(&self, index: usize) -> Result<T> {
        self.lock()?.remove_at(index)
    }

    pub fn replace_at(&self, index: usize, item: T) -> Result<T> {
        self.lock()?.replace_at(index, item)
    }

    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear()
    }

    pub fn add_list_change_listener(
        &self,
        listener: impl Fn(&ListChange<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.listeners.register(Arc::new(listener), None)
    }

    /// Like [`ListProperty::add_list_change_listener`], delivered on `dispatcher`.
    pub fn add_list_change_listener_on(
        &self,
        dispatcher: Dispatcher,
        listener: impl Fn(&ListChange<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared
            .listeners
            .register(Arc::new(listener), Some(dispatcher))
    }

    /// Read-only item count of the current list.
    #[must_use]
    pub fn size_property(&self) -> Property<usize> {
        self.shared.size.clone()
    }

    /// Read-only emptiness of the current list; `true` without a list.
    #[must_use]
    pub fn empty_property(&self) -> Property<bool> {
        self.shared.empty.clone()
    }

    /// Mirror the contents of `source` into this property's list.
    ///
    /// The current source contents replace the target contents, then every
    /// source edit is replayed. Replaces any previous content binding.
    pub fn bind_content<S>(&self, source: &S) -> Result<()>
    where
        S: ListSource<T> + ?Sized,
    {
        self.property.check_bind_target()?;
        self.unbind_content();

        let target = self.property.downgrade();
        let hook: Arc<ListChangeFn<T>> = {
            let target = target.clone();
            Arc::new(move |change: &ListChange<T>| {
                let change = change.clone();
                pump(&target, move |p| replay(p, |view| view.apply(&change)));
            })
        };
        let init: SnapshotFn<T> = Box::new(move |items: Vec<T>| {
            pump(&target, move |p| replay(p, |view| view.replace_all(items)));
        });
        let subscription = source.observe_content(init, hook);
        *self.shared.content.lock() = Some(subscription);
        Ok(())
    }

    /// Mirror `source` through a converter, one target element per source
    /// element.
    ///
    /// Added source elements are converted; removed or replaced ones release
    /// their converted counterpart with `remove`. Tearing the binding down
    /// (`unbind_content`, a new content binding, or dropping this property)
    /// clears the mirrored elements and releases each of them.
    pub fn bind_content_with<S, Src, C>(&self, source: &Src, converter: C) -> Result<()>
    where
        S: PropertyValue,
        Src: ListSource<S> + ?Sized,
        C: LifecycleValueConverter<S, T>,
    {
        self.property.check_bind_target()?;
        self.unbind_content();

        let content = Arc::new(ConvertedContent {
            converter,
            mirrored: Mutex::new(Some(Vec::new())),
            _source: PhantomData,
        });
        let target = self.property.downgrade();
        let hook: Arc<ListChangeFn<S>> = {
            let (target, content) = (target.clone(), Arc::clone(&content));
            Arc::new(move |change: &ListChange<S>| {
                let (change, content) = (change.clone(), Arc::clone(&content));
                pump(&target, move |p| content.apply(p, &change));
            })
        };
        let init: SnapshotFn<S> = {
            let (target, content) = (target.clone(), Arc::clone(&content));
            Box::new(move |items: Vec<S>| {
                pump(&target, move |p| content.reset(p, &items));
            })
        };
        let subscription = source.observe_content(init, hook);
        let teardown = Subscription::new(ContentTeardown { content, target });
        *self.shared.content.lock() = Some(Subscription::combine([subscription, teardown]));
        Ok(())
    }

    /// Stop mirroring. Plain content bindings keep the current contents.
    pub fn unbind_content(&self) {
        let previous = self.shared.content.lock().take();
        drop(previous);
    }

    #[must_use]
    pub fn is_content_bound(&self) -> bool {
        self.shared.content.lock().is_some()
    }
}

impl<B: PropertyObject> ListProperty<Arc<B>> {
    /// A list of objects whose own properties are observed, like the value
    /// of an [`ObjectProperty`](crate::ObjectProperty).
    #[must_use]
    pub fn of_objects(metadata: PropertyMetadata<Instance<Arc<B>>>) -> Self {
        Self::observing(metadata, |item: &Arc<B>, visit| item.visit_properties(visit))
    }
}

/// Elements created by a converting content binding, in target order.
struct ConvertedContent<S: PropertyValue, T: PropertyValue, C: LifecycleValueConverter<S, T>> {
    converter: C,
    /// `None` once the binding is torn down.
    mirrored: Mutex<Option<Vec<T>>>,
    _source: PhantomData<fn(S)>,
}

impl<S: PropertyValue, T: PropertyValue, C: LifecycleValueConverter<S, T>> ConvertedContent<S, T, C> {
    fn reset(&self, target: &Property<Instance<T>>, items: &[S]) {
        let mut guard = self.mirrored.lock();
        let Some(mirrored) = guard.as_mut() else {
            return;
        };
        let Some(list) = target.get_uncritical() else {
            debug!(property = %target.name(), "content binding target has no list; snapshot dropped");
            return;
        };
        let converted: Vec<T> = items.iter().map(|item| self.converter.convert(item)).collect();
        let stale = std::mem::replace(mirrored, converted.clone());
        {
            let mut view = list.lock_labeled(target.name());
            if let Err(err) = view.replace_all(converted) {
                warn!(property = %target.name(), error = %err, "content binding update failed");
            }
        }
        drop(guard);
        for item in &stale {
            self.converter.remove(item);
        }
    }

    fn apply(&self, target: &Property<Instance<T>>, change: &ListChange<S>) {
        let mut guard = self.mirrored.lock();
        let Some(mirrored) = guard.as_mut() else {
            return;
        };
        let Some(list) = target.get_uncritical() else {
            debug!(property = %target.name(), "content binding target has no list; change dropped");
            return;
        };
        let mut released = Vec::new();
        {
            let mut view = list.lock_labeled(target.name());
            for edit in change.edits() {
                let result = match edit {
                    ListEdit::Added { index, item } => {
                        let at = (*index).min(mirrored.len());
                        let converted = self.converter.convert(item);
                        mirrored.insert(at, converted.clone());
                        view.insert(at, converted)
                    }
                    ListEdit::Removed { index, .. } if *index < mirrored.len() => {
                        released.push(mirrored.remove(*index));
                        view.remove_at(*index).map(drop)
                    }
                    ListEdit::Replaced { index, new, .. } if *index < mirrored.len() => {
                        let converted = self.converter.convert(new);
                        released.push(std::mem::replace(&mut mirrored[*index], converted.clone()));
                        view.replace_at(*index, converted).map(drop)
                    }
                    _ => Ok(()),
                };
                if let Err(err) = result {
                    warn!(property = %target.name(), error = %err, "content binding update failed");
                }
            }
        }
        drop(guard);
        for item in &released {
            self.converter.remove(item);
        }
    }
}

/// Releases the elements of a converting content binding when dropped.
struct ContentTeardown<S: PropertyValue, T: PropertyValue, C: LifecycleValueConverter<S, T>> {
    content: Arc<ConvertedContent<S, T, C>>,
    target: WeakProperty<Instance<T>>,
}

impl<S: PropertyValue, T: PropertyValue, C: LifecycleValueConverter<S, T>> Drop for ContentTeardown<S, T, C> {
    fn drop(&mut self) {
        let Some(mirrored) = self.content.mirrored.lock().take() else {
            return;
        };
        if let Some(target) = self.target.upgrade()
            && let Some(list) = target.get_uncritical()
        {
            let mut view = list.lock_labeled(target.name());
            if let Err(err) = view.clear() {
                warn!(property = %target.name(), error = %err, "content binding teardown could not clear the target");
            }
        }
        for item in &mirrored {
            self.content.converter.remove(item);
        }
    }
}

fn replay<T: PropertyValue>(
    target: &Property<Instance<T>>,
    edit: impl FnOnce(&mut LockedList<T>) -> Result<()>,
) {
    let Some(list) = target.get_uncritical() else {
        debug!(property = %target.name(), "content binding target has no list; change dropped");
        return;
    };
    let mut view = list.lock_labeled(target.name());
    if let Err(err) = edit(&mut view) {
        warn!(property = %target.name(), error = %err, "content binding update failed");
    }
}

impl<T: PropertyValue> ListSource<T> for ListProperty<T> {
    fn observe_content(&self, init: SnapshotFn<T>, hook: Arc<ListChangeFn<T>>) -> Subscription {
        let list = self.shared.current();
        let view = list.as_ref().map(ObservableList::lock);
        let subscription = self
            .shared
            .listeners
            .register(hook, Some(Dispatcher::immediate()));
        init(view.as_ref().map(LockedList::to_vec).unwrap_or_default());
        drop(view);
        subscription
    }
}

impl<T: PropertyValue> Default for ListProperty<T> {
    fn default() -> Self {
        Self::new(PropertyMetadata::default())
    }
}

impl<T: PropertyValue> Clone for ListProperty<T> {
    fn clone(&self) -> Self {
        Self {
            property: self.property.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: PropertyValue> Deref for ListProperty<T> {
    type Target = Property<Instance<T>>;

    fn deref(&self) -> &Self::Target {
        &self.property
    }
}

impl<T: PropertyValue> Lockable for ListProperty<T> {
    fn consistency_group(&self) -> &ConsistencyGroup {
        self.property.consistency_group()
    }
}

impl<T: PropertyValue> SubtreeNode for ListProperty<T> {
    fn attach_parent(&self, parent: Arc<TreeFn>) -> Subscription {
        self.property.add_tree_parent(parent)
    }

    fn validate_subtree(&self) {
        self.shared.validate_elements();
    }
}

impl<T: PropertyValue + fmt::Debug> fmt::Debug for ListProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListProperty")
            .field("name", &self.property.name())
            .field("items", &self.to_vec())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn count_changes(list: &ListProperty<i32>) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = list.add_list_change_listener(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn each_unlocked_add_is_its_own_batch() {
        let list = ListProperty::with_items(Vec::new());
        let (count, _sub) = count_changes(&list);
        list.add(1).unwrap();
        list.add(2).unwrap();
        list.add(3).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn size_and_empty_follow_contents() {
        let list = ListProperty::with_items(vec![1]);
        assert_eq!(list.size_property().get(), 1);
        assert!(!list.empty_property().get());
        list.clear().unwrap();
        assert_eq!(list.size_property().get(), 0);
        assert!(list.empty_property().get());
        assert!(list.size_property().set(4).is_err());
    }

    #[test]
    fn replacing_the_list_reports_a_reset() {
        let list = ListProperty::with_items(vec![1, 2]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = list.add_list_change_listener(move |change| {
            s.lock().push((change.removed().count(), change.added().count()));
        });
        list.set(Some(ObservableList::from_vec(vec![7, 8, 9]))).unwrap();
        assert_eq!(*seen.lock(), vec![(2, 0), (0, 3)]);
        assert_eq!(list.size_property().get(), 3);
    }

    #[test]
    fn old_list_is_no_longer_forwarded() {
        let old = ObservableList::from_vec(vec![1]);
        let list: ListProperty<i32> = ListProperty::new(PropertyMetadata::builder().initial_value(Some(old.clone())).build());
        list.set(Some(ObservableList::new())).unwrap();
        let (count, _sub) = count_changes(&list);
        old.add(2).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_list_gives_detached_view() {
        let list: ListProperty<i32> = ListProperty::default();
        assert!(list.lock().unwrap().is_detached());
        list.add(1).unwrap();
        assert!(list.is_empty());
        assert!(list.empty_property().get());
    }

    #[test]
    fn content_binding_mirrors_source() {
        let source = ListProperty::with_items(vec![1]);
        let target = ListProperty::with_items(vec![5, 6]);
        target.bind_content(&source).unwrap();
        assert_eq!(target.to_vec(), vec![1]);
        source.add(2).unwrap();
        source.remove_at(0).unwrap();
        assert_eq!(target.to_vec(), vec![2]);

        target.unbind_content();
        source.add(3).unwrap();
        assert_eq!(target.to_vec(), vec![2]);
    }
}
