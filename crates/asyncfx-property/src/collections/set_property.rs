#![forbid(unsafe_code)]

//! A property holding an [`ObservableSet`].

use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use asyncfx_dispatch::Dispatcher;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::binding::pump;
use crate::collections::change::{SetChange, SetEdit};
use crate::collections::list_property::derived_metadata;
use crate::collections::set::{LockedSet, ObservableSet, SetChangeFn, SetSnapshotFn, SetSource, SetValue};
use crate::critical::{ConsistencyGroup, Lockable};
use crate::error::Result;
use crate::listener::{ChangeHook, Registry, Subscription, deliver};
use crate::metadata::PropertyMetadata;
use crate::object::{SubtreeNode, TreeEvent, TreeFn};
use crate::property::{Property, WeakProperty};

type Instance<T> = Option<ObservableSet<T>>;

fn same_set<T: SetValue>(a: &Instance<T>, b: &Instance<T>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.ptr_eq(b),
        (None, None) => true,
        _ => false,
    }
}

struct SetShared<T: SetValue> {
    owner: WeakProperty<Instance<T>>,
    listeners: Registry<SetChangeFn<T>>,
    size: Property<usize>,
    empty: Property<bool>,
    forward: Mutex<Option<Subscription>>,
    rewire: Mutex<Option<Subscription>>,
    content: Mutex<Option<Subscription>>,
}

impl<T: SetValue> SetShared<T> {
    fn current(&self) -> Instance<T> {
        self.owner.upgrade().and_then(|p| p.get_uncritical())
    }

    fn attach(self: &Arc<Self>, old: Option<&ObservableSet<T>>, new: Option<&ObservableSet<T>>) {
        let forward = new.map(|set| {
            let shared = Arc::downgrade(self);
            set.add_listener(move |change| {
                if let Some(shared) = shared.upgrade() {
                    shared.forward(change);
                }
            })
        });
        let previous = std::mem::replace(&mut *self.forward.lock(), forward);
        drop(previous);

        let removed: Vec<SetEdit<T>> = old
            .map(ObservableSet::to_set)
            .unwrap_or_default()
            .into_iter()
            .map(SetEdit::Removed)
            .collect();
        let added: Vec<SetEdit<T>> = new
            .map(ObservableSet::to_set)
            .unwrap_or_default()
            .into_iter()
            .map(SetEdit::Added)
            .collect();
        for edits in [removed, added] {
            if !edits.is_empty() {
                self.fire(SetChange::new(edits));
            }
        }
        self.refresh_counts();
    }

    fn forward(self: &Arc<Self>, change: &SetChange<T>) {
        self.fire(change.clone());
        self.refresh_counts();
        if let Some(owner) = self.owner.upgrade()
            && !owner.metadata().is_root()
        {
            owner.inner.emit_tree(TreeEvent::Invalidated);
            owner.inner.emit_tree(TreeEvent::Changed);
        }
    }

    fn fire(&self, change: SetChange<T>) {
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
            let len = shared.current().map_or(0, |set| set.len());
            let results = [
                size.write_internal(len, false, None),
                shared.empty.write_internal(len == 0, false, None),
            ];
            for err in results.into_iter().filter_map(|r| r.err()) {
                warn!(error = %err, "failed to update set size");
            }
        });
    }
}

/// A property whose value is an observable set.
pub struct SetProperty<T: SetValue> {
    property: Property<Instance<T>>,
    shared: Arc<SetShared<T>>,
}

impl<T: SetValue> SetProperty<T> {
    #[must_use]
    pub fn new(metadata: PropertyMetadata<Instance<T>>) -> Self {
        let name = metadata.name().map(str::to_owned);
        let dispatcher = metadata.dispatcher().cloned();
        let property = Property::with_equality(metadata, same_set::<T>);
        let size = Property::derived(
            derived_metadata(name.as_deref(), "size", 0, dispatcher.as_ref()),
            <usize as PartialEq>::eq,
        );
        let empty = Property::derived(
            derived_metadata(name.as_deref(), "empty", true, dispatcher.as_ref()),
            <bool as PartialEq>::eq,
        );
        let shared = Arc::new(SetShared {
            owner: property.downgrade(),
            listeners: Registry::new(),
            size,
            empty,
            forward: Mutex::new(None),
            rewire: Mutex::new(None),
            content: Mutex::new(None),
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

    #[must_use]
    pub fn with_items(items: impl IntoIterator<Item = T>) -> Self {
        Self::new(
            PropertyMetadata::builder()
                .initial_value(Some(ObservableSet::from_set(items.into_iter().collect())))
                .build(),
        )
    }

    #[must_use]
    pub fn property(&self) -> &Property<Instance<T>> {
        &self.property
    }

    /// Lock the current set; detached when there is none.
    pub fn lock(&self) -> Result<LockedSet<T>> {
        let label = self.property.name();
        Ok(match self.property.try_get()? {
            Some(set) => set.lock_labeled(label),
            None => LockedSet::detached(label),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.current().map_or(0, |set| set.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.shared.current().is_some_and(|set| set.contains(item))
    }

    #[must_use]
    pub fn to_set(&self) -> HashSet<T> {
        self.shared.current().map(|set| set.to_set()).unwrap_or_default()
    }

    pub fn insert(&self, item: T) -> Result<bool> {
        self.lock()?.insert(item)
    }

    pub fn remove(&self, item: &T) -> Result<bool> {
        self.lock()?.remove(item)
    }

    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear()
    }

    pub fn add_set_change_listener(&self, listener: impl Fn(&SetChange<T>) + Send + Sync + 'static) -> Subscription {
        self.shared.listeners.register(Arc::new(listener), None)
    }

    pub fn add_set_change_listener_on(
        &self,
        dispatcher: Dispatcher,
        listener: impl Fn(&SetChange<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared
            .listeners
            .register(Arc::new(listener), Some(dispatcher))
    }

    #[must_use]
    pub fn size_property(&self) -> Property<usize> {
        self.shared.size.clone()
    }

    #[must_use]
    pub fn empty_property(&self) -> Property<bool> {
        self.shared.empty.clone()
    }

    /// Mirror the contents of `source` into this property's set.
    pub fn bind_content<S>(&self, source: &S) -> Result<()>
    where
        S: SetSource<T> + ?Sized,
    {
        self.property.check_bind_target()?;
        self.unbind_content();

        let target = self.property.downgrade();
        let hook: Arc<SetChangeFn<T>> = {
            let target = target.clone();
            Arc::new(move |change: &SetChange<T>| {
                let change = change.clone();
                pump(&target, move |p| replay(p, |view| view.apply(&change)));
            })
        };
        let init: SetSnapshotFn<T> = Box::new(move |items: HashSet<T>| {
            pump(&target, move |p| replay(p, |view| view.replace_all(items)));
        });
        let subscription = source.observe_content(init, hook);
        *self.shared.content.lock() = Some(subscription);
        Ok(())
    }

    pub fn unbind_content(&self) {
        let previous = self.shared.content.lock().take();
        drop(previous);
    }

    #[must_use]
    pub fn is_content_bound(&self) -> bool {
        self.shared.content.lock().is_some()
    }
}

fn replay<T: SetValue>(target: &Property<Instance<T>>, edit: impl FnOnce(&mut LockedSet<T>) -> Result<()>) {
    let Some(set) = target.get_uncritical() else {
        debug!(property = %target.name(), "content binding target has no set; change dropped");
        return;
    };
    let mut view = set.lock_labeled(target.name());
    if let Err(err) = edit(&mut view) {
        warn!(property = %target.name(), error = %err, "content binding update failed");
    }
}

impl<T: SetValue> SetSource<T> for SetProperty<T> {
    fn observe_content(&self, init: SetSnapshotFn<T>, hook: Arc<SetChangeFn<T>>) -> Subscription {
        let set = self.shared.current();
        let view = set.as_ref().map(ObservableSet::lock);
        let subscription = self
            .shared
            .listeners
            .register(hook, Some(Dispatcher::immediate()));
        init(view.as_ref().map(LockedSet::to_set).unwrap_or_default());
        drop(view);
        subscription
    }
}

impl<T: SetValue> Default for SetProperty<T> {
    fn default() -> Self {
        Self::new(PropertyMetadata::default())
    }
}

impl<T: SetValue> Clone for SetProperty<T> {
    fn clone(&self) -> Self {
        Self {
            property: self.property.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: SetValue> Deref for SetProperty<T> {
    type Target = Property<Instance<T>>;

    fn deref(&self) -> &Self::Target {
        &self.property
    }
}

impl<T: SetValue> Lockable for SetProperty<T> {
    fn consistency_group(&self) -> &ConsistencyGroup {
        self.property.consistency_group()
    }
}

impl<T: SetValue> SubtreeNode for SetProperty<T> {
    fn attach_parent(&self, parent: Arc<TreeFn>) -> Subscription {
        self.property.add_tree_parent(parent)
    }
}

impl<T: SetValue + fmt::Debug> fmt::Debug for SetProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetProperty")
            .field("name", &self.property.name())
            .field("items", &self.to_set())
            .finish()
    }
}
