#![forbid(unsafe_code)]

//! Observable sets and their locked views.
//!
//! Same locking and batching rules as lists: edits made through a
//! [`LockedSet`] are delivered as same-kind batches when the view drops.
//! Inserting a present element or removing an absent one records nothing.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use asyncfx_dispatch::Dispatcher;
use parking_lot::RwLock;
use tracing::debug;

use crate::collections::change::{Batcher, SetChange, SetEdit};
use crate::collections::list::NEXT_COLLECTION_ID;
use crate::collections::lock::{CollectionLock, LockMode, ReleaseOnDrop};
use crate::critical;
use crate::error::{PropertyError, Result};
use crate::listener::{Registry, Subscription, deliver};
use crate::property::PropertyValue;

/// Element types a set can hold.
pub trait SetValue: PropertyValue + Eq + Hash {}

impl<T: PropertyValue + Eq + Hash> SetValue for T {}

pub type SetChangeFn<T> = dyn Fn(&SetChange<T>) + Send + Sync;

/// One-shot receiver of a set snapshot.
pub type SetSnapshotFn<T> = Box<dyn FnOnce(HashSet<T>) + Send>;

/// Something a set can mirror through a content binding.
pub trait SetSource<T>: Send + Sync {
    fn observe_content(&self, init: SetSnapshotFn<T>, hook: Arc<SetChangeFn<T>>) -> Subscription;
}

struct SetInner<T> {
    id: u64,
    lock: CollectionLock,
    items: RwLock<HashSet<T>>,
    listeners: Registry<SetChangeFn<T>>,
}

/// A shared, lockable set with change notification.
pub struct ObservableSet<T: SetValue> {
    inner: Arc<SetInner<T>>,
}

impl<T: SetValue> ObservableSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::from_set(HashSet::new())
    }

    #[must_use]
    pub fn from_set(items: HashSet<T>) -> Self {
        Self {
            inner: Arc::new(SetInner {
                id: NEXT_COLLECTION_ID.fetch_add(1, Ordering::Relaxed),
                lock: CollectionLock::new(),
                items: RwLock::new(items),
                listeners: Registry::new(),
            }),
        }
    }

    pub fn lock(&self) -> LockedSet<T> {
        self.lock_labeled(format!("set#{}", self.inner.id))
    }

    pub(crate) fn lock_labeled(&self, label: String) -> LockedSet<T> {
        let mode = self.inner.lock.acquire();
        LockedSet {
            set: Some(self.clone()),
            mode,
            label,
            batcher: Batcher::new(),
            _not_send: PhantomData,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.items.read().is_empty()
    }

    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.inner.items.read().contains(item)
    }

    #[must_use]
    pub fn to_set(&self) -> HashSet<T> {
        self.inner.items.read().clone()
    }

    pub fn insert(&self, item: T) -> Result<bool> {
        self.lock().insert(item)
    }

    pub fn remove(&self, item: &T) -> Result<bool> {
        self.lock().remove(item)
    }

    pub fn add_listener(&self, listener: impl Fn(&SetChange<T>) + Send + Sync + 'static) -> Subscription {
        self.inner.listeners.register(Arc::new(listener), None)
    }

    pub fn add_listener_on(
        &self,
        dispatcher: Dispatcher,
        listener: impl Fn(&SetChange<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.listeners.register(Arc::new(listener), Some(dispatcher))
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn fire(&self, change: SetChange<T>) {
        let change = Arc::new(change);
        for (listener, dispatcher) in self.inner.listeners.snapshot() {
            let change = Arc::clone(&change);
            deliver(dispatcher.as_ref(), move || listener(&change));
        }
    }
}

impl<T: SetValue> SetSource<T> for ObservableSet<T> {
    fn observe_content(&self, init: SetSnapshotFn<T>, hook: Arc<SetChangeFn<T>>) -> Subscription {
        let mode = self.inner.lock.acquire();
        let _release = mode.owns().then(|| ReleaseOnDrop(&self.inner.lock));
        let subscription = self.inner.listeners.register(hook, None);
        init(self.to_set());
        subscription
    }
}

impl<T: SetValue> Default for ObservableSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SetValue> Clone for ObservableSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SetValue> PartialEq for ObservableSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: SetValue + fmt::Debug> fmt::Debug for ObservableSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableSet")
            .field("id", &self.inner.id)
            .field("items", &*self.inner.items.read())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LockedSet
// ---------------------------------------------------------------------------

/// Exclusive, batching view of an [`ObservableSet`].
#[must_use = "edits are published when the locked view is dropped"]
pub struct LockedSet<T: SetValue> {
    set: Option<ObservableSet<T>>,
    mode: LockMode,
    label: String,
    batcher: Batcher<SetEdit<T>>,
    _not_send: PhantomData<*const ()>,
}

impl<T: SetValue> LockedSet<T> {
    pub(crate) fn detached(label: String) -> Self {
        Self {
            set: None,
            mode: LockMode::ReadOnly,
            label,
            batcher: Batcher::new(),
            _not_send: PhantomData,
        }
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.set.is_some() && !self.mode.owns()
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.set.is_none()
    }

    fn edit<R>(&mut self, apply: impl FnOnce(&mut HashSet<T>, &mut Batcher<SetEdit<T>>) -> R) -> Result<R> {
        match &self.set {
            Some(_) if self.mode == LockMode::ReadOnly => Err(PropertyError::ReadOnlyView {
                collection: self.label.clone(),
            }),
            Some(_) if self.mode == LockMode::Nested => Err(PropertyError::NestedLock {
                collection: self.label.clone(),
            }),
            Some(set) => Ok(apply(&mut set.inner.items.write(), &mut self.batcher)),
            None => {
                debug!(collection = %self.label, "no backing set; edit dropped");
                Ok(apply(&mut HashSet::new(), &mut Batcher::new()))
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.set.as_ref().map_or(0, ObservableSet::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.set.as_ref().is_some_and(|s| s.contains(item))
    }

    #[must_use]
    pub fn to_set(&self) -> HashSet<T> {
        self.set.as_ref().map(ObservableSet::to_set).unwrap_or_default()
    }

    /// Insert `item`; `false` when it was already present.
    pub fn insert(&mut self, item: T) -> Result<bool> {
        self.edit(|items, batch| {
            let inserted = items.insert(item.clone());
            if inserted {
                batch.push(SetEdit::Added(item));
            }
            inserted
        })
    }

    /// Remove `item`; `false` when it was absent.
    pub fn remove(&mut self, item: &T) -> Result<bool> {
        self.edit(|items, batch| match items.take(item) {
            Some(removed) => {
                batch.push(SetEdit::Removed(removed));
                true
            }
            None => false,
        })
    }

    pub fn clear(&mut self) -> Result<()> {
        self.edit(|items, batch| {
            for item in items.drain() {
                batch.push(SetEdit::Removed(item));
            }
        })
    }

    /// Replace the contents with `items`, recording only the difference.
    pub fn replace_all(&mut self, new_items: HashSet<T>) -> Result<()> {
        self.edit(|items, batch| {
            let stale: Vec<T> = items.difference(&new_items).cloned().collect();
            for item in stale {
                items.remove(&item);
                batch.push(SetEdit::Removed(item));
            }
            for item in new_items {
                if items.insert(item.clone()) {
                    batch.push(SetEdit::Added(item));
                }
            }
        })
    }

    /// Replay a change observed on another set.
    pub fn apply(&mut self, change: &SetChange<T>) -> Result<()> {
        self.edit(|items, batch| {
            for edit in change.edits() {
                match edit {
                    SetEdit::Added(item) => {
                        if items.insert(item.clone()) {
                            batch.push(SetEdit::Added(item.clone()));
                        }
                    }
                    SetEdit::Removed(item) => {
                        if items.remove(item) {
                            batch.push(SetEdit::Removed(item.clone()));
                        }
                    }
                }
            }
        })
    }
}

impl<T: SetValue> Drop for LockedSet<T> {
    fn drop(&mut self) {
        let Some(set) = self.set.take() else {
            return;
        };
        if !self.mode.owns() {
            return;
        }
        let _release = ReleaseOnDrop(&set.inner.lock);
        let batches = self.batcher.take();
        set.inner.lock.delivering(|| {
            critical::tick(|| {
                for edits in batches {
                    set.fire(SetChange::new(edits));
                }
            });
        });
    }
}

impl<T: SetValue> fmt::Debug for LockedSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedSet")
            .field("label", &self.label)
            .field("read_only", &self.is_read_only())
            .finish()
    }
}
