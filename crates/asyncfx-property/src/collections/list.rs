#![forbid(unsafe_code)]

//! Observable lists and their locked views.
//!
//! All mutation goes through a [`LockedList`]. The view owns the list's
//! collection lock for its lifetime; edits are recorded and delivered as
//! same-kind batches when the view is dropped, while the lock is still held.
//!
//! # Invariants
//!
//! 1. Listeners see batches in edit order, one batch per run of same-kind
//!    edits within a lock scope.
//! 2. A listener that locks the list again on the notifying thread gets a
//!    read-only view; mutating through it fails with
//!    [`PropertyError::ReadOnlyView`]. Locking again on the owning thread
//!    outside of delivery gives a view whose edits fail with
//!    [`PropertyError::NestedLock`].
//! 3. Snapshots taken for content bindings are registered atomically with
//!    their listener, so no edit is lost or seen twice.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use asyncfx_dispatch::Dispatcher;
use parking_lot::RwLock;
use tracing::debug;

use crate::collections::change::{Batcher, ListChange, ListEdit};
use crate::collections::lock::{CollectionLock, LockMode, ReleaseOnDrop};
use crate::critical;
use crate::error::{PropertyError, Result};
use crate::listener::{Registry, Subscription, deliver};
use crate::property::PropertyValue;

pub(crate) static NEXT_COLLECTION_ID: AtomicU64 = AtomicU64::new(1);

/// List change callback.
pub type ListChangeFn<T> = dyn Fn(&ListChange<T>) + Send + Sync;

/// One-shot receiver of a content snapshot.
pub type SnapshotFn<T> = Box<dyn FnOnce(Vec<T>) + Send>;

/// Something a list can mirror through a content binding.
pub trait ListSource<T>: Send + Sync {
    /// Hand the current contents to `init` and register `hook` for every later
    /// change, without letting an edit slip in between.
    fn observe_content(&self, init: SnapshotFn<T>, hook: Arc<ListChangeFn<T>>) -> Subscription;
}

struct ListInner<T> {
    id: u64,
    lock: CollectionLock,
    items: RwLock<Vec<T>>,
    listeners: Registry<ListChangeFn<T>>,
}

impl<T: PropertyValue> ListInner<T> {
    fn fire(&self, change: ListChange<T>) {
        let change = Arc::new(change);
        for (listener, dispatcher) in self.listeners.snapshot() {
            let change = Arc::clone(&change);
            deliver(dispatcher.as_ref(), move || listener(&change));
        }
    }
}

/// A shared, lockable list with change notification.
pub struct ObservableList<T: PropertyValue> {
    inner: Arc<ListInner<T>>,
}

impl<T: PropertyValue> ObservableList<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    #[must_use]
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            inner: Arc::new(ListInner {
                id: NEXT_COLLECTION_ID.fetch_add(1, Ordering::Relaxed),
                lock: CollectionLock::new(),
                items: RwLock::new(items),
                listeners: Registry::new(),
            }),
        }
    }

    /// Lock the list for a batch of edits, blocking while another thread
    /// holds it.
    pub fn lock(&self) -> LockedList<T> {
        self.lock_labeled(format!("list#{}", self.inner.id))
    }

    pub(crate) fn lock_labeled(&self, label: String) -> LockedList<T> {
        let mode = self.inner.lock.acquire();
        LockedList {
            list: Some(self.clone()),
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
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.items.read().get(index).cloned()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.items.read().clone()
    }

    /// Append one item in its own lock scope.
    pub fn add(&self, item: T) -> Result<()> {
        self.lock().add(item)
    }

    pub fn remove_at(&self, index: usize) -> Result<T> {
        self.lock().remove_at(index)
    }

    pub fn clear(&self) -> Result<()> {
        self.lock().clear()
    }

    pub fn add_listener(&self, listener: impl Fn(&ListChange<T>) + Send + Sync + 'static) -> Subscription {
        self.inner.listeners.register(Arc::new(listener), None)
    }

    /// Like [`ObservableList::add_listener`], delivered on `dispatcher`.
    pub fn add_listener_on(
        &self,
        dispatcher: Dispatcher,
        listener: impl Fn(&ListChange<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.listeners.register(Arc::new(listener), Some(dispatcher))
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: PropertyValue> ListSource<T> for ObservableList<T> {
    fn observe_content(&self, init: SnapshotFn<T>, hook: Arc<ListChangeFn<T>>) -> Subscription {
        let mode = self.inner.lock.acquire();
        let _release = mode.owns().then(|| ReleaseOnDrop(&self.inner.lock));
        let subscription = self.inner.listeners.register(hook, None);
        init(self.to_vec());
        subscription
    }
}

impl<T: PropertyValue> Default for ObservableList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PropertyValue> Clone for ObservableList<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: PropertyValue> PartialEq for ObservableList<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: PropertyValue + fmt::Debug> fmt::Debug for ObservableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableList")
            .field("id", &self.inner.id)
            .field("items", &*self.inner.items.read())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LockedList
// ---------------------------------------------------------------------------

/// Exclusive, batching view of an [`ObservableList`].
///
/// A detached view (a list property with no list) reads as empty and drops
/// every write.
#[must_use = "edits are published when the locked view is dropped"]
pub struct LockedList<T: PropertyValue> {
    list: Option<ObservableList<T>>,
    mode: LockMode,
    label: String,
    batcher: Batcher<ListEdit<T>>,
    _not_send: PhantomData<*const ()>,
}

impl<T: PropertyValue> LockedList<T> {
    pub(crate) fn detached(label: String) -> Self {
        Self {
            list: None,
            mode: LockMode::ReadOnly,
            label,
            batcher: Batcher::new(),
            _not_send: PhantomData,
        }
    }

    /// Whether this view was opened re-entrantly and rejects edits.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.list.is_some() && !self.mode.owns()
    }

    /// Whether there is no backing list.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.list.is_none()
    }

    fn edit<R>(&mut self, apply: impl FnOnce(&mut Vec<T>, &mut Batcher<ListEdit<T>>) -> Result<R>) -> Result<R> {
        match &self.list {
            Some(_) if self.mode == LockMode::ReadOnly => Err(PropertyError::ReadOnlyView {
                collection: self.label.clone(),
            }),
            Some(_) if self.mode == LockMode::Nested => Err(PropertyError::NestedLock {
                collection: self.label.clone(),
            }),
            Some(list) => {
                let mut items = list.inner.items.write();
                apply(&mut items, &mut self.batcher)
            }
            None => {
                debug!(collection = %self.label, "no backing list; edit dropped");
                apply(&mut Vec::new(), &mut Batcher::new())
            }
        }
    }

    fn read<R>(&self, read: impl FnOnce(&[T]) -> R) -> R {
        match &self.list {
            Some(list) => read(&list.inner.items.read()),
            None => read(&[]),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read(<[T]>::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read(<[T]>::is_empty)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.read(|items| items.get(index).cloned())
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.read(<[T]>::to_vec)
    }

    pub fn add(&mut self, item: T) -> Result<()> {
        self.edit(|items, batch| {
            batch.push(ListEdit::Added {
                index: items.len(),
                item: item.clone(),
            });
            items.push(item);
            Ok(())
        })
    }

    pub fn insert(&mut self, index: usize, item: T) -> Result<()> {
        self.edit(|items, batch| {
            if index > items.len() {
                return Err(PropertyError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            batch.push(ListEdit::Added {
                index,
                item: item.clone(),
            });
            items.insert(index, item);
            Ok(())
        })
    }

    pub fn extend(&mut self, new_items: impl IntoIterator<Item = T>) -> Result<()> {
        self.edit(|items, batch| {
            for item in new_items {
                batch.push(ListEdit::Added {
                    index: items.len(),
                    item: item.clone(),
                });
                items.push(item);
            }
            Ok(())
        })
    }

    pub fn remove_at(&mut self, index: usize) -> Result<T> {
        self.edit(|items, batch| {
            if index >= items.len() {
                return Err(PropertyError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            let item = items.remove(index);
            batch.push(ListEdit::Removed {
                index,
                item: item.clone(),
            });
            Ok(item)
        })
    }

    /// Replace the item at `index`, returning the previous one.
    pub fn replace_at(&mut self, index: usize, item: T) -> Result<T> {
        self.edit(|items, batch| {
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(PropertyError::IndexOutOfBounds { index, len })?;
            let old = std::mem::replace(slot, item.clone());
            batch.push(ListEdit::Replaced {
                index,
                old: old.clone(),
                new: item,
            });
            Ok(old)
        })
    }

    pub fn clear(&mut self) -> Result<()> {
        self.edit(|items, batch| {
            for item in items.drain(..) {
                batch.push(ListEdit::Removed { index: 0, item });
            }
            Ok(())
        })
    }

    /// Replace the whole contents: one removal batch, then one add batch.
    pub fn replace_all(&mut self, new_items: Vec<T>) -> Result<()> {
        self.clear()?;
        self.extend(new_items)
    }

    /// Replay a change observed on another list.
    pub fn apply(&mut self, change: &ListChange<T>) -> Result<()> {
        self.edit(|items, batch| {
            for edit in change.edits() {
                match edit {
                    ListEdit::Added { index, item } => {
                        let at = (*index).min(items.len());
                        items.insert(at, item.clone());
                        batch.push(ListEdit::Added {
                            index: at,
                            item: item.clone(),
                        });
                    }
                    ListEdit::Removed { index, .. } => {
                        if *index < items.len() {
                            let item = items.remove(*index);
                            batch.push(ListEdit::Removed { index: *index, item });
                        }
                    }
                    ListEdit::Replaced { index, new, .. } => {
                        if let Some(slot) = items.get_mut(*index) {
                            let old = std::mem::replace(slot, new.clone());
                            batch.push(ListEdit::Replaced {
                                index: *index,
                                old,
                                new: new.clone(),
                            });
                        }
                    }
                }
            }
            Ok(())
        })
    }
}

impl<T: PropertyValue + PartialEq> LockedList<T> {
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.read(|items| items.contains(item))
    }

    /// Remove the first occurrence of `item`; `false` when absent.
    pub fn remove_item(&mut self, item: &T) -> Result<bool> {
        self.edit(|items, batch| {
            let Some(index) = items.iter().position(|i| i == item) else {
                return Ok(false);
            };
            let removed = items.remove(index);
            batch.push(ListEdit::Removed { index, item: removed });
            Ok(true)
        })
    }
}

impl<T: PropertyValue> Drop for LockedList<T> {
    fn drop(&mut self) {
        let Some(list) = self.list.take() else {
            return;
        };
        if !self.mode.owns() {
            return;
        }
        let _release = ReleaseOnDrop(&list.inner.lock);
        let batches = self.batcher.take();
        list.inner.lock.delivering(|| {
            critical::tick(|| {
                for edits in batches {
                    list.inner.fire(ListChange::new(edits));
                }
            });
        });
    }
}

impl<T: PropertyValue> fmt::Debug for LockedList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedList")
            .field("label", &self.label)
            .field("read_only", &self.is_read_only())
            .field("detached", &self.is_detached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn record(list: &ObservableList<i32>) -> (Arc<Mutex<Vec<ListChange<i32>>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let sub = list.add_listener(move |change| log.lock().push(change.clone()));
        (seen, sub)
    }

    #[test]
    fn same_kind_edits_share_one_batch() {
        let list = ObservableList::new();
        let (seen, _sub) = record(&list);
        {
            let mut view = list.lock();
            view.add(1).unwrap();
            view.add(2).unwrap();
            view.add(3).unwrap();
        }
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].len(), 3);
    }

    #[test]
    fn kind_changes_split_batches() {
        let list = ObservableList::from_vec(vec![1, 2]);
        let (seen, _sub) = record(&list);
        {
            let mut view = list.lock();
            view.add(3).unwrap();
            view.remove_at(0).unwrap();
            view.add(4).unwrap();
            view.replace_at(0, 9).unwrap();
        }
        assert_eq!(seen.lock().len(), 4);
        assert_eq!(list.to_vec(), vec![9, 3, 4]);
    }

    #[test]
    fn nested_lock_in_listener_is_read_only() {
        let list = ObservableList::new();
        let outcome = Arc::new(Mutex::new(None));
        let (l, o) = (list.clone(), Arc::clone(&outcome));
        let _sub = list.add_listener(move |_| {
            let mut view = l.lock();
            let len = view.len();
            *o.lock() = Some((len, view.add(5)));
        });
        list.add(1).unwrap();
        let (len, result) = outcome.lock().take().unwrap();
        assert_eq!(len, 1);
        assert!(matches!(result, Err(PropertyError::ReadOnlyView { .. })));
        assert_eq!(list.to_vec(), vec![1]);
    }

    #[test]
    fn second_view_on_the_owning_thread_rejects_edits() {
        let list = ObservableList::new();
        let (seen, _sub) = record(&list);
        let mut outer = list.lock();
        outer.add(1).unwrap();
        {
            let mut inner = list.lock();
            assert_eq!(inner.len(), 1);
            assert_eq!(
                inner.add(2),
                Err(PropertyError::NestedLock {
                    collection: format!("list#{}", list.inner.id)
                })
            );
        }
        outer.add(3).unwrap();
        drop(outer);
        assert_eq!(list.to_vec(), vec![1, 3]);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn detached_view_drops_writes() {
        let mut view: LockedList<i32> = LockedList::detached("missing".into());
        view.add(1).unwrap();
        assert!(view.is_empty());
        assert_eq!(
            view.remove_at(0),
            Err(PropertyError::IndexOutOfBounds { index: 0, len: 0 })
        );
    }

    #[test]
    fn out_of_bounds_edits_are_rejected() {
        let list = ObservableList::from_vec(vec!['a']);
        let mut view = list.lock();
        assert_eq!(
            view.insert(3, 'b'),
            Err(PropertyError::IndexOutOfBounds { index: 3, len: 1 })
        );
        assert!(view.replace_at(1, 'c').is_err());
    }

    #[test]
    fn observe_content_snapshots_then_follows() {
        let list = ObservableList::from_vec(vec![1, 2]);
        let mirror = Arc::new(Mutex::new(Vec::new()));
        let (m1, m2) = (Arc::clone(&mirror), Arc::clone(&mirror));
        let hook: Arc<ListChangeFn<i32>> = Arc::new(move |change: &ListChange<i32>| change.apply_to(&mut m2.lock()));
        let _sub = list.observe_content(Box::new(move |items: Vec<i32>| *m1.lock() = items), hook);
        list.add(3).unwrap();
        list.remove_at(0).unwrap();
        assert_eq!(*mirror.lock(), vec![2, 3]);
    }

    #[test]
    fn listeners_run_while_lock_is_held() {
        let list = ObservableList::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let (l, i) = (list.clone(), Arc::clone(&inside));
        let _sub = list.add_listener(move |_| {
            if l.lock().is_read_only() {
                i.fetch_add(1, Ordering::SeqCst);
            }
        });
        list.add(1).unwrap();
        assert_eq!(inside.load(Ordering::SeqCst), 1);
    }
}
