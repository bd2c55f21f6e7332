#![forbid(unsafe_code)]

//! Consistency groups and critical sections.
//!
//! A [`ConsistencyGroup`] is a set of properties that must look mutually
//! consistent to every observer. Writes performed inside a
//! [`CriticalSection`] are staged and only published when the outermost
//! section on the thread exits, so no reader outside the section ever sees
//! some of the writes without the others.
//!
//! Properties without an explicit group get a private singleton group, so
//! locking them is equivalent to locking just that property.
//!
//! # Invariants
//!
//! 1. Group locks are acquired in ascending group id order and released in
//!    reverse order.
//! 2. A nested section may only name groups the outermost section already
//!    holds. Widening the lock set fails with
//!    [`PropertyError::SectionExtension`].
//! 3. On exit of the outermost section every touched property is committed
//!    once, with its final staged value, in first-write order. Notifications
//!    run after all group locks are released.
//! 4. A grouped property is neither readable nor writable outside a section
//!    holding its group (see [`Property::get_uncritical`] for the escape
//!    hatch).
//! 5. Notifications run inside a *tick*: the outermost unlocked write, the
//!    exit of the outermost section, or the drop of a collection view. Work
//!    deferred with [`at_tick_end`] runs once the outermost tick on the
//!    thread is over.
//!
//! # Failure Modes
//!
//! - Section exited by panic: staged values are committed and the locks are
//!   released, but listeners are not notified.
//!
//! [`Property::get_uncritical`]: crate::Property::get_uncritical

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{PropertyError, Result};

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// Deferred listener invocation produced by a commit.
pub(crate) type Notification = Box<dyn FnOnce() + Send>;

/// A property that can publish its staged value.
pub(crate) trait Commit: Send + Sync {
    fn commit(self: Arc<Self>) -> Option<Notification>;
}

// ---------------------------------------------------------------------------
// ConsistencyGroup
// ---------------------------------------------------------------------------

struct GroupLock {
    id: u64,
    name: String,
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

/// A named set of properties that are locked together.
#[derive(Clone)]
pub struct ConsistencyGroup {
    lock: Arc<GroupLock>,
}

impl ConsistencyGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            lock: Arc::new(GroupLock {
                id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                owner: Mutex::new(None),
                released: Condvar::new(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.lock.name
    }

    /// Process-unique id; also the lock acquisition order.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.lock.id
    }

    /// Whether the calling thread currently holds this group.
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.lock.owner.lock() == Some(thread::current().id())
    }

    fn acquire(&self) {
        let me = thread::current().id();
        let mut owner = self.lock.owner.lock();
        while owner.is_some() {
            self.lock.released.wait(&mut owner);
        }
        *owner = Some(me);
    }

    fn release(&self) {
        *self.lock.owner.lock() = None;
        self.lock.released.notify_all();
    }

    /// Hold the group for a single commit outside any section.
    pub(crate) fn acquire_guard(&self) -> GroupGuard<'_> {
        self.acquire();
        GroupGuard { group: self }
    }
}

impl PartialEq for ConsistencyGroup {
    fn eq(&self, other: &Self) -> bool {
        self.lock.id == other.lock.id
    }
}

impl Eq for ConsistencyGroup {}

impl fmt::Debug for ConsistencyGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsistencyGroup")
            .field("id", &self.lock.id)
            .field("name", &self.lock.name)
            .finish()
    }
}

pub(crate) struct GroupGuard<'a> {
    group: &'a ConsistencyGroup,
}

impl Drop for GroupGuard<'_> {
    fn drop(&mut self) {
        self.group.release();
    }
}

/// Anything that maps to a consistency group.
pub trait Lockable {
    fn consistency_group(&self) -> &ConsistencyGroup;
}

impl Lockable for ConsistencyGroup {
    fn consistency_group(&self) -> &ConsistencyGroup {
        self
    }
}

// ---------------------------------------------------------------------------
// Thread-local section state
// ---------------------------------------------------------------------------

struct Frame {
    groups: Vec<ConsistencyGroup>,
    depth: usize,
    touched: Vec<(u64, Arc<dyn Commit>)>,
}

impl Frame {
    fn holds(&self, group: &ConsistencyGroup) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

thread_local! {
    static SECTION: RefCell<Option<Frame>> = const { RefCell::new(None) };
    static TICK: RefCell<Option<Vec<Notification>>> = const { RefCell::new(None) };
}

/// How the current thread may access a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// An enclosing section holds the group: stage writes, read staged values.
    Held,
    /// No section covers the group: read committed values, commit writes now.
    Free,
}

pub(crate) fn access(group: &ConsistencyGroup) -> Access {
    SECTION.with(|cell| match cell.borrow().as_ref() {
        Some(frame) if frame.holds(group) => Access::Held,
        _ => Access::Free,
    })
}

/// Record a staged write for publication when the outermost section exits.
pub(crate) fn touch(key: u64, property: Arc<dyn Commit>) {
    SECTION.with(|cell| {
        if let Some(frame) = cell.borrow_mut().as_mut()
            && !frame.touched.iter().any(|(k, _)| *k == key)
        {
            frame.touched.push((key, property));
        }
    });
}

// ---------------------------------------------------------------------------
// Ticks
// ---------------------------------------------------------------------------

struct TickGuard {
    outermost: bool,
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        if !self.outermost {
            return;
        }
        loop {
            let deferred = TICK.with(|cell| {
                let mut tick = cell.borrow_mut();
                match tick.as_mut() {
                    Some(queue) if !queue.is_empty() => std::mem::take(queue),
                    _ => {
                        *tick = None;
                        Vec::new()
                    }
                }
            });
            if deferred.is_empty() {
                return;
            }
            for action in deferred {
                action();
            }
        }
    }
}

/// Run `body` as part of the current tick, opening one if none is active.
pub(crate) fn tick<R>(body: impl FnOnce() -> R) -> R {
    let outermost = TICK.with(|cell| {
        let mut tick = cell.borrow_mut();
        if tick.is_some() {
            return false;
        }
        *tick = Some(Vec::new());
        true
    });
    let _guard = TickGuard { outermost };
    body()
}

/// Defer `action` until the outermost tick on this thread ends; run it now
/// when no tick is active.
pub(crate) fn at_tick_end(action: Notification) {
    let action = TICK.with(|cell| match cell.borrow_mut().as_mut() {
        Some(queue) => {
            queue.push(action);
            None
        }
        None => Some(action),
    });
    if let Some(action) = action {
        action();
    }
}

// ---------------------------------------------------------------------------
// CriticalSection
// ---------------------------------------------------------------------------

/// RAII guard over one or more consistency groups.
///
/// The guard is bound to the thread that created it.
#[must_use = "the critical section ends when the guard is dropped"]
pub struct CriticalSection {
    _not_send: PhantomData<*const ()>,
}

impl CriticalSection {
    /// Lock the groups of `properties`, blocking until they are free.
    ///
    /// Re-entrant: inside an active section this only succeeds when every
    /// named group is already held.
    pub fn enter(properties: &[&dyn Lockable]) -> Result<Self> {
        let mut groups: Vec<ConsistencyGroup> = properties
            .iter()
            .map(|p| p.consistency_group().clone())
            .collect();
        groups.sort_by_key(ConsistencyGroup::id);
        groups.dedup_by_key(|g| g.id());

        SECTION.with(|cell| {
            let mut slot = cell.borrow_mut();
            if let Some(frame) = slot.as_mut() {
                if let Some(missing) = groups.iter().find(|g| !frame.holds(g)) {
                    debug!(group = missing.name(), "rejected critical section extension");
                    return Err(PropertyError::SectionExtension {
                        group: missing.name().to_owned(),
                    });
                }
                frame.depth += 1;
                return Ok(());
            }
            for group in &groups {
                group.acquire();
            }
            trace!(groups = groups.len(), "entered critical section");
            *slot = Some(Frame {
                groups,
                depth: 1,
                touched: Vec::new(),
            });
            Ok(())
        })?;

        Ok(Self {
            _not_send: PhantomData,
        })
    }

    /// Whether the calling thread is inside a critical section.
    #[must_use]
    pub fn is_active() -> bool {
        SECTION.with(|cell| cell.borrow().is_some())
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        let finished = SECTION.with(|cell| {
            let mut slot = cell.borrow_mut();
            let frame = slot.as_mut()?;
            frame.depth -= 1;
            if frame.depth > 0 {
                return None;
            }
            slot.take()
        });
        let Some(frame) = finished else {
            return;
        };

        let notifications: Vec<Notification> = frame
            .touched
            .into_iter()
            .filter_map(|(_, property)| property.commit())
            .collect();
        for group in frame.groups.iter().rev() {
            group.release();
        }
        trace!(changed = notifications.len(), "left critical section");

        if thread::panicking() {
            warn!(
                skipped = notifications.len(),
                "critical section left by panic; listeners not notified"
            );
            return;
        }
        tick(|| {
            for notify in notifications {
                notify();
            }
        });
    }
}

impl fmt::Debug for CriticalSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalSection").finish()
    }
}

/// Run `body` inside a critical section over the groups of `properties`.
///
/// ```ignore
/// critical::lock(&[&latitude, &longitude], || {
///     latitude.set(47.1)?;
///     longitude.set(8.5)?;
///     Ok::<_, PropertyError>(())
/// })?;
/// ```
pub fn lock<R, E>(properties: &[&dyn Lockable], body: impl FnOnce() -> Result<R, E>) -> Result<R, E>
where
    E: From<PropertyError>,
{
    let _section = CriticalSection::enter(properties)?;
    body()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn groups_are_ordered_and_deduplicated() {
        let a = ConsistencyGroup::new("a");
        let b = ConsistencyGroup::new("b");
        let section = CriticalSection::enter(&[&b, &a, &b]).unwrap();
        assert!(a.is_held_by_current_thread());
        assert!(b.is_held_by_current_thread());
        drop(section);
        assert!(!a.is_held_by_current_thread());
        assert!(!CriticalSection::is_active());
    }

    #[test]
    fn nesting_with_held_groups_is_allowed() {
        let a = ConsistencyGroup::new("a");
        let b = ConsistencyGroup::new("b");
        let _outer = CriticalSection::enter(&[&a, &b]).unwrap();
        let inner = CriticalSection::enter(&[&b]).unwrap();
        drop(inner);
        assert!(b.is_held_by_current_thread());
    }

    #[test]
    fn nesting_with_new_group_is_rejected() {
        let a = ConsistencyGroup::new("a");
        let b = ConsistencyGroup::new("b");
        let _outer = CriticalSection::enter(&[&a]).unwrap();
        let err = CriticalSection::enter(&[&a, &b]).unwrap_err();
        assert_eq!(err, PropertyError::SectionExtension { group: "b".into() });
        assert!(a.is_held_by_current_thread());
        assert!(!b.is_held_by_current_thread());
    }

    #[test]
    fn contending_thread_blocks_until_outermost_exit() {
        let group = ConsistencyGroup::new("shared");
        let entered = Arc::new(AtomicUsize::new(0));
        let outer = CriticalSection::enter(&[&group]).unwrap();

        let handle = {
            let group = group.clone();
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let _section = CriticalSection::enter(&[&group]).unwrap();
                entered.fetch_add(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert_eq!(entered.load(Ordering::SeqCst), 0);
        drop(outer);
        handle.join().unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_work_waits_for_the_outermost_tick() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let log = |label: &'static str| {
            let order = Arc::clone(&order);
            move || order.lock().push(label)
        };
        tick(|| {
            at_tick_end(Box::new(log("deferred")));
            tick(|| order.lock().push("nested"));
            order.lock().push("body");
        });
        at_tick_end(Box::new(log("immediate")));
        assert_eq!(*order.lock(), vec!["nested", "body", "deferred", "immediate"]);
    }

    #[test]
    fn work_deferred_by_deferred_work_still_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        tick(|| {
            let runs = Arc::clone(&runs);
            at_tick_end(Box::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                let runs = Arc::clone(&runs);
                at_tick_end(Box::new(move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                }));
            }));
        });
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn lock_propagates_body_errors() {
        let group = ConsistencyGroup::new("g");
        let result: Result<()> = lock(&[&group], || {
            Err(PropertyError::SelfBinding)
        });
        assert_eq!(result, Err(PropertyError::SelfBinding));
        assert!(!group.is_held_by_current_thread());
    }
}
