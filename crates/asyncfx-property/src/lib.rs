#![forbid(unsafe_code)]

//! Thread-aware observable properties.
//!
//! # Role in asyncfx
//! `asyncfx-property` is the data layer. It provides observable values that
//! know which execution context they belong to, keep related values
//! consistent across threads, and propagate changes through bindings,
//! object graphs and property paths.
//!
//! # Primary responsibilities
//! - **Property**: observable values with invalidation and change listeners,
//!   optionally pinned to a [`Dispatcher`](asyncfx_dispatch::Dispatcher).
//! - **Critical sections**: atomic multi-property updates over
//!   [`ConsistencyGroup`]s.
//! - **Bindings**: unidirectional, converting and bidirectional, marshaled
//!   to the target's dispatcher.
//! - **Object properties**: sub-invalidation and sub-change events bubbling
//!   up from nested objects.
//! - **Collections**: lockable lists and sets with batched change delivery
//!   and content bindings.
//! - **Paths**: endpoints that follow a property through a chain of objects.
//!
//! # How it fits in the system
//! Execution contexts come from `asyncfx-dispatch`. The `asyncfx` facade
//! re-exports both crates.

pub mod binding;
pub mod collections;
pub mod critical;
pub mod error;
pub mod listener;
pub mod metadata;
pub mod object;
pub mod path;
pub mod property;

pub use binding::{LifecycleValueConverter, ObservableValue};
pub use collections::{
    EditKind, ElementVisitor, ListChange, ListEdit, ListProperty, ListSource, LockedList, LockedSet, ObservableList,
    ObservableSet, SetChange, SetEdit, SetProperty, SetSource, SetValue,
};
pub use critical::{ConsistencyGroup, CriticalSection, Lockable, lock};
pub use error::{PropertyError, Result};
pub use listener::{ChangeFn, ChangeHook, InvalidationFn, ListenerScope, Subscription};
pub use metadata::{PropertyMetadata, PropertyMetadataBuilder};
pub use object::{ObjectProperty, PropertyObject, SubtreeNode, TreeEvent, TreeFn};
pub use path::{ListEndpoint, PathEndpoint, PropertyPath, Resolution};
pub use property::{Property, PropertyId, PropertyValue};
