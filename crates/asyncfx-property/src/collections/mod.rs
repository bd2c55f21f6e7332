#![forbid(unsafe_code)]

//! Observable collections and collection-valued properties.

pub mod change;
mod list;
mod list_property;
mod lock;
mod set;
mod set_property;

pub use change::{EditKind, ListChange, ListEdit, SetChange, SetEdit};
pub use list::{ListChangeFn, ListSource, LockedList, ObservableList, SnapshotFn};
pub use list_property::{ElementVisitor, ListProperty};
pub use set::{LockedSet, ObservableSet, SetChangeFn, SetSnapshotFn, SetSource, SetValue};
pub use set_property::SetProperty;
