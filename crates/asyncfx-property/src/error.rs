#![forbid(unsafe_code)]

//! Misuse errors raised by properties, critical sections and locked views.
//!
//! Every variant is a programmer error: it is reported synchronously at the
//! point of misuse and never retried or recovered internally.

/// Errors raised by property operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    /// `set` on a property that is the target of a unidirectional binding.
    #[error("cannot set `{property}`: the property is bound")]
    Bound { property: String },

    /// `set` or `bind` on a derived, read-only property.
    #[error("cannot modify `{property}`: the property is read-only")]
    ReadOnly { property: String },

    /// Access from a thread outside the property's dispatcher.
    #[error("`{property}` can only be accessed on dispatcher `{dispatcher}`")]
    ThreadAffinity { property: String, dispatcher: String },

    /// Access to a grouped property without holding its consistency group.
    #[error("`{property}` belongs to consistency group `{group}` and must be accessed in a critical section")]
    OutsideCriticalSection { property: String, group: String },

    /// A nested critical section named a group the enclosing section does not hold.
    #[error(
        "illegal attempt to extend a critical section with group `{group}`: \
         nesting is only allowed if no additional groups are locked"
    )]
    SectionExtension { group: String },

    /// A grouped property was used as a binding target.
    #[error("`{property}` belongs to a consistency group and cannot be a binding target")]
    GroupedBindingTarget { property: String },

    /// `bind` on a property that takes part in a bidirectional binding.
    #[error("`{property}` is bidirectionally bound and cannot be the target of a unidirectional binding")]
    BidirectionallyBound { property: String },

    /// A property was bound to itself.
    #[error("a property cannot be bound to itself")]
    SelfBinding,

    /// Mutation through a locked view that was opened re-entrantly.
    #[error("cannot modify `{collection}`: the locked view is read-only")]
    ReadOnlyView { collection: String },

    /// Mutation through a second view the same thread opened while already
    /// holding the collection outside of change delivery.
    #[error("cannot modify `{collection}`: the collection is already locked by this thread")]
    NestedLock { collection: String },

    #[error("index {index} is out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

pub type Result<T, E = PropertyError> = std::result::Result<T, E>;
