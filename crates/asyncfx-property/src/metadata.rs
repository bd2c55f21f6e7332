#![forbid(unsafe_code)]

//! Immutable per-property configuration.
//!
//! Metadata decides where a property lives (its dispatcher), which
//! consistency group guards it, its initial value and its display name.
//! Overrides are merged field by field: whatever the override sets wins,
//! everything else is kept.

use std::fmt;

use asyncfx_dispatch::Dispatcher;
use tracing::warn;

use crate::critical::ConsistencyGroup;

/// Configuration captured when a property is created.
#[derive(Clone)]
pub struct PropertyMetadata<T> {
    name: Option<String>,
    initial_value: Option<T>,
    dispatcher: Option<Dispatcher>,
    consistency_group: Option<ConsistencyGroup>,
    root: Option<bool>,
}

impl<T> PropertyMetadata<T> {
    #[must_use]
    pub fn builder() -> PropertyMetadataBuilder<T> {
        PropertyMetadataBuilder {
            metadata: Self::default(),
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn initial_value(&self) -> Option<&T> {
        self.initial_value.as_ref()
    }

    /// The context the property is pinned to, if any.
    #[must_use]
    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        self.dispatcher.as_ref()
    }

    #[must_use]
    pub fn consistency_group(&self) -> Option<&ConsistencyGroup> {
        self.consistency_group.as_ref()
    }

    /// A root property does not report changes to the object that contains it.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.root.unwrap_or(false)
    }
}

impl<T: Clone> PropertyMetadata<T> {
    /// Combine `self` with `overrides`; fields set in `overrides` win.
    ///
    /// The consistency group is fixed at construction and is never replaced.
    #[must_use]
    pub fn merge(&self, overrides: &PropertyMetadata<T>) -> PropertyMetadata<T> {
        if overrides.consistency_group.is_some() && overrides.consistency_group != self.consistency_group {
            warn!(
                property = self.name().unwrap_or("<unnamed>"),
                "consistency group cannot be overridden; keeping the current one"
            );
        }
        PropertyMetadata {
            name: overrides.name.clone().or_else(|| self.name.clone()),
            initial_value: overrides
                .initial_value
                .clone()
                .or_else(|| self.initial_value.clone()),
            dispatcher: overrides.dispatcher.clone().or_else(|| self.dispatcher.clone()),
            consistency_group: self.consistency_group.clone(),
            root: overrides.root.or(self.root),
        }
    }
}

impl<T> Default for PropertyMetadata<T> {
    fn default() -> Self {
        Self {
            name: None,
            initial_value: None,
            dispatcher: None,
            consistency_group: None,
            root: None,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PropertyMetadata<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyMetadata")
            .field("name", &self.name)
            .field("initial_value", &self.initial_value)
            .field("dispatcher", &self.dispatcher.as_ref().map(Dispatcher::name))
            .field("consistency_group", &self.consistency_group)
            .field("root", &self.is_root())
            .finish()
    }
}

/// Builder for [`PropertyMetadata`].
pub struct PropertyMetadataBuilder<T> {
    metadata: PropertyMetadata<T>,
}

impl<T> PropertyMetadataBuilder<T> {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn initial_value(mut self, value: T) -> Self {
        self.metadata.initial_value = Some(value);
        self
    }

    /// Pin the property to `dispatcher`: reads and writes must happen there
    /// and listeners are notified there.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.metadata.dispatcher = Some(dispatcher);
        self
    }

    #[must_use]
    pub fn consistency_group(mut self, group: &ConsistencyGroup) -> Self {
        self.metadata.consistency_group = Some(group.clone());
        self
    }

    #[must_use]
    pub fn root(mut self, root: bool) -> Self {
        self.metadata.root = Some(root);
        self
    }

    #[must_use]
    pub fn build(self) -> PropertyMetadata<T> {
        self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_overrides() {
        let base = PropertyMetadata::builder()
            .name("speed")
            .initial_value(3)
            .build();
        let merged = base.merge(&PropertyMetadata::builder().initial_value(9).root(true).build());
        assert_eq!(merged.name(), Some("speed"));
        assert_eq!(merged.initial_value(), Some(&9));
        assert!(merged.is_root());
    }

    #[test]
    fn merge_keeps_consistency_group() {
        let g1 = ConsistencyGroup::new("one");
        let g2 = ConsistencyGroup::new("two");
        let base = PropertyMetadata::<u8>::builder().consistency_group(&g1).build();
        let merged = base.merge(&PropertyMetadata::builder().consistency_group(&g2).build());
        assert_eq!(merged.consistency_group(), Some(&g1));
    }

    #[test]
    fn defaults_are_empty() {
        let meta = PropertyMetadata::<String>::default();
        assert!(meta.name().is_none());
        assert!(meta.dispatcher().is_none());
        assert!(!meta.is_root());
    }
}
