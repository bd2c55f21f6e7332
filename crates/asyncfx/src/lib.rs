#![forbid(unsafe_code)]

//! asyncfx public facade.
//!
//! Re-exports the dispatch and property crates under one name and offers a
//! [`prelude`] with the types most applications touch.

pub use asyncfx_dispatch as dispatch;
pub use asyncfx_property as property;

pub use asyncfx_dispatch::{ConfigError, Dispatcher, RuntimeConfig, TaskError, TaskHandle};
pub use asyncfx_property::{
    ConsistencyGroup, CriticalSection, LifecycleValueConverter, ListProperty, ObjectProperty, ObservableList,
    ObservableSet, ObservableValue, Property, PropertyError, PropertyMetadata, PropertyObject, PropertyPath,
    SetProperty, Subscription, lock, property_object,
};

pub mod prelude {
    pub use crate::dispatch::Dispatcher;
    pub use crate::property::{
        ConsistencyGroup, ListProperty, ObjectProperty, ObservableList, ObservableSet, ObservableValue, Property,
        PropertyError, PropertyMetadata, PropertyObject, PropertyPath, SetProperty, Subscription, lock,
        property_object,
    };
}
