#![forbid(unsafe_code)]

//! Execution contexts for asyncfx.
//!
//! This crate provides:
//! - [`Dispatcher`]: a handle to a thread or pool that callbacks can be
//!   marshaled onto (platform event loop, background pool, inline).
//! - [`TaskHandle`]: the pending result of [`Dispatcher::run_later_async`].
//! - [`RuntimeConfig`]: thread names and pool sizes for the built-in
//!   dispatchers.

pub mod config;
pub mod dispatcher;
pub mod task;

pub use config::{ConfigError, RuntimeConfig};
pub use dispatcher::{Dispatcher, Executor, Task};
pub use task::{TaskError, TaskHandle};
