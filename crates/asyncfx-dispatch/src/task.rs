#![forbid(unsafe_code)]

//! Handles to tasks scheduled with [`Dispatcher::run_later_async`].
//!
//! [`Dispatcher::run_later_async`]: crate::Dispatcher::run_later_async

use std::any::Any;
use std::fmt;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

/// Why a [`TaskHandle`] could not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The task panicked. The payload is kept so it can be resumed.
    #[error("task panicked: {message}")]
    Panicked {
        message: String,
        payload: Box<dyn Any + Send>,
    },
    /// The executor discarded the task, or the result was already taken.
    #[error("task was dropped before producing a result")]
    Dropped,
    /// [`TaskHandle::join_timeout`] gave up waiting.
    #[error("task did not finish within {0:?}")]
    TimedOut(Duration),
}

impl TaskError {
    /// Re-raise a panic carried by [`TaskError::Panicked`]; other variants are
    /// returned unchanged.
    pub fn into_panic(self) -> Self {
        match self {
            Self::Panicked { payload, .. } => std::panic::resume_unwind(payload),
            other => other,
        }
    }
}

/// The eventual result of a task running on a dispatcher.
#[must_use = "dropping a TaskHandle detaches the task"]
pub struct TaskHandle<R> {
    rx: Receiver<thread::Result<R>>,
}

impl<R> TaskHandle<R> {
    pub(crate) fn new(rx: Receiver<thread::Result<R>>) -> Self {
        Self { rx }
    }

    /// Block until the task finishes.
    pub fn join(self) -> Result<R, TaskError> {
        match self.rx.recv() {
            Ok(outcome) => unpack(outcome),
            Err(_) => Err(TaskError::Dropped),
        }
    }

    /// Block for at most `timeout`.
    ///
    /// After a successful call the value has been taken; later calls report
    /// [`TaskError::Dropped`].
    pub fn join_timeout(&self, timeout: Duration) -> Result<R, TaskError> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => unpack(outcome),
            Err(RecvTimeoutError::Timeout) => Err(TaskError::TimedOut(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(TaskError::Dropped),
        }
    }

    /// Poll without blocking. `None` means the task is still pending.
    pub fn try_join(&self) -> Option<Result<R, TaskError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(unpack(outcome)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(TaskError::Dropped)),
        }
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").finish_non_exhaustive()
    }
}

fn unpack<R>(outcome: thread::Result<R>) -> Result<R, TaskError> {
    outcome.map_err(|payload| TaskError::Panicked {
        message: panic_message(payload.as_ref()),
        payload,
    })
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn try_join_reports_pending_then_value() {
        let (tx, rx) = mpsc::sync_channel(1);
        let handle = TaskHandle::new(rx);
        assert!(handle.try_join().is_none());
        tx.send(Ok(9)).unwrap();
        assert_eq!(handle.try_join().unwrap().unwrap(), 9);
        drop(tx);
        assert!(matches!(handle.try_join(), Some(Err(TaskError::Dropped))));
    }

    #[test]
    fn join_timeout_expires() {
        let (_tx, rx) = mpsc::sync_channel::<thread::Result<()>>(1);
        let handle = TaskHandle::new(rx);
        let err = handle.join_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, TaskError::TimedOut(_)));
    }

    #[test]
    fn dropped_sender_means_dropped_task() {
        let (tx, rx) = mpsc::sync_channel::<thread::Result<u8>>(1);
        drop(tx);
        assert!(matches!(TaskHandle::new(rx).join(), Err(TaskError::Dropped)));
    }

    #[test]
    fn panic_message_reads_str_and_string() {
        let a: Box<dyn Any + Send> = Box::new("static");
        let b: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let c: Box<dyn Any + Send> = Box::new(17_u32);
        assert_eq!(panic_message(a.as_ref()), "static");
        assert_eq!(panic_message(b.as_ref()), "owned");
        assert_eq!(panic_message(c.as_ref()), "non-string panic payload");
    }

    #[test]
    fn into_panic_passes_through_non_panics() {
        assert!(matches!(TaskError::Dropped.into_panic(), TaskError::Dropped));
    }
}
