#![forbid(unsafe_code)]

//! Execution contexts that properties and listeners are pinned to.
//!
//! A [`Dispatcher`] answers two questions: "am I currently running inside
//! this context?" and "run this callback inside this context". Properties
//! consult the first to reject writes from the wrong thread and use the
//! second to marshal binding updates and listener callbacks.
//!
//! # Built-in contexts
//!
//! - [`Dispatcher::platform`]: exactly one dedicated event-loop thread,
//!   created lazily on first use. UI-affine properties use it.
//! - [`Dispatcher::background`]: a shared pool of worker threads.
//! - [`Dispatcher::immediate`]: runs callbacks inline on the caller's thread
//!   and considers every thread current.
//! - [`Dispatcher::worker_pool`]: a private pool with its own threads.
//!
//! Any other strategy plugs in through the [`Executor`] trait.
//!
//! # Invariants
//!
//! 1. Tasks submitted to the platform dispatcher run in submission order.
//! 2. `run` executes inline when the caller is already inside the context,
//!    so it never deadlocks against itself.
//! 3. A panicking task never takes its worker thread down.
//!
//! # Failure Modes
//!
//! - Fire-and-forget task panics: caught and logged with `tracing::error!`.
//! - `run` task panics: the panic resumes on the calling thread.
//! - Executor shut down before a task ran: [`TaskHandle::join`] reports
//!   [`TaskError::Dropped`].

use std::cell::Cell;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::config::RuntimeConfig;
use crate::task::{TaskError, TaskHandle, panic_message};

/// A unit of work accepted by an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Strategy behind a [`Dispatcher`].
pub trait Executor: Send + Sync + 'static {
    /// Human-readable name used in logs and error messages.
    fn name(&self) -> &str;

    /// Whether the calling thread belongs to this context.
    fn is_current(&self) -> bool;

    /// Schedule `task` for execution inside this context.
    fn execute(&self, task: Task);
}

/// A cheap, clonable handle to an execution context.
///
/// Two dispatchers compare equal when they share the same executor.
#[derive(Clone)]
pub struct Dispatcher {
    executor: Arc<dyn Executor>,
}

impl Dispatcher {
    /// Wrap a custom executor.
    #[must_use]
    pub fn from_executor(executor: impl Executor) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    /// The process-wide platform dispatcher (a single event-loop thread).
    ///
    /// # Panics
    ///
    /// Panics if the operating system refuses to spawn the event-loop thread,
    /// the same way [`std::thread::spawn`] does.
    #[must_use]
    pub fn platform() -> Self {
        static PLATFORM: OnceLock<Dispatcher> = OnceLock::new();
        PLATFORM
            .get_or_init(|| {
                let config = RuntimeConfig::global();
                match EventLoop::spawn(&config.platform_thread_name) {
                    Ok(event_loop) => Self::from_executor(event_loop),
                    Err(err) => panic!("failed to spawn platform dispatcher thread: {err}"),
                }
            })
            .clone()
    }

    /// The process-wide background worker pool.
    ///
    /// # Panics
    ///
    /// Panics if no worker thread could be spawned.
    #[must_use]
    pub fn background() -> Self {
        static BACKGROUND: OnceLock<Dispatcher> = OnceLock::new();
        BACKGROUND
            .get_or_init(|| {
                let config = RuntimeConfig::global();
                match Self::worker_pool(&config.background_thread_name, config.background_threads) {
                    Ok(pool) => pool,
                    Err(err) => panic!("failed to spawn background dispatcher: {err}"),
                }
            })
            .clone()
    }

    /// A dispatcher that runs everything inline on the calling thread.
    #[must_use]
    pub fn immediate() -> Self {
        static IMMEDIATE: OnceLock<Dispatcher> = OnceLock::new();
        IMMEDIATE
            .get_or_init(|| Self::from_executor(Immediate))
            .clone()
    }

    /// Create a private worker pool with `threads` workers (at least one).
    pub fn worker_pool(name: &str, threads: usize) -> io::Result<Self> {
        Ok(Self::from_executor(WorkerPool::spawn(name, threads.max(1))?))
    }

    /// Name of the underlying executor.
    #[must_use]
    pub fn name(&self) -> &str {
        self.executor.name()
    }

    /// Whether the calling thread belongs to this context.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.executor.is_current()
    }

    /// Run `f` inside this context and wait for its result.
    ///
    /// Executes inline when the caller is already inside the context.
    ///
    /// # Panics
    ///
    /// Resumes the panic of `f`, and panics if the executor drops the task
    /// without running it.
    pub fn run<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return f();
        }
        match self.run_later_async(f).join() {
            Ok(value) => value,
            Err(TaskError::Panicked { payload, .. }) => panic::resume_unwind(payload),
            Err(err) => panic!("dispatcher `{}` failed to run task: {err}", self.name()),
        }
    }

    /// Enqueue `f` without waiting. Panics inside `f` are logged.
    pub fn run_later<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let name: Arc<str> = Arc::from(self.name());
        self.executor.execute(Box::new(move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
                error!(
                    dispatcher = %name,
                    message = %panic_message(payload.as_ref()),
                    "task panicked"
                );
            }
        }));
    }

    /// Enqueue `f` and return a handle to its eventual result.
    pub fn run_later_async<R, F>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.executor.execute(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            // The handle may already be gone; nobody is waiting then.
            let _ = tx.send(outcome);
        }));
        TaskHandle::new(rx)
    }
}

impl PartialEq for Dispatcher {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.executor), Arc::as_ptr(&other.executor))
    }
}

impl Eq for Dispatcher {}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Immediate
// ---------------------------------------------------------------------------

struct Immediate;

impl Executor for Immediate {
    fn name(&self) -> &str {
        "immediate"
    }

    fn is_current(&self) -> bool {
        true
    }

    fn execute(&self, task: Task) {
        task();
    }
}

// ---------------------------------------------------------------------------
// EventLoop: one dedicated thread, FIFO
// ---------------------------------------------------------------------------

struct EventLoop {
    name: String,
    thread: ThreadId,
    queue: Mutex<Sender<Task>>,
}

impl EventLoop {
    fn spawn(name: &str) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Task>();
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || drain(&rx))?;
        debug!(thread = name, "platform dispatcher started");
        Ok(Self {
            name: name.to_owned(),
            thread: handle.thread().id(),
            queue: Mutex::new(tx),
        })
    }
}

fn drain(rx: &Receiver<Task>) {
    while let Ok(task) = rx.recv() {
        run_guarded(task);
    }
}

impl Executor for EventLoop {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }

    fn execute(&self, task: Task) {
        if self.queue.lock().send(task).is_err() {
            error!(dispatcher = %self.name, "event loop has shut down; task dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerPool: N threads sharing one queue
// ---------------------------------------------------------------------------

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_POOL: Cell<u64> = const { Cell::new(0) };
}

struct WorkerPool {
    id: u64,
    name: String,
    queue: Mutex<Sender<Task>>,
}

impl WorkerPool {
    fn spawn(name: &str, threads: usize) -> io::Result<Self> {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));
        for index in 0..threads {
            let rx = Arc::clone(&rx);
            thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    CURRENT_POOL.with(|current| current.set(id));
                    loop {
                        let next = rx.lock().recv();
                        match next {
                            Ok(task) => run_guarded(task),
                            Err(_) => break,
                        }
                    }
                })?;
        }
        debug!(pool = name, threads, "worker pool started");
        Ok(Self {
            id,
            name: name.to_owned(),
            queue: Mutex::new(tx),
        })
    }
}

impl Executor for WorkerPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_current(&self) -> bool {
        CURRENT_POOL.with(Cell::get) == self.id
    }

    fn execute(&self, task: Task) {
        if self.queue.lock().send(task).is_err() {
            error!(dispatcher = %self.name, "worker pool has shut down; task dropped");
        }
    }
}

/// Keeps a worker alive when a raw task (one not wrapped by `run_later`)
/// panics.
fn run_guarded(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!(message = %panic_message(payload.as_ref()), "dispatcher task panicked");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
