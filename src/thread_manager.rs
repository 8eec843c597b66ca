// src/thread_manager.rs
//! Thread lifecycle service.
//!
//! One contract (`create_thread`, `join_thread`, `is_valid`, `sleep`,
//! `current_thread_id`) over two native backends picked at build time:
//! - [`StdThreads`]: plain `std::thread` (desktop default).
//! - `PriorityThreads`: `thread-priority`'s builder, enabled by the
//!   `high_priority` feature. Its entry trampoline owns the boxed runnable and
//!   frees it once the user function returns.
//!
//! Call sites only ever see [`ThreadManager`]; nothing branches on platform.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Boxed work item handed to a backend.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// A native threading API.
pub trait ThreadBackend {
    /// Short backend name for logs.
    const NAME: &'static str;

    fn spawn(name: &str, runnable: Runnable) -> io::Result<JoinHandle<()>>;
}

/// Desktop backend built on `std::thread::Builder`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdThreads;

impl ThreadBackend for StdThreads {
    const NAME: &'static str = "std";

    fn spawn(name: &str, runnable: Runnable) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(runnable)
    }
}

/// Backend that raises worker priority through the `thread-priority` crate.
#[cfg(feature = "high_priority")]
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityThreads;

#[cfg(feature = "high_priority")]
impl ThreadBackend for PriorityThreads {
    const NAME: &'static str = "thread-priority";

    fn spawn(name: &str, runnable: Runnable) -> io::Result<JoinHandle<()>> {
        let thread_name = name.to_owned();
        thread_priority::ThreadBuilder::default()
            .name(name.to_owned())
            .priority(thread_priority::ThreadPriority::Max)
            .spawn(move |priority| {
                if let Err(err) = priority {
                    log::warn!("thread `{}` runs at default priority: {:?}", thread_name, err);
                }
                runnable();
            })
    }
}

#[cfg(feature = "high_priority")]
pub type PlatformThreads = PriorityThreads;

#[cfg(not(feature = "high_priority"))]
pub type PlatformThreads = StdThreads;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Owned handle to a spawned thread. Invalid after a failed spawn or a join.
#[derive(Debug, Default)]
pub struct ThreadHandle {
    id: u64,
    name: String,
    join: Option<JoinHandle<()>>,
}

impl ThreadHandle {
    /// The explicitly invalid handle returned on spawn failure.
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process-unique handle id; 0 for invalid handles.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.join.is_some()
    }
}

/// Process-scoped thread service. Construct once and share it by `Arc`.
#[derive(Debug)]
pub struct ThreadManager {
    live: Arc<AtomicUsize>,
    max_threads: Option<usize>,
}

/// Decrements the live count when the thread body ends, panics included.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ThreadManager {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            max_threads: None,
        }
    }

    /// Caps the number of simultaneously running threads. Spawns past the cap
    /// fail with an invalid handle.
    pub fn with_limit(max_threads: usize) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            max_threads: Some(max_threads),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        PlatformThreads::NAME
    }

    /// Starts `runnable` on a new named thread. Always check
    /// [`ThreadManager::is_valid`] on the result.
    pub fn create_thread<F>(&self, name: &str, runnable: F) -> ThreadHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let previous = self.live.fetch_add(1, Ordering::AcqRel);
        if let Some(max) = self.max_threads {
            if previous >= max {
                self.live.fetch_sub(1, Ordering::AcqRel);
                log::warn!(
                    "refusing to spawn `{}`: {} threads already running (limit {})",
                    name,
                    previous,
                    max
                );
                return ThreadHandle::invalid();
            }
        }

        let guard = LiveGuard(self.live.clone());
        let entry: Runnable = Box::new(move || {
            let _guard = guard;
            runnable();
        });

        // On failure the backend drops `entry` (and with it the guard).
        match PlatformThreads::spawn(name, entry) {
            Ok(join) => {
                log::debug!("spawned thread `{}` ({} backend)", name, PlatformThreads::NAME);
                ThreadHandle {
                    id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
                    name: name.to_owned(),
                    join: Some(join),
                }
            }
            Err(err) => {
                log::error!("failed to spawn thread `{}`: {}", name, err);
                ThreadHandle::invalid()
            }
        }
    }

    /// Blocks until the thread's entry function returns, then invalidates the
    /// handle. Joining an invalid handle is a no-op.
    pub fn join_thread(&self, handle: &mut ThreadHandle) {
        if let Some(join) = handle.join.take() {
            if join.join().is_err() {
                log::error!("thread `{}` panicked before join", handle.name);
            }
        }
    }

    pub fn is_valid(&self, handle: &ThreadHandle) -> bool {
        handle.is_valid()
    }

    pub fn sleep(&self, milliseconds: u64) {
        std::thread::sleep(Duration::from_millis(milliseconds));
    }

    /// Process-unique id of the calling thread, stable for its lifetime.
    pub fn current_thread_id(&self) -> u64 {
        current_thread_id()
    }

    /// Threads spawned through this manager that have not finished yet.
    pub fn live_threads(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl Default for ThreadManager {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}
