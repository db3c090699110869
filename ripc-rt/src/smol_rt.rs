//! Loop executor on smol's `LocalExecutor`.

use core_affinity::{CoreId, set_for_current};
use scoped_tls::scoped_thread_local;
use smol::LocalExecutor;
use std::{
    future::Future,
    io::Result,
    pin::Pin,
    task::{Context, Poll},
    thread::{self, JoinHandle},
};

scoped_thread_local!(static LOCAL: LocalExecutor<'_>);

/// A handle to a task spawned on the loop.
///
/// Awaiting it yields `Result<T, TaskError>`. Smol tasks do not fail
/// separately (panics propagate to the awaiter), so the error arm exists
/// for API parity with the tokio loop.
pub struct Task<T> {
    inner: smol::Task<T>,
}

impl<T> Future for Task<T> {
    type Output = std::result::Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(Ok)
    }
}

impl<T> Task<T> {
    /// Lets the task run to completion in the background; the handle is
    /// consumed.
    pub fn detach(self) {
        self.inner.detach();
    }

    /// Drops the task; already-running code stops at its next yield point.
    pub fn cancel(self) {
        drop(self.inner);
    }
}

/// Task failure, kept for API parity with the tokio loop; never produced
/// by this runtime.
#[derive(Debug)]
pub struct TaskError {
    _private: (),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task failed")
    }
}

impl std::error::Error for TaskError {}

/// Configures and launches one loop thread.
#[derive(Debug, Default)]
pub struct LoopBuilder {
    core_id: Option<CoreId>,
    name: String,
}

impl LoopBuilder {
    /// Creates a builder with no name and no pinning.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the loop thread (visible in panic messages and debuggers).
    pub fn name(mut self, name: &str) -> Self {
        self.name = String::from(name);
        self
    }

    /// Pins the loop thread to the given CPU core.
    pub fn core_id(mut self, core_id: CoreId) -> Self {
        self.core_id = Some(core_id);
        self
    }

    /// Runs the loop on the current thread until the future completes.
    pub fn run<T>(mut self, f: impl Future<Output = T>) -> T {
        if let Some(core_id) = self.core_id.take() {
            set_for_current(core_id);
        }

        let local_ex = LocalExecutor::new();
        LOCAL.set(&local_ex, || smol::block_on(local_ex.run(f)))
    }

    /// Spawns a dedicated worker thread that runs the loop until the
    /// generated future completes.
    pub fn spawn<G, F, T>(mut self, fut_gen: G) -> Result<JoinHandle<T>>
    where
        G: FnOnce() -> F + Send + 'static,
        F: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let mut core_id = self.core_id.take();

        thread::Builder::new().name(self.name).spawn(move || {
            if let Some(core_id) = core_id.take() {
                set_for_current(core_id);
            }

            let local_ex = LocalExecutor::new();
            LOCAL.set(&local_ex, || smol::block_on(local_ex.run(fut_gen())))
        })
    }
}

/// Spawns a task onto the current loop.
///
/// # Panics
///
/// Panics when called outside a [`LoopBuilder`] `run`/`spawn` context.
pub fn spawn_local<T: 'static>(future: impl Future<Output = T> + 'static) -> Task<T> {
    if LOCAL.is_set() {
        LOCAL.with(|local_ex| Task {
            inner: local_ex.spawn(future),
        })
    } else {
        panic!("`spawn_local()` must be called from a running loop")
    }
}

/// Yields to other tasks on the same loop.
pub async fn yield_local() {
    smol::future::yield_now().await
}
