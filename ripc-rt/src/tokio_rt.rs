//! Loop executor on tokio's current-thread runtime and `LocalSet`.

use core_affinity::{CoreId, set_for_current};
use scoped_tls::scoped_thread_local;
use std::{
    future::Future,
    io::Result,
    pin::Pin,
    task::{Context, Poll},
    thread::{self, JoinHandle},
};
use tokio::task::LocalSet;

scoped_thread_local!(static LOCAL: LocalSet);

/// A handle to a task spawned on the loop.
///
/// Awaiting it yields `Result<T, TaskError>`: `Err` when the task panicked
/// or was cancelled.
pub struct Task<T> {
    inner: tokio::task::JoinHandle<T>,
}

impl<T> Future for Task<T> {
    type Output = std::result::Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner)
            .poll(cx)
            .map(|result| result.map_err(|e| TaskError { inner: e }))
    }
}

impl<T> Task<T> {
    /// Lets the task run to completion in the background; the handle is
    /// consumed.
    pub fn detach(self) {
        drop(self.inner);
    }

    /// Aborts the task.
    pub fn cancel(self) {
        self.inner.abort();
    }
}

/// Returned when an awaited task panicked or was cancelled.
#[derive(Debug)]
pub struct TaskError {
    inner: tokio::task::JoinError,
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
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

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to build tokio runtime");

        let local_set = LocalSet::new();
        LOCAL.set(&local_set, || rt.block_on(local_set.run_until(f)))
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

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("Failed to build tokio runtime");

            let local_set = LocalSet::new();
            LOCAL.set(&local_set, || rt.block_on(local_set.run_until(fut_gen())))
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
        LOCAL.with(|local_set| Task {
            inner: local_set.spawn_local(future),
        })
    } else {
        panic!("`spawn_local()` must be called from a running loop")
    }
}

/// Yields to other tasks on the same loop.
pub async fn yield_local() {
    tokio::task::yield_now().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_drives_spawned_tasks_to_completion() {
        let total = LoopBuilder::new().name("test-loop").run(async {
            let a = spawn_local(async { 1 + 1 });
            let b = spawn_local(async { 2 + 2 });
            a.await.unwrap() + b.await.unwrap()
        });
        assert_eq!(total, 6);
    }

    #[test]
    fn spawn_runs_on_a_worker_thread() {
        let handle = LoopBuilder::new()
            .name("worker-loop")
            .spawn(|| async { std::thread::current().name().map(str::to_owned) })
            .unwrap();
        let name = handle.join().unwrap();
        assert_eq!(name.as_deref(), Some("worker-loop"));
    }

    #[test]
    #[should_panic(expected = "must be called from a running loop")]
    fn spawn_local_outside_loop_panics() {
        let _ = spawn_local(async {});
    }
}
