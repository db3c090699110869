//! # ripc-rt - Loop Executors
//!
//! Single-threaded executors that ripc's event-loop backends run on. Each
//! backend confines one loop (and every chain it owns) to one thread; this
//! crate provides the thread-plus-executor bundle, with optional CPU
//! pinning and thread naming.
//!
//! Two interchangeable implementations are exposed side by side:
//!
//! - [`tokio_rt`]: tokio current-thread runtime driving a `LocalSet`
//! - [`smol_rt`]: smol `LocalExecutor`
//!
//! Both provide the same surface: [`tokio_rt::LoopBuilder`] /
//! [`smol_rt::LoopBuilder`] with `name(..)`, `core_id(..)`, `run(fut)`
//! (block the current thread) and `spawn(fut_gen)` (dedicated worker
//! thread), plus `spawn_local` for tasks inside the loop and a `Task`
//! handle with `detach`/`cancel`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use ripc_rt::tokio_rt::{LoopBuilder, spawn_local};
//!
//! LoopBuilder::default().run(async {
//!     let task = spawn_local(async { 42 });
//!     assert_eq!(task.await.unwrap(), 42);
//! });
//! ```
//!
//! ## CPU pinning
//!
//! ```rust,no_run
//! use core_affinity::CoreId;
//! use ripc_rt::smol_rt::LoopBuilder;
//!
//! LoopBuilder::new()
//!     .name("ripc-loop-0")
//!     .core_id(CoreId { id: 0 })
//!     .run(async {
//!         // loop body
//!     });
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub mod smol_rt;
pub mod tokio_rt;
