//! # ripc-transport - Transport Core Types
//!
//! Shared vocabulary for every ripc backend: the [`Envelope`] message unit,
//! [`TransportConfig`] validation, session bookkeeping
//! ([`SessionInfo`], [`SidAllocator`]), the [`Transport`] lifecycle trait
//! with its [`TransportState`] machine, and the [`TransportError`] taxonomy.
//!
//! This crate contains no I/O; backends live in `ripc-evloop` and
//! `ripc-poll`, and chain plumbing lives in `ripc-chain`.
//!
//! ## Lifecycle
//!
//! ```text
//! Init ──init──▶ Configured ──open──▶ Opened ──start──▶ Ready
//!                                                        │
//!              Uninitialized ◀──uninit── Closed ◀──close──┤
//!                                           ▲             │
//!                                           └──── stop ───┘ (Stopping)
//! ```
//!
//! Teardown calls (`stop`, `close`, `uninit`) are idempotent: invoking them
//! on an already-torn-down transport is an `Ok` no-op. The only legal
//! re-entry is the client retry path: a `Closed` client may `open` again
//! after caller-driven back-off.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

mod config;
mod envelope;
mod error;
mod session;
mod transport;

pub use config::TransportConfig;
pub use envelope::Envelope;
pub use error::TransportError;
pub use session::{SessionId, SessionInfo, SessionKind, SessionState, SidAllocator};
pub use transport::{Transport, TransportState, expect_state};
