//! # ripc-poll - Readiness-Polling Transport Backends
//!
//! Backends without a loop of their own: [`PollServer`] and [`PollClient`]
//! are driven by their caller, one [`check`](PollServer::check) at a time.
//! `start` returns once the sockets are registered (and, for the client,
//! connected); from then on the caller's thread owns all progress:
//!
//! ```rust,no_run
//! # use ripc_poll::PollServer;
//! # use std::time::Duration;
//! # fn demo(server: &mut PollServer) {
//! while server.check(Duration::from_millis(100)).is_ok() {
//!     // decoded envelopes were dispatched into the chains; queued
//!     // writes were flushed
//! }
//! // check() failing is the shutdown signal
//! # }
//! ```
//!
//! Both backends share one [`PollSet`]: a mio `Poll` multiplexing the
//! listener (server only), every connection, and a cross-thread wakeup.
//! `send(sid, envelope)` and `check(timeout)` take `&mut self` and belong
//! to the driving thread; only the [`StopHandle`] may be used from
//! elsewhere. Sends traverse the session's outbound chain direction, so
//! whatever codec stages the factory installed shape the bytes.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

use bytes::BytesMut;
use ripc_chain::Chain;
use ripc_transport::{Envelope, SessionInfo};
use std::rc::Rc;

mod client;
mod poll_set;
mod server;

pub use client::PollClient;
pub use poll_set::{DEFAULT_CAPACITY, DEFAULT_MAX_PAYLOAD_SIZE, PollSet, StopHandle};
pub use server::PollServer;

/// Builds the chain for one session: codecs plus the application's
/// terminal stage. Called on the driving thread.
pub type ChainFactoryFn = Box<dyn Fn(SessionInfo) -> Rc<Chain<BytesMut, Envelope>>>;
