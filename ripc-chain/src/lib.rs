//! # ripc-chain - Handler Chains for Transport Processing
//!
//! `ripc-chain` is the codec-pipeline runtime of the ripc transport stack. A
//! [`Chain`] is an ordered sequence of [`Handler`] stages that every unit of
//! traffic on one connection passes through, in both directions:
//!
//! - **Inbound (decode)**: raw bytes enter at the first stage and flow
//!   first → last, each stage transforming the message type on the way up to
//!   the application's terminal stage.
//! - **Outbound (encode)**: messages written by the application flow
//!   last → first, each stage encoding on the way down to the transport.
//!
//! ```text
//!                                                    | write()
//!   +------------------------------------------------+-----------+
//!   |                        Chain                   |           |
//!   |                                               \|/          |
//!   |    +----------+----------+------------+--------+------+    |
//!   |    |                 application stage                |    |
//!   |    +----------+----------+------------+--------+------+    |
//!   |              /|\                               |           |
//!   |               |                                |           |
//!   |     ctx.fire_inbound()         ctx.fire_poll_outbound()    |
//!   |               |                                |           |
//!   |               |                               \|/          |
//!   |    +----------+----------+------------+--------+------+    |
//!   |    |                   codec stage                    |    |
//!   |    +----------+----------+------------+--------+------+    |
//!   |              /|\                               |           |
//!   +---------------+--------------------------------+-----------+
//!                   | handle_inbound()               | poll_outbound()
//!                   |                               \|/
//!   +---------------+--------------------------------+-----------+
//!   |       transport engine (event loop or poll set)            |
//!   +-------------------------------------------------------------+
//! ```
//!
//! Each stage's inbound transform is bracketed: the chain runtime invokes the
//! stage's [`Handler::before_inbound`] hook, then [`Handler::handle_inbound`],
//! then [`Handler::after_inbound`]. When `handle_inbound` reports malformed
//! input, [`Handler::handle_inbound_error`] runs instead of `after_inbound`,
//! the message is dropped, and the connection stays open; the next well-formed
//! message proceeds normally.
//!
//! Chains are single-threaded by design: they use `Rc` internally and are
//! `!Send`, so a chain cannot accidentally leave the thread that owns its
//! engine. Engines that need cross-thread input use their own hand-off
//! primitives, never a shared chain.
//!
//! A chain is a simple sequence with exactly one head and one tail per
//! direction; stages are linked once at [`Chain::finalize`] and re-linked
//! after every `add_*`/`remove_*`, so no cycle can be formed.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

use std::sync::Arc;

pub(crate) mod chain;
pub(crate) mod chain_internal;
pub(crate) mod handler;
pub(crate) mod handler_internal;

pub use chain::{Chain, InboundChain, OutboundChain};
pub use handler::{Context, Handler};

/// Callback invoked when the application queued an outbound message, so the
/// owning engine can wake its write path.
pub type NotifyCallback = Arc<dyn Fn() + Send + Sync>;

/// Stage name reserved for the chain's built-in tail stage.
pub const RESERVED_TAIL_NAME: &str = "ripc:chain:tail";
