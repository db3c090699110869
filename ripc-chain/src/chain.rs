//! Chain - the ordered stage sequence for one connection.
//!
//! A [`Chain`] owns the stages and exposes the two traversal directions as
//! separate traits: [`InboundChain`] (events and received data entering from
//! the I/O layer) and [`OutboundChain`] (application writes leaving toward
//! the I/O layer). All dispatch methods take `&self`, so a finalized chain
//! can be shared via `Rc<Chain<..>>` - typically the I/O layer holds the
//! `Rc` and hands the application a `Weak<dyn OutboundChain<W>>`.

use crate::NotifyCallback;
use crate::chain_internal::ChainInternal;
use crate::handler::Handler;
use std::cell::RefCell;
use std::{error::Error, time::Instant};

/// Inbound direction of a chain: what the I/O layer drives.
///
/// `R` is the boundary type exchanged with the I/O layer on both directions
/// (the first stage's `Rin`/`Wout`).
pub trait InboundChain<R> {
    /// Notifies the chain that the session is active (connected).
    fn session_active(&self);

    /// Notifies the chain that the session is inactive (disconnected).
    fn session_inactive(&self);

    /// Feeds received data into the first stage.
    fn handle_inbound(&self, msg: R);

    /// Pulls the next fully-encoded outbound message, if any.
    fn poll_outbound(&self) -> Option<R>;

    /// Drives timer-based stages.
    fn handle_timeout(&self, now: Instant);

    /// Polls for the earliest deadline any stage needs.
    fn poll_timeout(&self, eto: &mut Instant);

    /// Signals that the peer closed its write side.
    fn handle_eof(&self);

    /// Injects an error event at the head of the chain.
    fn handle_error(&self, err: Box<dyn Error>);

    #[doc(hidden)]
    fn set_write_notify(&self, notify: NotifyCallback);
}

/// Outbound direction of a chain: what the application drives.
///
/// `W` is the application-facing message type (the last user stage's `Win`).
pub trait OutboundChain<W> {
    /// Queues a message for transmission and notifies the I/O layer.
    fn write(&self, msg: W);

    /// Requests an orderly close of the session.
    fn close(&self);
}

/// An ordered, bidirectional sequence of stages for one connection.
///
/// Build it by `add_back`-ing stages head to tail, then call
/// [`Chain::finalize`] to link them. A reserved terminal stage is always
/// present at the tail; it bridges [`OutboundChain::write`] to
/// [`InboundChain::poll_outbound`].
///
/// # Example
///
/// ```rust
/// use ripc_chain::{Chain, Context, Handler, InboundChain, OutboundChain};
/// use std::error::Error;
///
/// # struct Upcase;
/// # impl Handler for Upcase {
/// #     type Rin = String;
/// #     type Rout = String;
/// #     type Win = String;
/// #     type Wout = String;
/// #     fn name(&self) -> &str { "Upcase" }
/// #     fn handle_inbound(
/// #         &mut self,
/// #         ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
/// #         msg: Self::Rin,
/// #     ) -> Result<(), Box<dyn Error>> {
/// #         ctx.fire_inbound(msg.to_uppercase());
/// #         Ok(())
/// #     }
/// #     fn poll_outbound(
/// #         &mut self,
/// #         ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
/// #     ) -> Option<Self::Wout> {
/// #         ctx.fire_poll_outbound()
/// #     }
/// # }
/// let mut chain: Chain<String, String> = Chain::new();
/// chain.add_back(Upcase);
/// chain.finalize();
///
/// chain.write("hello".to_string());
/// assert_eq!(chain.poll_outbound(), Some("hello".to_string()));
/// ```
///
/// # Threading
///
/// `Chain` is not `Send`: it is confined to the thread that drives its
/// connection. Cross-thread signaling goes through the transport's stop
/// handle, never through the chain.
pub struct Chain<R, W> {
    internal: RefCell<ChainInternal<R, W>>,
}

impl<R: 'static, W: 'static> Default for Chain<R, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: 'static, W: 'static> Chain<R, W> {
    /// Creates a new chain holding only the reserved terminal stage.
    pub fn new() -> Self {
        Self {
            internal: RefCell::new(ChainInternal::new()),
        }
    }

    /// Appends a stage just before the terminal stage.
    ///
    /// Returns `&Self` for call chaining.
    pub fn add_back(&self, handler: impl Handler + 'static) -> &Self {
        self.internal.borrow_mut().add_back(handler);
        self
    }

    /// Prepends a stage at the head of the chain.
    pub fn add_front(&self, handler: impl Handler + 'static) -> &Self {
        self.internal.borrow_mut().add_front(handler);
        self
    }

    /// Removes the last user stage (never the reserved terminal stage).
    pub fn remove_back(&self) -> Result<&Self, std::io::Error> {
        self.internal.borrow_mut().remove_back().map(|()| self)
    }

    /// Removes the first stage.
    pub fn remove_front(&self) -> Result<&Self, std::io::Error> {
        self.internal.borrow_mut().remove_front().map(|()| self)
    }

    /// Removes all stages with the given name.
    ///
    /// The chain must be finalized again before further dispatch.
    pub fn remove(&self, stage_name: &str) -> Result<&Self, std::io::Error> {
        self.internal.borrow_mut().remove(stage_name).map(|()| self)
    }

    /// Returns the number of user stages (the terminal stage is not
    /// counted).
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.internal.borrow().len()
    }

    /// Links the stages head to tail, making the chain ready for dispatch.
    ///
    /// **Must be called after any add/remove and before use.**
    pub fn finalize(&self) -> &Self {
        self.internal.borrow_mut().finalize();
        self
    }
}

impl<R: 'static, W: 'static> InboundChain<R> for Chain<R, W> {
    fn session_active(&self) {
        self.internal.borrow().session_active();
    }

    fn session_inactive(&self) {
        self.internal.borrow().session_inactive();
    }

    fn handle_inbound(&self, msg: R) {
        self.internal.borrow().handle_inbound(msg);
    }

    fn poll_outbound(&self) -> Option<R> {
        self.internal.borrow().poll_outbound()
    }

    fn handle_timeout(&self, now: Instant) {
        self.internal.borrow().handle_timeout(now);
    }

    fn poll_timeout(&self, eto: &mut Instant) {
        self.internal.borrow().poll_timeout(eto);
    }

    fn handle_eof(&self) {
        self.internal.borrow().handle_eof();
    }

    fn handle_error(&self, err: Box<dyn Error>) {
        self.internal.borrow().handle_error(err);
    }

    #[doc(hidden)]
    fn set_write_notify(&self, notify: NotifyCallback) {
        self.internal.borrow().set_write_notify(notify);
    }
}

impl<R: 'static, W: 'static> OutboundChain<W> for Chain<R, W> {
    fn write(&self, msg: W) {
        self.internal.borrow().write(msg);
    }

    fn close(&self) {
        self.internal.borrow().handle_close();
    }
}
