//! # Handler - One Stage of a Chain
//!
//! A [`Handler`] is one stage of a bidirectional [`Chain`](crate::Chain). It
//! transforms messages flowing inbound (decode) and outbound (encode) while
//! keeping both directions strictly typed.
//!
//! ## Type Parameters
//!
//! Handlers have four associated types that define the transformation:
//!
//! - `Rin`: what this stage receives from the previous stage (inbound)
//! - `Rout`: what this stage produces for the next stage (inbound)
//! - `Win`: what this stage receives from the next stage (outbound)
//! - `Wout`: what this stage produces for the previous stage (outbound)
//!
//! ```text
//! Chain: Stage1 -> Stage2 -> Stage3
//!
//! Inbound (handle_inbound):
//!   Stage1: Rin1 -> Rout1
//!   Stage2: Rin2 (= Rout1) -> Rout2
//!   Stage3: Rin3 (= Rout2) -> Rout3
//!
//! Outbound (poll_outbound):
//!   Stage3: Win3 -> Wout3
//!   Stage2: Win2 (= Wout3) -> Wout2
//!   Stage1: Win1 (= Wout2) -> Wout1
//! ```
//!
//! ## Inbound Bracketing and the Error Path
//!
//! For every inbound message the chain runtime invokes, in order:
//!
//! 1. [`Handler::before_inbound`] - setup/validation hook
//! 2. [`Handler::handle_inbound`] - the stage's decode transform
//! 3. [`Handler::after_inbound`] on `Ok`, releasing any scratch state, or
//!    [`Handler::handle_inbound_error`] on `Err`.
//!
//! An `Err` from `handle_inbound` means this message was malformed for this
//! stage; the message is dropped (it was moved into the stage and not
//! forwarded) and by default the error is propagated down the chain as an
//! error event so the terminal stage can observe it. The connection is not
//! closed by the runtime - that policy belongs to the stage or the
//! application.
//!
//! ## Example: Envelope-Counting Stage
//!
//! ```rust
//! use ripc_chain::{Context, Handler};
//! use std::error::Error;
//!
//! struct CountingStage {
//!     seen: usize,
//! }
//!
//! impl Handler for CountingStage {
//!     type Rin = String;
//!     type Rout = String;
//!     type Win = String;
//!     type Wout = String;
//!
//!     fn name(&self) -> &str {
//!         "CountingStage"
//!     }
//!
//!     fn handle_inbound(
//!         &mut self,
//!         ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
//!         msg: Self::Rin,
//!     ) -> Result<(), Box<dyn Error>> {
//!         self.seen += 1;
//!         ctx.fire_inbound(msg);
//!         Ok(())
//!     }
//!
//!     fn poll_outbound(
//!         &mut self,
//!         ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
//!     ) -> Option<Self::Wout> {
//!         ctx.fire_poll_outbound()
//!     }
//! }
//! ```
//!
//! ## Session Lifecycle Events
//!
//! Besides the data path, stages observe out-of-band session signals that
//! bypass the decode/encode transforms:
//!
//! - [`Handler::session_active`] - the connection is established
//! - [`Handler::session_inactive`] - the connection is closed
//! - [`Handler::handle_eof`] - the peer closed its write side
//! - [`Handler::handle_error`] - an error event traveling down the chain
//! - [`Handler::handle_close`] - explicit close request from the application
//! - [`Handler::handle_timeout`] / [`Handler::poll_timeout`] - timer driving
//!
//! The default implementations propagate each event to the next stage; stop
//! propagation by not calling the corresponding `ctx.fire_*` method.

use crate::handler_internal::{ContextInternal, HandlerInternal};
use log::{trace, warn};
use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::{error::Error, time::Instant};

/// One stage of a bidirectional chain.
///
/// See the [module-level documentation](self) for the type-flow rules and the
/// inbound bracketing contract.
pub trait Handler {
    /// Inbound input message type (received from the previous stage).
    type Rin: 'static;

    /// Inbound output message type (produced for the next stage).
    type Rout: 'static;

    /// Outbound input message type (received from the next stage).
    type Win: 'static;

    /// Outbound output message type (produced for the previous stage).
    type Wout: 'static;

    /// Returns the stage's name, used for removal, logging and error
    /// messages. Should be unique within a chain.
    fn name(&self) -> &str;

    #[doc(hidden)]
    #[allow(clippy::type_complexity)]
    fn generate(
        self,
    ) -> (
        String,
        Rc<RefCell<dyn HandlerInternal>>,
        Rc<RefCell<dyn ContextInternal>>,
    )
    where
        Self: Sized + 'static,
    {
        let stage_name = self.name().to_owned();
        let context: Context<Self::Rin, Self::Rout, Self::Win, Self::Wout> =
            Context::new(self.name());

        let handler: Box<
            dyn Handler<Rin = Self::Rin, Rout = Self::Rout, Win = Self::Win, Wout = Self::Wout>,
        > = Box::new(self);

        (
            stage_name,
            Rc::new(RefCell::new(handler)),
            Rc::new(RefCell::new(context)),
        )
    }

    /// Called when the session becomes active (connected).
    ///
    /// The default implementation propagates the event to the next stage.
    fn session_active(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        ctx.fire_session_active();
    }

    /// Called when the session becomes inactive (disconnected).
    ///
    /// The default implementation propagates the event to the next stage.
    fn session_inactive(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        ctx.fire_session_inactive();
    }

    /// Setup hook run immediately before [`Handler::handle_inbound`].
    ///
    /// Use it to validate or prepare per-message scratch state. Default:
    /// no-op.
    fn before_inbound(&mut self, _ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {}

    /// The stage's inbound (decode) transform.
    ///
    /// Forward the transformed message with `ctx.fire_inbound(..)`. Returning
    /// `Err` marks the message malformed for this stage: it is dropped, and
    /// [`Handler::handle_inbound_error`] runs instead of
    /// [`Handler::after_inbound`].
    fn handle_inbound(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        msg: Self::Rin,
    ) -> Result<(), Box<dyn Error>>;

    /// Teardown hook run after a successful [`Handler::handle_inbound`].
    ///
    /// Default: no-op.
    fn after_inbound(&mut self, _ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {}

    /// Called when [`Handler::handle_inbound`] reported malformed input.
    ///
    /// The offending message is already gone; only the error remains. The
    /// default implementation propagates the error down the chain as an error
    /// event so the terminal stage can observe it. Override to change the
    /// per-stage policy (e.g. request a close).
    fn handle_inbound_error(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        err: Box<dyn Error>,
    ) {
        ctx.fire_error(err);
    }

    /// Polls this stage for an outbound (encode) message.
    ///
    /// Typical stages first poll the next stage via
    /// `ctx.fire_poll_outbound()`, encode what they receive, and return it;
    /// queueing stages may also drain their own buffers. `None` means nothing
    /// to transmit.
    fn poll_outbound(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
    ) -> Option<Self::Wout>;

    /// Handles a timeout event (keepalives, retransmits, expiry).
    ///
    /// The default implementation propagates the event to the next stage.
    fn handle_timeout(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        now: Instant,
    ) {
        ctx.fire_timeout(now);
    }

    /// Polls for the earliest deadline at which this stage next needs
    /// [`Handler::handle_timeout`]; move `eto` earlier to request it.
    ///
    /// The default implementation propagates the poll to the next stage.
    fn poll_timeout(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        eto: &mut Instant,
    ) {
        ctx.fire_poll_timeout(eto);
    }

    /// Handles an end-of-stream event (peer closed its write side).
    ///
    /// The default implementation propagates the event to the next stage.
    fn handle_eof(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        ctx.fire_eof();
    }

    /// Handles an error event traveling down the chain.
    ///
    /// The default implementation propagates the error to the next stage.
    fn handle_error(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        err: Box<dyn Error>,
    ) {
        ctx.fire_error(err);
    }

    /// Handles an explicit close request.
    ///
    /// The default implementation propagates the event to the next stage.
    fn handle_close(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        ctx.fire_close();
    }
}

impl<Rin: 'static, Rout: 'static, Win: 'static, Wout: 'static> HandlerInternal
    for Box<dyn Handler<Rin = Rin, Rout = Rout, Win = Win, Wout = Wout>>
{
    fn session_active_internal(&mut self, ctx: &dyn ContextInternal) {
        if let Some(ctx) = ctx.as_any().downcast_ref::<Context<Rin, Rout, Win, Wout>>() {
            self.session_active(ctx);
        } else {
            panic!(
                "ctx can't downcast_ref::<Context<Rin, Rout, Win, Wout>> in {} stage",
                ctx.name()
            );
        }
    }

    fn session_inactive_internal(&mut self, ctx: &dyn ContextInternal) {
        if let Some(ctx) = ctx.as_any().downcast_ref::<Context<Rin, Rout, Win, Wout>>() {
            self.session_inactive(ctx);
        } else {
            panic!(
                "ctx can't downcast_ref::<Context<Rin, Rout, Win, Wout>> in {} stage",
                ctx.name()
            );
        }
    }

    fn handle_inbound_internal(&mut self, ctx: &dyn ContextInternal, msg: Box<dyn Any>) {
        if let Some(ctx) = ctx.as_any().downcast_ref::<Context<Rin, Rout, Win, Wout>>() {
            if let Ok(msg) = msg.downcast::<Rin>() {
                // on Ok the after hook runs; on Err the error hook runs
                // instead, and the message has been consumed without being
                // forwarded.
                self.before_inbound(ctx);
                match self.handle_inbound(ctx, *msg) {
                    Ok(()) => self.after_inbound(ctx),
                    Err(err) => {
                        trace!("{} stage dropped malformed message: {}", ctx.name(), err);
                        self.handle_inbound_error(ctx, err);
                    }
                }
            } else {
                panic!("msg can't downcast::<Rin> in {} stage", ctx.name());
            }
        } else {
            panic!(
                "ctx can't downcast_ref::<Context<Rin, Rout, Win, Wout>> in {} stage",
                ctx.name()
            );
        }
    }

    fn poll_outbound_internal(&mut self, ctx: &dyn ContextInternal) -> Option<Box<dyn Any>> {
        if let Some(ctx) = ctx.as_any().downcast_ref::<Context<Rin, Rout, Win, Wout>>() {
            self.poll_outbound(ctx)
                .map(|msg| Box::new(msg) as Box<dyn Any>)
        } else {
            panic!(
                "ctx can't downcast_ref::<Context<Rin, Rout, Win, Wout>> in {} stage",
                ctx.name()
            );
        }
    }

    fn handle_timeout_internal(&mut self, ctx: &dyn ContextInternal, now: Instant) {
        if let Some(ctx) = ctx.as_any().downcast_ref::<Context<Rin, Rout, Win, Wout>>() {
            self.handle_timeout(ctx, now);
        } else {
            panic!(
                "ctx can't downcast_ref::<Context<Rin, Rout, Win, Wout>> in {} stage",
                ctx.name()
            );
        }
    }

    fn poll_timeout_internal(&mut self, ctx: &dyn ContextInternal, eto: &mut Instant) {
        if let Some(ctx) = ctx.as_any().downcast_ref::<Context<Rin, Rout, Win, Wout>>() {
            self.poll_timeout(ctx, eto);
        } else {
            panic!(
                "ctx can't downcast_ref::<Context<Rin, Rout, Win, Wout>> in {} stage",
                ctx.name()
            );
        }
    }

    fn handle_eof_internal(&mut self, ctx: &dyn ContextInternal) {
        if let Some(ctx) = ctx.as_any().downcast_ref::<Context<Rin, Rout, Win, Wout>>() {
            self.handle_eof(ctx);
        } else {
            panic!(
                "ctx can't downcast_ref::<Context<Rin, Rout, Win, Wout>> in {} stage",
                ctx.name()
            );
        }
    }

    fn handle_error_internal(&mut self, ctx: &dyn ContextInternal, err: Box<dyn Error>) {
        if let Some(ctx) = ctx.as_any().downcast_ref::<Context<Rin, Rout, Win, Wout>>() {
            self.handle_error(ctx, err);
        } else {
            panic!(
                "ctx can't downcast_ref::<Context<Rin, Rout, Win, Wout>> in {} stage",
                ctx.name()
            );
        }
    }

    fn handle_close_internal(&mut self, ctx: &dyn ContextInternal) {
        if let Some(ctx) = ctx.as_any().downcast_ref::<Context<Rin, Rout, Win, Wout>>() {
            self.handle_close(ctx);
        } else {
            panic!(
                "ctx can't downcast_ref::<Context<Rin, Rout, Win, Wout>> in {} stage",
                ctx.name()
            );
        }
    }
}

/// Enables a [`Handler`] to interact with its chain.
///
/// The context is handed to every handler method and carries the link to the
/// neighboring stage in the data-flow direction. `fire_*` methods advance
/// control to that stage:
///
/// - `fire_inbound(msg)` - forward a decoded message (inbound direction)
/// - `fire_poll_outbound()` - pull an outbound message from the next stage
/// - `fire_session_active()` / `fire_session_inactive()` / `fire_eof()` /
///   `fire_error(err)` / `fire_close()` - propagate out-of-band events
/// - `fire_timeout(now)` / `fire_poll_timeout(eto)` - propagate timer driving
pub struct Context<Rin, Rout, Win, Wout> {
    name: String,

    next_context: Option<Rc<RefCell<dyn ContextInternal>>>,
    next_handler: Option<Rc<RefCell<dyn HandlerInternal>>>,

    phantom: PhantomData<(Rin, Rout, Win, Wout)>,
}

impl<Rin: 'static, Rout: 'static, Win: 'static, Wout: 'static> Context<Rin, Rout, Win, Wout> {
    /// Creates an unlinked context for the named stage. The chain links it
    /// during finalization; there is rarely a reason to call this directly.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),

            next_context: None,
            next_handler: None,

            phantom: PhantomData,
        }
    }

    /// Propagates the session-active event to the next stage.
    pub fn fire_session_active(&self) {
        if let (Some(next_handler), Some(next_context)) = (&self.next_handler, &self.next_context) {
            let (mut next_handler, next_context) =
                (next_handler.borrow_mut(), next_context.borrow());
            next_handler.session_active_internal(&*next_context);
        }
    }

    /// Propagates the session-inactive event to the next stage.
    pub fn fire_session_inactive(&self) {
        if let (Some(next_handler), Some(next_context)) = (&self.next_handler, &self.next_context) {
            let (mut next_handler, next_context) =
                (next_handler.borrow_mut(), next_context.borrow());
            next_handler.session_inactive_internal(&*next_context);
        }
    }

    /// Forwards a decoded message to the next stage.
    ///
    /// Call this from [`Handler::handle_inbound`] with the transformed
    /// message (`Rout`).
    pub fn fire_inbound(&self, msg: Rout) {
        if let (Some(next_handler), Some(next_context)) = (&self.next_handler, &self.next_context) {
            let (mut next_handler, next_context) =
                (next_handler.borrow_mut(), next_context.borrow());
            next_handler.handle_inbound_internal(&*next_context, Box::new(msg));
        } else {
            warn!("fire_inbound reached end of chain");
        }
    }

    /// Polls the next stage for an outbound message.
    ///
    /// Call this from [`Handler::poll_outbound`]; returns `Some(Win)` when
    /// the next stage has queued data.
    pub fn fire_poll_outbound(&self) -> Option<Win> {
        if let (Some(next_handler), Some(next_context)) = (&self.next_handler, &self.next_context) {
            let (mut next_handler, next_context) =
                (next_handler.borrow_mut(), next_context.borrow());
            if let Some(msg) = next_handler.poll_outbound_internal(&*next_context) {
                if let Ok(msg) = msg.downcast::<Win>() {
                    Some(*msg)
                } else {
                    panic!("msg can't downcast::<Win> in {} stage", next_context.name());
                }
            } else {
                None
            }
        } else {
            warn!("fire_poll_outbound reached end of chain");
            None
        }
    }

    /// Propagates a timeout event to the next stage.
    pub fn fire_timeout(&self, now: Instant) {
        if let (Some(next_handler), Some(next_context)) = (&self.next_handler, &self.next_context) {
            let (mut next_handler, next_context) =
                (next_handler.borrow_mut(), next_context.borrow());
            next_handler.handle_timeout_internal(&*next_context, now);
        } else {
            warn!("fire_timeout reached end of chain");
        }
    }

    /// Polls the next stage for its earliest timeout deadline.
    pub fn fire_poll_timeout(&self, eto: &mut Instant) {
        if let (Some(next_handler), Some(next_context)) = (&self.next_handler, &self.next_context) {
            let (mut next_handler, next_context) =
                (next_handler.borrow_mut(), next_context.borrow());
            next_handler.poll_timeout_internal(&*next_context, eto);
        } else {
            trace!("fire_poll_timeout reached end of chain");
        }
    }

    /// Propagates an end-of-stream event to the next stage.
    pub fn fire_eof(&self) {
        if let (Some(next_handler), Some(next_context)) = (&self.next_handler, &self.next_context) {
            let (mut next_handler, next_context) =
                (next_handler.borrow_mut(), next_context.borrow());
            next_handler.handle_eof_internal(&*next_context);
        } else {
            warn!("fire_eof reached end of chain");
        }
    }

    /// Propagates an error event to the next stage.
    pub fn fire_error(&self, err: Box<dyn Error>) {
        if let (Some(next_handler), Some(next_context)) = (&self.next_handler, &self.next_context) {
            let (mut next_handler, next_context) =
                (next_handler.borrow_mut(), next_context.borrow());
            next_handler.handle_error_internal(&*next_context, err);
        } else {
            warn!("fire_error reached end of chain");
        }
    }

    /// Propagates a close request to the next stage.
    pub fn fire_close(&self) {
        if let (Some(next_handler), Some(next_context)) = (&self.next_handler, &self.next_context) {
            let (mut next_handler, next_context) =
                (next_handler.borrow_mut(), next_context.borrow());
            next_handler.handle_close_internal(&*next_context);
        } else {
            warn!("fire_close reached end of chain");
        }
    }
}

impl<Rin: 'static, Rout: 'static, Win: 'static, Wout: 'static> ContextInternal
    for Context<Rin, Rout, Win, Wout>
{
    fn fire_session_active_internal(&self) {
        self.fire_session_active();
    }

    fn fire_session_inactive_internal(&self) {
        self.fire_session_inactive();
    }

    fn fire_inbound_internal(&self, msg: Box<dyn Any>) {
        if let Ok(msg) = msg.downcast::<Rout>() {
            self.fire_inbound(*msg);
        } else {
            panic!("msg can't downcast::<Rout> in {} stage", self.name());
        }
    }

    fn fire_poll_outbound_internal(&self) -> Option<Box<dyn Any>> {
        self.fire_poll_outbound()
            .map(|msg| Box::new(msg) as Box<dyn Any>)
    }

    fn fire_timeout_internal(&self, now: Instant) {
        self.fire_timeout(now);
    }

    fn fire_poll_timeout_internal(&self, eto: &mut Instant) {
        self.fire_poll_timeout(eto);
    }

    fn fire_eof_internal(&self) {
        self.fire_eof();
    }

    fn fire_error_internal(&self, err: Box<dyn Error>) {
        self.fire_error(err);
    }

    fn fire_close_internal(&self) {
        self.fire_close();
    }

    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_next_context(&mut self, next_context: Option<Rc<RefCell<dyn ContextInternal>>>) {
        self.next_context = next_context;
    }

    fn set_next_handler(&mut self, next_handler: Option<Rc<RefCell<dyn HandlerInternal>>>) {
        self.next_handler = next_handler;
    }
}
