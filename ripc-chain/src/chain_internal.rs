use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::{error::Error, io::ErrorKind, marker::PhantomData, time::Instant};

use crate::handler::{Context, Handler};
use crate::handler_internal::{ContextInternal, HandlerInternal};
use crate::{NotifyCallback, RESERVED_TAIL_NAME};

/// Internal chain implementation that owns the stages and their links.
///
/// # Architecture
///
/// Stages and contexts are stored as `Rc<RefCell<..>>` trait objects. During
/// `finalize()` each context is linked to the next stage's handler and
/// context, forming the traversal order for both directions:
///
/// ```text
/// ChainInternal<R, W>
/// ├─ handlers: [Stage1, Stage2, .., TailHandler]
/// ├─ contexts: [Ctx1 ──▶ Stage2/Ctx2 ──▶ .. ──▶ Tail/CtxTail]
/// └─ transmits: Rc<RefCell<VecDeque<W>>>  (shared with TailHandler)
/// ```
///
/// # Dispatch vs. Write
///
/// Dispatch entry points (`handle_inbound`, `poll_outbound`, events) take
/// `&self` and borrow each stage's `RefCell` only for the duration of that
/// stage's call. `write()` touches only the `transmits` queue, which lives in
/// its own `Rc<RefCell<..>>`, so a stage may write to its own chain from
/// inside a dispatch without a borrow conflict.
pub(crate) struct ChainInternal<R, W> {
    /// Stage names, parallel to `handlers`, for removal and diagnostics.
    names: Vec<String>,

    handlers: Vec<Rc<RefCell<dyn HandlerInternal>>>,
    contexts: Vec<Rc<RefCell<dyn ContextInternal>>>,

    /// Outbound messages queued by `write()`, drained by the tail stage
    /// when `poll_outbound` cascades to the end of the chain.
    transmits: Rc<RefCell<VecDeque<W>>>,

    /// Callback to notify the I/O layer when data is ready to transmit.
    write_notify: RefCell<Option<NotifyCallback>>,

    phantom: PhantomData<(R, W)>,
}

impl<R: 'static, W: 'static> ChainInternal<R, W> {
    pub(crate) fn new() -> Self {
        let transmits = Rc::new(RefCell::new(VecDeque::new()));
        let tail: TailHandler<W> = TailHandler::new(Rc::clone(&transmits));
        let (name, handler, context) = tail.generate();
        Self {
            names: vec![name],
            handlers: vec![handler],
            contexts: vec![context],
            transmits,
            write_notify: RefCell::new(None),
            phantom: PhantomData,
        }
    }

    pub(crate) fn add_back(&mut self, handler: impl Handler + 'static) {
        let (name, handler, context) = handler.generate();
        if name == RESERVED_TAIL_NAME {
            panic!("stage name {} is reserved", name);
        }

        let len = self.names.len();

        // The tail stage stays last.
        self.names.insert(len - 1, name);
        self.handlers.insert(len - 1, handler);
        self.contexts.insert(len - 1, context);
    }

    pub(crate) fn add_front(&mut self, handler: impl Handler + 'static) {
        let (name, handler, context) = handler.generate();
        if name == RESERVED_TAIL_NAME {
            panic!("stage name {} is reserved", name);
        }

        self.names.insert(0, name);
        self.handlers.insert(0, handler);
        self.contexts.insert(0, context);
    }

    pub(crate) fn remove_back(&mut self) -> Result<(), std::io::Error> {
        let len = self.names.len();
        if len == 1 {
            Err(std::io::Error::new(
                ErrorKind::NotFound,
                "No stages in chain",
            ))
        } else {
            self.names.remove(len - 2);
            self.handlers.remove(len - 2);
            self.contexts.remove(len - 2);

            Ok(())
        }
    }

    pub(crate) fn remove_front(&mut self) -> Result<(), std::io::Error> {
        let len = self.names.len();
        if len == 1 {
            Err(std::io::Error::new(
                ErrorKind::NotFound,
                "No stages in chain",
            ))
        } else {
            self.names.remove(0);
            self.handlers.remove(0);
            self.contexts.remove(0);

            Ok(())
        }
    }

    pub(crate) fn remove(&mut self, stage_name: &str) -> Result<(), std::io::Error> {
        if stage_name == RESERVED_TAIL_NAME {
            return Err(std::io::Error::new(
                ErrorKind::PermissionDenied,
                format!("stage name {} is reserved", stage_name),
            ));
        }

        let mut to_be_removed = vec![];
        for (index, name) in self.names.iter().enumerate() {
            if name == stage_name {
                to_be_removed.push(index);
            }
        }

        if !to_be_removed.is_empty() {
            for index in to_be_removed.into_iter().rev() {
                self.names.remove(index);
                self.handlers.remove(index);
                self.contexts.remove(index);
            }

            Ok(())
        } else {
            Err(std::io::Error::new(
                ErrorKind::NotFound,
                format!("No such stage \"{}\" in chain", stage_name),
            ))
        }
    }

    pub(crate) fn len(&self) -> usize {
        // The reserved tail stage is not counted.
        self.names.len() - 1
    }

    /// Links every context to the next stage. Must run after any
    /// add/remove and before dispatch.
    pub(crate) fn finalize(&mut self) {
        for ctx in self.contexts.iter() {
            let mut ctx = ctx.borrow_mut();
            ctx.set_next_context(None);
            ctx.set_next_handler(None);
        }

        for j in 0..self.contexts.len() {
            if j + 1 < self.contexts.len() {
                let mut ctx = self.contexts[j].borrow_mut();
                ctx.set_next_context(Some(Rc::clone(&self.contexts[j + 1])));
                ctx.set_next_handler(Some(Rc::clone(&self.handlers[j + 1])));
            }
        }
    }

    pub(crate) fn write(&self, msg: W) {
        self.transmits.borrow_mut().push_back(msg);

        if let Some(notify) = self.write_notify.borrow().as_ref() {
            notify();
        }
    }

    pub(crate) fn set_write_notify(&self, notify: NotifyCallback) {
        *self.write_notify.borrow_mut() = Some(notify);
    }

    pub(crate) fn session_active(&self) {
        let (mut handler, context) = (self.handlers[0].borrow_mut(), self.contexts[0].borrow());
        handler.session_active_internal(&*context);
    }

    pub(crate) fn session_inactive(&self) {
        let (mut handler, context) = (self.handlers[0].borrow_mut(), self.contexts[0].borrow());
        handler.session_inactive_internal(&*context);
    }

    pub(crate) fn handle_inbound(&self, msg: R) {
        let (mut handler, context) = (self.handlers[0].borrow_mut(), self.contexts[0].borrow());
        handler.handle_inbound_internal(&*context, Box::new(msg));
    }

    pub(crate) fn poll_outbound(&self) -> Option<R> {
        let (mut handler, context) = (self.handlers[0].borrow_mut(), self.contexts[0].borrow());
        if let Some(msg) = handler.poll_outbound_internal(&*context) {
            if let Ok(msg) = msg.downcast::<R>() {
                Some(*msg)
            } else {
                panic!("msg can't downcast::<R> in {} stage", context.name());
            }
        } else {
            None
        }
    }

    pub(crate) fn handle_timeout(&self, now: Instant) {
        let (mut handler, context) = (self.handlers[0].borrow_mut(), self.contexts[0].borrow());
        handler.handle_timeout_internal(&*context, now);
    }

    pub(crate) fn poll_timeout(&self, eto: &mut Instant) {
        let (mut handler, context) = (self.handlers[0].borrow_mut(), self.contexts[0].borrow());
        handler.poll_timeout_internal(&*context, eto);
    }

    pub(crate) fn handle_eof(&self) {
        let (mut handler, context) = (self.handlers[0].borrow_mut(), self.contexts[0].borrow());
        handler.handle_eof_internal(&*context);
    }

    pub(crate) fn handle_error(&self, err: Box<dyn Error>) {
        let (mut handler, context) = (self.handlers[0].borrow_mut(), self.contexts[0].borrow());
        handler.handle_error_internal(&*context, err);
    }

    pub(crate) fn handle_close(&self) {
        let (mut handler, context) = (self.handlers[0].borrow_mut(), self.contexts[0].borrow());
        handler.handle_close_internal(&*context);
    }
}

/// The reserved terminal stage appended to every chain.
///
/// Holds a shared handle to the chain's transmit queue: inbound messages that
/// reach it fall off the end of the chain, and `poll_outbound` drains the
/// queue that `write()` fills.
pub(crate) struct TailHandler<W> {
    transmits: Rc<RefCell<VecDeque<W>>>,
}

impl<W> TailHandler<W> {
    pub(crate) fn new(transmits: Rc<RefCell<VecDeque<W>>>) -> Self {
        Self { transmits }
    }
}

impl<W: 'static> Handler for TailHandler<W> {
    type Rin = W;
    type Rout = Self::Rin;
    type Win = Self::Rin;
    type Wout = Self::Rin;

    fn name(&self) -> &str {
        RESERVED_TAIL_NAME
    }

    fn handle_inbound(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        msg: Self::Rin,
    ) -> Result<(), Box<dyn Error>> {
        // End of the inbound direction. There is no next stage, so the
        // message is dropped (with a warning from the context).
        ctx.fire_inbound(msg);
        Ok(())
    }

    fn poll_outbound(
        &mut self,
        _ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
    ) -> Option<Self::Wout> {
        let mut transmits = self.transmits.borrow_mut();
        transmits.pop_front()
    }
}
