use crate::poll_set::{DEFAULT_CAPACITY, DEFAULT_MAX_PAYLOAD_SIZE, PollSet, StopHandle};
use crate::ChainFactoryFn;
use log::trace;
use ripc_transport::{
    Envelope, SessionId, SessionKind, SessionState, SidAllocator, Transport, TransportConfig,
    TransportError, TransportState, expect_state,
};
use std::rc::Rc;
use std::time::Duration;

/// TCP server driven by the caller's thread.
///
/// `open` binds and listens; `start` registers the listener with the poll
/// and returns immediately. From then on the caller makes all progress by
/// calling [`check`](PollServer::check) in a loop and pushes outbound
/// messages with [`send`](PollServer::send). Each accepted connection gets
/// a session id from the configured range and a fresh chain from the
/// factory; when the range or the capacity is exhausted the accept is
/// refused and the server keeps serving existing sessions.
pub struct PollServer {
    cfg: Option<TransportConfig>,
    state: TransportState,
    capacity: usize,
    max_payload_size: usize,
    chain_factory: Rc<ChainFactoryFn>,
    sids: Option<SidAllocator>,
    listener: Option<std::net::TcpListener>,
    poll_set: Option<PollSet>,
}

impl PollServer {
    /// Creates a server that builds each connection's chain with
    /// `chain_factory`.
    pub fn new(chain_factory: ChainFactoryFn) -> Self {
        Self {
            cfg: None,
            state: TransportState::Init,
            capacity: DEFAULT_CAPACITY,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            chain_factory: Rc::new(chain_factory),
            sids: None,
            listener: None,
            poll_set: None,
        }
    }

    /// Bounds the number of simultaneously registered sessions.
    pub fn capacity(&mut self, capacity: usize) -> &mut Self {
        self.capacity = capacity;
        self
    }

    /// Sets the read-buffer size per connection.
    pub fn max_payload_size(&mut self, max_payload_size: usize) -> &mut Self {
        self.max_payload_size = max_payload_size;
        self
    }

    /// Cross-thread handle that makes [`check`](PollServer::check) return
    /// an error. Available once `start` has run.
    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.poll_set.as_ref().map(PollSet::stop_handle)
    }

    /// Address actually bound, available between `open` and `start`.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Number of sessions currently registered.
    pub fn session_count(&self) -> usize {
        self.poll_set.as_ref().map_or(0, PollSet::session_count)
    }

    /// State of session `sid`; anything not currently registered is
    /// `Closed`.
    pub fn session_state(&self, sid: SessionId) -> SessionState {
        self.poll_set
            .as_ref()
            .map_or(SessionState::Closed, |ps| ps.session_state(sid))
    }

    /// Drives the server for up to `timeout`: accepts, reads, dispatches
    /// into the chains and flushes pending writes.
    ///
    /// Returns `Err` once the [`StopHandle`] has fired.
    pub fn check(&mut self, timeout: Duration) -> Result<(), TransportError> {
        expect_state("check", self.state, &[TransportState::Ready])?;
        let poll_set = self
            .poll_set
            .as_mut()
            .ok_or_else(|| TransportError::Engine("poll set missing after start".to_string()))?;
        let res = poll_set.check(timeout);
        if res.is_err() {
            self.state = TransportState::Stopping;
        }
        res
    }

    /// Queues `envelope` on session `sid`'s outbound chain direction.
    pub fn send(&mut self, sid: SessionId, envelope: Envelope) -> Result<(), TransportError> {
        expect_state("send", self.state, &[TransportState::Ready])?;
        let poll_set = self
            .poll_set
            .as_mut()
            .ok_or_else(|| TransportError::Engine("poll set missing after start".to_string()))?;
        poll_set.send(sid, envelope)
    }
}

impl Transport for PollServer {
    fn init(&mut self, cfg: TransportConfig) -> Result<(), TransportError> {
        expect_state("init", self.state, &[TransportState::Init])?;
        cfg.validate()?;
        self.sids = Some(SidAllocator::new(cfg.sid_min, cfg.sid_max));
        self.cfg = Some(cfg);
        self.state = TransportState::Configured;
        Ok(())
    }

    fn open(&mut self) -> Result<(), TransportError> {
        expect_state("open", self.state, &[TransportState::Configured])?;
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| TransportError::Engine("config missing after init".to_string()))?;
        let listener = std::net::TcpListener::bind(cfg.socket_addr()?)?;
        listener.set_nonblocking(true)?;
        trace!("server {} listening on {}", cfg.id, cfg.socket_addr()?);
        self.listener = Some(listener);
        self.state = TransportState::Opened;
        Ok(())
    }

    fn start(&mut self) -> Result<(), TransportError> {
        expect_state("start", self.state, &[TransportState::Opened])?;
        let listener = self
            .listener
            .take()
            .ok_or_else(|| TransportError::Engine("listener missing after open".to_string()))?;
        let sids = self
            .sids
            .take()
            .ok_or_else(|| TransportError::Engine("allocator missing after init".to_string()))?;

        let mut poll_set = PollSet::new(
            SessionKind::Server,
            Rc::clone(&self.chain_factory),
            sids,
            self.capacity,
            self.max_payload_size,
        )?;
        poll_set.listen(listener)?;
        self.poll_set = Some(poll_set);
        self.state = TransportState::Ready;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        if self.state.is_stopped() {
            return Ok(());
        }
        if let Some(poll_set) = &self.poll_set {
            poll_set.request_stop();
        }
        self.state = TransportState::Stopping;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.state == TransportState::Closed || self.state == TransportState::Uninitialized {
            return Ok(());
        }
        if let Some(poll_set) = self.poll_set.take() {
            // Ids stay spent across any further use of this instance.
            self.sids = Some(poll_set.into_sids());
        }
        self.listener = None;
        self.state = TransportState::Closed;
        Ok(())
    }

    fn uninit(&mut self) -> Result<(), TransportError> {
        if self.state == TransportState::Uninitialized {
            return Ok(());
        }
        if let Some(poll_set) = self.poll_set.take() {
            drop(poll_set.into_sids());
        }
        self.listener = None;
        self.cfg = None;
        self.sids = None;
        self.state = TransportState::Uninitialized;
        Ok(())
    }

    fn state(&self) -> TransportState {
        self.state
    }
}
