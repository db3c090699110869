use crate::poll_set::{DEFAULT_MAX_PAYLOAD_SIZE, PollSet, StopHandle};
use crate::ChainFactoryFn;
use log::trace;
use ripc_transport::{
    Envelope, SessionId, SessionKind, SessionState, SidAllocator, Transport, TransportConfig,
    TransportError, TransportState, expect_state,
};
use std::rc::Rc;
use std::time::Duration;

/// TCP client driven by the caller's thread.
///
/// `open` connects (and may be retried from `Closed` when it fails or the
/// connection drops); `start` registers the socket with the poll and
/// returns immediately. The caller then alternates
/// [`check`](PollClient::check) and [`send`](PollClient::send) until the
/// connection ends or the [`StopHandle`] fires.
pub struct PollClient {
    cfg: Option<TransportConfig>,
    state: TransportState,
    max_payload_size: usize,
    chain_factory: Rc<ChainFactoryFn>,
    sids: Option<SidAllocator>,
    stream: Option<std::net::TcpStream>,
    poll_set: Option<PollSet>,
    sid: Option<SessionId>,
}

impl PollClient {
    /// Creates a client that builds its chain with `chain_factory` on each
    /// `start`.
    pub fn new(chain_factory: ChainFactoryFn) -> Self {
        Self {
            cfg: None,
            state: TransportState::Init,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            chain_factory: Rc::new(chain_factory),
            sids: None,
            stream: None,
            poll_set: None,
            sid: None,
        }
    }

    /// Sets the read-buffer size.
    pub fn max_payload_size(&mut self, max_payload_size: usize) -> &mut Self {
        self.max_payload_size = max_payload_size;
        self
    }

    /// Cross-thread handle that makes [`check`](PollClient::check) return
    /// an error. Available once `start` has run.
    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.poll_set.as_ref().map(PollSet::stop_handle)
    }

    /// Session id of the current connection, assigned by `start`.
    pub fn session_id(&self) -> Option<SessionId> {
        self.sid
    }

    /// State of the current session; `Closed` once the connection is gone.
    pub fn session_state(&self) -> SessionState {
        match (self.sid, self.poll_set.as_ref()) {
            (Some(sid), Some(poll_set)) => poll_set.session_state(sid),
            _ => SessionState::Closed,
        }
    }

    /// Drives the connection for up to `timeout`: reads, dispatches into
    /// the chain and flushes pending writes.
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

    /// Queues `envelope` on the connection's outbound chain direction.
    pub fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        expect_state("send", self.state, &[TransportState::Ready])?;
        let sid = self
            .sid
            .ok_or_else(|| TransportError::Engine("session missing after start".to_string()))?;
        let poll_set = self
            .poll_set
            .as_mut()
            .ok_or_else(|| TransportError::Engine("poll set missing after start".to_string()))?;
        poll_set.send(sid, envelope)
    }
}

impl Transport for PollClient {
    fn init(&mut self, cfg: TransportConfig) -> Result<(), TransportError> {
        expect_state("init", self.state, &[TransportState::Init])?;
        cfg.validate()?;
        self.sids = Some(SidAllocator::new(cfg.sid_min, cfg.sid_max));
        self.cfg = Some(cfg);
        self.state = TransportState::Configured;
        Ok(())
    }

    /// Connects to the configured peer. A failure leaves the state
    /// unchanged so the caller can back off and call `open` again; the
    /// same applies after a dropped connection has been `close`d.
    fn open(&mut self) -> Result<(), TransportError> {
        expect_state(
            "open",
            self.state,
            &[TransportState::Configured, TransportState::Closed],
        )?;
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| TransportError::Engine("config missing after init".to_string()))?;
        let stream = std::net::TcpStream::connect(cfg.socket_addr()?)?;
        stream.set_nonblocking(true)?;
        trace!("client {} connected to {}", cfg.id, cfg.socket_addr()?);
        self.stream = Some(stream);
        self.state = TransportState::Opened;
        Ok(())
    }

    fn start(&mut self) -> Result<(), TransportError> {
        expect_state("start", self.state, &[TransportState::Opened])?;
        let stream = self
            .stream
            .take()
            .ok_or_else(|| TransportError::Engine("stream missing after open".to_string()))?;
        let sids = self
            .sids
            .take()
            .ok_or_else(|| TransportError::Engine("allocator missing after init".to_string()))?;

        let mut poll_set = PollSet::new(
            SessionKind::Client,
            Rc::clone(&self.chain_factory),
            sids,
            1,
            self.max_payload_size,
        )?;
        let sid = poll_set.add_stream(stream)?;
        self.sid = Some(sid);
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
            // Ids stay spent across a reconnect of this instance.
            self.sids = Some(poll_set.into_sids());
        }
        self.sid = None;
        self.stream = None;
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
        self.sid = None;
        self.stream = None;
        self.cfg = None;
        self.sids = None;
        self.state = TransportState::Uninitialized;
        Ok(())
    }

    fn state(&self) -> TransportState {
        self.state
    }
}
