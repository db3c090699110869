//! Caller-driven readiness core shared by [`PollServer`](crate::PollServer)
//! and [`PollClient`](crate::PollClient).
//!
//! One mio `Poll` multiplexes the listener (token 0), a cross-thread waker
//! (token 1) and every registered session (tokens from 2, never reused).
//! All progress happens inside [`PollSet::check`] on the caller's thread.

use crate::ChainFactoryFn;
use bytes::BytesMut;
use log::{error, trace, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use ripc_chain::{Chain, InboundChain, OutboundChain};
use ripc_transport::{
    Envelope, SessionId, SessionInfo, SessionKind, SessionState, SidAllocator, TransportError,
};
use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const FIRST_SESSION_TOKEN: usize = 2;

/// Read-buffer size per session, in bytes.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 2048;

/// Default bound on simultaneously registered sessions.
pub const DEFAULT_CAPACITY: usize = 64;

/// Cross-thread stop switch for a poll-driven transport.
///
/// Fires the poll's waker so a blocked `check` wakes immediately; from then
/// on every `check` returns an error, which is the driving loop's signal to
/// exit.
#[derive(Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    /// Requests the transport to stop. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Err(err) = self.waker.wake() {
            warn!("stop waker failed: {}", err);
        }
    }
}

/// Readiness multiplexer over a listener and its sessions.
///
/// Owned by [`PollServer`](crate::PollServer) or
/// [`PollClient`](crate::PollClient); not constructible directly.
pub struct PollSet {
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    kind: SessionKind,
    factory: Rc<ChainFactoryFn>,
    sids: SidAllocator,
    capacity: usize,
    conns: HashMap<Token, PollConnection>,
    by_sid: HashMap<SessionId, Token>,
    next_token: usize,
    read_buf: Vec<u8>,
    stopped: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl PollSet {
    pub(crate) fn new(
        kind: SessionKind,
        factory: Rc<ChainFactoryFn>,
        sids: SidAllocator,
        capacity: usize,
        max_payload_size: usize,
    ) -> Result<Self, TransportError> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(128),
            listener: None,
            kind,
            factory,
            sids,
            capacity,
            conns: HashMap::new(),
            by_sid: HashMap::new(),
            next_token: FIRST_SESSION_TOKEN,
            read_buf: vec![0u8; max_payload_size],
            stopped: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    pub(crate) fn listen(
        &mut self,
        listener: std::net::TcpListener,
    ) -> Result<(), std::io::Error> {
        let mut listener = TcpListener::from_std(listener);
        self.poll
            .registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        self.listener = Some(listener);
        Ok(())
    }

    pub(crate) fn add_stream(
        &mut self,
        stream: std::net::TcpStream,
    ) -> Result<SessionId, TransportError> {
        if self.conns.len() >= self.capacity {
            return Err(TransportError::PollSetFull {
                capacity: self.capacity,
            });
        }
        let sid = self.sids.allocate()?;
        let peer_addr = stream.peer_addr()?;
        self.register(TcpStream::from_std(stream), sid, peer_addr)?;
        Ok(sid)
    }

    pub(crate) fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stopped: Arc::clone(&self.stopped),
            waker: Arc::clone(&self.waker),
        }
    }

    pub(crate) fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Number of sessions currently registered.
    pub fn session_count(&self) -> usize {
        self.conns.len()
    }

    /// State of session `sid`. Ids never come back, so anything not
    /// currently registered is `Closed`.
    pub fn session_state(&self, sid: SessionId) -> SessionState {
        if self.by_sid.contains_key(&sid) {
            SessionState::Active
        } else {
            SessionState::Closed
        }
    }

    /// Waits up to `timeout` for readiness, then accepts, reads, dispatches
    /// and flushes whatever became ready.
    ///
    /// Returns `Err` once the [`StopHandle`] has fired; the caller's drive
    /// loop treats that as the exit condition.
    pub fn check(&mut self, timeout: Duration) -> Result<(), TransportError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TransportError::Engine("stopped".to_string()));
        }
        self.poll.poll(&mut self.events, Some(timeout))?;

        let ready: Vec<(Token, bool)> = self
            .events
            .iter()
            .map(|ev| (ev.token(), ev.is_readable()))
            .collect();
        for (token, readable) in ready {
            match token {
                LISTENER_TOKEN => self.accept_ready(),
                WAKER_TOKEN => {}
                token => self.session_ready(token, readable),
            }
        }

        if self.stopped.load(Ordering::SeqCst) {
            return Err(TransportError::Engine("stopped".to_string()));
        }
        Ok(())
    }

    /// Queues `envelope` through the session's outbound chain direction and
    /// flushes as much as the socket accepts; the rest goes out on later
    /// `check` calls.
    pub fn send(&mut self, sid: SessionId, envelope: Envelope) -> Result<(), TransportError> {
        let token = *self
            .by_sid
            .get(&sid)
            .ok_or_else(|| TransportError::Engine(format!("no session {}", sid)))?;
        let res = match self.conns.get_mut(&token) {
            Some(conn) => {
                conn.chain.write(envelope);
                conn.pump()
            }
            None => Ok(()),
        };
        if let Err(err) = res {
            self.drop_session(token);
            return Err(TransportError::Io(err));
        }
        Ok(())
    }

    /// Drops every session, firing `session_inactive` on each chain.
    pub(crate) fn shutdown(&mut self) {
        let tokens: Vec<Token> = self.conns.keys().copied().collect();
        for token in tokens {
            self.drop_session(token);
        }
        self.listener = None;
    }

    /// Tears down every session and hands the allocator back so spent ids
    /// stay spent across any further use of the owning transport.
    pub(crate) fn into_sids(mut self) -> SidAllocator {
        self.shutdown();
        self.sids
    }

    fn accept_ready(&mut self) {
        loop {
            let (stream, peer_addr) = match self.listener.as_ref() {
                Some(listener) => match listener.accept() {
                    Ok(pair) => pair,
                    Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                    Err(err) => {
                        warn!("listener accept error {}", err);
                        return;
                    }
                },
                None => return,
            };
            if self.conns.len() >= self.capacity {
                warn!(
                    "refusing connection from {}: {}",
                    peer_addr,
                    TransportError::PollSetFull {
                        capacity: self.capacity
                    }
                );
                continue;
            }
            let sid = match self.sids.allocate() {
                Ok(sid) => sid,
                Err(err) => {
                    warn!("refusing connection from {}: {}", peer_addr, err);
                    continue;
                }
            };
            if let Err(err) = self.register(stream, sid, peer_addr) {
                error!("failed to register session {}: {}", sid, err);
            }
        }
    }

    fn register(
        &mut self,
        mut stream: TcpStream,
        sid: SessionId,
        peer_addr: std::net::SocketAddr,
    ) -> Result<(), std::io::Error> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll.registry().register(
            &mut stream,
            token,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        let session = SessionInfo {
            id: sid,
            kind: self.kind,
            local_addr: stream.local_addr()?,
            peer_addr,
        };
        trace!("registered {}", session);

        let chain = (self.factory)(session.clone());
        let mut conn = PollConnection {
            stream,
            session,
            chain,
            send_queue: VecDeque::new(),
            send_offset: 0,
        };
        conn.chain.session_active();
        if let Err(err) = conn.pump() {
            warn!("{} write error {}", conn.session, err);
        }
        self.by_sid.insert(sid, token);
        self.conns.insert(token, conn);
        Ok(())
    }

    fn session_ready(&mut self, token: Token, readable: bool) {
        let closed = match self.conns.get_mut(&token) {
            Some(conn) => conn.service(readable, &mut self.read_buf),
            None => false,
        };
        if closed {
            self.drop_session(token);
        }
    }

    fn drop_session(&mut self, token: Token) {
        if let Some(mut conn) = self.conns.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            self.by_sid.remove(&conn.session.id);
            conn.chain.session_inactive();
            trace!("dropped {}", conn.session);
        }
    }
}

/// One registered session: its socket, its chain, and the bytes the socket
/// has not accepted yet.
struct PollConnection {
    stream: TcpStream,
    session: SessionInfo,
    chain: Rc<Chain<BytesMut, Envelope>>,
    send_queue: VecDeque<BytesMut>,
    send_offset: usize,
}

impl PollConnection {
    /// Services one readiness event. Returns `true` once the session is
    /// finished and must be dropped.
    fn service(&mut self, readable: bool, buf: &mut [u8]) -> bool {
        if readable {
            loop {
                match self.stream.read(buf) {
                    Ok(0) => {
                        trace!("{} read eof", self.session);
                        self.chain.handle_eof();
                        let _ = self.pump();
                        return true;
                    }
                    Ok(n) => self.chain.handle_inbound(BytesMut::from(&buf[..n])),
                    Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!("{} read error {}", self.session, err);
                        self.chain.handle_error(Box::new(err));
                        return true;
                    }
                }
            }
        }
        if let Err(err) = self.pump() {
            warn!("{} write error {}", self.session, err);
            return true;
        }
        false
    }

    /// Moves everything the chain encoded into the send queue, then flushes.
    fn pump(&mut self) -> Result<(), std::io::Error> {
        while let Some(bytes) = self.chain.poll_outbound() {
            self.send_queue.push_back(bytes);
        }
        self.flush()
    }

    fn flush(&mut self) -> Result<(), std::io::Error> {
        while let Some(front) = self.send_queue.front() {
            match self.stream.write(&front[self.send_offset..]) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    ));
                }
                Ok(n) => {
                    self.send_offset += n;
                    if self.send_offset == front.len() {
                        self.send_queue.pop_front();
                        self.send_offset = 0;
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
