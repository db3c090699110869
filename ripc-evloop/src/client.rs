use crate::{ChainFactoryFn, DEFAULT_MAX_PAYLOAD_SIZE, NotifiedChain, StopHandle, drive_stream};
use log::trace;
use ripc_rt::tokio_rt::LoopBuilder;
use ripc_transport::{
    SessionInfo, SessionKind, SidAllocator, Transport, TransportConfig, TransportError,
    TransportState, expect_state,
};
use std::rc::Rc;
use tokio::sync::broadcast;

/// TCP client on a tokio current-thread loop.
///
/// `open` connects (and may be retried from `Closed` after caller-driven
/// back-off when it fails or the connection drops); `start` blocks driving
/// the connection until EOF, an I/O error or the [`StopHandle`].
///
/// Application logic lives in the chain the factory builds: a terminal
/// stage typically sends its opening message from `session_active` and
/// reacts to decoded inbound messages.
pub struct EventLoopClient<W> {
    cfg: Option<TransportConfig>,
    state: TransportState,
    max_payload_size: usize,
    chain_factory: Rc<ChainFactoryFn<W>>,
    sids: Option<SidAllocator>,
    stream: Option<std::net::TcpStream>,
    close_tx: broadcast::Sender<()>,
}

impl<W: 'static> EventLoopClient<W> {
    /// Creates a client that builds its chain with `chain_factory` on each
    /// `start`.
    pub fn new(chain_factory: ChainFactoryFn<W>) -> Self {
        let (close_tx, _) = broadcast::channel(1);
        Self {
            cfg: None,
            state: TransportState::Init,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            chain_factory: Rc::new(chain_factory),
            sids: None,
            stream: None,
            close_tx,
        }
    }

    /// Sets the read-buffer size.
    pub fn max_payload_size(&mut self, max_payload_size: usize) -> &mut Self {
        self.max_payload_size = max_payload_size;
        self
    }

    /// Cross-thread handle that makes a blocked [`Transport::start`]
    /// return.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::tokio(self.close_tx.clone())
    }
}

impl<W: 'static> Transport for EventLoopClient<W> {
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
        let sid = self
            .sids
            .as_mut()
            .ok_or_else(|| TransportError::Engine("allocator missing after init".to_string()))?
            .allocate()?;

        let factory = Rc::clone(&self.chain_factory);
        let max_payload_size = self.max_payload_size;
        let close_rx = self.close_tx.subscribe();

        self.state = TransportState::Ready;
        let result = LoopBuilder::new().run(async move {
            let local_addr = stream.local_addr()?;
            let peer_addr = stream.peer_addr()?;
            let stream = tokio::net::TcpStream::from_std(stream)?;
            let session = SessionInfo {
                id: sid,
                kind: SessionKind::Client,
                local_addr,
                peer_addr,
            };
            trace!("driving {}", session);
            let chain = NotifiedChain::new((factory)(session));
            drive_stream(stream, max_payload_size, chain, close_rx).await
        });
        self.state = TransportState::Stopping;
        result.map_err(TransportError::Io)
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        if self.state.is_stopped() {
            return Ok(());
        }
        let _ = self.close_tx.send(());
        self.state = TransportState::Stopping;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.state == TransportState::Closed || self.state == TransportState::Uninitialized {
            return Ok(());
        }
        self.stream = None;
        self.state = TransportState::Closed;
        Ok(())
    }

    fn uninit(&mut self) -> Result<(), TransportError> {
        if self.state == TransportState::Uninitialized {
            return Ok(());
        }
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
