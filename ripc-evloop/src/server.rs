use crate::{
    ChainFactoryFn, DEFAULT_MAX_PAYLOAD_SIZE, NotifiedChain, StopHandle, drive_stream,
};
use log::{error, trace, warn};
use ripc_rt::tokio_rt::{LoopBuilder, spawn_local};
use ripc_transport::{
    SessionInfo, SessionKind, SidAllocator, Transport, TransportConfig, TransportError,
    TransportState, expect_state,
};
use std::rc::Rc;
use tokio::sync::broadcast;
use wg::AsyncWaitGroup;

/// TCP server on a tokio current-thread loop.
///
/// `open` binds and listens; `start` blocks on the accept loop, spawning
/// one local task per accepted connection, until the [`StopHandle`] fires.
/// Each accepted connection gets a session id from the configured range and
/// a fresh chain from the factory; when the range is exhausted the accept
/// is refused and the server keeps serving existing sessions.
pub struct EventLoopServer<W> {
    cfg: Option<TransportConfig>,
    state: TransportState,
    max_payload_size: usize,
    chain_factory: Rc<ChainFactoryFn<W>>,
    sids: Option<SidAllocator>,
    listener: Option<std::net::TcpListener>,
    close_tx: broadcast::Sender<()>,
}

impl<W: 'static> EventLoopServer<W> {
    /// Creates a server that builds each connection's chain with
    /// `chain_factory`.
    pub fn new(chain_factory: ChainFactoryFn<W>) -> Self {
        let (close_tx, _) = broadcast::channel(1);
        Self {
            cfg: None,
            state: TransportState::Init,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            chain_factory: Rc::new(chain_factory),
            sids: None,
            listener: None,
            close_tx,
        }
    }

    /// Sets the read-buffer size per connection.
    pub fn max_payload_size(&mut self, max_payload_size: usize) -> &mut Self {
        self.max_payload_size = max_payload_size;
        self
    }

    /// Cross-thread handle that makes a blocked [`Transport::start`]
    /// return.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::tokio(self.close_tx.clone())
    }

    /// Address actually bound, available between `open` and `start`.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

impl<W: 'static> Transport for EventLoopServer<W> {
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
        let mut sids = self
            .sids
            .take()
            .ok_or_else(|| TransportError::Engine("allocator missing after init".to_string()))?;

        let factory = Rc::clone(&self.chain_factory);
        let max_payload_size = self.max_payload_size;
        let close_tx = self.close_tx.clone();

        self.state = TransportState::Ready;
        let result = LoopBuilder::new().run(serve(
            listener,
            factory,
            &mut sids,
            max_payload_size,
            close_tx,
        ));
        // Ids stay spent across any further use of this instance.
        self.sids = Some(sids);
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
        self.listener = None;
        self.state = TransportState::Closed;
        Ok(())
    }

    fn uninit(&mut self) -> Result<(), TransportError> {
        if self.state == TransportState::Uninitialized {
            return Ok(());
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

async fn serve<W: 'static>(
    listener: std::net::TcpListener,
    factory: Rc<ChainFactoryFn<W>>,
    sids: &mut SidAllocator,
    max_payload_size: usize,
    close_tx: broadcast::Sender<()>,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    let local_addr = listener.local_addr()?;
    let mut close_rx = close_tx.subscribe();
    let wait_group = AsyncWaitGroup::new();

    let mut result = Ok(());
    loop {
        tokio::select! {
            _ = close_rx.recv() => {
                trace!("accept loop exits on close signal");
                break;
            }
            res = listener.accept() => {
                match res {
                    Ok((socket, peer_addr)) => {
                        let sid = match sids.allocate() {
                            Ok(sid) => sid,
                            Err(err) => {
                                warn!("refusing connection from {}: {}", peer_addr, err);
                                continue;
                            }
                        };
                        let session = SessionInfo {
                            id: sid,
                            kind: SessionKind::Server,
                            local_addr,
                            peer_addr,
                        };
                        trace!("accepted {}", session);

                        // Each connection runs as its own local task; the
                        // socket and chain move into it.
                        let chain = NotifiedChain::new((factory)(session));
                        let child_close_rx = close_tx.subscribe();
                        let child_worker = wait_group.add(1);
                        spawn_local(async move {
                            if let Err(err) =
                                drive_stream(socket, max_payload_size, chain, child_close_rx).await
                            {
                                error!("connection task failed: {}", err);
                            }
                            child_worker.done();
                        })
                        .detach();
                    }
                    Err(err) => {
                        // A dead listener is fatal to the whole transport;
                        // the caller sees it as a failed start, not a stop.
                        warn!("listener accept error {}", err);
                        result = Err(err);
                        break;
                    }
                }
            }
        }
    }

    wait_group.wait().await;
    result
}
