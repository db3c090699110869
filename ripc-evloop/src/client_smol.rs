use crate::{ChainFactoryFn, DEFAULT_MAX_PAYLOAD_SIZE, StopHandle};
use bytes::BytesMut;
use log::{trace, warn};
use ripc_chain::{Chain, InboundChain};
use ripc_rt::smol_rt::LoopBuilder;
use ripc_transport::{
    SessionInfo, SessionKind, SidAllocator, Transport, TransportConfig, TransportError,
    TransportState, expect_state,
};
use smol::future::FutureExt;
use smol::io::{AsyncReadExt, AsyncWriteExt};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// TCP client on a smol loop.
///
/// The second event-loop client variant, kept alongside
/// [`EventLoopClient`](crate::EventLoopClient) with an identical lifecycle
/// surface; only the underlying runtime differs. Pick whichever matches
/// the rest of the host application.
pub struct SmolClient<W> {
    cfg: Option<TransportConfig>,
    state: TransportState,
    max_payload_size: usize,
    chain_factory: Rc<ChainFactoryFn<W>>,
    sids: Option<SidAllocator>,
    stream: Option<std::net::TcpStream>,
    close_tx: smol::channel::Sender<()>,
    close_rx: smol::channel::Receiver<()>,
}

impl<W: 'static> SmolClient<W> {
    /// Creates a client that builds its chain with `chain_factory` on each
    /// `start`.
    pub fn new(chain_factory: ChainFactoryFn<W>) -> Self {
        let (close_tx, close_rx) = smol::channel::bounded(1);
        Self {
            cfg: None,
            state: TransportState::Init,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            chain_factory: Rc::new(chain_factory),
            sids: None,
            stream: None,
            close_tx,
            close_rx,
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
        StopHandle::smol(self.close_tx.clone())
    }
}

impl<W: 'static> Transport for SmolClient<W> {
    fn init(&mut self, cfg: TransportConfig) -> Result<(), TransportError> {
        expect_state("init", self.state, &[TransportState::Init])?;
        cfg.validate()?;
        self.sids = Some(SidAllocator::new(cfg.sid_min, cfg.sid_max));
        self.cfg = Some(cfg);
        self.state = TransportState::Configured;
        Ok(())
    }

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
        // A stop issued while no loop was running leaves its token queued;
        // drain it so a restart does not exit immediately.
        while self.close_rx.try_recv().is_ok() {}
        let close_rx = self.close_rx.clone();

        self.state = TransportState::Ready;
        let result = LoopBuilder::new().run(async move {
            let local_addr = stream.local_addr()?;
            let peer_addr = stream.peer_addr()?;
            let stream = smol::net::TcpStream::try_from(stream)?;
            let session = SessionInfo {
                id: sid,
                kind: SessionKind::Client,
                local_addr,
                peer_addr,
            };
            trace!("driving {}", session);
            let chain = (factory)(session);

            let (notify_tx, notify_rx) = smol::channel::bounded(1);
            chain.set_write_notify(Arc::new(move || {
                let _ = notify_tx.try_send(());
            }));

            drive_stream_smol(stream, max_payload_size, chain, notify_rx, close_rx).await
        });
        self.state = TransportState::Stopping;
        result.map_err(TransportError::Io)
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        if self.state.is_stopped() {
            return Ok(());
        }
        let _ = self.close_tx.try_send(());
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

enum Event {
    Close,
    Notified,
    Timer,
    Read(std::io::Result<usize>),
}

async fn drive_stream_smol<W: 'static>(
    mut stream: smol::net::TcpStream,
    max_payload_size: usize,
    chain: Rc<Chain<BytesMut, W>>,
    notify_rx: smol::channel::Receiver<()>,
    close_rx: smol::channel::Receiver<()>,
) -> Result<(), std::io::Error> {
    let peer_addr = stream.peer_addr()?;
    let mut buf = vec![0u8; max_payload_size];

    chain.session_active();
    'outer: loop {
        while let Some(transmit) = chain.poll_outbound() {
            match stream.write_all(&transmit).await {
                Ok(()) => {
                    trace!("stream wrote {} bytes", transmit.len());
                }
                Err(err) => {
                    warn!("stream write error {}", err);
                    break 'outer;
                }
            }
        }

        let mut eto = Instant::now() + crate::DEFAULT_TIMEOUT;
        chain.poll_timeout(&mut eto);

        let delay_from_now = eto
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::from_secs(0));
        if delay_from_now.is_zero() {
            chain.handle_timeout(Instant::now());
            continue;
        }

        let event = {
            let close = async {
                let _ = close_rx.recv().await;
                Event::Close
            };
            let notified = async {
                let _ = notify_rx.recv().await;
                Event::Notified
            };
            let timer = async {
                smol::Timer::after(delay_from_now).await;
                Event::Timer
            };
            let read = async { Event::Read(stream.read(&mut buf).await) };
            close.or(notified).or(timer).or(read).await
        };

        match event {
            Event::Close => {
                trace!("connection to {} exits on close signal", peer_addr);
                break;
            }
            Event::Notified => {
                // Loop back to the flush above.
            }
            Event::Timer => {
                chain.handle_timeout(Instant::now());
            }
            Event::Read(Ok(0)) => {
                chain.handle_eof();
                break;
            }
            Event::Read(Ok(n)) => {
                trace!("stream read {} bytes", n);
                chain.handle_inbound(BytesMut::from(&buf[..n]));
            }
            Event::Read(Err(err)) => {
                warn!("stream read error {}", err);
                break;
            }
        }
    }
    chain.session_inactive();

    trace!("tcp connection to {} is down", peer_addr);

    Ok(())
}
