//! # ripc-evloop - Event-Loop Transport Backends
//!
//! Backends that own their drive loop: [`EventLoopServer`] and
//! [`EventLoopClient`] on a tokio current-thread loop, and [`SmolClient`]
//! as the alternative client on smol. All three implement
//! [`Transport`](ripc_transport::Transport); `start` blocks running the
//! loop until stopped.
//!
//! ## Thread model
//!
//! One loop thread owns every socket and every chain of a backend. Chains
//! are `Rc`-linked and therefore `!Send`: handing a write handle to another
//! thread is a compile error, which is the intended enforcement of the
//! loop-confinement rule. The only cross-thread surface is [`StopHandle`],
//! which is `Send + Sync + Clone` and wakes the loop through its own
//! signaling primitive.
//!
//! ## Usage shape
//!
//! Application logic lives in chain stages; the chain factory builds the
//! full chain (codecs plus terminal application stage) per connection:
//!
//! ```rust,no_run
//! use bytes::BytesMut;
//! use ripc_chain::Chain;
//! use ripc_codec::EnvelopeCodec;
//! use ripc_evloop::EventLoopServer;
//! use ripc_transport::{Envelope, Transport, TransportConfig};
//! use std::rc::Rc;
//!
//! let mut server = EventLoopServer::new(Box::new(|session| {
//!     let chain: Chain<BytesMut, Envelope> = Chain::new();
//!     chain.add_back(EnvelopeCodec::new());
//!     // chain.add_back(your terminal stage for `session`);
//!     chain.finalize();
//!     Rc::new(chain)
//! }));
//! server.init(TransportConfig {
//!     id: 0,
//!     ip: "127.0.0.1".to_string(),
//!     port: 9000,
//!     sid_min: 1,
//!     sid_max: 1024,
//! })?;
//! server.open()?;
//! let stop = server.stop_handle();
//! // hand `stop` to a controller thread, then:
//! server.start()?; // blocks until `stop.stop()`
//! server.close()?;
//! server.uninit()?;
//! # Ok::<(), ripc_transport::TransportError>(())
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

use bytes::BytesMut;
use log::{trace, warn};
use ripc_chain::{Chain, InboundChain};
use ripc_transport::SessionInfo;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Notify, broadcast};

mod client;
mod client_smol;
mod server;

pub use client::EventLoopClient;
pub use client_smol::SmolClient;
pub use server::EventLoopServer;

/// Builds the full chain for one session: codecs plus the application's
/// terminal stage. Called on the loop thread once per connection.
pub type ChainFactoryFn<W> = Box<dyn Fn(SessionInfo) -> Rc<Chain<BytesMut, W>>>;

/// Upper bound on the idle timer when no stage requests an earlier
/// deadline.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(86400);

/// Default read-buffer / payload bound, one typical MTU rounded up.
pub(crate) const DEFAULT_MAX_PAYLOAD_SIZE: usize = 2048;

#[derive(Clone)]
enum StopSignal {
    Tokio(broadcast::Sender<()>),
    Smol(smol::channel::Sender<()>),
}

/// Cross-thread shutdown trigger for one backend's loop.
///
/// Clonable and `Send + Sync`; this is the only part of an event-loop
/// backend that may leave the loop thread. Signaling an already-stopped
/// loop is a no-op.
#[derive(Clone)]
pub struct StopHandle {
    signal: StopSignal,
}

impl StopHandle {
    pub(crate) fn tokio(tx: broadcast::Sender<()>) -> Self {
        Self {
            signal: StopSignal::Tokio(tx),
        }
    }

    pub(crate) fn smol(tx: smol::channel::Sender<()>) -> Self {
        Self {
            signal: StopSignal::Smol(tx),
        }
    }

    /// Wakes the loop and asks it to wind down.
    pub fn stop(&self) {
        match &self.signal {
            StopSignal::Tokio(tx) => {
                let _ = tx.send(());
            }
            StopSignal::Smol(tx) => {
                let _ = tx.try_send(());
            }
        }
    }
}

/// Wires a chain's write notification to a tokio [`Notify`], so writes
/// issued by stages wake the drive loop for a flush.
pub(crate) struct NotifiedChain<W> {
    pub(crate) chain: Rc<Chain<BytesMut, W>>,
    pub(crate) write_notify: Arc<Notify>,
}

impl<W: 'static> NotifiedChain<W> {
    pub(crate) fn new(chain: Rc<Chain<BytesMut, W>>) -> Self {
        let write_notify = Arc::new(Notify::new());
        let notify = Arc::clone(&write_notify);
        chain.set_write_notify(Arc::new(move || {
            notify.notify_one();
        }));
        Self {
            chain,
            write_notify,
        }
    }
}

/// Drives one TCP connection against its chain until EOF, an I/O error or
/// the close signal.
pub(crate) async fn drive_stream<W: 'static>(
    mut stream: tokio::net::TcpStream,
    max_payload_size: usize,
    chain: NotifiedChain<W>,
    mut close_rx: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let peer_addr = stream.peer_addr()?;
    let NotifiedChain {
        chain,
        write_notify,
    } = chain;

    let mut buf = vec![0u8; max_payload_size];

    chain.session_active();
    loop {
        // Flush before reading: stages respond during dispatch, and the
        // response should hit the wire before the next read parks us.
        let mut broken = false;
        while let Some(transmit) = chain.poll_outbound() {
            match stream.write_all(&transmit).await {
                Ok(()) => {
                    trace!("stream wrote {} bytes", transmit.len());
                }
                Err(err) => {
                    warn!("stream write error {}", err);
                    broken = true;
                    break;
                }
            }
        }
        if broken {
            break;
        }

        let mut eto = Instant::now() + DEFAULT_TIMEOUT;
        chain.poll_timeout(&mut eto);

        let delay_from_now = eto
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::from_secs(0));
        if delay_from_now.is_zero() {
            chain.handle_timeout(Instant::now());
            continue;
        }

        let timer = tokio::time::sleep(delay_from_now);
        tokio::pin!(timer);

        tokio::select! {
            _ = close_rx.recv() => {
                trace!("connection to {} exits on close signal", peer_addr);
                break;
            }
            _ = write_notify.notified() => {
                // Loop back to the flush above.
            }
            _ = timer.as_mut() => {
                chain.handle_timeout(Instant::now());
            }
            res = stream.read(&mut buf) => {
                match res {
                    Ok(0) => {
                        chain.handle_eof();
                        break;
                    }
                    Ok(n) => {
                        trace!("stream read {} bytes", n);
                        chain.handle_inbound(BytesMut::from(&buf[..n]));
                    }
                    Err(err) => {
                        warn!("stream read error {}", err);
                        break;
                    }
                }
            }
        }
    }
    chain.session_inactive();

    trace!("tcp connection to {} is down", peer_addr);

    Ok(())
}
