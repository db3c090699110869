mod common;

use bytes::BytesMut;
use common::{config, echo_chain, free_port};
use ripc_chain::{Chain, Context, Handler, OutboundChain};
use ripc_codec::EnvelopeCodec;
use ripc_evloop::{EventLoopServer, SmolClient, StopHandle};
use ripc_transport::{Envelope, Transport, TransportState};
use std::error::Error;
use std::io::{Read, Write};
use std::rc::{Rc, Weak};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn spawn_echo_server(
    port: u16,
    sid_min: u64,
    sid_max: u64,
) -> (StopHandle, thread::JoinHandle<TransportState>) {
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let mut server = EventLoopServer::new(Box::new(|_session| echo_chain()));
        server.init(config(port, sid_min, sid_max)).unwrap();
        server.open().unwrap();
        tx.send(server.stop_handle()).unwrap();
        server.start().unwrap();
        server.close().unwrap();
        server.uninit().unwrap();
        server.state()
    });
    let stop = rx.recv().unwrap();
    (stop, handle)
}

fn read_exact_with_timeout(sock: &mut std::net::TcpStream, len: usize) -> std::io::Result<Vec<u8>> {
    sock.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = vec![0u8; len];
    sock.read_exact(&mut buf)?;
    Ok(buf)
}

#[test]
fn server_echoes_a_framed_envelope() {
    let port = free_port();
    let (stop, handle) = spawn_echo_server(port, 1, 100);

    let mut sock = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    let frame = EnvelopeCodec::encode(&Envelope::new(11, BytesMut::from(&b"hello"[..])));
    sock.write_all(&frame).unwrap();

    let reply = read_exact_with_timeout(&mut sock, frame.len()).unwrap();
    assert_eq!(reply, frame.to_vec());

    drop(sock);
    stop.stop();
    assert_eq!(handle.join().unwrap(), TransportState::Uninitialized);
}

#[test]
fn exhausted_sid_range_refuses_further_accepts() {
    let port = free_port();
    // Exactly one session id available.
    let (stop, handle) = spawn_echo_server(port, 5, 6);

    let mut first = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    let frame = EnvelopeCodec::encode(&Envelope::new(1, BytesMut::from(&b"a"[..])));
    first.write_all(&frame).unwrap();
    let reply = read_exact_with_timeout(&mut first, frame.len()).unwrap();
    assert_eq!(reply, frame.to_vec());

    // The second connection is refused, but the first keeps working.
    let mut second = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    second
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut probe = [0u8; 1];
    match second.read(&mut probe) {
        Ok(0) => {}
        Ok(n) => panic!("refused connection produced {} bytes", n),
        Err(err)
            if err.kind() == std::io::ErrorKind::ConnectionReset
                || err.kind() == std::io::ErrorKind::UnexpectedEof => {}
        Err(err) => panic!("unexpected error from refused connection: {}", err),
    }

    first.write_all(&frame).unwrap();
    let reply = read_exact_with_timeout(&mut first, frame.len()).unwrap();
    assert_eq!(reply, frame.to_vec());

    drop(first);
    stop.stop();
    handle.join().unwrap();
}

/// Client-side terminal stage: sends one envelope on session-active,
/// records the reply and stops the loop.
struct PingStage {
    chain: Weak<Chain<BytesMut, Envelope>>,
    replies: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
    stop: StopHandle,
}

impl Handler for PingStage {
    type Rin = Envelope;
    type Rout = Envelope;
    type Win = Envelope;
    type Wout = Envelope;

    fn name(&self) -> &str {
        "PingStage"
    }

    fn session_active(&mut self, _ctx: &Context<Envelope, Envelope, Envelope, Envelope>) {
        if let Some(chain) = self.chain.upgrade() {
            chain.write(Envelope::new(21, BytesMut::from(&b"ping"[..])));
        }
    }

    fn handle_inbound(
        &mut self,
        _ctx: &Context<Envelope, Envelope, Envelope, Envelope>,
        msg: Envelope,
    ) -> Result<(), Box<dyn Error>> {
        self.replies
            .lock()
            .unwrap()
            .push((msg.cmd, msg.data.to_vec()));
        self.stop.stop();
        Ok(())
    }

    fn poll_outbound(
        &mut self,
        ctx: &Context<Envelope, Envelope, Envelope, Envelope>,
    ) -> Option<Envelope> {
        ctx.fire_poll_outbound()
    }
}

#[test]
fn smol_client_round_trips_through_tokio_server() {
    let port = free_port();
    let (server_stop, server_handle) = spawn_echo_server(port, 1, 100);

    let replies: Arc<Mutex<Vec<(u32, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let client_replies = Arc::clone(&replies);

    let client_handle = thread::spawn(move || {
        let stop_slot: Arc<Mutex<Option<StopHandle>>> = Arc::new(Mutex::new(None));
        let factory_stop = Arc::clone(&stop_slot);
        let factory_replies = client_replies;

        let mut client = SmolClient::new(Box::new(move |_session| {
            let chain = Rc::new(Chain::<BytesMut, Envelope>::new());
            chain.add_back(EnvelopeCodec::new());
            chain.add_back(PingStage {
                chain: Rc::downgrade(&chain),
                replies: Arc::clone(&factory_replies),
                stop: factory_stop.lock().unwrap().clone().unwrap(),
            });
            chain.finalize();
            chain
        }));
        client.init(config(port, 1000, 1100)).unwrap();
        client.open().unwrap();
        *stop_slot.lock().unwrap() = Some(client.stop_handle());
        client.start().unwrap();
        client.close().unwrap();
        client.uninit().unwrap();
    });

    client_handle.join().unwrap();
    assert_eq!(
        replies.lock().unwrap().as_slice(),
        &[(21, b"ping".to_vec())]
    );

    server_stop.stop();
    server_handle.join().unwrap();
}
