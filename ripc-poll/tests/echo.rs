mod common;

use bytes::BytesMut;
use common::{config, echo_chain, free_port};
use ripc_chain::{Chain, Context, Handler};
use ripc_codec::EnvelopeCodec;
use ripc_poll::{PollClient, PollServer, StopHandle};
use ripc_transport::{Envelope, SessionState, Transport, TransportState};
use std::cell::RefCell;
use std::error::Error;
use std::io::{Read, Write};
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

fn spawn_echo_server(
    port: u16,
    sid_min: u64,
    sid_max: u64,
    capacity: usize,
) -> (StopHandle, thread::JoinHandle<TransportState>) {
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let mut server = PollServer::new(Box::new(|_session| echo_chain()));
        server.capacity(capacity);
        server.init(config(port, sid_min, sid_max)).unwrap();
        server.open().unwrap();
        server.start().unwrap();
        tx.send(server.stop_handle().unwrap()).unwrap();
        while server.check(Duration::from_millis(20)).is_ok() {}
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
    let (stop, handle) = spawn_echo_server(port, 1, 100, 8);

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
fn capacity_overflow_refuses_extra_accepts() {
    let port = free_port();
    // Room for exactly one registered session.
    let (stop, handle) = spawn_echo_server(port, 1, 100, 1);

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

/// Client-side terminal stage: records every decoded reply.
struct CollectStage {
    replies: Rc<RefCell<Vec<(u32, Vec<u8>)>>>,
}

impl Handler for CollectStage {
    type Rin = Envelope;
    type Rout = Envelope;
    type Win = Envelope;
    type Wout = Envelope;

    fn name(&self) -> &str {
        "CollectStage"
    }

    fn handle_inbound(
        &mut self,
        _ctx: &Context<Envelope, Envelope, Envelope, Envelope>,
        msg: Envelope,
    ) -> Result<(), Box<dyn Error>> {
        self.replies.borrow_mut().push((msg.cmd, msg.data.to_vec()));
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
fn client_and_server_round_trip_on_one_thread() {
    let port = free_port();

    let mut server = PollServer::new(Box::new(|_session| echo_chain()));
    server.init(config(port, 1, 100)).unwrap();
    server.open().unwrap();
    server.start().unwrap();

    let replies: Rc<RefCell<Vec<(u32, Vec<u8>)>>> = Rc::new(RefCell::new(Vec::new()));
    let factory_replies = Rc::clone(&replies);
    let mut client = PollClient::new(Box::new(move |_session| {
        let chain = Rc::new(Chain::<BytesMut, Envelope>::new());
        chain.add_back(EnvelopeCodec::new());
        chain.add_back(CollectStage {
            replies: Rc::clone(&factory_replies),
        });
        chain.finalize();
        chain
    }));
    client.init(config(port, 500, 600)).unwrap();
    client.open().unwrap();
    client.start().unwrap();
    assert_eq!(client.session_id(), Some(500));
    assert_eq!(client.session_state(), SessionState::Active);

    client
        .send(Envelope::new(33, BytesMut::from(&b"marco"[..])))
        .unwrap();

    // Both ends share this thread; alternate their checks until the echo
    // comes back.
    for _ in 0..500 {
        server.check(Duration::from_millis(5)).unwrap();
        client.check(Duration::from_millis(5)).unwrap();
        if !replies.borrow().is_empty() {
            break;
        }
    }
    assert_eq!(replies.borrow().as_slice(), &[(33, b"marco".to_vec())]);

    client.stop().unwrap();
    client.close().unwrap();
    assert_eq!(client.session_state(), SessionState::Closed);
    client.uninit().unwrap();
    server.stop().unwrap();
    server.close().unwrap();
    server.uninit().unwrap();
}

#[test]
fn stop_handle_unblocks_a_waiting_check() {
    let mut server = PollServer::new(Box::new(|_| echo_chain()));
    server.init(config(free_port(), 1, 10)).unwrap();
    server.open().unwrap();
    server.start().unwrap();
    let stop = server.stop_handle().unwrap();

    let firer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        stop.stop();
    });

    let begin = Instant::now();
    assert!(server.check(Duration::from_secs(30)).is_err());
    assert!(begin.elapsed() < Duration::from_secs(10));
    assert_eq!(server.state(), TransportState::Stopping);
    firer.join().unwrap();
}
