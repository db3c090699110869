//! Feeds the identical byte sequence to the event-loop server and the
//! polling server and asserts both decode the same envelope sequence.

use bytes::BytesMut;
use ripc_chain::{Chain, Context, Handler, OutboundChain};
use ripc_codec::EnvelopeCodec;
use ripc_evloop::EventLoopServer;
use ripc_poll::PollServer;
use ripc_transport::{Envelope, Transport, TransportConfig};
use std::error::Error;
use std::io::{Read, Write};
use std::rc::{Rc, Weak};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

type Seen = Arc<Mutex<Vec<(u32, Vec<u8>)>>>;

/// Records every decoded envelope, then echoes it so the driving side can
/// tell when processing is done.
struct RecordEchoStage {
    chain: Weak<Chain<BytesMut, Envelope>>,
    seen: Seen,
}

impl Handler for RecordEchoStage {
    type Rin = Envelope;
    type Rout = Envelope;
    type Win = Envelope;
    type Wout = Envelope;

    fn name(&self) -> &str {
        "RecordEchoStage"
    }

    fn handle_inbound(
        &mut self,
        _ctx: &Context<Envelope, Envelope, Envelope, Envelope>,
        msg: Envelope,
    ) -> Result<(), Box<dyn Error>> {
        self.seen.lock().unwrap().push((msg.cmd, msg.data.to_vec()));
        if let Some(chain) = self.chain.upgrade() {
            chain.write(msg);
        }
        Ok(())
    }

    fn poll_outbound(
        &mut self,
        ctx: &Context<Envelope, Envelope, Envelope, Envelope>,
    ) -> Option<Envelope> {
        ctx.fire_poll_outbound()
    }
}

fn record_chain(seen: Seen) -> Rc<Chain<BytesMut, Envelope>> {
    let chain = Rc::new(Chain::<BytesMut, Envelope>::new());
    chain.add_back(EnvelopeCodec::new());
    chain.add_back(RecordEchoStage {
        chain: Rc::downgrade(&chain),
        seen,
    });
    chain.finalize();
    chain
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn config(port: u16) -> TransportConfig {
    TransportConfig {
        id: 4,
        ip: "127.0.0.1".to_string(),
        port,
        sid_min: 1,
        sid_max: 100,
    }
}

/// Pushes the chunks into a connection against `port` and reads the full
/// echo back, proving the server finished processing every frame.
fn feed(port: u16, chunks: &[Vec<u8>]) {
    let mut sock = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let total: usize = chunks.iter().map(Vec::len).sum();
    for chunk in chunks {
        sock.write_all(chunk).unwrap();
        sock.flush().unwrap();
        // Force the chunk boundary to survive to the server's read calls.
        thread::sleep(Duration::from_millis(20));
    }
    let mut echoed = vec![0u8; total];
    sock.read_exact(&mut echoed).unwrap();
}

fn drive_evloop(chunks: &[Vec<u8>]) -> Vec<(u32, Vec<u8>)> {
    let port = free_port();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let factory_seen = Arc::clone(&seen);
    let (tx, rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        let mut server =
            EventLoopServer::new(Box::new(move |_session| record_chain(Arc::clone(&factory_seen))));
        server.init(config(port)).unwrap();
        server.open().unwrap();
        tx.send(server.stop_handle()).unwrap();
        server.start().unwrap();
        server.uninit().unwrap();
    });
    let stop = rx.recv().unwrap();

    feed(port, chunks);
    stop.stop();
    handle.join().unwrap();

    let result = seen.lock().unwrap().clone();
    result
}

fn drive_poll(chunks: &[Vec<u8>]) -> Vec<(u32, Vec<u8>)> {
    let port = free_port();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let factory_seen = Arc::clone(&seen);
    let (tx, rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        let mut server =
            PollServer::new(Box::new(move |_session| record_chain(Arc::clone(&factory_seen))));
        server.init(config(port)).unwrap();
        server.open().unwrap();
        server.start().unwrap();
        tx.send(server.stop_handle().unwrap()).unwrap();
        while server.check(Duration::from_millis(20)).is_ok() {}
        server.uninit().unwrap();
    });
    let stop = rx.recv().unwrap();

    feed(port, chunks);
    stop.stop();
    handle.join().unwrap();

    let result = seen.lock().unwrap().clone();
    result
}

#[test]
fn both_backends_decode_the_same_envelope_sequence() {
    // Three frames concatenated, then re-split at boundaries that land in
    // the middle of a header and the middle of a payload.
    let mut wire = BytesMut::new();
    for (cmd, data) in [(1u32, &b"alpha"[..]), (2, &b"beta"[..]), (3, &b"gamma"[..])] {
        wire.extend_from_slice(&EnvelopeCodec::encode(&Envelope::new(
            cmd,
            BytesMut::from(data),
        )));
    }
    let wire = wire.to_vec();
    let chunks = vec![
        wire[..3].to_vec(),
        wire[3..17].to_vec(),
        wire[17..30].to_vec(),
        wire[30..].to_vec(),
    ];

    let expected = vec![
        (1u32, b"alpha".to_vec()),
        (2, b"beta".to_vec()),
        (3, b"gamma".to_vec()),
    ];
    let from_evloop = drive_evloop(&chunks);
    let from_poll = drive_poll(&chunks);

    assert_eq!(from_evloop, expected);
    assert_eq!(from_poll, from_evloop);
}
