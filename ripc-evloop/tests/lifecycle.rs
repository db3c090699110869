mod common;

use common::{config, echo_chain, free_port};
use ripc_evloop::{EventLoopClient, EventLoopServer, SmolClient};
use ripc_transport::{Transport, TransportError, TransportState};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[test]
fn server_walks_the_full_lifecycle() {
    let mut server = EventLoopServer::new(Box::new(|_| echo_chain()));
    assert_eq!(server.state(), TransportState::Init);

    server.init(config(free_port(), 1, 10)).unwrap();
    assert_eq!(server.state(), TransportState::Configured);

    server.open().unwrap();
    assert_eq!(server.state(), TransportState::Opened);
    assert!(server.local_addr().is_some());

    server.close().unwrap();
    assert_eq!(server.state(), TransportState::Closed);

    server.uninit().unwrap();
    assert_eq!(server.state(), TransportState::Uninitialized);
}

#[test]
fn teardown_is_idempotent() {
    let mut server = EventLoopServer::new(Box::new(|_| echo_chain()));
    server.init(config(free_port(), 1, 10)).unwrap();
    server.open().unwrap();

    server.stop().unwrap();
    server.stop().unwrap();
    server.close().unwrap();
    server.close().unwrap();
    server.uninit().unwrap();
    server.uninit().unwrap();
    server.close().unwrap();
    server.stop().unwrap();
    assert_eq!(server.state(), TransportState::Uninitialized);
}

#[test]
fn operations_out_of_order_are_rejected() {
    let mut server = EventLoopServer::new(Box::new(|_| echo_chain()));

    assert!(matches!(
        server.open(),
        Err(TransportError::State { op: "open", .. })
    ));
    assert!(matches!(
        server.start(),
        Err(TransportError::State { op: "start", .. })
    ));

    server.init(config(free_port(), 1, 10)).unwrap();
    assert!(matches!(
        server.init(config(free_port(), 1, 10)),
        Err(TransportError::State { op: "init", .. })
    ));
    assert!(matches!(
        server.start(),
        Err(TransportError::State { op: "start", .. })
    ));
}

#[test]
fn invalid_config_is_fatal_to_init_only() {
    let mut server = EventLoopServer::new(Box::new(|_| echo_chain()));
    let mut cfg = config(free_port(), 1, 10);
    cfg.ip = "not-an-address".to_string();

    assert!(matches!(server.init(cfg), Err(TransportError::Config(_))));
    // No partial state: init can be retried with a good config.
    assert_eq!(server.state(), TransportState::Init);
    server.init(config(free_port(), 1, 10)).unwrap();
    assert_eq!(server.state(), TransportState::Configured);
}

#[test]
fn client_open_failure_leaves_it_reopenable() {
    let port = free_port();
    let mut client = EventLoopClient::new(Box::new(|_| echo_chain()));
    client.init(config(port, 1, 10)).unwrap();

    // Nothing listens yet; open fails but the client stays Configured.
    assert!(matches!(client.open(), Err(TransportError::Io(_))));
    assert_eq!(client.state(), TransportState::Configured);

    // Back-off elapsed, a server appeared; the retried open succeeds.
    let listener = std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    client.open().unwrap();
    assert_eq!(client.state(), TransportState::Opened);

    // And a closed client can open again as well.
    client.close().unwrap();
    client.open().unwrap();
    assert_eq!(client.state(), TransportState::Opened);
    drop(listener);

    client.close().unwrap();
    client.uninit().unwrap();
    assert_eq!(client.state(), TransportState::Uninitialized);
}

#[test]
fn smol_client_shares_the_lifecycle_surface() {
    let port = free_port();
    let listener = std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();

    let mut client = SmolClient::new(Box::new(|_| echo_chain()));
    client.init(config(port, 1, 10)).unwrap();
    client.open().unwrap();
    assert_eq!(client.state(), TransportState::Opened);
    drop(listener);

    client.stop().unwrap();
    client.close().unwrap();
    client.close().unwrap();
    client.uninit().unwrap();
    client.uninit().unwrap();
    assert_eq!(client.state(), TransportState::Uninitialized);
}

#[test]
fn smol_client_restarts_after_an_idle_stop() {
    let port = free_port();
    let listener = std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();

    // A quiet peer: accept both connections and hold them open until the
    // test is done, writing nothing.
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let accepter = thread::spawn(move || {
        let _first = listener.accept().unwrap();
        let _second = listener.accept().unwrap();
        let _ = done_rx.recv();
    });

    let (handle_tx, handle_rx) = mpsc::channel();
    let runner = thread::spawn(move || {
        let mut client = SmolClient::new(Box::new(|_| echo_chain()));
        client.init(config(port, 1, 10)).unwrap();
        client.open().unwrap();

        // Stop while no loop is running, then walk the reconnect path.
        client.stop().unwrap();
        client.close().unwrap();
        client.open().unwrap();
        assert_eq!(client.state(), TransportState::Opened);

        handle_tx.send(client.stop_handle()).unwrap();
        client.start().unwrap();
        client.close().unwrap();
        client.uninit().unwrap();
    });

    // The restarted loop must block on the quiet peer, not exit on the
    // token left over from the earlier stop.
    let stop = handle_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(300));
    assert!(!runner.is_finished(), "restarted loop exited immediately");

    stop.stop();
    runner.join().unwrap();
    done_tx.send(()).unwrap();
    accepter.join().unwrap();
}
