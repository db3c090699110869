use clap::Parser;
use log::info;
use ripc_demos::helpers::{echo_chain, init_logger};
use ripc_evloop::EventLoopServer;
use ripc_transport::{Transport, TransportConfig};

#[derive(Parser)]
#[command(
    name = "echo_server_tcp",
    about = "Framed echo server on a tokio event loop"
)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 18080)]
    port: u16,
    #[arg(long, default_value_t = 1)]
    sid_min: u64,
    #[arg(long, default_value_t = 1001)]
    sid_max: u64,
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.debug, &cli.log_level)?;

    let mut server = EventLoopServer::new(Box::new(|session| {
        info!("new {}", session);
        echo_chain()
    }));
    server.init(TransportConfig {
        id: 1,
        ip: cli.host.clone(),
        port: cli.port,
        sid_min: cli.sid_min,
        sid_max: cli.sid_max,
    })?;
    server.open()?;

    info!("listening {}:{}, press ctrl-c to stop", cli.host, cli.port);
    let stop = server.stop_handle();
    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })?;
    std::thread::spawn(move || {
        let _ = rx.recv();
        stop.stop();
    });

    server.start()?;
    server.close()?;
    server.uninit()?;
    info!("bye");
    Ok(())
}
