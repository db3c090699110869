use clap::Parser;
use log::info;
use ripc_demos::helpers::{echo_chain, init_logger};
use ripc_poll::PollServer;
use ripc_transport::{Transport, TransportConfig};
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "echo_poll",
    about = "Framed echo server driven by a caller-side poll loop"
)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 18081)]
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

    let mut server = PollServer::new(Box::new(|session| {
        info!("new {}", session);
        echo_chain()
    }));
    server.init(TransportConfig {
        id: 3,
        ip: cli.host.clone(),
        port: cli.port,
        sid_min: cli.sid_min,
        sid_max: cli.sid_max,
    })?;
    server.open()?;
    server.start()?;

    let stop = server
        .stop_handle()
        .ok_or_else(|| anyhow::anyhow!("server not started"))?;
    ctrlc::set_handler(move || stop.stop())?;

    info!("listening {}:{}, press ctrl-c to stop", cli.host, cli.port);
    while server.check(Duration::from_millis(100)).is_ok() {}

    server.close()?;
    server.uninit()?;
    info!("bye");
    Ok(())
}
