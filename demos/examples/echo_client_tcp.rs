use bytes::BytesMut;
use clap::{Parser, ValueEnum};
use log::info;
use ripc_chain::{Chain, Context, Handler, OutboundChain};
use ripc_codec::EnvelopeCodec;
use ripc_demos::helpers::init_logger;
use ripc_evloop::{ChainFactoryFn, EventLoopClient, SmolClient, StopHandle};
use ripc_transport::{Envelope, Transport, TransportConfig};
use std::error::Error;
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, ValueEnum)]
enum Runtime {
    Tokio,
    Smol,
}

#[derive(Parser)]
#[command(
    name = "echo_client_tcp",
    about = "Sends one framed message and waits for the echo"
)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 18080)]
    port: u16,
    #[arg(long, value_enum, default_value_t = Runtime::Tokio)]
    runtime: Runtime,
    #[arg(long, default_value = "hello ripc")]
    message: String,
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Terminal stage: sends the message once the session is up, prints the
/// echo and stops the loop.
struct PingStage {
    chain: Weak<Chain<BytesMut, Envelope>>,
    message: String,
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
            chain.write(Envelope::new(1, BytesMut::from(self.message.as_bytes())));
        }
    }

    fn handle_inbound(
        &mut self,
        _ctx: &Context<Envelope, Envelope, Envelope, Envelope>,
        msg: Envelope,
    ) -> Result<(), Box<dyn Error>> {
        info!(
            "echoed back cmd {}: {}",
            msg.cmd,
            String::from_utf8_lossy(&msg.data)
        );
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

fn ping_factory(
    message: String,
    stop_slot: Arc<Mutex<Option<StopHandle>>>,
) -> ChainFactoryFn<Envelope> {
    Box::new(move |_session| {
        let chain = Rc::new(Chain::<BytesMut, Envelope>::new());
        chain.add_back(EnvelopeCodec::new());
        chain.add_back(PingStage {
            chain: Rc::downgrade(&chain),
            message: message.clone(),
            stop: stop_slot
                .lock()
                .unwrap()
                .clone()
                .expect("stop handle set before start"),
        });
        chain.finalize();
        chain
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.debug, &cli.log_level)?;

    let cfg = TransportConfig {
        id: 2,
        ip: cli.host.clone(),
        port: cli.port,
        sid_min: 10_000,
        sid_max: 10_100,
    };
    let stop_slot: Arc<Mutex<Option<StopHandle>>> = Arc::new(Mutex::new(None));
    let factory = ping_factory(cli.message.clone(), Arc::clone(&stop_slot));

    match cli.runtime {
        Runtime::Tokio => {
            let mut client = EventLoopClient::new(factory);
            client.init(cfg)?;
            client.open()?;
            *stop_slot.lock().unwrap() = Some(client.stop_handle());
            client.start()?;
            client.close()?;
            client.uninit()?;
        }
        Runtime::Smol => {
            let mut client = SmolClient::new(factory);
            client.init(cfg)?;
            client.open()?;
            *stop_slot.lock().unwrap() = Some(client.stop_handle());
            client.start()?;
            client.close()?;
            client.uninit()?;
        }
    }
    info!("bye");
    Ok(())
}
