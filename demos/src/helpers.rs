//! Bits shared across the examples: logger setup and the echo chain.

use bytes::BytesMut;
use ripc_chain::{Chain, Context, Handler, OutboundChain};
use ripc_codec::EnvelopeCodec;
use ripc_transport::Envelope;
use std::error::Error;
use std::io::Write;
use std::rc::{Rc, Weak};
use std::str::FromStr;

/// Installs `env_logger` with file:line and a local timestamp when
/// `debug` is set.
pub fn init_logger(debug: bool, log_level: &str) -> anyhow::Result<()> {
    if !debug {
        return Ok(());
    }
    let level = log::LevelFilter::from_str(log_level)?;
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%6f"),
                record.args()
            )
        })
        .filter(None, level)
        .init();
    Ok(())
}

/// Terminal stage that writes every decoded envelope straight back out.
pub struct EchoStage {
    chain: Weak<Chain<BytesMut, Envelope>>,
}

impl Handler for EchoStage {
    type Rin = Envelope;
    type Rout = Envelope;
    type Win = Envelope;
    type Wout = Envelope;

    fn name(&self) -> &str {
        "EchoStage"
    }

    fn handle_inbound(
        &mut self,
        _ctx: &Context<Envelope, Envelope, Envelope, Envelope>,
        msg: Envelope,
    ) -> Result<(), Box<dyn Error>> {
        log::info!("echoing cmd {} ({} bytes)", msg.cmd, msg.len());
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

/// Frame codec plus [`EchoStage`], finalized and ready to serve.
pub fn echo_chain() -> Rc<Chain<BytesMut, Envelope>> {
    let chain = Rc::new(Chain::<BytesMut, Envelope>::new());
    chain.add_back(EnvelopeCodec::new());
    chain.add_back(EchoStage {
        chain: Rc::downgrade(&chain),
    });
    chain.finalize();
    chain
}
