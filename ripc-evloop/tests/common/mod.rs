use bytes::BytesMut;
use ripc_chain::{Chain, Context, Handler, OutboundChain};
use ripc_codec::EnvelopeCodec;
use ripc_transport::{Envelope, TransportConfig};
use std::error::Error;
use std::rc::{Rc, Weak};

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

/// Builds the echo chain used by server-side tests.
pub fn echo_chain() -> Rc<Chain<BytesMut, Envelope>> {
    let chain = Rc::new(Chain::<BytesMut, Envelope>::new());
    chain.add_back(EnvelopeCodec::new());
    chain.add_back(EchoStage {
        chain: Rc::downgrade(&chain),
    });
    chain.finalize();
    chain
}

/// Reserves an ephemeral loopback port.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn config(port: u16, sid_min: u64, sid_max: u64) -> TransportConfig {
    TransportConfig {
        id: 7,
        ip: "127.0.0.1".to_string(),
        port,
        sid_min,
        sid_max,
    }
}
