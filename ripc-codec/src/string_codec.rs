//! Envelope ↔ UTF-8 string codec stage.

use crate::envelope_codec::CodecError;
use bytes::BytesMut;
use ripc_chain::{Context, Handler};
use ripc_transport::Envelope;
use std::error::Error;

/// Converts inbound Envelope payloads to `String` and outbound `String`s to
/// Envelopes carrying a fixed command.
///
/// Sits above [`EnvelopeCodec`](crate::EnvelopeCodec) in text-protocol
/// chains; demos use it to speak lines over the wire format. Non-UTF-8
/// payloads are rejected through the chain's error path.
#[derive(Debug)]
pub struct StringCodec {
    /// Command stamped on every outbound envelope.
    cmd: u32,
}

impl StringCodec {
    /// Creates a codec stamping outbound envelopes with `cmd`.
    pub fn new(cmd: u32) -> Self {
        Self { cmd }
    }
}

impl Handler for StringCodec {
    type Rin = Envelope;
    type Rout = String;
    type Win = String;
    type Wout = Envelope;

    fn name(&self) -> &str {
        "StringCodec"
    }

    fn handle_inbound(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        msg: Self::Rin,
    ) -> Result<(), Box<dyn Error>> {
        let text = String::from_utf8(msg.data.to_vec()).map_err(CodecError::from)?;
        ctx.fire_inbound(text);
        Ok(())
    }

    fn poll_outbound(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
    ) -> Option<Self::Wout> {
        ctx.fire_poll_outbound()
            .map(|text| Envelope::new(self.cmd, BytesMut::from(text.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripc_chain::{Chain, InboundChain, OutboundChain};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct TextSink {
        lines: Rc<RefCell<Vec<String>>>,
        errors: Rc<RefCell<Vec<String>>>,
    }

    impl Handler for TextSink {
        type Rin = String;
        type Rout = String;
        type Win = String;
        type Wout = String;

        fn name(&self) -> &str {
            "TextSink"
        }

        fn handle_inbound(
            &mut self,
            _ctx: &Context<String, String, String, String>,
            msg: String,
        ) -> Result<(), Box<dyn Error>> {
            self.lines.borrow_mut().push(msg);
            Ok(())
        }

        fn poll_outbound(
            &mut self,
            ctx: &Context<String, String, String, String>,
        ) -> Option<String> {
            ctx.fire_poll_outbound()
        }

        fn handle_error(
            &mut self,
            _ctx: &Context<String, String, String, String>,
            err: Box<dyn Error>,
        ) {
            self.errors.borrow_mut().push(err.to_string());
        }
    }

    #[allow(clippy::type_complexity)]
    fn text_chain() -> (
        Chain<Envelope, String>,
        Rc<RefCell<Vec<String>>>,
        Rc<RefCell<Vec<String>>>,
    ) {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let errors = Rc::new(RefCell::new(Vec::new()));
        let chain: Chain<Envelope, String> = Chain::new();
        chain.add_back(StringCodec::new(42));
        chain.add_back(TextSink {
            lines: Rc::clone(&lines),
            errors: Rc::clone(&errors),
        });
        chain.finalize();
        (chain, lines, errors)
    }

    #[test]
    fn inbound_payload_becomes_text() {
        let (chain, lines, errors) = text_chain();
        chain.handle_inbound(Envelope::new(7, BytesMut::from(&b"hi there"[..])));
        assert_eq!(lines.borrow().as_slice(), &["hi there".to_string()]);
        assert!(errors.borrow().is_empty());
    }

    #[test]
    fn outbound_text_is_stamped_with_cmd() {
        let (chain, _, _) = text_chain();
        chain.write("pong".to_string());
        let envelope = chain.poll_outbound().unwrap();
        assert_eq!(envelope.cmd, 42);
        assert_eq!(&envelope.data[..], b"pong");
    }

    #[test]
    fn invalid_utf8_takes_error_path() {
        let (chain, lines, errors) = text_chain();
        chain.handle_inbound(Envelope::new(7, BytesMut::from(&[0xff, 0xfe][..])));
        assert!(lines.borrow().is_empty());
        assert_eq!(errors.borrow().len(), 1);
        assert!(errors.borrow()[0].contains("UTF-8"));
    }
}
