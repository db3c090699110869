//! # ripc-codec - Chain Stages for Wire Framing
//!
//! Codec stages for ripc chains:
//!
//! - [`EnvelopeCodec`]: the default wire codec, framing
//!   [`Envelope`](ripc_transport::Envelope)s with a command + length header
//!   over a byte stream.
//! - [`StringCodec`]: Envelope ↔ UTF-8 string, for demos and text
//!   protocols.
//!
//! Both are pure protocol logic: they touch no sockets and run inside
//! whatever chain a backend builds.
//!
//! ## Building a chain with codecs
//!
//! ```rust
//! use bytes::BytesMut;
//! use ripc_chain::Chain;
//! use ripc_codec::{EnvelopeCodec, StringCodec};
//! use ripc_transport::Envelope;
//!
//! let chain: Chain<BytesMut, String> = Chain::new();
//! chain.add_back(EnvelopeCodec::new());
//! chain.add_back(StringCodec::new(1));
//! // chain.add_back(your_handler);
//! chain.finalize();
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

mod envelope_codec;
mod string_codec;

pub use envelope_codec::{
    CodecError, DEFAULT_MAX_PAYLOAD_SIZE, EnvelopeCodec, HEADER_SIZE, WIRE_VERSION,
};
pub use string_codec::StringCodec;
