//! Command + length framing for Envelopes over a byte stream.
//!
//! TCP is a stream protocol without message boundaries. This stage delimits
//! Envelopes with an 8-byte header:
//!
//! ```text
//! +-------------+-------------+----------------+
//! | cmd (4B BE) | len (4B BE) | data (len B)   |
//! +-------------+-------------+----------------+
//! ```
//!
//! Both integers are big-endian (network byte order); `len` counts the
//! payload only, excluding the header. This is wire format version
//! [`WIRE_VERSION`].
//!
//! Decoding is incremental: input chunks are accumulated until a full frame
//! is available, so a frame split across any number of reads decodes
//! identically to one delivered whole. A frame whose announced length
//! exceeds the configured maximum is rejected (anti-OOM): its payload bytes
//! are consumed and discarded, the error travels the chain's error path,
//! and the next frame decodes normally. The same bound holds outbound:
//! envelopes above the maximum are dropped instead of framed.

use bytes::{Buf, BufMut, BytesMut};
use log::{trace, warn};
use ripc_chain::{Context, Handler};
use ripc_transport::Envelope;
use std::error::Error;
use thiserror::Error;

/// Wire format version implemented by [`EnvelopeCodec`].
pub const WIRE_VERSION: u8 = 1;

/// Frame header size: 4 bytes command + 4 bytes length.
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size (16 MB), anti-OOM bound on `len`.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Decode-side failures. Local to one envelope; the connection survives.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A frame header announced a payload larger than the configured
    /// maximum.
    #[error("frame of {len} bytes exceeds maximum {max} (cmd {cmd})")]
    Oversize {
        /// Rejected frame's command.
        cmd: u32,
        /// Announced payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Payload is not valid UTF-8 (string codec only).
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    /// Accumulating until a full header, then a full payload, is buffered.
    Frame,
    /// Discarding the remaining bytes of a rejected oversize frame.
    Skipping { remaining: usize },
}

/// The default wire codec: one chain stage framing Envelopes as
/// `cmd + len + data`.
///
/// Boundary types: raw `BytesMut` chunks toward the I/O layer, [`Envelope`]s
/// toward the application.
#[derive(Debug)]
pub struct EnvelopeCodec {
    state: DecodeState,
    buf: BytesMut,
    max_payload_size: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeCodec {
    /// Creates a codec with [`DEFAULT_MAX_PAYLOAD_SIZE`].
    pub fn new() -> Self {
        Self::with_max_payload_size(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Creates a codec rejecting frames with payloads above
    /// `max_payload_size`. The bound is capped at [`u32::MAX`], the most
    /// the wire's length field can announce.
    pub fn with_max_payload_size(max_payload_size: usize) -> Self {
        Self {
            state: DecodeState::Frame,
            buf: BytesMut::new(),
            max_payload_size: max_payload_size.min(u32::MAX as usize),
        }
    }

    /// Encodes one envelope into its wire frame.
    ///
    /// # Panics
    ///
    /// Panics if the payload does not fit the wire's 32-bit length field.
    /// The outbound chain path never gets here with such an envelope; it
    /// drops them against `max_payload_size` first.
    pub fn encode(envelope: &Envelope) -> BytesMut {
        assert!(
            envelope.len() <= u32::MAX as usize,
            "payload of {} bytes does not fit the wire's 32-bit length field",
            envelope.len()
        );
        let mut frame = BytesMut::with_capacity(HEADER_SIZE + envelope.len());
        frame.put_u32(envelope.cmd);
        frame.put_u32(envelope.len() as u32);
        frame.extend_from_slice(&envelope.data);
        frame
    }

    /// Drains as many complete frames as the buffer holds, returning the
    /// first decode error encountered (after continuing past it).
    fn drain_frames(&mut self, out: &mut Vec<Envelope>) -> Result<(), CodecError> {
        let mut first_err = None;

        loop {
            match self.state {
                DecodeState::Skipping { remaining } => {
                    let discard = remaining.min(self.buf.len());
                    self.buf.advance(discard);
                    if discard < remaining {
                        self.state = DecodeState::Skipping {
                            remaining: remaining - discard,
                        };
                        break;
                    }
                    trace!("oversize frame fully discarded, resuming decode");
                    self.state = DecodeState::Frame;
                }
                DecodeState::Frame => {
                    if self.buf.len() < HEADER_SIZE {
                        break;
                    }
                    let cmd = u32::from_be_bytes([
                        self.buf[0],
                        self.buf[1],
                        self.buf[2],
                        self.buf[3],
                    ]);
                    let len = u32::from_be_bytes([
                        self.buf[4],
                        self.buf[5],
                        self.buf[6],
                        self.buf[7],
                    ]) as usize;

                    if len > self.max_payload_size {
                        self.buf.advance(HEADER_SIZE);
                        self.state = DecodeState::Skipping { remaining: len };
                        if first_err.is_none() {
                            first_err = Some(CodecError::Oversize {
                                cmd,
                                len,
                                max: self.max_payload_size,
                            });
                        }
                        continue;
                    }

                    if self.buf.len() < HEADER_SIZE + len {
                        break;
                    }

                    self.buf.advance(HEADER_SIZE);
                    let data = self.buf.split_to(len);
                    out.push(Envelope::new(cmd, data));
                }
            }
        }

        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl Handler for EnvelopeCodec {
    type Rin = BytesMut;
    type Rout = Envelope;
    type Win = Envelope;
    type Wout = BytesMut;

    fn name(&self) -> &str {
        "EnvelopeCodec"
    }

    fn handle_inbound(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        msg: Self::Rin,
    ) -> Result<(), Box<dyn Error>> {
        self.buf.extend_from_slice(&msg);

        let mut decoded = Vec::new();
        let result = self.drain_frames(&mut decoded);

        // Frames decoded around a rejected one are still forwarded; only
        // the oversize frame itself is lost.
        for envelope in decoded {
            ctx.fire_inbound(envelope);
        }

        result.map_err(|err| Box::new(err) as Box<dyn Error>)
    }

    fn poll_outbound(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
    ) -> Option<Self::Wout> {
        // The same bound applies in both directions: an envelope this
        // codec would refuse to decode is never put on the wire either.
        while let Some(envelope) = ctx.fire_poll_outbound() {
            if envelope.len() > self.max_payload_size {
                warn!(
                    "dropping outbound frame of {} bytes, exceeds maximum {} (cmd {})",
                    envelope.len(),
                    self.max_payload_size,
                    envelope.cmd
                );
                continue;
            }
            trace!("encoding cmd {} len {}", envelope.cmd, envelope.len());
            return Some(Self::encode(&envelope));
        }
        None
    }
}
