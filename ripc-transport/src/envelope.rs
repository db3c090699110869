use bytes::BytesMut;
use std::fmt;

/// The unit of exchange between application and transport.
///
/// An envelope pairs a 32-bit command discriminator with an opaque payload.
/// The payload length is derived from the buffer, never stored separately,
/// so the two cannot disagree.
///
/// Envelopes move by value through chain stages; the stage that consumes one
/// without forwarding it is its final owner. There is no shared-buffer
/// aliasing between stages.
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Application-defined command discriminator.
    pub cmd: u32,
    /// Payload bytes.
    pub data: BytesMut,
}

impl Envelope {
    /// Creates an envelope with the given command and payload.
    pub fn new(cmd: u32, data: BytesMut) -> Self {
        Self { cmd, data }
    }

    /// Creates an empty envelope carrying only a command.
    pub fn from_cmd(cmd: u32) -> Self {
        Self {
            cmd,
            data: BytesMut::new(),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("cmd", &self.cmd)
            .field("len", &self.data.len())
            .finish()
    }
}
