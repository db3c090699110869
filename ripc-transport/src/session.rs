use crate::error::TransportError;
use std::fmt;
use std::net::SocketAddr;

/// Process-unique identifier of one session.
pub type SessionId = u64;

/// Which side of the connection a session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Accepted by a listening server.
    Server,
    /// Initiated toward a remote server.
    Client,
}

/// Lifecycle of one session, independent of the owning transport's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection established, chain active.
    Active,
    /// Connection gone; the id is retired and never handed out again.
    Closed,
}

/// Non-owning description of a session, passed to chain factories and
/// application handlers.
///
/// The backend owns the session; handlers only ever see this lookup data,
/// so a handler outliving its session dereferences nothing.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Allocated session id.
    pub id: SessionId,
    /// Server-accepted or client-initiated.
    pub kind: SessionKind,
    /// Address of this end of the connection.
    pub local_addr: SocketAddr,
    /// Address of the remote end.
    pub peer_addr: SocketAddr,
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session {} ({:?} {} <-> {})",
            self.id, self.kind, self.local_addr, self.peer_addr
        )
    }
}

/// Monotonic session-id allocator over `[min, max)`.
///
/// Ids are never reused within a process lifetime: once the counter reaches
/// `max`, every further allocation fails with
/// [`TransportError::SidExhausted`] even after sessions close. The caller
/// rejects the triggering accept and keeps serving existing sessions.
#[derive(Debug)]
pub struct SidAllocator {
    next: SessionId,
    max: SessionId,
}

impl SidAllocator {
    /// Creates an allocator over `[min, max)`. The range is validated by
    /// [`TransportConfig::validate`](crate::TransportConfig::validate)
    /// before it gets here.
    pub fn new(min: SessionId, max: SessionId) -> Self {
        Self { next: min, max }
    }

    /// Hands out the next id, or fails once the range is spent.
    pub fn allocate(&mut self) -> Result<SessionId, TransportError> {
        if self.next >= self.max {
            return Err(TransportError::SidExhausted { max: self.max });
        }
        let id = self.next;
        self.next += 1;
        Ok(id)
    }

    /// Ids still available.
    pub fn remaining(&self) -> u64 {
        self.max - self.next
    }
}
