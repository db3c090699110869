use crate::session::SessionId;
use crate::transport::TransportState;
use thiserror::Error;

/// Errors produced by transport backends.
///
/// The taxonomy matters to callers:
///
/// - [`TransportError::Config`] is fatal to `init`; no partial state is left
///   behind.
/// - [`TransportError::SidExhausted`] and [`TransportError::PollSetFull`]
///   fail one operation (an accept, a registration) while the transport
///   keeps serving existing sessions.
/// - [`TransportError::State`] means the caller invoked an operation the
///   current lifecycle state forbids; the idempotent teardown calls never
///   produce it.
/// - [`TransportError::Engine`] and [`TransportError::Io`] from `check` or
///   `start` are the shutdown signal; callers leave their drive loop on
///   them.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Invalid configuration rejected at `init`.
    #[error("invalid transport config: {0}")]
    Config(String),

    /// The session-id range is used up; the triggering accept is refused.
    #[error("session ids exhausted at {max}")]
    SidExhausted {
        /// Exclusive upper bound of the configured id range.
        max: SessionId,
    },

    /// The readiness-poll set cannot register another connection.
    #[error("poll set full ({capacity} slots)")]
    PollSetFull {
        /// Number of slots the set was created with.
        capacity: usize,
    },

    /// Operation invoked from a lifecycle state that forbids it.
    #[error("cannot {op} while {state}")]
    State {
        /// The rejected operation.
        op: &'static str,
        /// The state the transport was in.
        state: TransportState,
    },

    /// Failure inside the driving machinery (executor, wakeup channel).
    #[error("engine failure: {0}")]
    Engine(String),

    /// An I/O error from the OS socket layer.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
