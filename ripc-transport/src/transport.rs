use crate::config::TransportConfig;
use crate::error::TransportError;
use std::fmt;

/// Lifecycle state of a transport backend.
///
/// Transitions are one-directional (`Init` through `Uninitialized`), with a
/// single sanctioned loop: a closed client may `open` again after
/// caller-driven back-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Constructed, not yet configured.
    Init,
    /// `init` validated and stored the config.
    Configured,
    /// Socket resources exist (bound/listening or connected).
    Opened,
    /// The backend is serving traffic.
    Ready,
    /// `stop` requested; the drive loop is winding down.
    Stopping,
    /// Sockets released; config still present (client retry re-opens from
    /// here).
    Closed,
    /// Fully torn down.
    Uninitialized,
}

impl TransportState {
    /// True once teardown has passed the point where `stop` does anything.
    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            TransportState::Stopping | TransportState::Closed | TransportState::Uninitialized
        )
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::Init => "init",
            TransportState::Configured => "configured",
            TransportState::Opened => "opened",
            TransportState::Ready => "ready",
            TransportState::Stopping => "stopping",
            TransportState::Closed => "closed",
            TransportState::Uninitialized => "uninitialized",
        };
        f.write_str(s)
    }
}

/// Common lifecycle of every backend variant.
///
/// All backends move through the same states; what each phase does is
/// backend-specific:
///
/// | op | event-loop server | event-loop client | polling backends |
/// |---|---|---|---|
/// | `open` | bind + listen | connect (retryable) | bind/connect + register |
/// | `start` | run loop until `stop` | run loop until `stop` | returns; caller drives `check` |
/// | `stop` | signal loop, drain | signal loop | wake `check`, make it fail |
///
/// Teardown (`stop`, `close`, `uninit`) is idempotent: calling any of them
/// on an already-torn-down transport returns `Ok` and does nothing. Every
/// other operation invoked out of order fails with
/// [`TransportError::State`].
pub trait Transport {
    /// Validates and stores the configuration. `Init` → `Configured`.
    fn init(&mut self, cfg: TransportConfig) -> Result<(), TransportError>;

    /// Acquires socket resources. `Configured` → `Opened`. A failed client
    /// `open` leaves the transport re-openable after back-off.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Begins serving. `Opened` → `Ready`. Event-loop backends block here
    /// until stopped; polling backends return and are driven by `check`.
    fn start(&mut self) -> Result<(), TransportError>;

    /// Requests shutdown of the serving machinery. `Ready` → `Stopping`.
    fn stop(&mut self) -> Result<(), TransportError>;

    /// Releases socket resources. → `Closed`.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Discards configuration. → `Uninitialized`.
    fn uninit(&mut self) -> Result<(), TransportError>;

    /// Current lifecycle state.
    fn state(&self) -> TransportState;
}

/// Rejects `op` unless `current` is one of `allowed`.
///
/// Shared by backends for the non-idempotent transitions.
pub fn expect_state(
    op: &'static str,
    current: TransportState,
    allowed: &[TransportState],
) -> Result<(), TransportError> {
    if allowed.contains(&current) {
        Ok(())
    } else {
        Err(TransportError::State { op, state: current })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expect_state_gates_transitions() {
        assert!(expect_state("open", TransportState::Configured, &[TransportState::Configured]).is_ok());

        let err = expect_state("open", TransportState::Init, &[TransportState::Configured]);
        assert!(matches!(
            err,
            Err(TransportError::State {
                op: "open",
                state: TransportState::Init
            })
        ));
    }

    #[test]
    fn stopped_covers_all_teardown_states() {
        assert!(!TransportState::Ready.is_stopped());
        assert!(TransportState::Stopping.is_stopped());
        assert!(TransportState::Closed.is_stopped());
        assert!(TransportState::Uninitialized.is_stopped());
    }
}
