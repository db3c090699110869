use crate::error::TransportError;
use crate::session::SessionId;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Static configuration for one transport instance.
///
/// Fixed at `init`; a transport is never reconfigured in place. To change
/// any of these, tear the instance down and init a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Caller-chosen instance id, carried into log lines.
    pub id: u32,
    /// IPv4 address in dotted-quad form. Servers bind it, clients connect
    /// to it.
    pub ip: String,
    /// TCP port. Zero is rejected.
    pub port: u16,
    /// First session id handed out (inclusive).
    pub sid_min: SessionId,
    /// End of the session-id range (exclusive).
    pub sid_max: SessionId,
}

impl TransportConfig {
    /// Validates the configuration, returning `Config` on the first
    /// violation. Called by every backend's `init`.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.ip.parse::<Ipv4Addr>().is_err() {
            return Err(TransportError::Config(format!(
                "not a dotted-quad IPv4 address: {:?}",
                self.ip
            )));
        }
        if self.port == 0 {
            return Err(TransportError::Config("port must be nonzero".to_string()));
        }
        if self.sid_min >= self.sid_max {
            return Err(TransportError::Config(format!(
                "empty session-id range [{}, {})",
                self.sid_min, self.sid_max
            )));
        }
        Ok(())
    }

    /// The socket address this config names. Only valid after
    /// [`TransportConfig::validate`].
    pub fn socket_addr(&self) -> Result<SocketAddr, TransportError> {
        let ip: Ipv4Addr = self
            .ip
            .parse()
            .map_err(|_| TransportError::Config(format!("bad address {:?}", self.ip)))?;
        Ok(SocketAddr::V4(SocketAddrV4::new(ip, self.port)))
    }
}
