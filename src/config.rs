//! Configuration for the gateway simulator.

use crate::protocol::constants::KNXNETIP_DEFAULT_PORT;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Static simulator configuration (set at construction time).
#[derive(Clone, Debug)]
pub struct SimulatorConfig {
    /// Address the UDP socket binds to
    pub bind_address: SocketAddr,
    /// Whether to join the KNXnet/IP discovery multicast group
    pub join_multicast: bool,
    /// Socket read timeout; bounds how long a stop request can go unnoticed
    pub read_timeout: Duration,
}

impl SimulatorConfig {
    /// Create a configuration listening on all interfaces at the standard
    /// KNXnet/IP port, with discovery multicast enabled.
    pub fn new() -> Self {
        Self {
            bind_address: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::UNSPECIFIED,
                KNXNETIP_DEFAULT_PORT,
            )),
            join_multicast: true,
            read_timeout: Duration::from_millis(100),
        }
    }

    /// Create a loopback configuration on an ephemeral port, with
    /// multicast disabled. Intended for tests running several simulators
    /// side by side.
    pub fn loopback() -> Self {
        Self::new()
            .with_bind_address(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)))
            .with_multicast(false)
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Set the UDP port, keeping the configured bind address.
    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_address.set_port(port);
        self
    }

    /// Enable or disable joining the discovery multicast group.
    pub fn with_multicast(mut self, join: bool) -> Self {
        self.join_multicast = join;
        self
    }

    /// Set the socket read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimulatorConfig::new();
        assert_eq!(config.bind_address.port(), KNXNETIP_DEFAULT_PORT);
        assert!(config.join_multicast);
    }

    #[test]
    fn test_loopback() {
        let config = SimulatorConfig::loopback();
        assert_eq!(config.bind_address.port(), 0);
        assert!(config.bind_address.ip().is_loopback());
        assert!(!config.join_multicast);
    }

    #[test]
    fn test_builder() {
        let config = SimulatorConfig::new().with_port(13671).with_multicast(false);
        assert_eq!(config.bind_address.port(), 13671);
        assert!(!config.join_multicast);
    }
}
