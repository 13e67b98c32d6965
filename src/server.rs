//! Blocking UDP server loop.
//!
//! Single-threaded receive-dispatch-send loop over one UDP socket: the
//! only suspension point is the (timeout-bounded) receive call, and all
//! session state lives inside the engine on this one thread. Every send
//! is best-effort and every per-datagram failure is logged and skipped;
//! only an explicit stop request ends the loop.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::SimulatorConfig;
use crate::discovery::UdpRouteProbe;
use crate::engine::{GatewayEngine, Reply};
use crate::error::GatewayError;
use crate::net::IpEndpoint;
use crate::protocol::constants::KNXNETIP_MULTICAST_ADDR;

/// Receive buffer size; comfortably larger than any KNXnet/IP frame.
const RECV_BUFFER_SIZE: usize = 1024;

/// The gateway simulator: one UDP socket plus the protocol engine.
#[derive(Debug)]
pub struct GatewaySimulator {
    socket: UdpSocket,
    engine: GatewayEngine<UdpRouteProbe>,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
}

impl GatewaySimulator {
    /// Bind the simulator socket and set up the engine.
    ///
    /// Joins the discovery multicast group when configured; a failed join
    /// is logged and ignored, since unicast operation is unaffected.
    pub fn bind(config: SimulatorConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(config.bind_address)?;
        socket.set_read_timeout(Some(config.read_timeout))?;
        let local_addr = socket.local_addr()?;

        if config.join_multicast {
            let group = std::net::Ipv4Addr::from(KNXNETIP_MULTICAST_ADDR);
            match socket.join_multicast_v4(&group, &std::net::Ipv4Addr::UNSPECIFIED) {
                Ok(()) => log::info!("Joined discovery multicast group {group}"),
                Err(e) => log::warn!("Could not join multicast group {group}: {e}"),
            }
        }

        // Search responses advertise the resolved listening port, which
        // for an ephemeral bind is the port peers can actually reach.
        let engine = GatewayEngine::new(UdpRouteProbe, local_addr.port());

        log::info!("KNX gateway simulator listening on {local_addr}");

        Ok(Self {
            socket,
            engine,
            local_addr,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// The socket's resolved local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for requesting the loop to stop.
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Start the server in a background thread and return a handle.
    pub fn spawn(self) -> SimulatorHandle {
        let addr = self.local_addr;
        let running = self.running_handle();

        let handle = thread::spawn(move || self.run());

        SimulatorHandle {
            addr,
            running,
            handle: Some(handle),
        }
    }

    /// Run the server loop (blocking) until stopped.
    pub fn run(mut self) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        while self.running.load(Ordering::SeqCst) {
            let (len, src) = match self.socket.recv_from(&mut buf) {
                Ok(result) => result,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    log::error!("{}: {e}", GatewayError::receive_failed());
                    continue;
                }
            };

            let peer = match src {
                SocketAddr::V4(addr) => IpEndpoint::from(addr),
                SocketAddr::V6(_) => {
                    log::debug!("Ignoring IPv6 datagram from {src}");
                    continue;
                }
            };

            for reply in self.engine.handle_datagram(&buf[..len], peer) {
                self.send_reply(&reply);
            }
        }

        log::info!("KNX gateway simulator stopped");
    }

    /// Send one outbound frame, logging failures. Never retried.
    fn send_reply(&self, reply: &Reply) {
        if let Err(e) = self.socket.send_to(&reply.frame, SocketAddr::from(reply.target)) {
            log::warn!(
                "{} sending {} bytes to {}: {e}",
                GatewayError::send_failed(),
                reply.frame.len(),
                reply.target
            );
        }
    }
}

/// Handle for controlling a spawned simulator.
#[derive(Debug)]
pub struct SimulatorHandle {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatorHandle {
    /// The simulator's local address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Request the server loop to stop. The loop notices within one read
    /// timeout.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for SimulatorHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_loopback_resolves_port() {
        let simulator = GatewaySimulator::bind(SimulatorConfig::loopback()).unwrap();
        let addr = simulator.local_addr();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_spawn_and_stop() {
        let simulator = GatewaySimulator::bind(SimulatorConfig::loopback()).unwrap();
        let handle = simulator.spawn();
        assert_ne!(handle.addr().port(), 0);
        handle.stop();
        // Drop joins the thread; reaching this point without hanging is
        // the assertion.
    }
}
