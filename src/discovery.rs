//! Discovery responder support.
//!
//! SEARCH_REQUESTs arrive by multicast or unicast and carry the HPAI the
//! requester wants answered. The responder has to advertise an address the
//! requester can actually reach, which on a multi-homed host means asking
//! the routing table which local interface faces the reply target. That
//! probe goes through the [`RouteProbe`] trait so the engine stays testable
//! without touching sockets.

use crate::net::{IpEndpoint, Ipv4Addr};
use crate::protocol::frame::Hpai;
use std::net::UdpSocket;

/// Resolves which local IPv4 address outbound traffic toward a target
/// would use.
pub trait RouteProbe {
    /// Local address of the interface routing toward `target`, or `None`
    /// if it cannot be determined.
    fn local_addr_towards(&self, target: IpEndpoint) -> Option<Ipv4Addr>;
}

/// Route probe backed by a throwaway UDP socket.
///
/// Connecting an unbound UDP socket performs route selection without
/// sending a packet; reading the socket's local address back yields the
/// outbound interface address. The socket lives for the duration of one
/// probe and is dropped immediately, so nothing leaks across requests and
/// nothing blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpRouteProbe;

impl RouteProbe for UdpRouteProbe {
    fn local_addr_towards(&self, target: IpEndpoint) -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect(std::net::SocketAddr::from(target)).ok()?;

        match socket.local_addr().ok()? {
            std::net::SocketAddr::V4(addr) => Some(Ipv4Addr::from(*addr.ip())),
            std::net::SocketAddr::V6(_) => None,
        }
    }
}

/// Route probe returning a fixed address, for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedRouteProbe(pub Ipv4Addr);

impl RouteProbe for FixedRouteProbe {
    fn local_addr_towards(&self, _target: IpEndpoint) -> Option<Ipv4Addr> {
        Some(self.0)
    }
}

/// Determine where a SEARCH_RESPONSE should be sent.
///
/// The requester declares its response endpoint in an HPAI at the start of
/// the request body; if that block is absent or malformed the reply falls
/// back to the datagram's UDP source address. The HPAI is read at its
/// fixed offset within the declared body, never found by scanning for a
/// `08 01` byte pair (which occurs freely inside address and port fields).
pub fn reply_target(body: &[u8], source: IpEndpoint) -> IpEndpoint {
    body.get(..Hpai::SIZE)
        .and_then(Hpai::parse)
        .map_or(source, |hpai| hpai.endpoint())
}
