//! Request dispatcher and per-channel state machine.
//!
//! One decoded datagram goes in, zero or more outbound frames come out.
//! The engine owns the session table and makes every protocol decision;
//! it never touches a socket, which keeps the whole state machine
//! unit-testable. Socket work (receive, send, route probing) lives in the
//! server loop and the [`RouteProbe`] implementation the engine is built
//! with.
//!
//! Channels move through a two-state lifecycle, absent and open: a
//! CONNECT_REQUEST opens a channel atomically and a DISCONNECT_REQUEST
//! (or process exit) removes it. Channels do not expire on their own and
//! unacknowledged indications are not retransmitted; real gateways do
//! both, but the simulator deliberately keeps the simpler behavior.

use crate::discovery::{reply_target, RouteProbe};
use crate::error::Result;
use crate::net::{IpEndpoint, Ipv4Addr};
use crate::protocol::cemi::{classify, TelegramSummary};
use crate::protocol::constants::{
    ServiceType, E_NO_ERROR, E_NO_MORE_CONNECTIONS, MAX_FRAME_SIZE,
};
use crate::protocol::frame::{Hpai, KnxnetIpFrame};
use crate::protocol::services::{
    ChannelRequest, ChannelResponse, ConnectRequest, ConnectResponse, ConnectionHeader,
    SearchResponse, TunnelingAck, TunnelingRequest,
};
use crate::session::SessionTable;

/// An outbound frame and where to send it.
///
/// Most replies target the datagram source; search responses target the
/// requester's declared HPAI and bus indications target the stored
/// session peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Destination endpoint
    pub target: IpEndpoint,
    /// Complete KNXnet/IP frame
    pub frame: Vec<u8>,
}

/// The gateway protocol engine.
///
/// Generic over the route probe so tests can pin the advertised discovery
/// address instead of consulting the host routing table.
#[derive(Debug)]
pub struct GatewayEngine<P> {
    sessions: SessionTable,
    probe: P,
    /// Port advertised in search responses (the port the server listens on)
    advertised_port: u16,
}

impl<P: RouteProbe> GatewayEngine<P> {
    /// Create a new engine advertising `advertised_port` during discovery.
    pub fn new(probe: P, advertised_port: u16) -> Self {
        Self {
            sessions: SessionTable::new(),
            probe,
            advertised_port,
        }
    }

    /// Number of currently open tunneling channels.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Process one received datagram.
    ///
    /// Returns the frames to send in order. Every failure mode degrades
    /// to an empty (or shortened) reply list with a log line; nothing a
    /// peer sends can escalate beyond that.
    pub fn handle_datagram(&mut self, datagram: &[u8], peer: IpEndpoint) -> Vec<Reply> {
        let frame = match KnxnetIpFrame::parse(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("Dropping invalid datagram from {peer}: {e}");
                return Vec::new();
            }
        };

        let body = frame.body();
        let result = match ServiceType::from_u16(frame.service_type()) {
            Some(ServiceType::SearchRequest) => self.handle_search(body, peer),
            Some(ServiceType::ConnectRequest) => self.handle_connect(body, peer),
            Some(ServiceType::ConnectionstateRequest) => self.handle_connectionstate(body, peer),
            Some(ServiceType::DisconnectRequest) => self.handle_disconnect(body, peer),
            Some(ServiceType::TunnelingRequest) => self.handle_tunneling(body, peer),
            Some(ServiceType::TunnelingAck) => {
                Self::handle_tunneling_ack(body, peer);
                Ok(Vec::new())
            }
            Some(other) => {
                // Gateway-to-client services arriving at the gateway
                log::debug!("Ignoring unexpected {other:?} from {peer}");
                Ok(Vec::new())
            }
            None => {
                log::debug!(
                    "Unknown service type 0x{:04X} from {peer}",
                    frame.service_type()
                );
                Ok(Vec::new())
            }
        };

        match result {
            Ok(replies) => replies,
            Err(e) => {
                log::warn!("Failed to build reply for {peer}: {e}");
                Vec::new()
            }
        }
    }

    /// CONNECT_REQUEST: open a channel and grant it unconditionally
    /// (no authentication, no endpoint-type validation). The only refusal
    /// is a full session table.
    fn handle_connect(&mut self, body: &[u8], peer: IpEndpoint) -> Result<Vec<Reply>> {
        let request = ConnectRequest::parse(body);
        if let Some(control) = request.control_endpoint {
            if control.address.is_unspecified() {
                log::debug!("CONNECT_REQUEST from {peer} (NAT mode)");
            } else {
                log::debug!("CONNECT_REQUEST from {peer}, control endpoint {}", control.endpoint());
            }
        } else {
            log::debug!("CONNECT_REQUEST from {peer}, no control endpoint");
        }

        let (channel_id, status) = match self.sessions.open(peer) {
            Some(id) => {
                log::info!("Client {peer} connected on channel {id}");
                (id, E_NO_ERROR)
            }
            None => {
                log::warn!("Refusing connection from {peer}: no free channels");
                (0, E_NO_MORE_CONNECTIONS)
            }
        };

        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len = ConnectResponse::new(channel_id, status).build(&mut buf)?;
        Ok(vec![Reply {
            target: peer,
            frame: buf[..len].to_vec(),
        }])
    }

    /// DISCONNECT_REQUEST: close the channel if it exists and confirm
    /// either way.
    fn handle_disconnect(&mut self, body: &[u8], peer: IpEndpoint) -> Result<Vec<Reply>> {
        let Some(request) = ChannelRequest::parse(body) else {
            log::debug!("Short DISCONNECT_REQUEST from {peer}, dropping");
            return Ok(Vec::new());
        };

        if self.sessions.close(request.channel_id) {
            log::info!("Channel {} closed by {peer}", request.channel_id);
        } else {
            log::debug!(
                "DISCONNECT_REQUEST for unknown channel {} from {peer}",
                request.channel_id
            );
        }

        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len = ChannelResponse::new(request.channel_id, E_NO_ERROR).build_disconnect(&mut buf)?;
        Ok(vec![Reply {
            target: peer,
            frame: buf[..len].to_vec(),
        }])
    }

    /// CONNECTIONSTATE_REQUEST (heartbeat): always healthy. The channel's
    /// existence is not checked, so heartbeats for closed channels still
    /// succeed.
    fn handle_connectionstate(&mut self, body: &[u8], peer: IpEndpoint) -> Result<Vec<Reply>> {
        let Some(request) = ChannelRequest::parse(body) else {
            log::debug!("Short CONNECTIONSTATE_REQUEST from {peer}, dropping");
            return Ok(Vec::new());
        };

        log::debug!("Heartbeat for channel {} from {peer}", request.channel_id);

        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len =
            ChannelResponse::new(request.channel_id, E_NO_ERROR).build_connectionstate(&mut buf)?;
        Ok(vec![Reply {
            target: peer,
            frame: buf[..len].to_vec(),
        }])
    }

    /// TUNNELING_REQUEST: acknowledge unconditionally (the inbound
    /// sequence number is not validated against any expected value), then
    /// echo group writes back as bus indications.
    fn handle_tunneling(&mut self, body: &[u8], peer: IpEndpoint) -> Result<Vec<Reply>> {
        let Some(request) = TunnelingRequest::parse(body) else {
            log::debug!("Short TUNNELING_REQUEST from {peer}, dropping");
            return Ok(Vec::new());
        };

        let header = request.connection_header;
        log::debug!(
            "TUNNELING_REQUEST channel={} seq={} cemi_len={} from {peer}",
            header.channel_id,
            header.sequence,
            request.cemi.len()
        );
        if let Some(summary) = TelegramSummary::parse(request.cemi) {
            log::debug!("  {summary}");
        }

        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len = TunnelingAck::new(header, E_NO_ERROR).build(&mut buf)?;
        let mut replies = vec![Reply {
            target: peer,
            frame: buf[..len].to_vec(),
        }];

        // A write observed on the bus comes back to the tunnel as an
        // indication carrying the identical cEMI bytes.
        if classify(request.cemi).is_group_write() {
            let session_peer = self.sessions.lookup(header.channel_id).map(|s| s.peer);
            match (session_peer, self.sessions.next_sequence(header.channel_id)) {
                (Some(target), Some(sequence)) => {
                    let indication = TunnelingRequest::new(
                        ConnectionHeader::new(header.channel_id, sequence),
                        request.cemi,
                    );
                    match indication.build(&mut buf) {
                        Ok(len) => {
                            log::debug!(
                                "Echoing group write on channel {} as indication seq={sequence}",
                                header.channel_id
                            );
                            replies.push(Reply {
                                target,
                                frame: buf[..len].to_vec(),
                            });
                        }
                        Err(e) => log::warn!("Failed to build bus indication: {e}"),
                    }
                }
                _ => {
                    log::debug!(
                        "No open session for channel {}, skipping bus echo",
                        header.channel_id
                    );
                }
            }
        }

        Ok(replies)
    }

    /// Inbound TUNNELING_ACK for an indication we sent. Logged only; the
    /// simulator does not retransmit unacknowledged indications, so there
    /// is no bookkeeping to update.
    fn handle_tunneling_ack(body: &[u8], peer: IpEndpoint) {
        match TunnelingAck::parse(body) {
            Ok(ack) => log::debug!(
                "TUNNELING_ACK channel={} seq={} status={} from {peer}",
                ack.connection_header.channel_id,
                ack.connection_header.sequence,
                ack.status
            ),
            Err(_) => log::debug!("Short TUNNELING_ACK from {peer}"),
        }
    }

    /// SEARCH_REQUEST: answer toward the requester's declared HPAI (or
    /// the datagram source), advertising whichever local address routes
    /// there.
    fn handle_search(&mut self, body: &[u8], peer: IpEndpoint) -> Result<Vec<Reply>> {
        let target = reply_target(body, peer);

        let advertised = self
            .probe
            .local_addr_towards(target)
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        log::debug!(
            "SEARCH_REQUEST from {peer}, replying to {target} advertising {advertised}:{}",
            self.advertised_port
        );

        let response = SearchResponse::new(Hpai::new(advertised, self.advertised_port));
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len = response.build(&mut buf)?;
        Ok(vec![Reply {
            target,
            frame: buf[..len].to_vec(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::FixedRouteProbe;
    use crate::protocol::constants::{
        SERVICE_CONNECTIONSTATE_REQUEST, SERVICE_CONNECTIONSTATE_RESPONSE, SERVICE_CONNECT_REQUEST,
        SERVICE_CONNECT_RESPONSE, SERVICE_DISCONNECT_REQUEST, SERVICE_DISCONNECT_RESPONSE,
        SERVICE_SEARCH_REQUEST, SERVICE_SEARCH_RESPONSE, SERVICE_TUNNELING_ACK,
        SERVICE_TUNNELING_REQUEST,
    };
    use crate::protocol::frame::build_frame;

    const ADVERTISED_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 250);
    const LISTEN_PORT: u16 = 3671;

    fn engine() -> GatewayEngine<FixedRouteProbe> {
        GatewayEngine::new(FixedRouteProbe(ADVERTISED_IP), LISTEN_PORT)
    }

    fn client() -> IpEndpoint {
        IpEndpoint::new(Ipv4Addr::new(10, 0, 0, 2), 50123)
    }

    /// NAT-style CONNECT_REQUEST: both HPAIs 0.0.0.0:0, link-layer CRI.
    fn connect_request() -> Vec<u8> {
        let mut body = [0u8; 20];
        body[0] = 0x08;
        body[1] = 0x01;
        body[8] = 0x08;
        body[9] = 0x01;
        body[16] = 0x04;
        body[17] = 0x04;
        body[18] = 0x02;
        build_frame(SERVICE_CONNECT_REQUEST, &body).unwrap()
    }

    fn tunneling_request(channel_id: u8, sequence: u8, cemi: &[u8]) -> Vec<u8> {
        let mut body = vec![0x04, channel_id, sequence, 0x00];
        body.extend_from_slice(cemi);
        build_frame(SERVICE_TUNNELING_REQUEST, &body).unwrap()
    }

    fn group_write_cemi() -> [u8; 11] {
        [0x11, 0x00, 0xBC, 0xE0, 0x11, 0x80, 0x0A, 0x04, 0x01, 0x00, 0x81]
    }

    fn group_read_cemi() -> [u8; 11] {
        [0x11, 0x00, 0xBC, 0xE0, 0x11, 0x80, 0x0A, 0x04, 0x01, 0x00, 0x00]
    }

    fn connect(engine: &mut GatewayEngine<FixedRouteProbe>, peer: IpEndpoint) -> u8 {
        let replies = engine.handle_datagram(&connect_request(), peer);
        let frame = KnxnetIpFrame::parse(&replies[0].frame).unwrap();
        frame.body()[0]
    }

    #[test]
    fn test_connect_grants_fresh_channels() {
        let mut engine = engine();

        let replies = engine.handle_datagram(&connect_request(), client());
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].target, client());

        let frame = KnxnetIpFrame::parse(&replies[0].frame).unwrap();
        assert_eq!(frame.service_type(), SERVICE_CONNECT_RESPONSE);
        let body = frame.body();
        assert_eq!(body[0], 1); // first channel
        assert_eq!(body[1], 0); // status OK
        assert_eq!(&body[2..10], &[0x08, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&body[10..14], &[0x04, 0x04, 0x02, 0x00]);

        // Each connect gets a strictly greater channel id
        let second = connect(&mut engine, client());
        assert_eq!(second, 2);
        assert_eq!(engine.session_count(), 2);
    }

    #[test]
    fn test_disconnect_closes_channel() {
        let mut engine = engine();
        let channel = connect(&mut engine, client());
        assert_eq!(engine.session_count(), 1);

        let request = build_frame(SERVICE_DISCONNECT_REQUEST, &[channel, 0x00]).unwrap();
        let replies = engine.handle_datagram(&request, client());

        let frame = KnxnetIpFrame::parse(&replies[0].frame).unwrap();
        assert_eq!(frame.service_type(), SERVICE_DISCONNECT_RESPONSE);
        assert_eq!(frame.body(), &[channel, 0]);
        assert_eq!(engine.session_count(), 0);
    }

    #[test]
    fn test_disconnect_unknown_channel_still_confirms() {
        let mut engine = engine();
        let request = build_frame(SERVICE_DISCONNECT_REQUEST, &[42, 0x00]).unwrap();
        let replies = engine.handle_datagram(&request, client());

        let frame = KnxnetIpFrame::parse(&replies[0].frame).unwrap();
        assert_eq!(frame.body(), &[42, 0]);
    }

    #[test]
    fn test_disconnect_short_body_dropped() {
        let mut engine = engine();
        let request = build_frame(SERVICE_DISCONNECT_REQUEST, &[1]).unwrap();
        assert!(engine.handle_datagram(&request, client()).is_empty());
    }

    #[test]
    fn test_connectionstate_ignores_liveness() {
        let mut engine = engine();
        let channel = connect(&mut engine, client());

        // Close the channel, then heartbeat it: status is still 0 because
        // no liveness check is performed.
        let disconnect = build_frame(SERVICE_DISCONNECT_REQUEST, &[channel, 0x00]).unwrap();
        engine.handle_datagram(&disconnect, client());

        let heartbeat = build_frame(SERVICE_CONNECTIONSTATE_REQUEST, &[channel, 0x00]).unwrap();
        let replies = engine.handle_datagram(&heartbeat, client());

        let frame = KnxnetIpFrame::parse(&replies[0].frame).unwrap();
        assert_eq!(frame.service_type(), SERVICE_CONNECTIONSTATE_RESPONSE);
        assert_eq!(frame.body(), &[channel, 0]);
    }

    #[test]
    fn test_group_write_is_acked_and_echoed() {
        let mut engine = engine();
        let channel = connect(&mut engine, client());

        let cemi = group_write_cemi();
        let request = tunneling_request(channel, 0, &cemi);
        let replies = engine.handle_datagram(&request, client());
        assert_eq!(replies.len(), 2);

        // First the ACK, echoing the client's connection header
        let ack = KnxnetIpFrame::parse(&replies[0].frame).unwrap();
        assert_eq!(ack.service_type(), SERVICE_TUNNELING_ACK);
        assert_eq!(ack.body(), &[0x04, channel, 0, 0x00, 0x00]);

        // Then the indication with the session's send sequence and the
        // identical cEMI bytes
        let indication = KnxnetIpFrame::parse(&replies[1].frame).unwrap();
        assert_eq!(indication.service_type(), SERVICE_TUNNELING_REQUEST);
        assert_eq!(replies[1].target, client());
        let body = indication.body();
        assert_eq!(&body[..4], &[0x04, channel, 0, 0x00]);
        assert_eq!(&body[4..], &cemi);
    }

    #[test]
    fn test_echo_sequence_advances() {
        let mut engine = engine();
        let channel = connect(&mut engine, client());

        for expected_seq in 0..3u8 {
            let request = tunneling_request(channel, expected_seq, &group_write_cemi());
            let replies = engine.handle_datagram(&request, client());
            let indication = KnxnetIpFrame::parse(&replies[1].frame).unwrap();
            assert_eq!(indication.body()[2], expected_seq);
        }
    }

    #[test]
    fn test_group_read_is_acked_only() {
        let mut engine = engine();
        let channel = connect(&mut engine, client());

        let request = tunneling_request(channel, 0, &group_read_cemi());
        let replies = engine.handle_datagram(&request, client());

        assert_eq!(replies.len(), 1);
        let ack = KnxnetIpFrame::parse(&replies[0].frame).unwrap();
        assert_eq!(ack.service_type(), SERVICE_TUNNELING_ACK);
    }

    #[test]
    fn test_ack_does_not_validate_sequence() {
        let mut engine = engine();
        let channel = connect(&mut engine, client());

        // Wildly out-of-order sequence is still acknowledged verbatim
        let request = tunneling_request(channel, 200, &group_read_cemi());
        let replies = engine.handle_datagram(&request, client());
        let ack = KnxnetIpFrame::parse(&replies[0].frame).unwrap();
        assert_eq!(ack.body()[2], 200);
    }

    #[test]
    fn test_write_without_session_skips_echo() {
        let mut engine = engine();

        // Channel 9 was never opened: the ACK still goes out, the echo
        // does not.
        let request = tunneling_request(9, 0, &group_write_cemi());
        let replies = engine.handle_datagram(&request, client());
        assert_eq!(replies.len(), 1);
    }

    #[test]
    fn test_truncated_cemi_is_acked_without_echo() {
        let mut engine = engine();
        let channel = connect(&mut engine, client());

        // 9-byte cEMI cannot be classified; treated as "not a write"
        let request = tunneling_request(channel, 0, &group_write_cemi()[..9]);
        let replies = engine.handle_datagram(&request, client());
        assert_eq!(replies.len(), 1);
    }

    #[test]
    fn test_search_replies_to_declared_hpai() {
        let mut engine = engine();

        let body = [0x08, 0x01, 192, 0, 2, 5, 0x9C, 0x40]; // 192.0.2.5:40000
        let request = build_frame(SERVICE_SEARCH_REQUEST, &body).unwrap();
        let replies = engine.handle_datagram(&request, client());

        assert_eq!(replies.len(), 1);
        assert_eq!(
            replies[0].target,
            IpEndpoint::new(Ipv4Addr::new(192, 0, 2, 5), 40000)
        );

        let frame = KnxnetIpFrame::parse(&replies[0].frame).unwrap();
        assert_eq!(frame.service_type(), SERVICE_SEARCH_RESPONSE);
        let hpai = Hpai::parse(frame.body()).unwrap();
        assert_eq!(hpai.address, ADVERTISED_IP);
        assert_eq!(hpai.port, LISTEN_PORT);
    }

    #[test]
    fn test_search_without_hpai_replies_to_source() {
        let mut engine = engine();

        let request = build_frame(SERVICE_SEARCH_REQUEST, &[]).unwrap();
        let replies = engine.handle_datagram(&request, client());
        assert_eq!(replies[0].target, client());
    }

    #[test]
    fn test_inbound_tunneling_ack_has_no_effect() {
        let mut engine = engine();
        let channel = connect(&mut engine, client());

        let ack = build_frame(SERVICE_TUNNELING_ACK, &[0x04, channel, 0, 0x00, 0x00]).unwrap();
        assert!(engine.handle_datagram(&ack, client()).is_empty());
        assert_eq!(engine.session_count(), 1);
    }

    #[test]
    fn test_unknown_service_dropped() {
        let mut engine = engine();

        // ROUTING_INDICATION is outside the simulator's scope
        let request = build_frame(0x0530, &[0x00, 0x00]).unwrap();
        assert!(engine.handle_datagram(&request, client()).is_empty());
    }

    #[test]
    fn test_malformed_datagrams_dropped() {
        let mut engine = engine();

        // Too short for a header
        assert!(engine.handle_datagram(&[0x06, 0x10], client()).is_empty());
        // Wrong protocol version
        let bad_version = [0x06, 0x20, 0x02, 0x05, 0x00, 0x06];
        assert!(engine.handle_datagram(&bad_version, client()).is_empty());
        // Declared length exceeds the datagram
        let truncated = [0x06, 0x10, 0x02, 0x05, 0x00, 0x20, 0x01];
        assert!(engine.handle_datagram(&truncated, client()).is_empty());
        assert_eq!(engine.session_count(), 0);
    }

    #[test]
    fn test_connect_refused_when_table_full() {
        let mut engine = engine();

        for _ in 0..crate::session::MAX_CHANNELS {
            connect(&mut engine, client());
        }

        let replies = engine.handle_datagram(&connect_request(), client());
        let frame = KnxnetIpFrame::parse(&replies[0].frame).unwrap();
        assert_eq!(frame.body()[1], E_NO_MORE_CONNECTIONS);
    }
}
