//! KNXnet/IP service frame builders and parsers, gateway side.
//!
//! The simulator sits on the gateway end of the tunnel: it parses the
//! request bodies a client sends and builds the response frames a real
//! gateway would return. All builders write complete frames (header
//! included) into caller buffers; all parsers take the frame body, i.e.
//! the bytes after the 6-byte header.
//!
//! ## Protocol Flow
//!
//! ```text
//! Client                          Simulator
//!   |                                |
//!   |------- CONNECT_REQUEST ------->|
//!   |<------ CONNECT_RESPONSE -------|
//!   |                                |
//!   |------ TUNNELING_REQUEST ------>|
//!   |<------ TUNNELING_ACK ----------|
//!   |<--- TUNNELING_INDICATION ------|  (group writes echo back)
//!   |                                |
//!   |--- CONNECTIONSTATE_REQUEST --->|
//!   |<-- CONNECTIONSTATE_RESPONSE ---|
//!   |                                |
//!   |------ DISCONNECT_REQUEST ----->|
//!   |<----- DISCONNECT_RESPONSE -----|
//! ```

use crate::error::{GatewayError, Result};
use crate::net::Ipv4Addr;
use crate::protocol::constants::{
    SERVICE_CONNECTIONSTATE_RESPONSE, SERVICE_CONNECT_RESPONSE, SERVICE_DISCONNECT_RESPONSE,
    SERVICE_SEARCH_RESPONSE, SERVICE_TUNNELING_ACK, SERVICE_TUNNELING_REQUEST, TUNNEL_CONNECTION,
    TUNNEL_LINKLAYER,
};
use crate::protocol::frame::{FrameBuilder, Hpai, KnxnetIpHeader};

/// Connection header prefixed to tunneling bodies (4 bytes)
///
/// ```text
/// length=0x04, channel_id, sequence, reserved=0x00
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHeader {
    /// Communication channel ID
    pub channel_id: u8,
    /// Sequence counter
    pub sequence: u8,
}

impl ConnectionHeader {
    /// Size of the connection header in bytes
    pub const SIZE: usize = 4;

    /// Create a new connection header
    pub const fn new(channel_id: u8, sequence: u8) -> Self {
        Self {
            channel_id,
            sequence,
        }
    }

    /// Encode to bytes
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(GatewayError::buffer_too_small());
        }

        buf[0] = Self::SIZE as u8;
        buf[1] = self.channel_id;
        buf[2] = self.sequence;
        buf[3] = 0x00;

        Ok(Self::SIZE)
    }

    /// Decode from bytes. Returns `None` on fewer than four bytes.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }

        Some(Self {
            channel_id: data[1],
            sequence: data[2],
        })
    }
}

/// Parsed `CONNECT_REQUEST` body (0x0205).
///
/// The simulator accepts every connection request, so parsing is lenient:
/// endpoints the client did not supply are simply absent.
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest {
    /// Control endpoint declared by the client
    pub control_endpoint: Option<Hpai>,
    /// Data endpoint declared by the client
    pub data_endpoint: Option<Hpai>,
}

impl ConnectRequest {
    /// Parse from a frame body. Never fails; missing or malformed
    /// endpoint blocks parse as `None`.
    pub fn parse(body: &[u8]) -> Self {
        let control_endpoint = body.get(..Hpai::SIZE).and_then(Hpai::parse);
        let data_endpoint = body.get(Hpai::SIZE..2 * Hpai::SIZE).and_then(Hpai::parse);

        Self {
            control_endpoint,
            data_endpoint,
        }
    }
}

/// `CONNECT_RESPONSE` service (0x0206)
#[derive(Debug, Clone, Copy)]
pub struct ConnectResponse {
    /// Assigned communication channel ID
    pub channel_id: u8,
    /// Status code (0 = OK)
    pub status: u8,
}

impl ConnectResponse {
    /// Body length: channel + status + HPAI + CRD
    const BODY_SIZE: usize = 2 + Hpai::SIZE + 4;

    /// Create a new `CONNECT_RESPONSE`
    pub const fn new(channel_id: u8, status: u8) -> Self {
        Self { channel_id, status }
    }

    /// Build the complete frame.
    ///
    /// The control endpoint is advertised as 0.0.0.0:0 so NAT-ed clients
    /// keep talking to whatever address the request reached; the CRD
    /// declares a link-layer tunnel connection.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut body = [0u8; Self::BODY_SIZE];
        body[0] = self.channel_id;
        body[1] = self.status;

        let hpai = Hpai::new(Ipv4Addr::UNSPECIFIED, 0);
        hpai.encode(&mut body[2..])?;

        // CRD: length, connection type, KNX layer, reserved
        body[10] = 4;
        body[11] = TUNNEL_CONNECTION;
        body[12] = TUNNEL_LINKLAYER;
        body[13] = 0x00;

        FrameBuilder::new(SERVICE_CONNECT_RESPONSE, &body).build(buf)
    }

    /// Parse from a frame body
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 {
            return Err(GatewayError::truncated_body());
        }

        Ok(Self {
            channel_id: body[0],
            status: body[1],
        })
    }

    /// Check if the connection was granted
    pub const fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// Parsed body shared by `CONNECTIONSTATE_REQUEST` and
/// `DISCONNECT_REQUEST`: channel id, reserved byte, then the client's
/// control HPAI (which the simulator ignores, replying to the datagram
/// source instead).
#[derive(Debug, Clone, Copy)]
pub struct ChannelRequest {
    /// Communication channel ID
    pub channel_id: u8,
}

impl ChannelRequest {
    /// Parse from a frame body. Returns `None` on fewer than two bytes.
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < 2 {
            return None;
        }

        Some(Self {
            channel_id: body[0],
        })
    }
}

/// Channel-scoped status response body shared by
/// `CONNECTIONSTATE_RESPONSE` (0x0208) and `DISCONNECT_RESPONSE` (0x020A).
#[derive(Debug, Clone, Copy)]
pub struct ChannelResponse {
    /// Communication channel ID
    pub channel_id: u8,
    /// Status code (0 = OK)
    pub status: u8,
}

impl ChannelResponse {
    /// Create a new channel response body
    pub const fn new(channel_id: u8, status: u8) -> Self {
        Self { channel_id, status }
    }

    /// Build a complete `CONNECTIONSTATE_RESPONSE` frame
    pub fn build_connectionstate(&self, buf: &mut [u8]) -> Result<usize> {
        self.build(SERVICE_CONNECTIONSTATE_RESPONSE, buf)
    }

    /// Build a complete `DISCONNECT_RESPONSE` frame
    pub fn build_disconnect(&self, buf: &mut [u8]) -> Result<usize> {
        self.build(SERVICE_DISCONNECT_RESPONSE, buf)
    }

    fn build(&self, service_type: u16, buf: &mut [u8]) -> Result<usize> {
        let body = [self.channel_id, self.status];
        FrameBuilder::new(service_type, &body).build(buf)
    }

    /// Parse from a frame body
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 {
            return Err(GatewayError::truncated_body());
        }

        Ok(Self {
            channel_id: body[0],
            status: body[1],
        })
    }

    /// Check if the operation succeeded
    pub const fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// `TUNNELING_REQUEST` service (0x0420), parsed inbound and built
/// outbound: the same service code carries client requests and the bus
/// indications the simulator emits for echoed group writes.
#[derive(Debug)]
pub struct TunnelingRequest<'a> {
    /// Connection header
    pub connection_header: ConnectionHeader,
    /// cEMI frame data
    pub cemi: &'a [u8],
}

impl<'a> TunnelingRequest<'a> {
    /// Create a new tunneling request / indication
    pub const fn new(connection_header: ConnectionHeader, cemi: &'a [u8]) -> Self {
        Self {
            connection_header,
            cemi,
        }
    }

    /// Parse from a frame body. Returns `None` on fewer than four bytes.
    pub fn parse(body: &'a [u8]) -> Option<Self> {
        let connection_header = ConnectionHeader::decode(body)?;

        Some(Self {
            connection_header,
            cemi: &body[ConnectionHeader::SIZE..],
        })
    }

    /// Build the complete frame
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let total = KnxnetIpHeader::SIZE + ConnectionHeader::SIZE + self.cemi.len();
        if buf.len() < total {
            return Err(GatewayError::buffer_too_small());
        }

        let mut body = vec![0u8; ConnectionHeader::SIZE + self.cemi.len()];
        self.connection_header.encode(&mut body)?;
        body[ConnectionHeader::SIZE..].copy_from_slice(self.cemi);

        FrameBuilder::new(SERVICE_TUNNELING_REQUEST, &body).build(buf)
    }
}

/// `TUNNELING_ACK` service (0x0421)
#[derive(Debug, Clone, Copy)]
pub struct TunnelingAck {
    /// Connection header (echoed from the request)
    pub connection_header: ConnectionHeader,
    /// Status code (0 = OK)
    pub status: u8,
}

impl TunnelingAck {
    /// Create a new `TUNNELING_ACK`
    pub const fn new(connection_header: ConnectionHeader, status: u8) -> Self {
        Self {
            connection_header,
            status,
        }
    }

    /// Build the complete frame
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut body = [0u8; ConnectionHeader::SIZE + 1];
        self.connection_header.encode(&mut body)?;
        body[ConnectionHeader::SIZE] = self.status;

        FrameBuilder::new(SERVICE_TUNNELING_ACK, &body).build(buf)
    }

    /// Parse from a frame body
    pub fn parse(body: &[u8]) -> Result<Self> {
        let connection_header =
            ConnectionHeader::decode(body).ok_or_else(GatewayError::truncated_body)?;
        let status = *body
            .get(ConnectionHeader::SIZE)
            .ok_or_else(GatewayError::truncated_body)?;

        Ok(Self {
            connection_header,
            status,
        })
    }

    /// Check if the request was acknowledged successfully
    pub const fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// `SEARCH_RESPONSE` service (0x0202), carrying the HPAI of the
/// discovered gateway's control endpoint.
#[derive(Debug, Clone, Copy)]
pub struct SearchResponse {
    /// Endpoint being advertised
    pub endpoint: Hpai,
}

impl SearchResponse {
    /// Create a new `SEARCH_RESPONSE`
    pub const fn new(endpoint: Hpai) -> Self {
        Self { endpoint }
    }

    /// Build the complete frame
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut body = [0u8; Hpai::SIZE];
        self.endpoint.encode(&mut body)?;

        FrameBuilder::new(SERVICE_SEARCH_RESPONSE, &body).build(buf)
    }

    /// Parse from a frame body: the HPAI sits at a fixed offset (the
    /// start of the body), bounded by the frame's declared length —
    /// never located by scanning for a matching byte pair.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let endpoint = body.get(..Hpai::SIZE).and_then(Hpai::parse)?;
        Some(Self { endpoint })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::KnxnetIpFrame;

    #[test]
    fn test_connection_header_round_trip() {
        let header = ConnectionHeader::new(5, 10);
        let mut buf = [0u8; 4];
        let len = header.encode(&mut buf).unwrap();

        assert_eq!(len, 4);
        assert_eq!(buf, [0x04, 5, 10, 0x00]);

        let decoded = ConnectionHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_connection_header_short() {
        assert!(ConnectionHeader::decode(&[0x04, 1, 0]).is_none());
    }

    #[test]
    fn test_connect_request_parse() {
        // NAT-style request: both endpoints 0.0.0.0:0
        let mut body = [0u8; 20];
        body[0] = 0x08;
        body[1] = 0x01;
        body[8] = 0x08;
        body[9] = 0x01;
        body[16] = 0x04;
        body[17] = TUNNEL_CONNECTION;
        body[18] = TUNNEL_LINKLAYER;

        let req = ConnectRequest::parse(&body);
        let control = req.control_endpoint.unwrap();
        assert!(control.address.is_unspecified());
        assert_eq!(control.port, 0);
        assert!(req.data_endpoint.is_some());
    }

    #[test]
    fn test_connect_request_parse_empty_body() {
        let req = ConnectRequest::parse(&[]);
        assert!(req.control_endpoint.is_none());
        assert!(req.data_endpoint.is_none());
    }

    #[test]
    fn test_connect_response_layout() {
        let resp = ConnectResponse::new(1, 0);
        let mut buf = [0u8; 32];
        let len = resp.build(&mut buf).unwrap();

        assert_eq!(len, 20);
        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        assert_eq!(frame.service_type(), SERVICE_CONNECT_RESPONSE);

        let body = frame.body();
        assert_eq!(body[0], 1); // channel
        assert_eq!(body[1], 0); // status
        assert_eq!(&body[2..10], &[0x08, 0x01, 0, 0, 0, 0, 0, 0]); // HPAI 0.0.0.0:0
        assert_eq!(&body[10..14], &[0x04, 0x04, 0x02, 0x00]); // CRD

        let parsed = ConnectResponse::parse(body).unwrap();
        assert_eq!(parsed.channel_id, 1);
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_channel_request_parse() {
        assert!(ChannelRequest::parse(&[7]).is_none());
        let req = ChannelRequest::parse(&[7, 0]).unwrap();
        assert_eq!(req.channel_id, 7);
    }

    #[test]
    fn test_channel_response_build() {
        let resp = ChannelResponse::new(3, 0);
        let mut buf = [0u8; 16];

        let len = resp.build_disconnect(&mut buf).unwrap();
        assert_eq!(len, 8);
        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        assert_eq!(frame.service_type(), SERVICE_DISCONNECT_RESPONSE);
        assert_eq!(frame.body(), &[3, 0]);

        let len = resp.build_connectionstate(&mut buf).unwrap();
        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        assert_eq!(frame.service_type(), SERVICE_CONNECTIONSTATE_RESPONSE);
        assert!(ChannelResponse::parse(frame.body()).unwrap().is_ok());
    }

    #[test]
    fn test_tunneling_request_round_trip() {
        let cemi = [0x29u8, 0x00, 0xBC, 0xE0, 0x11, 0x80, 0x0A, 0x04, 0x01, 0x00, 0x81];
        let req = TunnelingRequest::new(ConnectionHeader::new(1, 0), &cemi);

        let mut buf = [0u8; 64];
        let len = req.build(&mut buf).unwrap();
        assert_eq!(len, 6 + 4 + cemi.len());

        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        assert_eq!(frame.service_type(), SERVICE_TUNNELING_REQUEST);

        let parsed = TunnelingRequest::parse(frame.body()).unwrap();
        assert_eq!(parsed.connection_header.channel_id, 1);
        assert_eq!(parsed.connection_header.sequence, 0);
        assert_eq!(parsed.cemi, &cemi);
    }

    #[test]
    fn test_tunneling_request_parse_short() {
        assert!(TunnelingRequest::parse(&[0x04, 1, 0]).is_none());
    }

    #[test]
    fn test_tunneling_ack_layout() {
        let ack = TunnelingAck::new(ConnectionHeader::new(3, 15), 0);

        let mut buf = [0u8; 16];
        let len = ack.build(&mut buf).unwrap();
        assert_eq!(len, 11);

        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        assert_eq!(frame.service_type(), SERVICE_TUNNELING_ACK);
        assert_eq!(frame.body(), &[0x04, 3, 15, 0x00, 0x00]);

        let parsed = TunnelingAck::parse(frame.body()).unwrap();
        assert_eq!(parsed.connection_header.sequence, 15);
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_search_response_round_trip() {
        let resp = SearchResponse::new(Hpai::new(Ipv4Addr::new(192, 168, 1, 250), 3671));
        let mut buf = [0u8; 16];
        let len = resp.build(&mut buf).unwrap();
        assert_eq!(len, 14);

        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        assert_eq!(frame.service_type(), SERVICE_SEARCH_RESPONSE);

        let parsed = SearchResponse::parse(frame.body()).unwrap();
        assert_eq!(parsed.endpoint.address.octets(), [192, 168, 1, 250]);
        assert_eq!(parsed.endpoint.port, 3671);
    }
}
