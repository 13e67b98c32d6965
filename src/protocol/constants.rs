//! KNXnet/IP protocol constants and service type identifiers.

/// KNXnet/IP protocol version 1.0
pub const KNXNETIP_VERSION_10: u8 = 0x10;

/// Standard KNXnet/IP header length (6 bytes)
pub const HEADER_SIZE_10: u8 = 0x06;

/// Standard UDP port for KNXnet/IP communication
pub const KNXNETIP_DEFAULT_PORT: u16 = 3671;

/// Maximum size of a KNXnet/IP frame
pub const MAX_FRAME_SIZE: usize = 256;

/// KNXnet/IP multicast group for discovery (224.0.23.12)
pub const KNXNETIP_MULTICAST_ADDR: [u8; 4] = [224, 0, 23, 12];

// =============================================================================
// Service Type Identifiers
// =============================================================================

/// Service type constant for `SEARCH_REQUEST` (0x0201)
pub const SERVICE_SEARCH_REQUEST: u16 = 0x0201;
/// Service type constant for `SEARCH_RESPONSE` (0x0202)
pub const SERVICE_SEARCH_RESPONSE: u16 = 0x0202;
/// Service type constant for `CONNECT_REQUEST` (0x0205)
pub const SERVICE_CONNECT_REQUEST: u16 = 0x0205;
/// Service type constant for `CONNECT_RESPONSE` (0x0206)
pub const SERVICE_CONNECT_RESPONSE: u16 = 0x0206;
/// Service type constant for `CONNECTIONSTATE_REQUEST` (0x0207)
pub const SERVICE_CONNECTIONSTATE_REQUEST: u16 = 0x0207;
/// Service type constant for `CONNECTIONSTATE_RESPONSE` (0x0208)
pub const SERVICE_CONNECTIONSTATE_RESPONSE: u16 = 0x0208;
/// Service type constant for `DISCONNECT_REQUEST` (0x0209)
pub const SERVICE_DISCONNECT_REQUEST: u16 = 0x0209;
/// Service type constant for `DISCONNECT_RESPONSE` (0x020A)
pub const SERVICE_DISCONNECT_RESPONSE: u16 = 0x020A;
/// Service type constant for `TUNNELING_REQUEST` / `TUNNELING_INDICATION`
/// (0x0420, direction-dependent)
pub const SERVICE_TUNNELING_REQUEST: u16 = 0x0420;
/// Service type constant for `TUNNELING_ACK` (0x0421)
pub const SERVICE_TUNNELING_ACK: u16 = 0x0421;

/// KNXnet/IP service types handled by the simulator.
///
/// Inbound datagrams carrying any other service type identifier are
/// logged and dropped by the dispatcher, so only the serviced subset is
/// enumerated here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ServiceType {
    /// `SEARCH_REQUEST` - Device discovery request
    SearchRequest = 0x0201,
    /// `SEARCH_RESPONSE` - Device discovery response
    SearchResponse = 0x0202,
    /// `CONNECT_REQUEST` - Connection request
    ConnectRequest = 0x0205,
    /// `CONNECT_RESPONSE` - Connection response
    ConnectResponse = 0x0206,
    /// `CONNECTIONSTATE_REQUEST` - Connection state request (heartbeat)
    ConnectionstateRequest = 0x0207,
    /// `CONNECTIONSTATE_RESPONSE` - Connection state response
    ConnectionstateResponse = 0x0208,
    /// `DISCONNECT_REQUEST` - Disconnect request
    DisconnectRequest = 0x0209,
    /// `DISCONNECT_RESPONSE` - Disconnect response
    DisconnectResponse = 0x020A,
    /// `TUNNELING_REQUEST` - Tunneling data request / indication
    TunnelingRequest = 0x0420,
    /// `TUNNELING_ACK` - Tunneling acknowledgement
    TunnelingAck = 0x0421,
}

impl ServiceType {
    /// Convert a u16 to `ServiceType`
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0201 => Some(Self::SearchRequest),
            0x0202 => Some(Self::SearchResponse),
            0x0205 => Some(Self::ConnectRequest),
            0x0206 => Some(Self::ConnectResponse),
            0x0207 => Some(Self::ConnectionstateRequest),
            0x0208 => Some(Self::ConnectionstateResponse),
            0x0209 => Some(Self::DisconnectRequest),
            0x020A => Some(Self::DisconnectResponse),
            0x0420 => Some(Self::TunnelingRequest),
            0x0421 => Some(Self::TunnelingAck),
            _ => None,
        }
    }

    /// Convert `ServiceType` to u16
    pub const fn to_u16(self) -> u16 {
        self as u16
    }
}

// =============================================================================
// Connection Type Codes
// =============================================================================

/// Connection type for `TUNNEL_CONNECTION`
pub const TUNNEL_CONNECTION: u8 = 0x04;

/// KNX layer for `TUNNEL_LINKLAYER`
pub const TUNNEL_LINKLAYER: u8 = 0x02;

// =============================================================================
// Host Protocol Codes
// =============================================================================

/// IPv4 UDP protocol
pub const IPV4_UDP: u8 = 0x01;

// =============================================================================
// Error Codes
// =============================================================================

/// Error code for successful operation
pub const E_NO_ERROR: u8 = 0x00;

/// Error code for no more connections available
pub const E_NO_MORE_CONNECTIONS: u8 = 0x24;

// =============================================================================
// cEMI Message Codes
// =============================================================================

/// cEMI Message Codes seen on the tunneling data path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CemiMessageCode {
    /// `L_Data.req` - Data request (client to bus)
    LDataReq = 0x11,
    /// `L_Data.ind` - Data indication (bus to client)
    LDataInd = 0x29,
    /// `L_Data.con` - Data confirmation
    LDataCon = 0x2E,
}

impl CemiMessageCode {
    /// Convert u8 to `CemiMessageCode`
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x11 => Some(Self::LDataReq),
            0x29 => Some(Self::LDataInd),
            0x2E => Some(Self::LDataCon),
            _ => None,
        }
    }

    /// Convert `CemiMessageCode` to u8
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}
