//! KNXnet/IP frame parsing and encoding.
//!
//! Zero-copy parsing and building of KNXnet/IP frames: the 6-byte header,
//! total-length validation, and the fixed 8-byte HPAI endpoint descriptor.
//!
//! ## Frame Structure
//!
//! All KNXnet/IP frames follow this structure:
//!
//! ```text
//! ┌─────────────────────────────┐
//! │  Header (6 bytes)           │
//! │  - Header Length: 0x06      │
//! │  - Protocol Version: 0x10   │
//! │  - Service Type: 2 bytes    │
//! │  - Total Length: 2 bytes    │
//! ├─────────────────────────────┤
//! │  Body (variable)            │
//! │  - Service-specific data    │
//! └─────────────────────────────┘
//! ```
//!
//! The header keeps the service type as a raw `u16`: datagrams carrying an
//! unknown service type are valid frames that the dispatcher logs and
//! drops, so recognising the service is not the codec's job.

use crate::error::{GatewayError, Result};
use crate::net::{IpEndpoint, Ipv4Addr};
use crate::protocol::constants::{HEADER_SIZE_10, IPV4_UDP, KNXNETIP_VERSION_10, MAX_FRAME_SIZE};

/// KNXnet/IP frame header (6 bytes)
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Header Len   │ Protocol Ver │  Service Type ID    │
/// │   (1 byte)   │   (1 byte)   │     (2 bytes)       │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │           Total Length (2 bytes)                   │
/// └────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy)]
pub struct KnxnetIpHeader {
    /// Header length (always 0x06)
    pub header_length: u8,
    /// Protocol version (always 0x10 for v1.0)
    pub protocol_version: u8,
    /// Raw service type identifier
    pub service_type: u16,
    /// Total length of frame (header + body)
    pub total_length: u16,
}

impl KnxnetIpHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 6;

    /// Create a new header
    pub const fn new(service_type: u16, body_length: u16) -> Self {
        Self {
            header_length: HEADER_SIZE_10,
            protocol_version: KNXNETIP_VERSION_10,
            service_type,
            total_length: Self::SIZE as u16 + body_length,
        }
    }

    /// Parse a header from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns a malformed-header error if the buffer holds fewer than six
    /// bytes or the header length byte is wrong, and an
    /// unsupported-version error if the version byte is not 0x10.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(GatewayError::malformed_header());
        }

        let header_length = data[0];
        let protocol_version = data[1];
        let service_type = u16::from_be_bytes([data[2], data[3]]);
        let total_length = u16::from_be_bytes([data[4], data[5]]);

        if header_length != HEADER_SIZE_10 {
            return Err(GatewayError::malformed_header());
        }

        if protocol_version != KNXNETIP_VERSION_10 {
            return Err(GatewayError::unsupported_version());
        }

        Ok(Self {
            header_length,
            protocol_version,
            service_type,
            total_length,
        })
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(GatewayError::buffer_too_small());
        }

        buf[0] = self.header_length;
        buf[1] = self.protocol_version;
        buf[2..4].copy_from_slice(&self.service_type.to_be_bytes());
        buf[4..6].copy_from_slice(&self.total_length.to_be_bytes());

        Ok(Self::SIZE)
    }

    /// Get the expected body length from the header
    pub const fn body_length(&self) -> u16 {
        self.total_length.saturating_sub(Self::SIZE as u16)
    }
}

/// Zero-copy view of a KNXnet/IP frame.
///
/// References the underlying datagram directly, bounded by the declared
/// total length. Datagrams padded beyond `total_length` are accepted and
/// the excess bytes ignored; they are never interpreted as a second frame.
#[derive(Debug)]
pub struct KnxnetIpFrame<'a> {
    /// Reference to the datagram
    data: &'a [u8],
    /// Parsed header
    header: KnxnetIpHeader,
}

impl<'a> KnxnetIpFrame<'a> {
    /// Parse a KNXnet/IP frame from a received datagram.
    ///
    /// # Errors
    ///
    /// Header errors as in [`KnxnetIpHeader::parse`], plus a
    /// truncated-body error if the declared total length exceeds the
    /// number of bytes actually received. A frame failing any of these
    /// checks is rejected whole, never partially processed.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = KnxnetIpHeader::parse(data)?;

        if (header.total_length as usize) < KnxnetIpHeader::SIZE
            || data.len() < header.total_length as usize
        {
            return Err(GatewayError::truncated_body());
        }

        Ok(Self { data, header })
    }

    /// Get the frame header
    pub const fn header(&self) -> &KnxnetIpHeader {
        &self.header
    }

    /// Get the raw service type for routing decisions
    pub const fn service_type(&self) -> u16 {
        self.header.service_type
    }

    /// Get the frame body (payload between header and declared end)
    pub fn body(&self) -> &'a [u8] {
        &self.data[KnxnetIpHeader::SIZE..self.header.total_length as usize]
    }
}

/// Builder for creating KNXnet/IP frames.
#[derive(Debug)]
pub struct FrameBuilder<'a> {
    service_type: u16,
    body: &'a [u8],
}

impl<'a> FrameBuilder<'a> {
    /// Create a new frame builder
    pub const fn new(service_type: u16, body: &'a [u8]) -> Self {
        Self { service_type, body }
    }

    /// Build the frame into a buffer.
    ///
    /// Returns the number of bytes written.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let total_size = KnxnetIpHeader::SIZE + self.body.len();

        if total_size > MAX_FRAME_SIZE {
            return Err(GatewayError::payload_too_large());
        }

        if buf.len() < total_size {
            return Err(GatewayError::buffer_too_small());
        }

        let header = KnxnetIpHeader::new(self.service_type, self.body.len() as u16);
        header.encode(buf)?;
        buf[KnxnetIpHeader::SIZE..total_size].copy_from_slice(self.body);

        Ok(total_size)
    }

    /// Calculate the total frame size
    pub const fn size(&self) -> usize {
        KnxnetIpHeader::SIZE + self.body.len()
    }
}

/// Build a complete frame as an owned buffer.
///
/// Convenience for the reply path, where frames are handed to the socket
/// and dropped.
pub fn build_frame(service_type: u16, body: &[u8]) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; KnxnetIpHeader::SIZE + body.len()];
    let len = FrameBuilder::new(service_type, body).build(&mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

/// Host Protocol Address Information (HPAI)
///
/// Endpoint descriptor (IP address and port), always exactly 8 bytes on
/// the wire for IPv4/UDP.
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Structure Len│ Host Protocol│   IP Address        │
/// │   (1 byte)   │   (1 byte)   │   (4 bytes IPv4)    │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │                Port (2 bytes)                      │
/// └────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hpai {
    /// IPv4 address
    pub address: Ipv4Addr,
    /// UDP port
    pub port: u16,
}

impl Hpai {
    /// Size of HPAI structure for IPv4
    pub const SIZE: usize = 8;

    /// Create a new HPAI for IPv4 UDP
    pub const fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    /// Parse an HPAI from an HPAI-sized slice.
    ///
    /// Returns `None` unless the first two bytes are exactly `8, 1`
    /// (structure length and IPv4/UDP protocol code). Callers must pass a
    /// slice positioned at the HPAI, never scan a larger buffer for a
    /// matching byte pair: the pair occurs freely inside address and port
    /// fields.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }

        if data[0] != Self::SIZE as u8 || data[1] != IPV4_UDP {
            return None;
        }

        let address = Ipv4Addr::new(data[2], data[3], data[4], data[5]);
        let port = u16::from_be_bytes([data[6], data[7]]);

        Some(Self { address, port })
    }

    /// Encode the HPAI into a buffer
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(GatewayError::buffer_too_small());
        }

        buf[0] = Self::SIZE as u8;
        buf[1] = IPV4_UDP;
        buf[2..6].copy_from_slice(&self.address.octets());
        buf[6..8].copy_from_slice(&self.port.to_be_bytes());

        Ok(Self::SIZE)
    }

    /// The endpoint this HPAI describes
    pub const fn endpoint(&self) -> IpEndpoint {
        IpEndpoint::new(self.address, self.port)
    }
}
