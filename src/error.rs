//! Error types for the gateway simulator.
//!
//! Structured error types with backtraces and helper methods for error
//! classification. There is no fatal error class in this crate: the server
//! loop degrades every per-datagram failure to "log and continue", matching
//! UDP's best-effort delivery model.

use core::fmt;
use std::backtrace::Backtrace;

/// Result type alias for simulator operations.
pub type Result<T> = core::result::Result<T, GatewayError>;

// =============================================================================
// Error Kind Enums (Internal)
// =============================================================================

/// Protocol error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProtocolErrorKind {
    /// Datagram shorter than a header, or bad header length byte
    MalformedHeader,
    /// Protocol version byte is not 0x10
    UnsupportedVersion,
    /// Declared total length exceeds the received datagram
    TruncatedBody,
    /// Output buffer too small for the frame being built
    BufferTooSmall,
    /// Frame body larger than the maximum frame size
    PayloadTooLarge,
    /// KNX address component out of range
    InvalidAddress,
}

/// Transport error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportErrorKind {
    SendFailed,
    ReceiveFailed,
}

// =============================================================================
// Main Error Type
// =============================================================================

/// Gateway simulator error type.
///
/// This is the main error type returned by codec and engine operations.
/// It carries a backtrace and detailed error information through helper
/// methods.
#[derive(Debug)]
pub enum GatewayError {
    /// Protocol-related errors (frame parsing, version, lengths)
    Protocol(ProtocolError),
    /// Transport-related errors (send, receive, socket)
    Transport(TransportError),
}

/// Protocol error with backtrace
#[derive(Debug)]
pub struct ProtocolError {
    kind: ProtocolErrorKind,
    backtrace: Backtrace,
}

impl ProtocolError {
    pub(crate) fn new(kind: ProtocolErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if this is a malformed header error
    pub fn is_malformed_header(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::MalformedHeader)
    }

    /// Check if this is an unsupported version error
    pub fn is_unsupported_version(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::UnsupportedVersion)
    }

    /// Check if this is a truncated body error
    pub fn is_truncated_body(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::TruncatedBody)
    }

    /// Backtrace captured at the error site
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

/// Transport error with backtrace
#[derive(Debug)]
pub struct TransportError {
    kind: TransportErrorKind,
    backtrace: Backtrace,
}

impl TransportError {
    pub(crate) fn new(kind: TransportErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if this is a send failure
    pub fn is_send_failed(&self) -> bool {
        matches!(self.kind, TransportErrorKind::SendFailed)
    }

    /// Backtrace captured at the error site
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

// =============================================================================
// Convenience Constructors for GatewayError
// =============================================================================

impl GatewayError {
    // Protocol errors
    pub(crate) fn malformed_header() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::MalformedHeader))
    }

    pub(crate) fn unsupported_version() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnsupportedVersion))
    }

    pub(crate) fn truncated_body() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::TruncatedBody))
    }

    pub(crate) fn buffer_too_small() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::BufferTooSmall))
    }

    pub(crate) fn payload_too_large() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::PayloadTooLarge))
    }

    pub(crate) fn invalid_address() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidAddress))
    }

    // Transport errors
    pub(crate) fn send_failed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::SendFailed))
    }

    pub(crate) fn receive_failed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::ReceiveFailed))
    }
}

// =============================================================================
// Display Implementation
// =============================================================================

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Protocol(e) => write!(f, "Protocol error: {:?}", e.kind),
            GatewayError::Transport(e) => write!(f, "Transport error: {:?}", e.kind),
        }
    }
}

impl std::error::Error for GatewayError {}
