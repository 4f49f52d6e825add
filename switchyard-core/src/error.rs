/// Switchyard transport error types.
///
/// Covers socket, framing and channel failures in the transport kernel.
use std::io;
use thiserror::Error;

/// Main error type for transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid frame format on the wire
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame exceeds the configured size cap
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Socket closed
    #[error("Socket closed")]
    SocketClosed,

    /// Channel send error
    #[error("Channel send error")]
    ChannelSend,

    /// Channel receive error
    #[error("Channel receive error")]
    ChannelRecv,

    /// Peer disconnected
    #[error("Peer disconnected: {0}")]
    PeerDisconnected(String),

    /// Endpoint already bound
    #[error("Endpoint already bound: {0}")]
    AddrInUse(String),

    /// Endpoint not bound
    #[error("Endpoint not found: {0}")]
    AddrNotFound(String),
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create an invalid frame error with a message
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create a peer disconnected error
    pub fn peer_disconnected(peer_id: impl Into<String>) -> Self {
        Self::PeerDisconnected(peer_id.into())
    }

    /// Check if this is a connection error
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::SocketClosed | Self::PeerDisconnected(_) | Self::ChannelSend | Self::ChannelRecv
        )
    }
}
