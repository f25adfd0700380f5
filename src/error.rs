use std::io;
use thiserror::Error;
use tokio::time::error::Elapsed;

/// Failures talking to the ingest endpoint.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Ingest disconnected: {0}")]
    Disconnected(#[from] io::Error),

    #[error("Ingest timeout")]
    Timeout(#[from] Elapsed),

    #[error("Ingest closed the connection")]
    ConnectionClosed,

    #[error("RTMP handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("RTMP protocol error: {0}")]
    Protocol(String),

    #[error("RTMP request was not accepted: {0}")]
    RequestRejected(String),

    #[error("Invalid ingest url: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Whether reconnecting may help. Rejections and bad urls stay rejected.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Disconnected(_)
                | TransportError::Timeout(_)
                | TransportError::ConnectionClosed
                | TransportError::HandshakeFailed(_)
        )
    }
}
