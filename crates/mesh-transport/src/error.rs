use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed { addr: SocketAddr, #[source] source: std::io::Error },

    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),

    #[error("max retries exceeded")]
    MaxRetriesExceeded,

    #[error("cancelled")]
    Cancelled,

    #[error("packet codec error: {0}")]
    Codec(#[from] mesh_protocol::CodecError),
}
