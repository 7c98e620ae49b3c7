use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("transport error: {0}")]
    Transport(#[from] mesh_transport::TransportError),

    #[error("connection worker is no longer running")]
    WorkerGone,
}
