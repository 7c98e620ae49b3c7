use mesh_protocol::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("empty midi message")]
    EmptyMessage,

    #[error("remote dispatch to {0} failed: {1}")]
    RemoteDispatchFailed(NodeId, String),
}
