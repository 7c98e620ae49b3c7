use mesh_protocol::{NodeId, Packet};

use crate::error::RouterError;

/// Capability seam between the router engine and whatever owns live
/// connections to peers (`mesh-connect`'s `NetworkConnection`/`MeshManager`,
/// which depends on this crate rather than the reverse). The engine builds
/// the packet and picks RT vs. NRT; this trait is only responsible for
/// getting the packet onto the wire for `dest_node`.
pub trait RemoteLink: Send + Sync {
    /// Best-effort, UDP-transport send for a real-time message.
    fn send_realtime(&self, dest_node: NodeId, packet: Packet) -> Result<(), RouterError>;

    /// ACK/NACK-tracked send via the reliable layer for a non-real-time
    /// message.
    fn send_reliable(&self, dest_node: NodeId, packet: Packet) -> Result<(), RouterError>;
}
