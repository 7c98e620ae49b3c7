use tokio::sync::oneshot;

use mesh_protocol::Packet;
use mesh_routing::Route;

/// FIFO commands processed one at a time by a
/// [`crate::connection::NetworkConnection`] worker task.
/// `Connect`/`Disconnect`/`CheckHeartbeat`/`NotifyHeartbeat`/
/// `SendHeartbeat`/`SendReliable`/`SetDevices`/`Shutdown` are
/// fire-and-forget; `GetDevices` carries a one-shot reply channel and
/// stands in for the original design's blocking synchronous query.
pub enum Command {
    /// Open the reliable-layer socket and transition to `Connecting`.
    Connect,
    /// Tear the connection down and transition to `Disconnected`.
    Disconnect,
    /// Heartbeat tick: if too long has passed since the last inbound
    /// heartbeat, bump the miss counter (and fail the connection past the
    /// threshold).
    CheckHeartbeat,
    /// An inbound heartbeat or data packet arrived: reset the miss counter.
    NotifyHeartbeat,
    /// Send an outbound heartbeat packet to the peer.
    SendHeartbeat,
    /// Send a non-real-time packet via the reliable layer.
    SendReliable(Packet),
    /// Replace the set of devices this peer currently advertises.
    SetDevices(Vec<Route>),
    GetDevices(oneshot::Sender<Vec<Route>>),
    Shutdown,
}
