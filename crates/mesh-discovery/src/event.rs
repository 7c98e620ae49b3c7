use mesh_protocol::NodeId;

use crate::node_info::NodeInfo;

/// Unified discovery event, published identically regardless of whether a
/// peer was found via mDNS or the UDP multicast fallback: consumers are
/// discovery-source-agnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Discovered(NodeInfo),
    Removed(NodeId),
}
