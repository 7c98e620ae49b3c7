use serde::{Deserialize, Serialize};

use crate::node_id::NodeId;

/// Globally unique MIDI endpoint identity: the node that owns the device,
/// paired with that node's local device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    #[serde(rename = "nodeId")]
    pub owner_node: NodeId,
    #[serde(rename = "deviceId")]
    pub device_id: u16,
}

impl DeviceKey {
    pub fn new(owner_node: NodeId, device_id: u16) -> Self {
        Self {
            owner_node,
            device_id,
        }
    }
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.owner_node, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_componentwise() {
        let n = NodeId::new_random();
        assert_eq!(DeviceKey::new(n, 1), DeviceKey::new(n, 1));
        assert_ne!(DeviceKey::new(n, 1), DeviceKey::new(n, 2));
    }

    #[test]
    fn ordering_is_lexicographic_on_node_then_device() {
        let a = NodeId::from_uuid(uuid::Uuid::from_u128(1));
        let b = NodeId::from_uuid(uuid::Uuid::from_u128(2));
        assert!(DeviceKey::new(a, 5) < DeviceKey::new(b, 0));
        assert!(DeviceKey::new(a, 0) < DeviceKey::new(a, 1));
    }
}
