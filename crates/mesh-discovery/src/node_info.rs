use serde::{Deserialize, Serialize};

use mesh_protocol::NodeId;

/// Advertised identity and reachability info for a mesh peer, carried as
/// mDNS TXT records or as the JSON multicast fallback payload. Both paths
/// publish the same fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub uuid: NodeId,
    pub http_port: u16,
    pub udp_port: u16,
    pub hostname: String,
    pub version: u8,
    pub devices: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_json() {
        let info = NodeInfo {
            uuid: NodeId::new_random(),
            http_port: 5180,
            udp_port: 5104,
            hostname: "studio-mac".into(),
            version: 1,
            devices: 3,
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: NodeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info, back);
    }
}
