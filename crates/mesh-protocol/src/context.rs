use std::collections::BTreeSet;

use crate::device_key::DeviceKey;

/// Maximum hop count before the router refuses to forward any further
/// (loop prevention).
pub const MAX_HOPS: u8 = 8;

/// Per-message trace of hop count and visited devices, carried alongside a
/// forwarded packet so the router engine can detect routing loops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardingContext {
    pub hop_count: u8,
    pub visited: BTreeSet<DeviceKey>,
}

impl ForwardingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_exceeded_hop_limit(&self) -> bool {
        self.hop_count >= MAX_HOPS
    }

    pub fn has_visited(&self, device: &DeviceKey) -> bool {
        self.visited.contains(device)
    }

    /// Clone this context for the next hop: add `device` to the visited set
    /// and increment the hop count. Visited-set capacity is bounded to
    /// [`crate::packet::MAX_CONTEXT_DEVICES`] entries on the wire; callers
    /// should check [`ForwardingContext::has_exceeded_hop_limit`] before
    /// calling this.
    pub fn advanced(&self, device: DeviceKey) -> Self {
        let mut visited = self.visited.clone();
        visited.insert(device);
        Self {
            hop_count: self.hop_count.saturating_add(1),
            visited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_id::NodeId;

    #[test]
    fn fresh_context_has_no_hops() {
        let ctx = ForwardingContext::new();
        assert!(!ctx.has_exceeded_hop_limit());
        assert_eq!(ctx.hop_count, 0);
    }

    #[test]
    fn advancing_increments_hop_count_and_records_visit() {
        let node = NodeId::new_random();
        let device = DeviceKey::new(node, 1);
        let ctx = ForwardingContext::new().advanced(device);
        assert_eq!(ctx.hop_count, 1);
        assert!(ctx.has_visited(&device));
    }

    #[test]
    fn hop_limit_is_eight() {
        let mut ctx = ForwardingContext::new();
        for i in 0..MAX_HOPS {
            ctx = ctx.advanced(DeviceKey::new(NodeId::new_random(), i as u16));
        }
        assert!(ctx.has_exceeded_hop_limit());
    }
}
