use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::node_id::NodeId;

/// Thread-safe bidirectional map between a node's 32-bit wire hash and its
/// full [`NodeId`]. Populated as peers are discovered/connected and
/// consulted when deserializing a forwarding-context extension, which only
/// carries hashes on the wire.
pub struct UuidRegistry {
    inner: Mutex<Inner>,
}

struct Inner {
    hash_to_node: HashMap<u32, NodeId>,
    node_to_hash: HashMap<NodeId, u32>,
    collisions: HashSet<u32>,
}

impl Default for UuidRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UuidRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                hash_to_node: HashMap::new(),
                node_to_hash: HashMap::new(),
                collisions: HashSet::new(),
            }),
        }
    }

    /// Register a node for hash lookup. Idempotent for repeated
    /// registration of the same node. A different node that happens to
    /// hash to an already-registered value is logged as a collision and the
    /// first registration wins. The null node id is rejected silently.
    pub fn register(&self, node: NodeId) {
        if node.is_nil() {
            return;
        }

        let hash = node.hash();
        let mut inner = self.inner.lock().unwrap();

        if let Some(&existing) = inner.hash_to_node.get(&hash) {
            if existing == node {
                return;
            }
            tracing::warn!(
                hash = format!("{:08x}", hash),
                existing = %existing,
                attempted = %node,
                "uuid registry hash collision, keeping first registration"
            );
            inner.collisions.insert(hash);
            return;
        }

        inner.hash_to_node.insert(hash, node);
        inner.node_to_hash.insert(node, hash);
    }

    pub fn unregister(&self, node: NodeId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(hash) = inner.node_to_hash.remove(&node) {
            inner.hash_to_node.remove(&hash);
            inner.collisions.remove(&hash);
        }
    }

    pub fn lookup(&self, hash: u32) -> Option<NodeId> {
        self.inner.lock().unwrap().hash_to_node.get(&hash).copied()
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.inner.lock().unwrap().hash_to_node.values().copied().collect()
    }

    pub fn has_collision(&self, hash: u32) -> bool {
        self.inner.lock().unwrap().collisions.contains(&hash)
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().hash_to_node.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.hash_to_node.clear();
        inner.node_to_hash.clear();
        inner.collisions.clear();
    }
}
