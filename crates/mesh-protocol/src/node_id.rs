use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 128-bit universally unique identifier for a mesh node.
///
/// Carried in full inside [`crate::uuid_registry::UuidRegistry`] and on the
/// wire only as its 32-bit [`NodeId::hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// 32-bit wire hash: fold each 64-bit half via `x ^ (x >> 32)`, then XOR
    /// the two folded halves together. Deterministic and byte-order
    /// independent since it operates on the UUID's 128-bit value, not its
    /// textual or little/big-endian byte layout.
    pub fn hash(&self) -> u32 {
        let (high, low) = self.0.as_u64_pair();
        let high_folded = (high ^ (high >> 32)) as u32;
        let low_folded = (low ^ (low >> 32)) as u32;
        high_folded ^ low_folded
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
