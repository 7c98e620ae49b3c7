use std::collections::HashMap;
use std::sync::Mutex;

use mesh_protocol::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

/// A MIDI endpoint, local to this process or announced by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: u16,
    pub name: String,
    pub kind: DeviceKind,
    pub manufacturer: Option<String>,
    pub is_local: bool,
    pub owner_node: NodeId,
}

/// Simplified routing-table view of a device, used by the router to find
/// where to send a message without touching the full [`Device`] record. A
/// nil `owner_node` means "this node".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub device_id: u16,
    pub owner_node: NodeId,
    pub name: String,
    pub kind: DeviceKind,
}

/// Thread-safe catalog of local and remote MIDI devices, keyed by
/// `deviceId`. Adding with an existing id overwrites the previous record.
pub struct DeviceRegistry {
    local_node: NodeId,
    devices: Mutex<HashMap<u16, Device>>,
}

impl DeviceRegistry {
    pub fn new(local_node: NodeId) -> Self {
        Self { local_node, devices: Mutex::new(HashMap::new()) }
    }

    pub fn local_node(&self) -> NodeId {
        self.local_node
    }

    pub fn add_local(&self, id: u16, name: impl Into<String>, kind: DeviceKind, manufacturer: Option<String>) {
        self.insert(Device {
            id,
            name: name.into(),
            kind,
            manufacturer,
            is_local: true,
            owner_node: self.local_node,
        });
    }

    pub fn add_remote(
        &self,
        id: u16,
        name: impl Into<String>,
        kind: DeviceKind,
        manufacturer: Option<String>,
        owner_node: NodeId,
    ) {
        self.insert(Device {
            id,
            name: name.into(),
            kind,
            manufacturer,
            is_local: false,
            owner_node,
        });
    }

    fn insert(&self, device: Device) {
        self.devices.lock().unwrap().insert(device.id, device);
    }

    pub fn remove(&self, id: u16) -> Option<Device> {
        self.devices.lock().unwrap().remove(&id)
    }

    /// Remove every device owned by `node`, returning how many were removed.
    /// Used when a peer disconnects.
    pub fn remove_all_for_node(&self, node: NodeId) -> usize {
        let mut devices = self.devices.lock().unwrap();
        let before = devices.len();
        devices.retain(|_, d| d.owner_node != node);
        before - devices.len()
    }

    pub fn clear(&self) {
        self.devices.lock().unwrap().clear();
    }

    pub fn get(&self, id: u16) -> Option<Device> {
        self.devices.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Device> {
        self.devices.lock().unwrap().values().cloned().collect()
    }

    pub fn local(&self) -> Vec<Device> {
        self.devices.lock().unwrap().values().filter(|d| d.is_local).cloned().collect()
    }

    pub fn remote(&self) -> Vec<Device> {
        self.devices.lock().unwrap().values().filter(|d| !d.is_local).cloned().collect()
    }

    pub fn by_node(&self, node: NodeId) -> Vec<Device> {
        self.devices.lock().unwrap().values().filter(|d| d.owner_node == node).cloned().collect()
    }

    pub fn route_for(&self, id: u16) -> Option<Route> {
        self.devices.lock().unwrap().get(&id).map(|d| Route {
            device_id: d.id,
            owner_node: d.owner_node,
            name: d.name.clone(),
            kind: d.kind,
        })
    }

    /// Smallest id not currently in use.
    pub fn allocate_next_id(&self) -> u16 {
        let devices = self.devices.lock().unwrap();
        let mut id = 0u16;
        while devices.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        id
    }
}
