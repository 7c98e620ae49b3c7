use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use mesh_protocol::{NodeId, Packet};
use mesh_router::{RemoteLink, RouterError};

use crate::connection::NetworkConnection;
use crate::error::ConnectError;
use crate::state::ConnectionState;

/// Live connections keyed by peer [`NodeId`]. Implements [`RemoteLink`] so a
/// `RouterEngine` can dispatch through whichever connections currently
/// exist, without knowing how they were established.
pub struct ConnectionPool {
    local_node: NodeId,
    connections: Mutex<HashMap<NodeId, Arc<NetworkConnection>>>,
    on_state_changed: Mutex<Option<Arc<dyn Fn(NodeId, ConnectionState, ConnectionState) + Send + Sync>>>,
    on_packet_received: Mutex<Option<Arc<dyn Fn(NodeId, Packet) + Send + Sync>>>,
}

impl ConnectionPool {
    pub fn new(local_node: NodeId) -> Self {
        Self {
            local_node,
            connections: Mutex::new(HashMap::new()),
            on_state_changed: Mutex::new(None),
            on_packet_received: Mutex::new(None),
        }
    }

    pub fn set_on_state_changed(&self, callback: impl Fn(NodeId, ConnectionState, ConnectionState) + Send + Sync + 'static) {
        *self.on_state_changed.lock().unwrap() = Some(Arc::new(callback));
    }

    pub fn set_on_packet_received(&self, callback: impl Fn(NodeId, Packet) + Send + Sync + 'static) {
        *self.on_packet_received.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Establish (or replace) the connection to `remote_node`.
    pub async fn connect(&self, remote_node: NodeId, remote_addr: SocketAddr) -> Result<Arc<NetworkConnection>, ConnectError> {
        if let Some(existing) = self.get(remote_node) {
            return Ok(existing);
        }

        let pool_state_cb = self.state_changed_dispatcher();
        let pool_packet_cb = self.packet_received_dispatcher();

        let connection = Arc::new(
            NetworkConnection::connect(
                self.local_node,
                remote_node,
                remote_addr,
                move |node, from, to| pool_state_cb(node, from, to),
                move |node, packet| pool_packet_cb(node, packet),
            )
            .await?,
        );

        self.connections.lock().unwrap().insert(remote_node, Arc::clone(&connection));
        Ok(connection)
    }

    pub fn get(&self, remote_node: NodeId) -> Option<Arc<NetworkConnection>> {
        self.connections.lock().unwrap().get(&remote_node).cloned()
    }

    pub fn connections(&self) -> Vec<Arc<NetworkConnection>> {
        self.connections.lock().unwrap().values().cloned().collect()
    }

    /// Disconnect and drop `remote_node`'s connection, if any.
    pub async fn remove(&self, remote_node: NodeId) {
        let connection = self.connections.lock().unwrap().remove(&remote_node);
        if let Some(connection) = connection {
            connection.shutdown().await;
        }
    }

    /// Drop every connection whose state has settled to `Failed`, returning
    /// the nodes that were reaped.
    pub fn reap_failed(&self) -> Vec<NodeId> {
        let mut connections = self.connections.lock().unwrap();
        let dead: Vec<NodeId> = connections
            .iter()
            .filter(|(_, connection)| connection.state() == ConnectionState::Failed)
            .map(|(node, _)| *node)
            .collect();
        for node in &dead {
            connections.remove(node);
        }
        dead
    }

    pub async fn shutdown(&self) {
        let connections: Vec<Arc<NetworkConnection>> = self.connections.lock().unwrap().drain().map(|(_, c)| c).collect();
        for connection in connections {
            connection.shutdown().await;
        }
    }

    fn state_changed_dispatcher(&self) -> impl Fn(NodeId, ConnectionState, ConnectionState) + Send + Sync + 'static {
        let callback = self.on_state_changed.lock().unwrap().clone();
        move |node, from, to| {
            if let Some(callback) = &callback {
                callback(node, from, to);
            }
        }
    }

    fn packet_received_dispatcher(&self) -> impl Fn(NodeId, Packet) + Send + Sync + 'static {
        let callback = self.on_packet_received.lock().unwrap().clone();
        move |node, packet| {
            if let Some(callback) = &callback {
                callback(node, packet);
            }
        }
    }
}

impl RemoteLink for ConnectionPool {
    fn send_realtime(&self, dest_node: NodeId, packet: Packet) -> Result<(), RouterError> {
        let connection = self
            .get(dest_node)
            .ok_or_else(|| RouterError::RemoteDispatchFailed(dest_node, "no connection".into()))?;
        connection
            .send_realtime(&packet)
            .map_err(|e| RouterError::RemoteDispatchFailed(dest_node, e.to_string()))
    }

    fn send_reliable(&self, dest_node: NodeId, packet: Packet) -> Result<(), RouterError> {
        let connection = self
            .get(dest_node)
            .ok_or_else(|| RouterError::RemoteDispatchFailed(dest_node, "no connection".into()))?;
        connection
            .send_reliable(packet)
            .map_err(|e| RouterError::RemoteDispatchFailed(dest_node, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u128) -> NodeId {
        NodeId::from_uuid(uuid::Uuid::from_u128(n))
    }

    #[tokio::test]
    async fn connect_is_idempotent_for_the_same_peer() {
        let pool = ConnectionPool::new(node(1));
        let remote = node(2);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let first = pool.connect(remote, addr).await.unwrap();
        let second = pool.connect(remote, addr).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn remote_link_fails_cleanly_for_an_unknown_node() {
        let pool = ConnectionPool::new(node(1));
        let result = pool.send_realtime(node(9), Packet::data(node(1), node(9), 0, vec![0x90, 1, 1], 0, 0));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reap_failed_drops_only_failed_connections() {
        let pool = ConnectionPool::new(node(1));
        let remote = node(2);
        pool.connect(remote, "127.0.0.1:1".parse().unwrap()).await.unwrap();

        assert!(pool.reap_failed().is_empty());
        assert!(pool.get(remote).is_some());

        pool.shutdown().await;
    }
}
