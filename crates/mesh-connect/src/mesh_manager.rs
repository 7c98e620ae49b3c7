use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use mesh_discovery::{DiscoveryError, DiscoveryEvent, DiscoveryManager, NodeInfo};
use mesh_protocol::{NodeId, UuidRegistry};
use mesh_routing::{DeviceRegistry, RouteManager};

use crate::pool::ConnectionPool;

const REAP_INTERVAL: Duration = Duration::from_secs(5);

/// Top-level wiring between peer discovery and the connection pool: a
/// freshly discovered node gets a connection and a UUID
/// registration, a removed or failed one is torn down and every route and
/// device record that pointed at it is purged.
pub struct MeshManager {
    local_node: NodeId,
    pool: Arc<ConnectionPool>,
    devices: Arc<DeviceRegistry>,
    routes: Arc<RouteManager>,
    registry: Arc<UuidRegistry>,
    discovery: Mutex<Option<DiscoveryManager>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    reaper_task: Mutex<Option<JoinHandle<()>>>,
}

impl MeshManager {
    pub async fn start(
        node_info: NodeInfo,
        hostname: String,
        pool: Arc<ConnectionPool>,
        devices: Arc<DeviceRegistry>,
        routes: Arc<RouteManager>,
        registry: Arc<UuidRegistry>,
    ) -> Result<Arc<Self>, DiscoveryError> {
        let local_node = node_info.uuid;
        let (discovery, mut events) = DiscoveryManager::start(node_info, hostname)?;

        let manager = Arc::new(Self {
            local_node,
            pool,
            devices,
            routes,
            registry,
            discovery: Mutex::new(Some(discovery)),
            event_task: Mutex::new(None),
            reaper_task: Mutex::new(None),
        });

        let event_manager = Arc::clone(&manager);
        let event_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                event_manager.handle_discovery_event(event).await;
            }
        });

        let reap_manager = Arc::clone(&manager);
        let reaper_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAP_INTERVAL);
            loop {
                ticker.tick().await;
                for node in reap_manager.pool.reap_failed() {
                    reap_manager.purge(node).await;
                }
            }
        });

        *manager.event_task.lock().unwrap() = Some(event_task);
        *manager.reaper_task.lock().unwrap() = Some(reaper_task);
        Ok(manager)
    }

    async fn handle_discovery_event(&self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Discovered(info) => self.on_discovered(info).await,
            DiscoveryEvent::Removed(node) => self.purge(node).await,
        }
    }

    async fn on_discovered(&self, info: NodeInfo) {
        if info.uuid == self.local_node {
            return;
        }
        let Some(addr) = resolve_addr(&info).await else {
            tracing::warn!(node = %info.uuid, hostname = %info.hostname, "could not resolve discovered node's address");
            return;
        };

        self.registry.register(info.uuid);
        if let Err(e) = self.pool.connect(info.uuid, addr).await {
            tracing::warn!(node = %info.uuid, error = %e, "failed to connect to discovered node");
        }
    }

    async fn purge(&self, node: NodeId) {
        self.pool.remove(node).await;
        self.registry.unregister(node);
        self.devices.remove_all_for_node(node);
        for rule in self.routes.all_rules() {
            if rule.source.owner_node == node || rule.destination.owner_node == node {
                self.routes.remove_rule(rule.rule_id);
            }
        }
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.event_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(task) = self.reaper_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(discovery) = self.discovery.lock().unwrap().take() {
            let _ = discovery.shutdown().await;
        }
        self.pool.shutdown().await;
    }
}

async fn resolve_addr(info: &NodeInfo) -> Option<SocketAddr> {
    tokio::net::lookup_host((info.hostname.as_str(), info.udp_port)).await.ok()?.next()
}
