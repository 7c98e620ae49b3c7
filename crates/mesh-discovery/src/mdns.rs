use std::collections::HashMap;
use std::str::FromStr;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;

use mesh_protocol::{NodeId, MDNS_SERVICE_TYPE};

use crate::error::DiscoveryError;
use crate::event::DiscoveryEvent;
use crate::node_info::NodeInfo;

/// Owns an mDNS advertisement for this node. Dropping it does not
/// unregister the service; call [`Self::stop`] explicitly on shutdown.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

impl MdnsAdvertiser {
    pub fn start(node: &NodeInfo, hostname: &str) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()?;

        let mut properties = HashMap::new();
        properties.insert("uuid".to_string(), node.uuid.to_string());
        properties.insert("http_port".to_string(), node.http_port.to_string());
        properties.insert("udp_port".to_string(), node.udp_port.to_string());
        properties.insert("hostname".to_string(), node.hostname.clone());
        properties.insert("version".to_string(), node.version.to_string());
        properties.insert("devices".to_string(), node.devices.to_string());

        let instance_name = node.uuid.to_string();
        let service_info = ServiceInfo::new(
            MDNS_SERVICE_TYPE,
            &instance_name,
            &format!("{hostname}.local."),
            "",
            node.udp_port,
            properties,
        )?;
        let fullname = service_info.get_fullname().to_string();

        daemon.register(service_info)?;
        tracing::info!(instance = %instance_name, service_type = MDNS_SERVICE_TYPE, "mdns service registered");

        Ok(Self { daemon, fullname })
    }

    pub fn stop(self) -> Result<(), DiscoveryError> {
        self.daemon.unregister(&self.fullname)?;
        self.daemon.shutdown()?;
        Ok(())
    }
}

/// Browses for mesh peers and forwards resolved/removed services as
/// [`DiscoveryEvent`]s onto `events` until the daemon is shut down or the
/// receiver side is dropped.
pub async fn run_browser(events: mpsc::Sender<DiscoveryEvent>) -> Result<(), DiscoveryError> {
    let daemon = ServiceDaemon::new()?;
    let receiver = daemon.browse(MDNS_SERVICE_TYPE)?;

    while let Ok(event) = receiver.recv_async().await {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                if let Some(node_info) = parse_node_info(&info) {
                    if events.send(DiscoveryEvent::Discovered(node_info)).await.is_err() {
                        break;
                    }
                } else {
                    tracing::debug!(fullname = info.get_fullname(), "mdns service missing required txt records");
                }
            }
            ServiceEvent::ServiceRemoved(_ty_domain, fullname) => {
                if let Some(node_id) = node_id_from_instance(&fullname) {
                    if events.send(DiscoveryEvent::Removed(node_id)).await.is_err() {
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    daemon.shutdown()?;
    Ok(())
}

fn parse_node_info(info: &ServiceInfo) -> Option<NodeInfo> {
    Some(NodeInfo {
        uuid: NodeId::from_str(info.get_property_val_str("uuid")?).ok()?,
        http_port: info.get_property_val_str("http_port")?.parse().ok()?,
        udp_port: info.get_property_val_str("udp_port")?.parse().ok()?,
        hostname: info.get_property_val_str("hostname")?.to_string(),
        version: info.get_property_val_str("version")?.parse().ok()?,
        devices: info.get_property_val_str("devices")?.parse().ok()?,
    })
}

/// The mDNS instance name is the node's UUID (see `MdnsAdvertiser::start`),
/// so the full service name's leading label recovers it.
fn node_id_from_instance(fullname: &str) -> Option<NodeId> {
    let instance = fullname.split('.').next()?;
    NodeId::from_str(instance).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_from_instance_parses_the_leading_label() {
        let id = NodeId::new_random();
        let fullname = format!("{id}.{MDNS_SERVICE_TYPE}");
        assert_eq!(node_id_from_instance(&fullname), Some(id));
    }

    #[test]
    fn node_id_from_instance_rejects_garbage() {
        assert_eq!(node_id_from_instance("not-a-uuid._midi-network._tcp.local."), None);
    }
}
