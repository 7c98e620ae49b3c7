use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use mesh_protocol::{
    NodeId, DEFAULT_DISCOVERY_MULTICAST_GROUP, DEFAULT_DISCOVERY_MULTICAST_PORT,
    DISCOVERY_BROADCAST_INTERVAL_MS, DISCOVERY_EVICTION_TIMEOUT_MS,
};

use crate::error::DiscoveryError;
use crate::event::DiscoveryEvent;
use crate::node_info::NodeInfo;

fn multicast_addr() -> SocketAddrV4 {
    let group: Ipv4Addr = DEFAULT_DISCOVERY_MULTICAST_GROUP.parse().expect("valid default multicast group");
    SocketAddrV4::new(group, DEFAULT_DISCOVERY_MULTICAST_PORT)
}

fn bind_multicast_socket() -> Result<UdpSocket, DiscoveryError> {
    let addr = multicast_addr();
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, addr.port()).into())?;
    socket.join_multicast_v4(addr.ip(), &Ipv4Addr::UNSPECIFIED)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Announces this node's [`NodeInfo`] as a JSON payload on the fallback
/// multicast group every `DISCOVERY_BROADCAST_INTERVAL_MS`.
/// `node_info` is re-read on every tick so device-count or port changes are
/// reflected without restarting the announcer.
pub async fn run_announcer(node_info: impl Fn() -> NodeInfo + Send + Sync + 'static) -> Result<(), DiscoveryError> {
    let socket = bind_multicast_socket()?;
    let dest: SocketAddr = multicast_addr().into();
    let interval = Duration::from_millis(DISCOVERY_BROADCAST_INTERVAL_MS);

    loop {
        let payload = serde_json::to_vec(&node_info()).expect("NodeInfo always serializes");
        if let Err(e) = socket.send_to(&payload, dest).await {
            tracing::debug!(error = %e, "multicast announce send failed");
        }
        tokio::time::sleep(interval).await;
    }
}

/// Listens on the fallback multicast group, tracking `lastSeen` per node
/// and emitting [`DiscoveryEvent::Removed`] after
/// `DISCOVERY_EVICTION_TIMEOUT_MS` of silence (three missed broadcasts at
/// the default interval).
pub async fn run_listener(events: mpsc::Sender<DiscoveryEvent>) -> Result<(), DiscoveryError> {
    let socket = Arc::new(bind_multicast_socket()?);
    let last_seen: Arc<tokio::sync::Mutex<HashMap<NodeId, Instant>>> = Arc::new(tokio::sync::Mutex::new(HashMap::new()));

    let eviction_events = events.clone();
    let eviction_last_seen = Arc::clone(&last_seen);
    let eviction_task = tokio::spawn(async move {
        let timeout = Duration::from_millis(DISCOVERY_EVICTION_TIMEOUT_MS);
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let expired: Vec<NodeId> = {
                let mut seen = eviction_last_seen.lock().await;
                let expired: Vec<NodeId> = seen.iter().filter(|(_, at)| at.elapsed() >= timeout).map(|(id, _)| *id).collect();
                for id in &expired {
                    seen.remove(id);
                }
                expired
            };
            for id in expired {
                if eviction_events.send(DiscoveryEvent::Removed(id)).await.is_err() {
                    return;
                }
            }
        }
    });

    let mut buf = [0u8; 512];
    loop {
        let (len, _src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "multicast listener recv error");
                continue;
            }
        };

        let Ok(node) = serde_json::from_slice::<NodeInfo>(&buf[..len]) else {
            continue;
        };

        last_seen.lock().await.insert(node.uuid, Instant::now());
        if events.send(DiscoveryEvent::Discovered(node)).await.is_err() {
            break;
        }
    }

    eviction_task.abort();
    Ok(())
}
