mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use mesh_connect::{ConnectionPool, HeartbeatMonitor, MeshManager};
use mesh_discovery::NodeInfo;
use mesh_node::NodeIdentity;
use mesh_protocol::{UuidRegistry, DEFAULT_HTTP_HANDSHAKE_PORT, PROTOCOL_VERSION};
use mesh_router::{ChannelPort, RouterEngine};
use mesh_routing::{DeviceKey, DeviceKind, DeviceRegistry, ForwardingRule, RouteManager};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "midi-mesh", about = "Zero-configuration network MIDI mesh node")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/mesh.toml")]
    config: PathBuf,
}

/// Virtual loopback device ids standing in for the out-of-scope local MIDI
/// I/O driver: device 0 is the inbound side messages are originated on,
/// device 1 is the outbound side the router forwards to.
const LOOPBACK_IN_DEVICE: u16 = 0;
const LOOPBACK_OUT_DEVICE: u16 = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config: Config = match tokio::fs::read_to_string(&args.config).await {
        Ok(contents) => toml::from_str(&contents).map_err(|e| {
            error!(path = %args.config.display(), error = %e, "failed to parse configuration");
            e
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %args.config.display(), "no configuration file found, using defaults");
            Config::default()
        }
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "failed to read configuration");
            return Err(e.into());
        }
    };

    tokio::fs::create_dir_all(&config.node.state_dir).await?;
    let identity = NodeIdentity::load_or_create(&config.node.state_dir)?;
    info!(node_id = %identity.id, name = %identity.name, "midi mesh node starting");

    let devices = Arc::new(DeviceRegistry::new(identity.id));
    let routes = Arc::new(RouteManager::new());
    let uuid_registry = Arc::new(UuidRegistry::new());
    uuid_registry.register(identity.id);

    let pool = Arc::new(ConnectionPool::new(identity.id));

    let remote: Arc<dyn mesh_router::RemoteLink> = Arc::clone(&pool) as Arc<dyn mesh_router::RemoteLink>;
    let router = Arc::new(RouterEngine::new(identity.id, Arc::clone(&routes), Arc::clone(&uuid_registry), remote));
    router.set_on_routing_error(|e| error!(error = %e, "routing error"));

    let router_for_packets = Arc::clone(&router);
    pool.set_on_packet_received(move |src, packet| {
        router_for_packets.on_network_packet_received(src, packet.device_id, packet.midi.clone(), &packet);
    });
    pool.set_on_state_changed(|node, from, to| {
        info!(%node, %from, %to, "connection state changed");
    });

    setup_loopback_demo(&devices, &routes, &router);

    let node_info = NodeInfo {
        uuid: identity.id,
        http_port: DEFAULT_HTTP_HANDSHAKE_PORT,
        udp_port: config.transport.rt_port,
        hostname: identity.name.clone(),
        version: PROTOCOL_VERSION,
        devices: devices.all().len() as u32,
    };

    let mesh_manager =
        MeshManager::start(node_info, identity.name.clone(), Arc::clone(&pool), Arc::clone(&devices), Arc::clone(&routes), Arc::clone(&uuid_registry))
            .await?;

    let heartbeat = HeartbeatMonitor::start(Arc::clone(&pool));

    info!("midi mesh node running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    heartbeat.stop();
    mesh_manager.shutdown().await;

    Ok(())
}

/// Register a two-device local loopback pair and a rule connecting them,
/// so the mesh is exercisable end-to-end without a real MIDI driver.
fn setup_loopback_demo(devices: &Arc<DeviceRegistry>, routes: &Arc<RouteManager>, router: &Arc<RouterEngine>) {
    devices.add_local(LOOPBACK_IN_DEVICE, "loopback-in", DeviceKind::Output, None);
    devices.add_local(LOOPBACK_OUT_DEVICE, "loopback-out", DeviceKind::Input, None);

    let (tx, mut rx) = tokio::sync::mpsc::channel(32);
    router.register_local_port(LOOPBACK_OUT_DEVICE, Arc::new(ChannelPort::new(tx)));
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            info!(midi = ?bytes, "loopback-out received a message");
        }
    });

    let rule = ForwardingRule::new(
        uuid::Uuid::new_v4(),
        DeviceKey::new(devices.local_node(), LOOPBACK_IN_DEVICE),
        DeviceKey::new(devices.local_node(), LOOPBACK_OUT_DEVICE),
    );
    if let Err(e) = routes.add_rule(rule, devices) {
        error!(error = %e, "failed to install loopback demo rule");
    }
}
