pub mod context;
pub mod device_key;
pub mod message_type;
pub mod node_id;
pub mod nrt_frame;
pub mod packet;
pub mod rt_frame;
pub mod uuid_registry;

pub use context::{ForwardingContext, MAX_HOPS};
pub use device_key::DeviceKey;
pub use message_type::MidiMessageType;
pub use node_id::NodeId;
pub use packet::{CodecError, Packet, PacketKind};
pub use uuid_registry::UuidRegistry;

/// Protocol version carried in every packet header.
pub const PROTOCOL_VERSION: u8 = packet::VERSION;

/// mDNS service type advertised and browsed by discovery (§4.9/§6.4).
pub const MDNS_SERVICE_TYPE: &str = "_midi-network._tcp.local.";

/// UDP multicast fallback group and port for discovery (§4.9/§6.4).
pub const DEFAULT_DISCOVERY_MULTICAST_GROUP: &str = "239.255.42.99";
pub const DEFAULT_DISCOVERY_MULTICAST_PORT: u16 = 5353;

/// Default transport ports. 0 lets the OS assign an ephemeral port.
pub const DEFAULT_RT_UDP_PORT: u16 = 5104;
pub const DEFAULT_NRT_TCP_PORT: u16 = 5105;
pub const DEFAULT_HTTP_HANDSHAKE_PORT: u16 = 5180;

/// Discovery timing (§4.9).
pub const DISCOVERY_BROADCAST_INTERVAL_MS: u64 = 5_000;
pub const DISCOVERY_EVICTION_TIMEOUT_MS: u64 = 15_000;

/// Heartbeat timing (§4.10).
pub const HEARTBEAT_INTERVAL_MS: u64 = 1_000;
pub const HEARTBEAT_MISSED_THRESHOLD: u8 = 3;
