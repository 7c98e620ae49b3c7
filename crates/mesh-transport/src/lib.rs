pub mod error;
pub mod nrt_transport;
pub mod reliable;
pub mod reorder_buffer;
pub mod ringbuf;
pub mod rt_sender;
pub mod stats;
pub mod udp_transport;

pub use error::TransportError;
pub use nrt_transport::{NrtConfig, NrtEvent, NrtTransport};
pub use reliable::{ReliableConfig, ReliableLayer};
pub use reorder_buffer::{ReorderBuffer, ReorderConfig, ReorderEvent};
pub use ringbuf::{RingBuffer, RtRecord};
pub use rt_sender::RtSender;
pub use stats::TransportStats;
pub use udp_transport::UdpTransport;
