pub mod classifier;
pub mod engine;
pub mod error;
pub mod local_port;
pub mod remote_link;
pub mod stats;

pub use classifier::{classify, MessageClass};
pub use engine::RouterEngine;
pub use error::RouterError;
pub use local_port::{ChannelPort, LocalPort, NullPort};
pub use remote_link::RemoteLink;
pub use stats::{RouterStatistics, RouterStatsSnapshot};
