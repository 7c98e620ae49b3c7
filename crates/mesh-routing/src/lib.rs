pub mod device;
pub mod error;
pub mod forwarding_rule;
pub mod route_manager;

pub use device::{Device, DeviceKind, DeviceRegistry, Route};
pub use error::RuleError;
pub use forwarding_rule::{ChannelFilter, ForwardingRule, ForwardingStatistics};
pub use route_manager::RouteManager;
