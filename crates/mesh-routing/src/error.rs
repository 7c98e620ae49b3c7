use std::path::PathBuf;

use mesh_protocol::DeviceKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule id is empty")]
    EmptyRuleId,

    #[error("source and destination devices are the same: {0}")]
    SourceEqualsDestination(DeviceKey),

    #[error("unknown device: {0}")]
    UnknownDevice(DeviceKey),

    #[error("channel filter out of range [0,16]: {0}")]
    InvalidChannelFilter(u8),

    #[error("io error at {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("malformed route file {0:?}: {1}")]
    Json(PathBuf, #[source] serde_json::Error),
}
