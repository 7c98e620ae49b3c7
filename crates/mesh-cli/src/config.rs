use std::path::PathBuf;

use serde::Deserialize;

/// Top-level configuration file, using a nested-section-with-per-field-
/// defaults convention so a config file only needs to override what it
/// cares about.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub reliable: ReliableSection,
    #[serde(default)]
    pub reorder: ReorderSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    /// Directory holding the persisted node id and routing table.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self { state_dir: default_state_dir() }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./midi-mesh-state")
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_rt_port")]
    pub rt_port: u16,
    #[serde(default = "default_nrt_port")]
    pub nrt_port: u16,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self { rt_port: default_rt_port(), nrt_port: default_nrt_port() }
    }
}

fn default_rt_port() -> u16 {
    mesh_protocol::DEFAULT_RT_UDP_PORT
}

fn default_nrt_port() -> u16 {
    mesh_protocol::DEFAULT_NRT_TCP_PORT
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReliableSection {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ReliableSection {
    fn default() -> Self {
        let defaults = mesh_transport::ReliableConfig::default();
        Self { timeout_ms: defaults.timeout_ms, max_retries: defaults.max_retries, retry_backoff_ms: defaults.retry_backoff_ms }
    }
}

fn default_timeout_ms() -> u64 {
    mesh_transport::ReliableConfig::default().timeout_ms
}

fn default_max_retries() -> u32 {
    mesh_transport::ReliableConfig::default().max_retries
}

fn default_retry_backoff_ms() -> u64 {
    mesh_transport::ReliableConfig::default().retry_backoff_ms
}

impl From<ReliableSection> for mesh_transport::ReliableConfig {
    fn from(section: ReliableSection) -> Self {
        Self { timeout_ms: section.timeout_ms, max_retries: section.max_retries, retry_backoff_ms: section.retry_backoff_ms }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReorderSection {
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    #[serde(default = "default_max_sequence_gap")]
    pub max_sequence_gap: u16,
    #[serde(default)]
    pub allow_duplicates: bool,
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
}

impl Default for ReorderSection {
    fn default() -> Self {
        let defaults = mesh_transport::ReorderConfig::default();
        Self {
            max_buffer_size: defaults.max_buffer_size,
            max_sequence_gap: defaults.max_sequence_gap,
            allow_duplicates: defaults.allow_duplicates,
            delivery_timeout_ms: defaults.delivery_timeout_ms,
        }
    }
}

fn default_max_buffer_size() -> usize {
    mesh_transport::ReorderConfig::default().max_buffer_size
}

fn default_max_sequence_gap() -> u16 {
    mesh_transport::ReorderConfig::default().max_sequence_gap
}

fn default_delivery_timeout_ms() -> u64 {
    mesh_transport::ReorderConfig::default().delivery_timeout_ms
}

impl From<ReorderSection> for mesh_transport::ReorderConfig {
    fn from(section: ReorderSection) -> Self {
        Self {
            max_buffer_size: section.max_buffer_size,
            max_sequence_gap: section.max_sequence_gap,
            allow_duplicates: section.allow_duplicates,
            delivery_timeout_ms: section.delivery_timeout_ms,
        }
    }
}
