use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("mdns error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}
