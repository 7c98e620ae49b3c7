use tokio::sync::mpsc;

/// In-process delivery seam the router calls into for a local device
/// instead of a real OS MIDI driver, which is out of scope here.
pub trait LocalPort: Send + Sync {
    fn deliver(&self, bytes: &[u8]);
}

/// Discards everything. Used as the default sink for devices with no
/// registered port.
#[derive(Debug, Default)]
pub struct NullPort;

impl LocalPort for NullPort {
    fn deliver(&self, _bytes: &[u8]) {}
}

/// Forwards into an `mpsc` channel; used by tests and by `mesh-cli`'s
/// loopback demo. Delivery is best-effort: a full or closed channel drops
/// the message rather than blocking the router.
pub struct ChannelPort {
    sender: mpsc::Sender<Vec<u8>>,
}

impl ChannelPort {
    pub fn new(sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self { sender }
    }
}

impl LocalPort for ChannelPort {
    fn deliver(&self, bytes: &[u8]) {
        if self.sender.try_send(bytes.to_vec()).is_err() {
            tracing::debug!("local port channel full or closed, dropping message");
        }
    }
}
