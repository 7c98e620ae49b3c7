use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use mesh_protocol::Packet;

use crate::error::TransportError;
use crate::udp_transport::UdpTransport;

#[derive(Debug, Clone, Copy)]
pub struct ReliableConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self { timeout_ms: 100, max_retries: 3, retry_backoff_ms: 50 }
    }
}

type CompletionCallback = Box<dyn FnOnce(Result<(), TransportError>) + Send>;

struct Pending {
    packet: Packet,
    addr: SocketAddr,
    sent_at: Instant,
    retry_count: u32,
    on_complete: CompletionCallback,
}

/// ACK/NACK + exponential-backoff retry atop [`UdpTransport`]. A 10ms tick
/// (driven externally via [`Self::tick`]) sweeps
/// timed-out entries.
pub struct ReliableLayer {
    config: ReliableConfig,
    pending: Mutex<HashMap<u16, Pending>>,
}

impl ReliableLayer {
    pub fn new(config: ReliableConfig) -> Self {
        Self { config, pending: Mutex::new(HashMap::new()) }
    }

    pub async fn send_reliable(
        &self,
        transport: &UdpTransport,
        packet: Packet,
        addr: SocketAddr,
        on_complete: impl FnOnce(Result<(), TransportError>) + Send + 'static,
    ) {
        let sequence = packet.sequence;
        transport.send(&packet, addr).await.ok();
        self.pending.lock().unwrap().insert(
            sequence,
            Pending { packet, addr, sent_at: Instant::now(), retry_count: 0, on_complete: Box::new(on_complete) },
        );
    }

    pub async fn send_unreliable(&self, transport: &UdpTransport, packet: &Packet, addr: SocketAddr) -> Result<(), TransportError> {
        transport.send(packet, addr).await
    }

    /// Incoming ACK for `sequence`: resolve the pending send successfully.
    pub fn on_ack(&self, sequence: u16) {
        if let Some(pending) = self.pending.lock().unwrap().remove(&sequence) {
            (pending.on_complete)(Ok(()));
        }
    }

    /// Incoming NACK for `sequence`: force an immediate retry via the same
    /// path a timeout would take.
    pub async fn on_nack(&self, transport: &UdpTransport, sequence: u16) {
        self.retry_or_fail(transport, sequence).await;
    }

    /// Sweep pending entries whose elapsed time exceeds
    /// `timeoutMs + retryCount * retryBackoffMs`, retrying or failing each.
    pub async fn tick(&self, transport: &UdpTransport) {
        let timed_out: Vec<u16> = {
            let pending = self.pending.lock().unwrap();
            pending
                .iter()
                .filter(|(_, p)| {
                    let deadline = Duration::from_millis(
                        self.config.timeout_ms + p.retry_count as u64 * self.config.retry_backoff_ms,
                    );
                    p.sent_at.elapsed() >= deadline
                })
                .map(|(seq, _)| *seq)
                .collect()
        };

        for sequence in timed_out {
            self.retry_or_fail(transport, sequence).await;
        }
    }

    async fn retry_or_fail(&self, transport: &UdpTransport, sequence: u16) {
        let should_resend = {
            let mut pending = self.pending.lock().unwrap();
            match pending.get_mut(&sequence) {
                Some(p) if p.retry_count < self.config.max_retries => {
                    p.retry_count += 1;
                    p.sent_at = Instant::now();
                    Some((p.packet.clone(), p.addr))
                }
                Some(_) => None,
                None => return,
            }
        };

        match should_resend {
            Some((packet, addr)) => {
                transport.send(&packet, addr).await.ok();
            }
            None => {
                if let Some(pending) = self.pending.lock().unwrap().remove(&sequence) {
                    (pending.on_complete)(Err(TransportError::MaxRetriesExceeded));
                }
            }
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<Pending> = self.pending.lock().unwrap().drain().map(|(_, p)| p).collect();
        for pending in drained {
            (pending.on_complete)(Err(TransportError::Cancelled));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
