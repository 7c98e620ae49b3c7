use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mesh_protocol::nrt_frame::{NrtAck, NrtFragment, ACK_MARKER, DATA_MARKER};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::stats::TransportStats;

#[derive(Debug, Clone, Copy)]
pub struct NrtConfig {
    pub reconnect_interval_ms: u64,
    pub ack_timeout_ms: u64,
    pub max_resends: u32,
}

impl Default for NrtConfig {
    fn default() -> Self {
        Self { reconnect_interval_ms: 1_000, ack_timeout_ms: 1_000, max_resends: 3 }
    }
}

#[derive(Debug, Clone)]
pub enum NrtEvent {
    Fragment(NrtFragment),
    Connected,
    Disconnected,
}

struct PendingFragment {
    bytes: Vec<u8>,
    sent_at: Instant,
    resend_count: u32,
}

/// Long-lived TCP connection for bulk/SysEx payloads, reconnecting every
/// `reconnect_interval_ms` on loss. Each outgoing fragment is ACKed and
/// resent up to `max_resends` times before being abandoned. Reassembly
/// stops at a single fragment per logical message — multi-fragment
/// reassembly is out of scope.
pub struct NrtTransport {
    config: NrtConfig,
    write_half: Mutex<Option<OwnedWriteHalf>>,
    pending: Mutex<HashMap<u32, PendingFragment>>,
    next_sequence: AtomicU32,
    stats: Arc<TransportStats>,
    resend_exhausted: AtomicU64,
}

impl NrtTransport {
    pub fn new(config: NrtConfig) -> Self {
        Self {
            config,
            write_half: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_sequence: AtomicU32::new(0),
            stats: Arc::new(TransportStats::new()),
            resend_exhausted: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }

    pub fn resend_exhausted_count(&self) -> u64 {
        self.resend_exhausted.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.write_half.lock().unwrap().is_some()
    }

    /// Drive the reconnect-on-loss loop for `addr`, emitting [`NrtEvent`]s
    /// on `events` until the returned task is aborted.
    pub async fn run(self: Arc<Self>, addr: SocketAddr, events: mpsc::Sender<NrtEvent>) {
        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let (mut read_half, write_half) = stream.into_split();
                    *self.write_half.lock().unwrap() = Some(write_half);
                    let _ = events.send(NrtEvent::Connected).await;

                    loop {
                        match read_frame(&mut read_half).await {
                            Ok(Frame::Data(frag)) => {
                                self.stats.record_received(frag.bytes.len());
                                if events.send(NrtEvent::Fragment(frag)).await.is_err() {
                                    return;
                                }
                            }
                            Ok(Frame::Ack(ack)) => self.on_ack(ack.sequence),
                            Err(_) => break,
                        }
                    }

                    *self.write_half.lock().unwrap() = None;
                    let _ = events.send(NrtEvent::Disconnected).await;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "nrt transport connect failed, retrying");
                }
            }
            tokio::time::sleep(Duration::from_millis(self.config.reconnect_interval_ms)).await;
        }
    }

    /// Fragment `payload` into ≤1KiB chunks and send each, registering it
    /// for ACK tracking. Returns the sequence numbers used.
    pub async fn send(&self, payload: &[u8]) -> Vec<u32> {
        let fragment_count = payload.len().div_ceil(mesh_protocol::nrt_frame::MAX_FRAGMENT_LEN).max(1);
        let first_sequence = self.next_sequence.fetch_add(fragment_count as u32, Ordering::Relaxed);
        let fragments = NrtFragment::fragment(payload, first_sequence);
        let mut sequences = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            sequences.push(fragment.sequence);
            self.send_fragment(fragment).await;
        }
        sequences
    }

    async fn send_fragment(&self, fragment: NrtFragment) {
        let bytes = fragment.encode();
        self.write_bytes(&bytes).await;
        self.pending.lock().unwrap().insert(
            fragment.sequence,
            PendingFragment { bytes, sent_at: Instant::now(), resend_count: 0 },
        );
    }

    async fn write_bytes(&self, bytes: &[u8]) {
        let mut guard = self.write_half.lock().unwrap();
        if let Some(write_half) = guard.as_mut() {
            if let Err(e) = write_half.write_all(bytes).await {
                tracing::debug!(error = %e, "nrt write failed");
                self.stats.record_send_error();
            } else {
                self.stats.record_sent(bytes.len());
            }
        }
    }

    fn on_ack(&self, sequence: u32) {
        self.pending.lock().unwrap().remove(&sequence);
    }

    /// Resend fragments that have waited past `ack_timeout_ms`, abandoning
    /// (and counting) any that have exhausted `max_resends`.
    pub async fn tick(&self) {
        let timeout = Duration::from_millis(self.config.ack_timeout_ms);
        let (to_resend, to_abandon): (Vec<u32>, Vec<u32>) = {
            let pending = self.pending.lock().unwrap();
            let mut resend = Vec::new();
            let mut abandon = Vec::new();
            for (seq, entry) in pending.iter() {
                if entry.sent_at.elapsed() >= timeout {
                    if entry.resend_count < self.config.max_resends {
                        resend.push(*seq);
                    } else {
                        abandon.push(*seq);
                    }
                }
            }
            (resend, abandon)
        };

        for seq in to_resend {
            let bytes = {
                let mut pending = self.pending.lock().unwrap();
                if let Some(entry) = pending.get_mut(&seq) {
                    entry.resend_count += 1;
                    entry.sent_at = Instant::now();
                    Some(entry.bytes.clone())
                } else {
                    None
                }
            };
            if let Some(bytes) = bytes {
                self.write_bytes(&bytes).await;
            }
        }

        for seq in to_abandon {
            if self.pending.lock().unwrap().remove(&seq).is_some() {
                self.resend_exhausted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

enum Frame {
    Data(NrtFragment),
    Ack(NrtAck),
}

async fn read_frame(read_half: &mut (impl AsyncReadExt + Unpin)) -> std::io::Result<Frame> {
    let mut marker = [0u8; 2];
    read_half.read_exact(&mut marker).await?;

    if marker == DATA_MARKER {
        let mut rest = [0u8; 6]; // seq(4) + fragLen(2)
        read_half.read_exact(&mut rest).await?;
        let sequence = u32::from_be_bytes(rest[0..4].try_into().unwrap());
        let frag_len = u16::from_be_bytes([rest[4], rest[5]]) as usize;
        let mut bytes = vec![0u8; frag_len];
        read_half.read_exact(&mut bytes).await?;
        Ok(Frame::Data(NrtFragment { sequence, bytes }))
    } else if marker[0] == ACK_MARKER[0] {
        let mut rest = [0u8; 5]; // remaining 'C''K' + seq(4)
        read_half.read_exact(&mut rest).await?;
        let sequence = u32::from_be_bytes(rest[1..5].try_into().unwrap());
        Ok(Frame::Ack(NrtAck { sequence }))
    } else {
        Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "unrecognized nrt frame marker"))
    }
}
