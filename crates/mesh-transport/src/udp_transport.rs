use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicBool, Ordering};
use std::sync::Arc;

use mesh_protocol::Packet;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Notify;

use crate::error::TransportError;
use crate::stats::TransportStats;

const RECV_BUFFER_SIZE: usize = 2048;

/// Best-effort UDP transport. Owns its socket and a
/// dedicated receive task; `stop` is idempotent and unblocks that task.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    sequence: AtomicU16,
    stats: Arc<TransportStats>,
    stop: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl UdpTransport {
    pub async fn bind(port: u16) -> Result<Self, TransportError> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| TransportError::BindFailed { addr, source: e })?;
        raw.set_reuse_address(true).map_err(|e| TransportError::BindFailed { addr, source: e })?;
        raw.set_nonblocking(true).map_err(|e| TransportError::BindFailed { addr, source: e })?;
        raw.bind(&addr.into()).map_err(|e| TransportError::BindFailed { addr, source: e })?;

        let socket = UdpSocket::from_std(raw.into()).map_err(|e| TransportError::BindFailed { addr, source: e })?;

        Ok(Self {
            socket: Arc::new(socket),
            sequence: AtomicU16::new(0),
            stats: Arc::new(TransportStats::new()),
            stop: Arc::new(Notify::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }

    pub fn next_sequence(&self) -> u16 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn send(&self, packet: &Packet, to: SocketAddr) -> Result<(), TransportError> {
        let bytes = packet.serialize();
        match self.socket.send_to(&bytes, to).await {
            Ok(n) => {
                self.stats.record_sent(n);
                Ok(())
            }
            Err(e) => {
                self.stats.record_send_error();
                Err(TransportError::Send(e))
            }
        }
    }

    /// Run the receive loop until [`Self::stop`] is called, invoking
    /// `on_packet(packet, src)` for every successfully decoded datagram and
    /// counting anything that fails to decode as invalid.
    pub async fn run_receive_loop(&self, mut on_packet: impl FnMut(Packet, SocketAddr)) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            tokio::select! {
                _ = self.stop.notified() => {
                    tracing::debug!("udp transport receive loop stopping");
                    return;
                }
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            self.stats.record_received(len);
                            match Packet::deserialize(&buf[..len]) {
                                Ok(packet) => on_packet(packet, src),
                                Err(e) => {
                                    self.stats.record_invalid_packet();
                                    tracing::debug!(error = %e, from = %src, "dropping invalid packet");
                                }
                            }
                        }
                        Err(e) => {
                            self.stats.record_receive_error();
                            tracing::warn!(error = %e, "udp receive error");
                        }
                    }
                }
            }
        }
    }

    /// Idempotent: unblocks the receive loop. Safe to call more than once
    /// and from a different task than the one running the loop.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stop.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn bind_to_zero_gets_an_ephemeral_port() {
        let transport = UdpTransport::bind(0).await.unwrap();
        assert_ne!(transport.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn send_then_receive_roundtrips() {
        use mesh_protocol::NodeId;

        let receiver = UdpTransport::bind(0).await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap();
        let sender = UdpTransport::bind(0).await.unwrap();

        let packet = Packet::data(NodeId::new_random(), NodeId::new_random(), 1, vec![0x90, 1, 2], 7, 0);
        sender.send(&packet, receiver_addr).await.unwrap();

        let received = Arc::new(Mutex::new(None));
        let received_clone = Arc::clone(&received);
        let receiver = Arc::new(receiver);
        let receiver_for_loop = Arc::clone(&receiver);

        let handle = tokio::spawn(async move {
            receiver_for_loop
                .run_receive_loop(|packet, _src| {
                    *received_clone.lock().unwrap() = Some(packet);
                })
                .await;
        });

        // Give the datagram time to land, then stop the loop.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        receiver.stop();
        handle.await.unwrap();

        let got = received.lock().unwrap().clone().unwrap();
        assert_eq!(got.midi, vec![0x90, 1, 2]);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let transport = UdpTransport::bind(0).await.unwrap();
        transport.stop();
        transport.stop();
    }
}
