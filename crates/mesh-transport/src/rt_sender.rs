use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mesh_protocol::rt_frame::RtFrame;

use crate::ringbuf::{RingBuffer, RtRecord};
use crate::stats::TransportStats;

const BATCH_SIZE: usize = 32;
const EMPTY_SLEEP: Duration = Duration::from_millis(1);

/// Dedicated sender thread draining the real-time ring buffer: `readBatch(32)
/// → serialize each → UDP send (non-blocking)`, sleeping up to 1ms when the
/// ring is empty. Runs on its own OS thread rather than a
/// tokio task so it isn't at the mercy of the async runtime's scheduling
/// latency under load.
pub struct RtSender {
    ring: Arc<RingBuffer>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<TransportStats>,
}

impl RtSender {
    pub fn spawn(socket: UdpSocket, dest: SocketAddr, ring: Arc<RingBuffer>) -> std::io::Result<Self> {
        socket.set_nonblocking(true)?;
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(TransportStats::new());

        let thread_ring = Arc::clone(&ring);
        let thread_running = Arc::clone(&running);
        let thread_stats = Arc::clone(&stats);

        let handle = std::thread::Builder::new()
            .name("mesh-rt-sender".into())
            .spawn(move || run(socket, dest, thread_ring, thread_running, thread_stats))
            .expect("failed to spawn rt sender thread");

        Ok(Self { ring, running, handle: Some(handle), stats })
    }

    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    pub fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }

    /// Stop the thread and wait for it to exit, up to 2s.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RtSender {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(socket: UdpSocket, dest: SocketAddr, ring: Arc<RingBuffer>, running: Arc<AtomicBool>, stats: Arc<TransportStats>) {
    let mut batch = [RtRecord::default(); BATCH_SIZE];
    while running.load(Ordering::Relaxed) {
        let n = ring.read_batch(&mut batch, BATCH_SIZE);
        if n == 0 {
            std::thread::sleep(EMPTY_SLEEP);
            continue;
        }
        for record in &batch[..n] {
            let Ok(frame) = RtFrame::new(record.device_id, record.timestamp_micros, record.midi().to_vec()) else {
                continue;
            };
            let bytes = frame.encode();
            match socket.send_to(&bytes, dest) {
                Ok(sent) => stats.record_sent(sent),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => stats.record_send_error(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket as StdUdpSocket;

    #[test]
    fn drains_ring_buffer_onto_the_wire() {
        let sender_socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let receiver_socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let dest = receiver_socket.local_addr().unwrap();
        receiver_socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let ring = Arc::new(RingBuffer::new(16));
        ring.write(RtRecord::new(&[0x90, 0x40, 0x7F], 3, 555));

        let mut sender = RtSender::spawn(sender_socket, dest, Arc::clone(&ring)).unwrap();

        let mut buf = [0u8; 64];
        let (len, _src) = receiver_socket.recv_from(&mut buf).unwrap();
        let frame = mesh_protocol::rt_frame::RtFrame::decode(&buf[..len]).unwrap();
        assert_eq!(frame.device_id, 3);
        assert_eq!(frame.midi, vec![0x90, 0x40, 0x7F]);

        sender.stop();
    }
}
