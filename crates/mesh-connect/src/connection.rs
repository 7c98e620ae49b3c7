use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use mesh_protocol::{NodeId, Packet, PacketKind, HEARTBEAT_MISSED_THRESHOLD};
use mesh_routing::Route;
use mesh_transport::{ReliableConfig, ReliableLayer, ReorderBuffer, ReorderConfig, ReorderEvent, RingBuffer, RtRecord, RtSender, UdpTransport};

const REORDER_SWEEP_INTERVAL_MS: u64 = 100;

use crate::command::Command;
use crate::error::ConnectError;
use crate::state::ConnectionState;

type StateChangedCallback = dyn Fn(NodeId, ConnectionState, ConnectionState) + Send + Sync;
type PacketReceivedCallback = dyn Fn(NodeId, Packet) + Send + Sync;

fn encode_state(state: ConnectionState) -> u8 {
    match state {
        ConnectionState::Disconnected => 0,
        ConnectionState::Connecting => 1,
        ConnectionState::Connected => 2,
        ConnectionState::Failed => 3,
    }
}

fn decode_state(value: u8) -> ConnectionState {
    match value {
        1 => ConnectionState::Connecting,
        2 => ConnectionState::Connected,
        3 => ConnectionState::Failed,
        _ => ConnectionState::Disconnected,
    }
}

fn now_micros() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as u32).unwrap_or(0)
}

fn transition(state: &AtomicU8, on_state_changed: &StateChangedCallback, remote_node: NodeId, next: ConnectionState) {
    let previous = decode_state(state.swap(encode_state(next), Ordering::SeqCst));
    if previous != next {
        on_state_changed(remote_node, previous, next);
    }
}

/// One peer connection: a real-time ring buffer drained by
/// its own [`RtSender`] thread, a reliable-layer socket owned by a worker
/// task, and a background receive task feeding acks/nacks back into the
/// reliable layer and handing data/heartbeat packets to the caller.
///
/// The worker is a small command-queue actor (an `mpsc` channel with
/// `oneshot` reply channels for queries) standing in for a blocking
/// producer/consumer queue: every command is handled strictly in arrival
/// order, so state transitions never race each other.
pub struct NetworkConnection {
    remote_node: NodeId,
    local_addr: SocketAddr,
    state: Arc<AtomicU8>,
    ring: Arc<RingBuffer>,
    tx: mpsc::UnboundedSender<Command>,
    rt_sender: Mutex<Option<RtSender>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    reorder_sweep: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkConnection {
    pub async fn connect(
        local_node: NodeId,
        remote_node: NodeId,
        remote_addr: SocketAddr,
        on_state_changed: impl Fn(NodeId, ConnectionState, ConnectionState) + Send + Sync + 'static,
        on_packet_received: impl Fn(NodeId, Packet) + Send + Sync + 'static,
    ) -> Result<Self, ConnectError> {
        let ring = Arc::new(RingBuffer::new(mesh_transport::ringbuf::CAPACITY));
        let rt_socket = std::net::UdpSocket::bind("0.0.0.0:0").map_err(mesh_transport::TransportError::Send)?;
        let rt_sender = RtSender::spawn(rt_socket, remote_addr, Arc::clone(&ring)).map_err(mesh_transport::TransportError::Send)?;

        let transport = Arc::new(UdpTransport::bind(0).await?);
        let local_addr = transport.local_addr().map_err(mesh_transport::TransportError::Send)?;
        let reliable = Arc::new(ReliableLayer::new(ReliableConfig::default()));
        let state = Arc::new(AtomicU8::new(encode_state(ConnectionState::Disconnected)));
        let missed = Arc::new(AtomicU8::new(0));
        let devices = Arc::new(Mutex::new(Vec::<Route>::new()));
        let sequence = Arc::new(AtomicU16::new(0));
        let on_state_changed: Arc<StateChangedCallback> = Arc::new(on_state_changed);
        let on_packet_received: Arc<PacketReceivedCallback> = Arc::new(on_packet_received);

        let (tx, rx) = mpsc::unbounded_channel();

        let reorder = Arc::new(Mutex::new(ReorderBuffer::new(ReorderConfig::default())));

        let receiver = tokio::spawn(run_receive(
            Arc::clone(&transport),
            Arc::clone(&reliable),
            Arc::clone(&missed),
            Arc::clone(&on_packet_received),
            Arc::clone(&reorder),
            remote_node,
        ));

        let reorder_sweep = tokio::spawn(run_reorder_sweep(reorder, Arc::clone(&on_packet_received), remote_node));

        let worker = tokio::spawn(run_worker(
            rx,
            transport,
            reliable,
            remote_addr,
            local_node,
            remote_node,
            state.clone(),
            missed,
            devices,
            sequence,
            on_state_changed,
        ));

        tx.send(Command::Connect).map_err(|_| ConnectError::WorkerGone)?;

        Ok(Self {
            remote_node,
            local_addr,
            state,
            ring,
            tx,
            rt_sender: Mutex::new(Some(rt_sender)),
            worker: Mutex::new(Some(worker)),
            receiver: Mutex::new(Some(receiver)),
            reorder_sweep: Mutex::new(Some(reorder_sweep)),
        })
    }

    pub fn remote_node(&self) -> NodeId {
        self.remote_node
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ConnectionState {
        decode_state(self.state.load(Ordering::SeqCst))
    }

    /// Push a real-time packet's MIDI payload straight onto the lock-free
    /// ring for the dedicated [`RtSender`] thread to drain.
    pub fn send_realtime(&self, packet: &Packet) -> Result<(), ConnectError> {
        self.ring.write(RtRecord::new(&packet.midi, packet.device_id, now_micros()));
        Ok(())
    }

    pub fn send_reliable(&self, packet: Packet) -> Result<(), ConnectError> {
        self.tx.send(Command::SendReliable(packet)).map_err(|_| ConnectError::WorkerGone)
    }

    pub fn notify_heartbeat_received(&self) -> Result<(), ConnectError> {
        self.tx.send(Command::NotifyHeartbeat).map_err(|_| ConnectError::WorkerGone)
    }

    pub fn check_heartbeat(&self) -> Result<(), ConnectError> {
        self.tx.send(Command::CheckHeartbeat).map_err(|_| ConnectError::WorkerGone)
    }

    pub fn send_heartbeat(&self) -> Result<(), ConnectError> {
        self.tx.send(Command::SendHeartbeat).map_err(|_| ConnectError::WorkerGone)
    }

    pub fn set_devices(&self, devices: Vec<Route>) -> Result<(), ConnectError> {
        self.tx.send(Command::SetDevices(devices)).map_err(|_| ConnectError::WorkerGone)
    }

    pub async fn devices(&self) -> Result<Vec<Route>, ConnectError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Command::GetDevices(reply_tx)).map_err(|_| ConnectError::WorkerGone)?;
        reply_rx.await.map_err(|_| ConnectError::WorkerGone)
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.receiver.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.reorder_sweep.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(mut sender) = self.rt_sender.lock().unwrap().take() {
            sender.stop();
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Command>,
    transport: Arc<UdpTransport>,
    reliable: Arc<ReliableLayer>,
    remote_addr: SocketAddr,
    local_node: NodeId,
    remote_node: NodeId,
    state: Arc<AtomicU8>,
    missed: Arc<AtomicU8>,
    devices: Arc<Mutex<Vec<Route>>>,
    sequence: Arc<AtomicU16>,
    on_state_changed: Arc<StateChangedCallback>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Connect => {
                transition(&state, &on_state_changed, remote_node, ConnectionState::Connecting);
                missed.store(0, Ordering::SeqCst);
                transition(&state, &on_state_changed, remote_node, ConnectionState::Connected);
            }
            Command::Disconnect => {
                reliable.cancel_all();
                transition(&state, &on_state_changed, remote_node, ConnectionState::Disconnected);
            }
            Command::NotifyHeartbeat => {
                missed.store(0, Ordering::SeqCst);
            }
            Command::CheckHeartbeat => {
                if decode_state(state.load(Ordering::SeqCst)) != ConnectionState::Connected {
                    continue;
                }
                let count = missed.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= HEARTBEAT_MISSED_THRESHOLD {
                    transition(&state, &on_state_changed, remote_node, ConnectionState::Failed);
                }
            }
            Command::SendHeartbeat => {
                let seq = sequence.fetch_add(1, Ordering::Relaxed);
                let packet = Packet::heartbeat(local_node, remote_node, seq, now_micros());
                if transport.send(&packet, remote_addr).await.is_err() {
                    tracing::debug!(%remote_node, "failed to send heartbeat");
                }
            }
            Command::SendReliable(packet) => {
                reliable.send_reliable(&transport, packet, remote_addr, |_result| {}).await;
            }
            Command::SetDevices(list) => {
                *devices.lock().unwrap() = list;
            }
            Command::GetDevices(reply) => {
                let _ = reply.send(devices.lock().unwrap().clone());
            }
            Command::Shutdown => break,
        }
    }
    reliable.cancel_all();
    transport.stop();
}

async fn run_receive(
    transport: Arc<UdpTransport>,
    reliable: Arc<ReliableLayer>,
    missed: Arc<AtomicU8>,
    on_packet_received: Arc<PacketReceivedCallback>,
    reorder: Arc<Mutex<ReorderBuffer>>,
    remote_node: NodeId,
) {
    transport
        .run_receive_loop(|packet, _src| match packet.kind() {
            PacketKind::Ack => reliable.on_ack(packet.sequence),
            PacketKind::Nack => {
                let reliable = Arc::clone(&reliable);
                let transport = Arc::clone(&transport);
                let sequence = packet.sequence;
                tokio::spawn(async move {
                    reliable.on_nack(&transport, sequence).await;
                });
            }
            PacketKind::Heartbeat => {
                missed.store(0, Ordering::SeqCst);
            }
            PacketKind::Data => {
                missed.store(0, Ordering::SeqCst);
                let events = reorder.lock().unwrap().add_packet(packet);
                dispatch_reorder_events(events, &on_packet_received, remote_node);
            }
        })
        .await;
}

/// Ticks [`ReorderBuffer::sweep_timeouts`] so a gap that never gets filled
/// doesn't hold later, already-arrived packets back forever.
async fn run_reorder_sweep(reorder: Arc<Mutex<ReorderBuffer>>, on_packet_received: Arc<PacketReceivedCallback>, remote_node: NodeId) {
    let mut ticker = tokio::time::interval(Duration::from_millis(REORDER_SWEEP_INTERVAL_MS));
    loop {
        ticker.tick().await;
        let events = reorder.lock().unwrap().sweep_timeouts();
        dispatch_reorder_events(events, &on_packet_received, remote_node);
    }
}

fn dispatch_reorder_events(events: Vec<ReorderEvent>, on_packet_received: &PacketReceivedCallback, remote_node: NodeId) {
    for event in events {
        match event {
            ReorderEvent::Delivered(packet) => on_packet_received(remote_node, packet),
            ReorderEvent::GapDetected(seq) => tracing::debug!(%remote_node, seq, "gap in inbound sequence"),
            ReorderEvent::DuplicateDetected(seq) => tracing::debug!(%remote_node, seq, "duplicate packet dropped"),
            ReorderEvent::Dropped(seq) => tracing::debug!(%remote_node, seq, "packet dropped by reorder buffer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn node(n: u128) -> NodeId {
        NodeId::from_uuid(uuid::Uuid::from_u128(n))
    }

    #[tokio::test]
    async fn connect_transitions_through_connecting_to_connected() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let transitions_clone = Arc::clone(&transitions);

        let remote_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let connection = NetworkConnection::connect(
            node(1),
            node(2),
            remote_addr,
            move |_node, from, to| transitions_clone.lock().unwrap().push((from, to)),
            |_node, _packet| {},
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(
            *transitions.lock().unwrap(),
            vec![
                (ConnectionState::Disconnected, ConnectionState::Connecting),
                (ConnectionState::Connecting, ConnectionState::Connected),
            ]
        );

        connection.shutdown().await;
    }

    #[tokio::test]
    async fn missed_heartbeats_past_the_threshold_fail_the_connection() {
        let remote_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let connection = NetworkConnection::connect(node(1), node(2), remote_addr, |_, _, _| {}, |_, _| {}).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        for _ in 0..HEARTBEAT_MISSED_THRESHOLD {
            connection.check_heartbeat().unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(connection.state(), ConnectionState::Failed);
        connection.shutdown().await;
    }

    #[tokio::test]
    async fn notify_heartbeat_resets_the_miss_counter() {
        let remote_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let connection = NetworkConnection::connect(node(1), node(2), remote_addr, |_, _, _| {}, |_, _| {}).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        connection.check_heartbeat().unwrap();
        connection.notify_heartbeat_received().unwrap();
        for _ in 0..HEARTBEAT_MISSED_THRESHOLD - 1 {
            connection.check_heartbeat().unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(connection.state(), ConnectionState::Connected);
        connection.shutdown().await;
    }

    #[tokio::test]
    async fn set_and_get_devices_roundtrips() {
        let remote_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let connection = NetworkConnection::connect(node(1), node(2), remote_addr, |_, _, _| {}, |_, _| {}).await.unwrap();

        let route = mesh_routing::Route { device_id: 0, owner_node: node(2), name: "synth".into(), kind: mesh_routing::DeviceKind::Input };
        connection.set_devices(vec![route.clone()]).unwrap();
        assert_eq!(connection.devices().await.unwrap(), vec![route]);

        connection.shutdown().await;
    }

    #[tokio::test]
    async fn reliable_send_between_two_real_connections_is_delivered() {
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);

        let b = NetworkConnection::connect(node(2), node(1), "127.0.0.1:1".parse().unwrap(), |_, _, _| {}, move |_node, packet| {
            assert_eq!(packet.midi, vec![0x90, 60, 100]);
            received_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        let a = NetworkConnection::connect(node(1), node(2), b.local_addr(), |_, _, _| {}, |_, _| {}).await.unwrap();

        let packet = Packet::data(node(1), node(2), 0, vec![0x90, 60, 100], 1, 0);
        a.send_reliable(packet).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(received.load(Ordering::SeqCst), 1);
        a.shutdown().await;
        b.shutdown().await;
    }
}
