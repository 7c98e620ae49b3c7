use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use mesh_protocol::{DeviceKey, ForwardingContext, MidiMessageType, NodeId, Packet, UuidRegistry};
use mesh_routing::RouteManager;

use crate::classifier::{classify, MessageClass};
use crate::error::RouterError;
use crate::local_port::LocalPort;
use crate::remote_link::RemoteLink;
use crate::stats::{RouterStatistics, RouterStatsSnapshot};

const MAX_QUEUE_LEN: usize = 256;

type RoutingErrorHandler = dyn Fn(RouterError) + Send + Sync;

/// MIDI router engine: looks up forwarding rules for a
/// source device, applies channel/type filtering and loop prevention, and
/// dispatches each admitted message locally (via a registered [`LocalPort`]
/// or a per-device receive queue) or remotely (via [`RemoteLink`]).
///
/// Mutex ordering: `ports` → `queues` → (atomics in `stats`, lock-free).
/// Never acquire `ports` while holding `queues`.
pub struct RouterEngine {
    local_node: NodeId,
    routes: Arc<RouteManager>,
    registry: Arc<UuidRegistry>,
    remote: Arc<dyn RemoteLink>,
    ports: Mutex<HashMap<u16, Arc<dyn LocalPort>>>,
    queues: Mutex<HashMap<u16, VecDeque<Vec<u8>>>>,
    stats: RouterStatistics,
    sequence: AtomicU16,
    on_routing_error: Mutex<Option<Arc<RoutingErrorHandler>>>,
}

impl RouterEngine {
    pub fn new(local_node: NodeId, routes: Arc<RouteManager>, registry: Arc<UuidRegistry>, remote: Arc<dyn RemoteLink>) -> Self {
        Self {
            local_node,
            routes,
            registry,
            remote,
            ports: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            stats: RouterStatistics::new(),
            sequence: AtomicU16::new(0),
            on_routing_error: Mutex::new(None),
        }
    }

    pub fn set_on_routing_error(&self, handler: impl Fn(RouterError) + Send + Sync + 'static) {
        *self.on_routing_error.lock().unwrap() = Some(Arc::new(handler));
    }

    pub fn register_local_port(&self, device_id: u16, port: Arc<dyn LocalPort>) {
        self.ports.lock().unwrap().insert(device_id, port);
    }

    pub fn unregister_local_port(&self, device_id: u16) {
        self.ports.lock().unwrap().remove(&device_id);
    }

    /// Originate a message from a local device: routed with a fresh
    /// (zero-hop) forwarding context.
    pub fn send_message(&self, device_id: u16, bytes: Vec<u8>) {
        self.forward_message(self.local_node, device_id, &bytes, ForwardingContext::new());
    }

    /// A packet arrived over the network. If it carries a forwarding
    /// context extension, resolve it through the UUID registry; an
    /// undecodable or absent extension is treated as a fresh context.
    pub fn on_network_packet_received(&self, src: NodeId, device_id: u16, bytes: Vec<u8>, packet: &Packet) {
        let context = packet.forwarding_context(&self.registry).unwrap_or_default();
        self.forward_message(src, device_id, &bytes, context);
    }

    pub fn forward_message(&self, src_node: NodeId, src_device_id: u16, bytes: &[u8], context: ForwardingContext) {
        let Some(&status) = bytes.first() else {
            self.stats.record_dropped();
            self.report_error(RouterError::EmptyMessage);
            return;
        };

        let source_key = DeviceKey::new(src_node, src_device_id);
        let msg_type = MidiMessageType::from_status_byte(status);
        let channel = status & 0x0F;

        for rule in self.routes.get_destinations(source_key) {
            if !rule.enabled || !rule.matches_channel(channel) || !rule.matches_type(msg_type) {
                continue;
            }

            if context.has_exceeded_hop_limit() || context.has_visited(&rule.destination) {
                self.stats.record_loop_detected();
                self.stats.record_dropped();
                self.routes.record_dropped(rule.rule_id);
                continue;
            }

            let next_context = context.advanced(source_key);
            self.dispatch(rule.destination, bytes, &next_context);
            self.stats.record_routed(msg_type);
            self.routes.record_forwarded(rule.rule_id, now_micros());
        }
    }

    fn dispatch(&self, dest: DeviceKey, bytes: &[u8], context: &ForwardingContext) {
        if dest.owner_node.is_nil() || dest.owner_node == self.local_node {
            self.deliver_local(dest.device_id, bytes);
            return;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut packet = Packet::data(self.local_node, dest.owner_node, dest.device_id, bytes.to_vec(), sequence, now_micros() as u32);
        packet.set_context(context);

        let result = match classify(bytes[0]) {
            MessageClass::RealTime => self.remote.send_realtime(dest.owner_node, packet),
            MessageClass::NonRealTime => {
                packet.set_reliable(true);
                self.remote.send_reliable(dest.owner_node, packet)
            }
        };

        if let Err(e) = result {
            self.stats.record_routing_error();
            self.report_error(e);
        }
    }

    fn deliver_local(&self, device_id: u16, bytes: &[u8]) {
        let port = self.ports.lock().unwrap().get(&device_id).cloned();
        if let Some(port) = port {
            port.deliver(bytes);
            return;
        }

        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(device_id).or_default();
        queue.push_back(bytes.to_vec());
        if queue.len() > MAX_QUEUE_LEN {
            queue.pop_front();
        }
    }

    /// Drain and return every message queued for `device_id` since the last
    /// call.
    pub fn get_messages(&self, device_id: u16) -> Vec<Vec<u8>> {
        self.queues.lock().unwrap().remove(&device_id).map(Vec::from).unwrap_or_default()
    }

    pub fn get_statistics(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    fn report_error(&self, error: RouterError) {
        if let Some(handler) = self.on_routing_error.lock().unwrap().clone() {
            handler(error);
        }
    }
}

fn now_micros() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_routing::ForwardingRule;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn node(n: u128) -> NodeId {
        NodeId::from_uuid(Uuid::from_u128(n))
    }

    struct RecordingRemoteLink {
        realtime_sends: AtomicUsize,
        reliable_sends: AtomicUsize,
        fail: bool,
    }

    impl RemoteLink for RecordingRemoteLink {
        fn send_realtime(&self, _dest_node: NodeId, _packet: Packet) -> Result<(), RouterError> {
            self.realtime_sends.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RouterError::RemoteDispatchFailed(_dest_node, "simulated".into()));
            }
            Ok(())
        }

        fn send_reliable(&self, _dest_node: NodeId, _packet: Packet) -> Result<(), RouterError> {
            self.reliable_sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine_with(remote: Arc<RecordingRemoteLink>) -> (RouterEngine, Arc<RouteManager>) {
        let routes = Arc::new(RouteManager::new());
        let registry = Arc::new(UuidRegistry::new());
        let engine = RouterEngine::new(node(1), Arc::clone(&routes), registry, remote);
        (engine, routes)
    }

    #[test]
    fn local_destination_is_delivered_without_touching_remote_link() {
        let remote = Arc::new(RecordingRemoteLink { realtime_sends: AtomicUsize::new(0), reliable_sends: AtomicUsize::new(0), fail: false });
        let (engine, routes) = engine_with(Arc::clone(&remote));

        let src = DeviceKey::new(node(1), 0);
        let dest = DeviceKey::new(node(1), 1);
        let devices = mesh_routing::DeviceRegistry::new(node(1));
        devices.add_local(0, "src", mesh_routing::DeviceKind::Output, None);
        devices.add_local(1, "dest", mesh_routing::DeviceKind::Input, None);
        routes.add_rule(ForwardingRule::new(Uuid::from_u128(1), src, dest), &devices).unwrap();

        engine.send_message(0, vec![0x90, 60, 100]);

        assert_eq!(engine.get_messages(1), vec![vec![0x90, 60, 100]]);
        assert_eq!(remote.realtime_sends.load(Ordering::SeqCst), 0);
        assert_eq!(engine.get_statistics().messages_routed, 1);
    }

    #[test]
    fn realtime_message_to_remote_device_uses_send_realtime() {
        let remote = Arc::new(RecordingRemoteLink { realtime_sends: AtomicUsize::new(0), reliable_sends: AtomicUsize::new(0), fail: false });
        let (engine, routes) = engine_with(Arc::clone(&remote));

        let src = DeviceKey::new(node(1), 0);
        let dest = DeviceKey::new(node(2), 1);
        let devices = mesh_routing::DeviceRegistry::new(node(1));
        devices.add_local(0, "src", mesh_routing::DeviceKind::Output, None);
        devices.add_remote(1, "dest", mesh_routing::DeviceKind::Input, None, node(2));
        routes.add_rule(ForwardingRule::new(Uuid::from_u128(1), src, dest), &devices).unwrap();

        engine.send_message(0, vec![0x90, 60, 100]);
        assert_eq!(remote.realtime_sends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sysex_message_to_remote_device_uses_send_reliable() {
        let remote = Arc::new(RecordingRemoteLink { realtime_sends: AtomicUsize::new(0), reliable_sends: AtomicUsize::new(0), fail: false });
        let (engine, routes) = engine_with(Arc::clone(&remote));

        let src = DeviceKey::new(node(1), 0);
        let dest = DeviceKey::new(node(2), 1);
        let devices = mesh_routing::DeviceRegistry::new(node(1));
        devices.add_local(0, "src", mesh_routing::DeviceKind::Output, None);
        devices.add_remote(1, "dest", mesh_routing::DeviceKind::Input, None, node(2));
        routes.add_rule(ForwardingRule::new(Uuid::from_u128(1), src, dest), &devices).unwrap();

        engine.send_message(0, vec![0xF0, 0x7D, 0x01, 0xF7]);
        assert_eq!(remote.reliable_sends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn loop_is_detected_when_destination_already_visited() {
        let remote = Arc::new(RecordingRemoteLink { realtime_sends: AtomicUsize::new(0), reliable_sends: AtomicUsize::new(0), fail: false });
        let (engine, routes) = engine_with(Arc::clone(&remote));

        let src = DeviceKey::new(node(1), 0);
        let dest = DeviceKey::new(node(1), 1);
        let devices = mesh_routing::DeviceRegistry::new(node(1));
        devices.add_local(0, "src", mesh_routing::DeviceKind::Output, None);
        devices.add_local(1, "dest", mesh_routing::DeviceKind::Input, None);
        routes.add_rule(ForwardingRule::new(Uuid::from_u128(1), src, dest), &devices).unwrap();

        let mut ctx = ForwardingContext::new();
        ctx = ctx.advanced(dest);
        engine.forward_message(node(1), 0, &[0x90, 1, 1], ctx);

        assert!(engine.get_messages(1).is_empty());
        let snapshot = engine.get_statistics();
        assert_eq!(snapshot.loops_detected, 1);
        assert_eq!(snapshot.messages_dropped, 1);
    }

    #[test]
    fn hop_limit_exceeded_drops_and_counts_a_loop() {
        let remote = Arc::new(RecordingRemoteLink { realtime_sends: AtomicUsize::new(0), reliable_sends: AtomicUsize::new(0), fail: false });
        let (engine, routes) = engine_with(Arc::clone(&remote));

        let src = DeviceKey::new(node(1), 0);
        let dest = DeviceKey::new(node(1), 1);
        let devices = mesh_routing::DeviceRegistry::new(node(1));
        devices.add_local(0, "src", mesh_routing::DeviceKind::Output, None);
        devices.add_local(1, "dest", mesh_routing::DeviceKind::Input, None);
        routes.add_rule(ForwardingRule::new(Uuid::from_u128(1), src, dest), &devices).unwrap();

        let mut ctx = ForwardingContext::new();
        for i in 0..mesh_protocol::MAX_HOPS {
            ctx = ctx.advanced(DeviceKey::new(node(9), i as u16));
        }
        engine.forward_message(node(1), 0, &[0x90, 1, 1], ctx);

        assert_eq!(engine.get_statistics().loops_detected, 1);
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let remote = Arc::new(RecordingRemoteLink { realtime_sends: AtomicUsize::new(0), reliable_sends: AtomicUsize::new(0), fail: false });
        let (engine, routes) = engine_with(Arc::clone(&remote));

        let src = DeviceKey::new(node(1), 0);
        let dest = DeviceKey::new(node(1), 1);
        let devices = mesh_routing::DeviceRegistry::new(node(1));
        devices.add_local(0, "src", mesh_routing::DeviceKind::Output, None);
        devices.add_local(1, "dest", mesh_routing::DeviceKind::Input, None);
        let mut rule = ForwardingRule::new(Uuid::from_u128(1), src, dest);
        rule.enabled = false;
        routes.add_rule(rule, &devices).unwrap();

        engine.send_message(0, vec![0x90, 1, 1]);
        assert!(engine.get_messages(1).is_empty());
    }

    #[test]
    fn channel_filter_excludes_non_matching_messages() {
        let remote = Arc::new(RecordingRemoteLink { realtime_sends: AtomicUsize::new(0), reliable_sends: AtomicUsize::new(0), fail: false });
        let (engine, routes) = engine_with(Arc::clone(&remote));

        let src = DeviceKey::new(node(1), 0);
        let dest = DeviceKey::new(node(1), 1);
        let devices = mesh_routing::DeviceRegistry::new(node(1));
        devices.add_local(0, "src", mesh_routing::DeviceKind::Output, None);
        devices.add_local(1, "dest", mesh_routing::DeviceKind::Input, None);
        let mut rule = ForwardingRule::new(Uuid::from_u128(1), src, dest);
        rule.channel_filter = Some(mesh_routing::ChannelFilter(3)); // channel 2 (one-indexed)
        routes.add_rule(rule, &devices).unwrap();

        engine.send_message(0, vec![0x90, 1, 1]); // status nibble 0 => channel 0
        assert!(engine.get_messages(1).is_empty());

        engine.send_message(0, vec![0x92, 1, 1]); // channel 2
        assert_eq!(engine.get_messages(1).len(), 1);
    }

    #[test]
    fn routing_error_handler_is_invoked_on_remote_failure() {
        let remote = Arc::new(RecordingRemoteLink { realtime_sends: AtomicUsize::new(0), reliable_sends: AtomicUsize::new(0), fail: true });
        let (engine, routes) = engine_with(Arc::clone(&remote));

        let src = DeviceKey::new(node(1), 0);
        let dest = DeviceKey::new(node(2), 1);
        let devices = mesh_routing::DeviceRegistry::new(node(1));
        devices.add_local(0, "src", mesh_routing::DeviceKind::Output, None);
        devices.add_remote(1, "dest", mesh_routing::DeviceKind::Input, None, node(2));
        routes.add_rule(ForwardingRule::new(Uuid::from_u128(1), src, dest), &devices).unwrap();

        let errors = Arc::new(AtomicUsize::new(0));
        let errors_clone = Arc::clone(&errors);
        engine.set_on_routing_error(move |_e| {
            errors_clone.fetch_add(1, Ordering::SeqCst);
        });

        engine.send_message(0, vec![0x90, 1, 1]);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(engine.get_statistics().routing_errors, 1);
    }

    #[tokio::test]
    async fn registered_local_port_bypasses_the_receive_queue() {
        let remote = Arc::new(RecordingRemoteLink { realtime_sends: AtomicUsize::new(0), reliable_sends: AtomicUsize::new(0), fail: false });
        let (engine, routes) = engine_with(Arc::clone(&remote));

        let src = DeviceKey::new(node(1), 0);
        let dest = DeviceKey::new(node(1), 1);
        let devices = mesh_routing::DeviceRegistry::new(node(1));
        devices.add_local(0, "src", mesh_routing::DeviceKind::Output, None);
        devices.add_local(1, "dest", mesh_routing::DeviceKind::Input, None);
        routes.add_rule(ForwardingRule::new(Uuid::from_u128(1), src, dest), &devices).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        engine.register_local_port(1, Arc::new(crate::local_port::ChannelPort::new(tx)));

        engine.send_message(0, vec![0x90, 1, 1]);
        assert_eq!(rx.recv().await, Some(vec![0x90, 1, 1]));
        assert!(engine.get_messages(1).is_empty());
    }
}
