use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use mesh_protocol::MidiMessageType;

/// Aggregate + per-message-type forwarding counters for the router engine,
/// exposed via `get_statistics`/`reset_statistics`.
#[derive(Debug, Default)]
pub struct RouterStatistics {
    pub messages_routed: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub loops_detected: AtomicU64,
    pub routing_errors: AtomicU64,
    per_type: Mutex<HashMap<u8, u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub messages_routed: u64,
    pub messages_dropped: u64,
    pub loops_detected: u64,
    pub routing_errors: u64,
    pub per_type: HashMap<u8, u64>,
}

impl RouterStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_routed(&self, msg_type: MidiMessageType) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
        *self.per_type.lock().unwrap().entry(msg_type.bits()).or_insert(0) += 1;
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_loop_detected(&self) {
        self.loops_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_routing_error(&self) {
        self.routing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            loops_detected: self.loops_detected.load(Ordering::Relaxed),
            routing_errors: self.routing_errors.load(Ordering::Relaxed),
            per_type: self.per_type.lock().unwrap().clone(),
        }
    }

    pub fn reset(&self) {
        self.messages_routed.store(0, Ordering::Relaxed);
        self.messages_dropped.store(0, Ordering::Relaxed);
        self.loops_detected.store(0, Ordering::Relaxed);
        self.routing_errors.store(0, Ordering::Relaxed);
        self.per_type.lock().unwrap().clear();
    }
}
