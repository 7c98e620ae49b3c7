use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use mesh_protocol::Packet;

const MAX_RECEIVED_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct ReorderConfig {
    pub max_buffer_size: usize,
    pub max_sequence_gap: u16,
    pub allow_duplicates: bool,
    pub delivery_timeout_ms: u64,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self { max_buffer_size: 100, max_sequence_gap: 50, allow_duplicates: false, delivery_timeout_ms: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderEvent {
    Delivered(Packet),
    GapDetected(u16),
    DuplicateDetected(u16),
    Dropped(u16),
}

#[derive(Debug, Default)]
pub struct ReorderStats {
    pub delivered: u64,
    pub dropped: u64,
    pub duplicates: u64,
    pub gaps: u64,
}

struct Buffered {
    packet: Packet,
    arrived_at: Instant,
}

/// In-order delivery from a possibly-reordered, possibly-lossy stream keyed
/// on a wrap-around 16-bit sequence number. A single
/// producer is assumed; operations take `&mut self`.
pub struct ReorderBuffer {
    config: ReorderConfig,
    next_expected: u16,
    initialized: bool,
    buffered: BTreeMap<u16, Buffered>,
    history: VecDeque<u16>,
    pub stats: ReorderStats,
}

/// `true` if `a` precedes `b` in modular sequence-number arithmetic
/// (RFC 1982 style: the signed difference determines order).
fn seq_before(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

impl ReorderBuffer {
    pub fn new(config: ReorderConfig) -> Self {
        Self {
            config,
            next_expected: 0,
            initialized: false,
            buffered: BTreeMap::new(),
            history: VecDeque::new(),
            stats: ReorderStats::default(),
        }
    }

    pub fn with_next_expected(config: ReorderConfig, next_expected: u16) -> Self {
        let mut buf = Self::new(config);
        buf.next_expected = next_expected;
        buf.initialized = true;
        buf
    }

    pub fn next_expected(&self) -> u16 {
        self.next_expected
    }

    /// The very first packet a fresh buffer sees seeds `next_expected` from
    /// its own sequence number and is delivered immediately, rather than
    /// being judged against a hardcoded zero a real stream may never pass
    /// through. Use [`Self::with_next_expected`] instead of [`Self::new`]
    /// when the starting sequence is already known.
    pub fn add_packet(&mut self, packet: Packet) -> Vec<ReorderEvent> {
        let seq = packet.sequence;
        let mut events = Vec::new();

        if !self.initialized {
            self.initialized = true;
            self.next_expected = seq;
        }

        if self.history.contains(&seq) {
            self.stats.duplicates += 1;
            events.push(ReorderEvent::DuplicateDetected(seq));
            if !self.config.allow_duplicates {
                return events;
            }
        }

        if seq == self.next_expected {
            self.deliver(packet, &mut events);
            self.drain_buffered(&mut events);
            return events;
        }

        if seq_before(seq, self.next_expected) {
            self.stats.dropped += 1;
            events.push(ReorderEvent::Dropped(seq));
            return events;
        }

        let gap = seq.wrapping_sub(self.next_expected);
        if gap <= self.config.max_sequence_gap {
            if self.buffered.len() >= self.config.max_buffer_size {
                if let Some((&oldest_seq, _)) = self.buffered.iter().next() {
                    self.buffered.remove(&oldest_seq);
                    self.stats.dropped += 1;
                    events.push(ReorderEvent::Dropped(oldest_seq));
                }
            }
            if gap > 1 {
                let mut missing = self.next_expected;
                while missing != seq {
                    if !self.buffered.contains_key(&missing) {
                        self.stats.gaps += 1;
                        events.push(ReorderEvent::GapDetected(missing));
                    }
                    missing = missing.wrapping_add(1);
                }
            }
            self.buffered.insert(seq, Buffered { packet, arrived_at: Instant::now() });
        } else {
            let mut missing = self.next_expected;
            while missing != seq {
                self.stats.gaps += 1;
                events.push(ReorderEvent::GapDetected(missing));
                missing = missing.wrapping_add(1);
            }
            self.buffered.clear();
            self.next_expected = seq;
            self.deliver(packet, &mut events);
            self.drain_buffered(&mut events);
        }

        events
    }

    /// Expire buffered packets older than `delivery_timeout_ms`: declare
    /// their predecessors lost, fast-forward `next_expected`, then deliver.
    /// Intended to be driven by an external ~100ms tick.
    pub fn sweep_timeouts(&mut self) -> Vec<ReorderEvent> {
        let mut events = Vec::new();
        let timeout = Duration::from_millis(self.config.delivery_timeout_ms);

        loop {
            let Some((&seq, buffered)) = self.buffered.iter().next() else { break };
            if buffered.arrived_at.elapsed() < timeout {
                break;
            }

            let mut missing = self.next_expected;
            while missing != seq {
                self.stats.gaps += 1;
                events.push(ReorderEvent::GapDetected(missing));
                missing = missing.wrapping_add(1);
            }
            self.next_expected = seq;
            let entry = self.buffered.remove(&seq).unwrap();
            self.deliver(entry.packet, &mut events);
            self.drain_buffered(&mut events);
        }

        events
    }

    fn deliver(&mut self, packet: Packet, events: &mut Vec<ReorderEvent>) {
        let seq = packet.sequence;
        self.next_expected = seq.wrapping_add(1);
        self.record_history(seq);
        self.stats.delivered += 1;
        events.push(ReorderEvent::Delivered(packet));
    }

    fn drain_buffered(&mut self, events: &mut Vec<ReorderEvent>) {
        while let Some(buffered) = self.buffered.remove(&self.next_expected) {
            self.deliver(buffered.packet, events);
        }
    }

    fn record_history(&mut self, seq: u16) {
        self.history.push_back(seq);
        if self.history.len() > MAX_RECEIVED_HISTORY {
            self.history.pop_front();
        }
    }
}
