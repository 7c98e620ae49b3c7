use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mesh_protocol::{DeviceKey, MidiMessageType};

/// `0` means "any channel"; `1..=16` means a specific MIDI channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFilter(pub u8);

impl ChannelFilter {
    pub const ANY: Self = Self(0);

    pub fn is_valid(self) -> bool {
        self.0 <= 16
    }

    pub fn matches(self, channel: u8) -> bool {
        self.0 == 0 || self.0 == channel + 1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingStatistics {
    pub messages_forwarded: u64,
    pub messages_dropped: u64,
    pub last_forwarded_micros: Option<u64>,
}

impl ForwardingStatistics {
    pub fn record_forwarded(&mut self, at_micros: u64) {
        self.messages_forwarded += 1;
        self.last_forwarded_micros = Some(at_micros);
    }

    pub fn record_dropped(&mut self) {
        self.messages_dropped += 1;
    }
}

/// Source → destination forwarding rule with optional channel/type
/// filtering and priority ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    #[serde(rename = "ruleId")]
    pub rule_id: Uuid,
    pub enabled: bool,
    pub priority: i32,
    pub source: DeviceKey,
    pub destination: DeviceKey,
    #[serde(rename = "channelFilter")]
    pub channel_filter: Option<ChannelFilter>,
    #[serde(rename = "messageTypeFilter")]
    pub message_type_mask: u8,
    #[serde(default)]
    pub statistics: ForwardingStatistics,
}

impl ForwardingRule {
    pub fn new(rule_id: Uuid, source: DeviceKey, destination: DeviceKey) -> Self {
        Self {
            rule_id,
            enabled: true,
            priority: 100,
            source,
            destination,
            channel_filter: None,
            message_type_mask: MidiMessageType::ALL.bits(),
            statistics: ForwardingStatistics::default(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.rule_id.is_nil()
            && self.source != self.destination
            && self.channel_filter.map_or(true, ChannelFilter::is_valid)
    }

    pub fn matches_channel(&self, channel: u8) -> bool {
        self.channel_filter.map_or(true, |f| f.matches(channel))
    }

    pub fn matches_type(&self, msg_type: MidiMessageType) -> bool {
        MidiMessageType::from_bits(self.message_type_mask).contains(msg_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(owner: u128, id: u16) -> DeviceKey {
        DeviceKey::new(mesh_protocol::NodeId::from_uuid(Uuid::from_u128(owner)), id)
    }

    #[test]
    fn default_rule_is_enabled_with_priority_100() {
        let rule = ForwardingRule::new(Uuid::from_u128(1), device(1, 0), device(2, 0));
        assert!(rule.enabled);
        assert_eq!(rule.priority, 100);
        assert!(rule.is_valid());
    }

    #[test]
    fn rule_with_same_source_and_destination_is_invalid() {
        let d = device(1, 0);
        let rule = ForwardingRule::new(Uuid::from_u128(1), d, d);
        assert!(!rule.is_valid());
    }

    #[test]
    fn channel_filter_any_matches_everything() {
        assert!(ChannelFilter::ANY.matches(0));
        assert!(ChannelFilter::ANY.matches(15));
    }

    #[test]
    fn channel_filter_specific_channel_is_one_indexed() {
        let filter = ChannelFilter(1);
        assert!(filter.matches(0));
        assert!(!filter.matches(1));
    }

    #[test]
    fn channel_filter_out_of_range_is_invalid() {
        assert!(!ChannelFilter(17).is_valid());
        assert!(ChannelFilter(16).is_valid());
    }

    #[test]
    fn statistics_track_forwarded_and_dropped() {
        let mut stats = ForwardingStatistics::default();
        stats.record_forwarded(100);
        stats.record_dropped();
        assert_eq!(stats.messages_forwarded, 1);
        assert_eq!(stats.messages_dropped, 1);
        assert_eq!(stats.last_forwarded_micros, Some(100));
    }

    #[test]
    fn matches_type_checks_mask() {
        let mut rule = ForwardingRule::new(Uuid::from_u128(1), device(1, 0), device(2, 0));
        rule.message_type_mask = MidiMessageType::NOTE_ON.bits();
        assert!(rule.matches_type(MidiMessageType::NOTE_ON));
        assert!(!rule.matches_type(MidiMessageType::CONTROL_CHANGE));
    }
}
