use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use mesh_protocol::DeviceKey;
use uuid::Uuid;

use crate::device::DeviceRegistry;
use crate::error::RuleError;
use crate::forwarding_rule::ForwardingRule;

/// Thread-safe store of [`ForwardingRule`]s with a derived index from
/// source [`DeviceKey`] to rule ids sorted by descending priority,
/// rebuilt on every mutation.
pub struct RouteManager {
    rules: Mutex<HashMap<Uuid, ForwardingRule>>,
    index: Mutex<HashMap<DeviceKey, Vec<Uuid>>>,
}

impl Default for RouteManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteManager {
    pub fn new() -> Self {
        Self { rules: Mutex::new(HashMap::new()), index: Mutex::new(HashMap::new()) }
    }

    pub fn validate_rule(&self, rule: &ForwardingRule, devices: &DeviceRegistry) -> Result<(), RuleError> {
        if rule.rule_id.is_nil() {
            return Err(RuleError::EmptyRuleId);
        }
        if rule.source == rule.destination {
            return Err(RuleError::SourceEqualsDestination(rule.source));
        }
        if let Some(filter) = rule.channel_filter {
            if !filter.is_valid() {
                return Err(RuleError::InvalidChannelFilter(filter.0));
            }
        }
        if devices.get(rule.source.device_id).is_none() {
            return Err(RuleError::UnknownDevice(rule.source));
        }
        if devices.get(rule.destination.device_id).is_none() {
            return Err(RuleError::UnknownDevice(rule.destination));
        }
        Ok(())
    }

    pub fn add_rule(&self, rule: ForwardingRule, devices: &DeviceRegistry) -> Result<(), RuleError> {
        self.validate_rule(&rule, devices)?;
        self.rules.lock().unwrap().insert(rule.rule_id, rule);
        self.rebuild_index();
        Ok(())
    }

    pub fn remove_rule(&self, rule_id: Uuid) -> Option<ForwardingRule> {
        let removed = self.rules.lock().unwrap().remove(&rule_id);
        if removed.is_some() {
            self.rebuild_index();
        }
        removed
    }

    pub fn get_rule(&self, rule_id: Uuid) -> Option<ForwardingRule> {
        self.rules.lock().unwrap().get(&rule_id).cloned()
    }

    pub fn all_rules(&self) -> Vec<ForwardingRule> {
        self.rules.lock().unwrap().values().cloned().collect()
    }

    pub fn enabled_rules(&self) -> Vec<ForwardingRule> {
        self.rules.lock().unwrap().values().filter(|r| r.enabled).cloned().collect()
    }

    pub fn disabled_rules(&self) -> Vec<ForwardingRule> {
        self.rules.lock().unwrap().values().filter(|r| !r.enabled).cloned().collect()
    }

    pub fn source_rules(&self, source: DeviceKey) -> Vec<ForwardingRule> {
        self.rules.lock().unwrap().values().filter(|r| r.source == source).cloned().collect()
    }

    pub fn destination_rules(&self, destination: DeviceKey) -> Vec<ForwardingRule> {
        self.rules.lock().unwrap().values().filter(|r| r.destination == destination).cloned().collect()
    }

    /// Rules whose source is `source`, via the priority-sorted index.
    pub fn get_destinations(&self, source: DeviceKey) -> Vec<ForwardingRule> {
        let index = self.index.lock().unwrap();
        let rules = self.rules.lock().unwrap();
        index
            .get(&source)
            .into_iter()
            .flatten()
            .filter_map(|id| rules.get(id).cloned())
            .collect()
    }

    /// Record a successful forward against `rule_id`'s per-rule counters.
    /// No-op if the rule has since been removed.
    pub fn record_forwarded(&self, rule_id: Uuid, at_micros: u64) {
        if let Some(rule) = self.rules.lock().unwrap().get_mut(&rule_id) {
            rule.statistics.record_forwarded(at_micros);
        }
    }

    /// Record a drop against `rule_id`'s per-rule counters.
    pub fn record_dropped(&self, rule_id: Uuid) {
        if let Some(rule) = self.rules.lock().unwrap().get_mut(&rule_id) {
            rule.statistics.record_dropped();
        }
    }

    fn rebuild_index(&self) {
        let rules = self.rules.lock().unwrap();
        let mut index: HashMap<DeviceKey, Vec<Uuid>> = HashMap::new();
        for rule in rules.values() {
            index.entry(rule.source).or_default().push(rule.rule_id);
        }
        for ids in index.values_mut() {
            ids.sort_by_key(|id| std::cmp::Reverse(rules[id].priority));
        }
        *self.index.lock().unwrap() = index;
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), RuleError> {
        let rules = self.all_rules();
        let json = serde_json::to_string_pretty(&rules).map_err(|e| RuleError::Json(path.to_path_buf(), e))?;
        fs::write(path, json).map_err(|e| RuleError::Io(path.to_path_buf(), e))
    }

    /// Replaces the in-memory set with the contents of `path`.
    pub fn load_from_file(&self, path: &Path) -> Result<(), RuleError> {
        let contents = fs::read_to_string(path).map_err(|e| RuleError::Io(path.to_path_buf(), e))?;
        let rules: Vec<ForwardingRule> =
            serde_json::from_str(&contents).map_err(|e| RuleError::Json(path.to_path_buf(), e))?;
        *self.rules.lock().unwrap() = rules.into_iter().map(|r| (r.rule_id, r)).collect();
        self.rebuild_index();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;
    use mesh_protocol::NodeId;

    fn node(n: u128) -> NodeId {
        NodeId::from_uuid(uuid::Uuid::from_u128(n))
    }

    fn setup_devices() -> DeviceRegistry {
        let registry = DeviceRegistry::new(node(1));
        registry.add_local(0, "A", DeviceKind::Output, None);
        registry.add_local(1, "B", DeviceKind::Input, None);
        registry.add_local(2, "C", DeviceKind::Input, None);
        registry
    }

    #[test]
    fn validate_rejects_matching_source_and_destination() {
        let manager = RouteManager::new();
        let devices = setup_devices();
        let d = DeviceKey::new(node(1), 0);
        let rule = ForwardingRule::new(Uuid::from_u128(1), d, d);
        assert!(matches!(
            manager.validate_rule(&rule, &devices),
            Err(RuleError::SourceEqualsDestination(_))
        ));
    }

    #[test]
    fn validate_rejects_unknown_device() {
        let manager = RouteManager::new();
        let devices = setup_devices();
        let rule = ForwardingRule::new(
            Uuid::from_u128(1),
            DeviceKey::new(node(1), 0),
            DeviceKey::new(node(1), 99),
        );
        assert!(matches!(manager.validate_rule(&rule, &devices), Err(RuleError::UnknownDevice(_))));
    }

    #[test]
    fn get_destinations_is_sorted_by_priority_descending() {
        let manager = RouteManager::new();
        let devices = setup_devices();
        let src = DeviceKey::new(node(1), 0);

        let mut low = ForwardingRule::new(Uuid::from_u128(1), src, DeviceKey::new(node(1), 1));
        low.priority = 10;
        let mut high = ForwardingRule::new(Uuid::from_u128(2), src, DeviceKey::new(node(1), 2));
        high.priority = 200;

        manager.add_rule(low, &devices).unwrap();
        manager.add_rule(high, &devices).unwrap();

        let ordered = manager.get_destinations(src);
        assert_eq!(ordered[0].priority, 200);
        assert_eq!(ordered[1].priority, 10);
    }

    #[test]
    fn remove_rule_updates_index() {
        let manager = RouteManager::new();
        let devices = setup_devices();
        let src = DeviceKey::new(node(1), 0);
        let rule = ForwardingRule::new(Uuid::from_u128(1), src, DeviceKey::new(node(1), 1));
        let id = rule.rule_id;
        manager.add_rule(rule, &devices).unwrap();
        manager.remove_rule(id);
        assert!(manager.get_destinations(src).is_empty());
    }

    #[test]
    fn save_and_load_roundtrips() {
        let manager = RouteManager::new();
        let devices = setup_devices();
        let rule = ForwardingRule::new(
            Uuid::from_u128(1),
            DeviceKey::new(node(1), 0),
            DeviceKey::new(node(1), 1),
        );
        manager.add_rule(rule.clone(), &devices).unwrap();

        let file = tempfile::NamedTempFile::new().unwrap();
        manager.save_to_file(file.path()).unwrap();

        let reloaded = RouteManager::new();
        reloaded.load_from_file(file.path()).unwrap();
        assert_eq!(reloaded.get_rule(rule.rule_id), Some(rule));
    }

    #[test]
    fn record_forwarded_and_dropped_update_the_stored_rule() {
        let manager = RouteManager::new();
        let devices = setup_devices();
        let rule = ForwardingRule::new(Uuid::from_u128(1), DeviceKey::new(node(1), 0), DeviceKey::new(node(1), 1));
        let id = rule.rule_id;
        manager.add_rule(rule, &devices).unwrap();

        manager.record_forwarded(id, 42);
        manager.record_dropped(id);

        let stored = manager.get_rule(id).unwrap();
        assert_eq!(stored.statistics.messages_forwarded, 1);
        assert_eq!(stored.statistics.messages_dropped, 1);
        assert_eq!(stored.statistics.last_forwarded_micros, Some(42));
    }

    #[test]
    fn load_from_file_replaces_in_memory_set() {
        let manager = RouteManager::new();
        let devices = setup_devices();
        manager
            .add_rule(
                ForwardingRule::new(Uuid::from_u128(1), DeviceKey::new(node(1), 0), DeviceKey::new(node(1), 1)),
                &devices,
            )
            .unwrap();

        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "[]").unwrap();
        manager.load_from_file(file.path()).unwrap();
        assert!(manager.all_rules().is_empty());
    }
}
