//! Per-session store of capability bindings.

use std::collections::{BTreeSet, HashMap};

use super::binding::CapabilityBinding;
use crate::error::{LayerError, Result};

/// Bindings of one device session, kept in registration order.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    bindings: Vec<CapabilityBinding>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a binding by capability id.
    ///
    /// An overwritten binding keeps its original registration position.
    pub fn register(&mut self, binding: CapabilityBinding) -> Result<()> {
        binding.validate()?;
        match self.index.get(&binding.capability_id) {
            Some(&pos) => {
                log::debug!("[Registry] Replacing binding for {}", binding.capability_id);
                self.bindings[pos] = binding;
            }
            None => {
                self.index
                    .insert(binding.capability_id.clone(), self.bindings.len());
                self.bindings.push(binding);
            }
        }
        Ok(())
    }

    pub fn get(&self, capability_id: &str) -> Result<&CapabilityBinding> {
        self.index
            .get(capability_id)
            .map(|&pos| &self.bindings[pos])
            .ok_or_else(|| LayerError::NotFound(capability_id.to_string()))
    }

    /// All bindings fed by `attribute` on `cluster_id`, in registration order.
    ///
    /// One attribute may back several capabilities, e.g. distinct bits of the
    /// IAS Zone status bitmask.
    pub fn resolve_by_cluster_attribute(
        &self,
        cluster_id: u16,
        attribute: &str,
    ) -> Vec<&CapabilityBinding> {
        self.bindings
            .iter()
            .filter(|b| b.matches(cluster_id, attribute))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityBinding> {
        self.bindings.iter()
    }

    /// Distinct cluster ids the bindings rely on.
    pub fn clusters(&self) -> BTreeSet<u16> {
        self.bindings.iter().map(|b| b.cluster_id).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ValueParser;
    use crate::zcl::{IAS_ZONE, POWER_CONFIGURATION};

    fn zone_bit(capability: &str, bit: u8) -> CapabilityBinding {
        CapabilityBinding::new(capability, IAS_ZONE).with_report("zoneStatus", ValueParser::Bit(bit))
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = CapabilityRegistry::new();
        registry.register(zone_bit("alarm_motion", 0)).unwrap();
        assert_eq!(registry.get("alarm_motion").unwrap().cluster_id, IAS_ZONE);
        assert!(matches!(
            registry.get("alarm_smoke"),
            Err(LayerError::NotFound(_))
        ));
    }

    #[test]
    fn test_invalid_binding_is_not_stored() {
        let mut registry = CapabilityRegistry::new();
        let result = registry.register(CapabilityBinding::new("measure_battery", POWER_CONFIGURATION));
        assert!(matches!(result, Err(LayerError::Validation { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut registry = CapabilityRegistry::new();
        registry.register(zone_bit("alarm_motion", 0)).unwrap();
        registry.register(zone_bit("alarm_tamper", 2)).unwrap();
        registry.register(zone_bit("alarm_motion", 1)).unwrap();

        let ids: Vec<_> = registry.iter().map(|b| b.capability_id.as_str()).collect();
        assert_eq!(ids, vec!["alarm_motion", "alarm_tamper"]);
        assert!(matches!(
            registry.get("alarm_motion").unwrap().report_parser,
            Some(ValueParser::Bit(1))
        ));
    }

    #[test]
    fn test_one_attribute_feeds_many_capabilities() {
        let mut registry = CapabilityRegistry::new();
        registry.register(zone_bit("alarm_contact", 0)).unwrap();
        registry.register(zone_bit("alarm_tamper", 2)).unwrap();
        registry
            .register(
                CapabilityBinding::new("measure_battery", POWER_CONFIGURATION)
                    .with_report("batteryPercentageRemaining", ValueParser::BatteryPercentage),
            )
            .unwrap();

        let resolved = registry.resolve_by_cluster_attribute(IAS_ZONE, "zoneStatus");
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].capability_id, "alarm_contact");
        assert_eq!(resolved[1].capability_id, "alarm_tamper");
        assert_eq!(registry.clusters().len(), 2);
    }
}
