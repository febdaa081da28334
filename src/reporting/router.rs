//! Attribute report routing.

use crate::capability::{CapabilityRegistry, CapabilityValue};
use crate::error::ParseError;
use crate::zcl::AttributeReportEvent;

/// Capability updates computed from one report.
#[derive(Debug, Default, PartialEq)]
pub struct RoutedReport {
    pub updates: Vec<(String, CapabilityValue)>,
    /// Bindings whose parser rejected the value. Each is skipped on its own.
    pub failures: Vec<(String, ParseError)>,
    pub matched: usize,
}

/// Run every binding fed by the reported attribute through its report parser.
///
/// Bindings are visited in registration order. A `None` parse result is not
/// an update.
pub fn route(registry: &CapabilityRegistry, event: &AttributeReportEvent) -> RoutedReport {
    let bindings = registry.resolve_by_cluster_attribute(event.cluster_id, &event.attribute);
    let mut routed = RoutedReport {
        matched: bindings.len(),
        ..Default::default()
    };

    if bindings.is_empty() {
        log::debug!(
            "[Reporting] Unbound report 0x{:04X}/{} = {}",
            event.cluster_id,
            event.attribute,
            event.raw_value
        );
        return routed;
    }

    for binding in bindings {
        match binding.parser_for_report().parse(&event.raw_value) {
            Ok(Some(value)) => routed.updates.push((binding.capability_id.clone(), value)),
            Ok(None) => {}
            Err(e) => routed.failures.push((binding.capability_id.clone(), e)),
        }
    }
    routed
}
