//! Configure-reporting requests issued once at session init.

use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

use crate::capability::CapabilityBinding;
use crate::error::LayerError;
use crate::error_sink::ErrorSink;
use crate::zcl::ClusterHandle;

/// Outcome counts of one negotiation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiationSummary {
    pub configured: usize,
    pub failed: usize,
    /// Bindings whose cluster has no handle on the endpoint.
    pub skipped: usize,
}

/// Error sink context for reporting failures of a capability, kept apart
/// from its polling run.
pub fn reporting_context(capability_id: &str) -> String {
    format!("{}/reporting", capability_id)
}

/// Send exactly one configure-reporting request per binding that declares
/// reporting thresholds.
///
/// Requests to one cluster go out one after another in registration order.
/// Distinct clusters are negotiated concurrently. Failures are recorded and
/// never retried here.
pub async fn negotiate(
    bindings: &[CapabilityBinding],
    clusters: &HashMap<u16, Arc<dyn ClusterHandle>>,
    errors: &ErrorSink,
) -> NegotiationSummary {
    let mut groups: Vec<(u16, Vec<&CapabilityBinding>)> = Vec::new();
    for binding in bindings.iter().filter(|b| b.reporting.is_some()) {
        match groups.iter_mut().find(|(id, _)| *id == binding.cluster_id) {
            Some((_, group)) => group.push(binding),
            None => groups.push((binding.cluster_id, vec![binding])),
        }
    }

    let mut summary = NegotiationSummary::default();
    let mut pending = Vec::new();
    for (cluster_id, group) in groups {
        let Some(handle) = clusters.get(&cluster_id).cloned() else {
            log::warn!(
                "[Reporting] No handle for cluster 0x{:04X}, skipping {} binding(s)",
                cluster_id,
                group.len()
            );
            summary.skipped += group.len();
            continue;
        };
        pending.push(negotiate_cluster(cluster_id, handle, group, errors));
    }

    for (configured, failed) in join_all(pending).await {
        summary.configured += configured;
        summary.failed += failed;
    }
    log::info!(
        "[Reporting] Negotiation done: {} configured, {} failed, {} skipped",
        summary.configured,
        summary.failed,
        summary.skipped
    );
    summary
}

async fn negotiate_cluster(
    cluster_id: u16,
    handle: Arc<dyn ClusterHandle>,
    group: Vec<&CapabilityBinding>,
    errors: &ErrorSink,
) -> (usize, usize) {
    let (mut configured, mut failed) = (0, 0);
    for binding in group {
        let (Some(attribute), Some(config)) = (&binding.report_attribute, &binding.reporting)
        else {
            continue;
        };
        match handle.configure_reporting(attribute, config).await {
            Ok(()) => {
                log::debug!(
                    "[Reporting] 0x{:04X}/{} configured for {} ({}s..{}s, change {})",
                    cluster_id,
                    attribute,
                    binding.capability_id,
                    config.min_interval_seconds,
                    config.max_interval_seconds,
                    config.min_change
                );
                configured += 1;
            }
            Err(e) => {
                errors.record(
                    &reporting_context(&binding.capability_id),
                    &LayerError::Cluster(e),
                );
                failed += 1;
            }
        }
    }
    (configured, failed)
}
