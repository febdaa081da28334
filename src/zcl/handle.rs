//! Cluster I/O handle provided by the pairing layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::{AttributeReportEvent, AttributeValue};
use crate::error::ClusterError;

/// Named arguments for a cluster command.
pub type CommandPayload = BTreeMap<String, AttributeValue>;

/// Thresholds for a ZCL configure-reporting request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportingConfig {
    pub min_interval_seconds: u16,
    pub max_interval_seconds: u16,
    pub min_change: f64,
}

/// One cluster on the device endpoint.
///
/// All calls may suspend. Implementations report failures as
/// [`ClusterError`]; the layer never expects a handle to panic.
#[async_trait]
pub trait ClusterHandle: Send + Sync {
    async fn read_attributes(
        &self,
        names: &[&str],
    ) -> Result<HashMap<String, AttributeValue>, ClusterError>;

    async fn write_attributes(
        &self,
        values: HashMap<String, AttributeValue>,
    ) -> Result<(), ClusterError>;

    async fn invoke_command(&self, name: &str, payload: CommandPayload)
    -> Result<(), ClusterError>;

    async fn configure_reporting(
        &self,
        attribute: &str,
        config: &ReportingConfig,
    ) -> Result<(), ClusterError>;
}

/// Inbound notification delivered to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    /// Attribute report from any cluster.
    AttributeReport(AttributeReportEvent),
    /// IAS Zone enroll request from the device.
    ZoneEnrollRequest { zone_type: u16, manufacturer_code: u16 },
    /// IAS Zone status change notification.
    ZoneStatusChangeNotification { zone_status: u16, extended_status: u8 },
    /// `dataReport`/`dataResponse` body from the Tuya cluster.
    DatapointReport(Vec<u8>),
}
