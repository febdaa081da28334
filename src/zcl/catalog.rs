//! Cluster name catalog.
//!
//! Manifests refer to clusters by their library names (`iasZone`,
//! `powerConfiguration`, ...). The catalog is carried inside [`Config`] and
//! handed to each session, so every session resolves names against the same
//! injected table instead of a process-wide one.
//!
//! [`Config`]: crate::config::Config

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    IAS_ZONE, OCCUPANCY_SENSING, ON_OFF, POWER_CONFIGURATION, RELATIVE_HUMIDITY,
    TEMPERATURE_MEASUREMENT, TUYA_DATAPOINTS,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterCatalog {
    names: BTreeMap<String, u16>,
}

impl ClusterCatalog {
    pub fn empty() -> Self {
        Self {
            names: BTreeMap::new(),
        }
    }

    /// Add or replace a named cluster.
    pub fn with(mut self, name: impl Into<String>, id: u16) -> Self {
        self.names.insert(name.into(), id);
        self
    }

    /// Resolve a cluster by name or by numeric id (`"1280"` or `"0x0500"`).
    pub fn resolve(&self, name: &str) -> Option<u16> {
        if let Some(id) = self.names.get(name) {
            return Some(*id);
        }
        let trimmed = name.trim();
        if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            return u16::from_str_radix(hex, 16).ok();
        }
        trimmed.parse().ok()
    }

    /// Library name for an id, falling back to hex.
    pub fn name_of(&self, id: u16) -> String {
        self.names
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.clone())
            .unwrap_or_else(|| format!("0x{:04X}", id))
    }
}

impl Default for ClusterCatalog {
    fn default() -> Self {
        Self::empty()
            .with("basic", 0x0000)
            .with("powerConfiguration", POWER_CONFIGURATION)
            .with("identify", 0x0003)
            .with("onOff", ON_OFF)
            .with("levelControl", 0x0008)
            .with("illuminanceMeasurement", 0x0400)
            .with("temperatureMeasurement", TEMPERATURE_MEASUREMENT)
            .with("relativeHumidity", RELATIVE_HUMIDITY)
            .with("occupancySensing", OCCUPANCY_SENSING)
            .with("iasZone", IAS_ZONE)
            .with("tuya", TUYA_DATAPOINTS)
    }
}
