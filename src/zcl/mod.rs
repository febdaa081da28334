//! Zigbee Cluster Library primitives consumed by the binding layer.
//!
//! Only the handful of clusters the layer reasons about are named here;
//! everything else is addressed by raw cluster id through the catalog.

pub mod catalog;
pub mod handle;

pub use catalog::ClusterCatalog;
pub use handle::{ClusterEvent, ClusterHandle, CommandPayload, ReportingConfig};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Power Configuration cluster (battery voltage / percentage).
pub const POWER_CONFIGURATION: u16 = 0x0001;
/// On/Off cluster.
pub const ON_OFF: u16 = 0x0006;
/// Temperature Measurement cluster.
pub const TEMPERATURE_MEASUREMENT: u16 = 0x0402;
/// Relative Humidity Measurement cluster.
pub const RELATIVE_HUMIDITY: u16 = 0x0405;
/// Occupancy Sensing cluster.
pub const OCCUPANCY_SENSING: u16 = 0x0406;
/// IAS Zone security cluster (1280).
pub const IAS_ZONE: u16 = 0x0500;
/// Tuya manufacturer-specific datapoint cluster.
pub const TUYA_DATAPOINTS: u16 = 0xEF00;

/// Raw attribute value as exchanged with a cluster handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl AttributeValue {
    /// Integer view of the value; booleans map to 0/1, floats must be whole.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::Bool(b) => Some(i64::from(*b)),
            AttributeValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Int(_) => "int",
            AttributeValue::Float(_) => "float",
            AttributeValue::Text(_) => "text",
            AttributeValue::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Text(s) => write!(f, "{:?}", s),
            AttributeValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

/// An inbound attribute report, routed synchronously and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeReportEvent {
    pub cluster_id: u16,
    pub attribute: String,
    pub raw_value: AttributeValue,
    pub timestamp: DateTime<Utc>,
}

impl AttributeReportEvent {
    pub fn new(cluster_id: u16, attribute: impl Into<String>, raw_value: AttributeValue) -> Self {
        Self {
            cluster_id,
            attribute: attribute.into(),
            raw_value,
            timestamp: Utc::now(),
        }
    }
}
