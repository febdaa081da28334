//! Hub-facing capabilities and their bindings to cluster attributes.
//!
//! A capability (`measure_battery`, `alarm_motion`, ...) is what the hub UI
//! shows. A [`CapabilityBinding`] says which cluster attribute or command
//! backs it and how raw values are converted in each direction.

pub mod battery;
pub mod binding;
pub mod parser;
pub mod registry;

pub use battery::BatteryState;
pub use binding::{CapabilityBinding, SetPath};
pub use parser::{SetParser, ValueParser};
pub use registry::CapabilityRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SinkError;

/// Value of a hub capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CapabilityValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CapabilityValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CapabilityValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityValue::Bool(b) => write!(f, "{}", b),
            CapabilityValue::Number(n) => write!(f, "{}", n),
            CapabilityValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for CapabilityValue {
    fn from(value: bool) -> Self {
        CapabilityValue::Bool(value)
    }
}

impl From<f64> for CapabilityValue {
    fn from(value: f64) -> Self {
        CapabilityValue::Number(value)
    }
}

/// Where capability updates go: the hub device object.
///
/// This is the layer's only outward side effect besides logging. Failures
/// are logged by the caller and never retried.
#[async_trait]
pub trait CapabilitySink: Send + Sync {
    async fn set_capability_value(
        &self,
        capability_id: &str,
        value: CapabilityValue,
    ) -> Result<(), SinkError>;
}
