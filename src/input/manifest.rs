//! Driver manifests: capability bindings and datapoint handlers as JSON.
//!
//! ```json
//! {
//!   "endpoint": 1,
//!   "capabilities": [
//!     { "capability": "alarm_motion", "cluster": "iasZone",
//!       "report": "zoneStatus", "parser": { "type": "bit", "bit": 0 },
//!       "autoResetMs": 60000 }
//!   ],
//!   "datapoints": [
//!     { "dp": 1, "capability": "onoff", "type": "bool",
//!       "parser": { "type": "boolean" }, "set": { "type": "bool_to_int" } }
//!   ]
//! }
//! ```

use serde::Deserialize;
use std::time::Duration;

use crate::capability::{CapabilityBinding, SetParser, SetPath, ValueParser};
use crate::config::Config;
use crate::error::{LayerError, Result};
use crate::tuya::{DataType, DatapointHandler};
use crate::zcl::ReportingConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceManifest {
    #[serde(default = "default_endpoint")]
    pub endpoint: u8,
    #[serde(default)]
    pub capabilities: Vec<CapabilityEntry>,
    #[serde(default)]
    pub datapoints: Vec<DatapointEntry>,
}

fn default_endpoint() -> u8 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityEntry {
    pub capability: String,
    /// Cluster name from the catalog, or a numeric id.
    pub cluster: String,
    pub get: Option<String>,
    pub report: Option<String>,
    pub set: Option<SetEntry>,
    #[serde(default)]
    pub parser: ParserSpec,
    pub report_parser: Option<ParserSpec>,
    pub reporting: Option<ReportingConfig>,
    /// `0` selects the configured default interval.
    pub poll_interval_ms: Option<u64>,
    pub auto_reset_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetEntry {
    pub attribute: Option<String>,
    pub command: Option<String>,
    pub argument: Option<String>,
    #[serde(default)]
    pub parser: SetParserSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatapointEntry {
    pub dp: u8,
    pub capability: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub parser: ParserSpec,
    /// Makes the capability writable through this datapoint.
    pub set: Option<SetParserSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParserSpec {
    #[default]
    Passthrough,
    Boolean,
    Bit {
        bit: u8,
    },
    Scale {
        divisor: f64,
    },
    BatteryPercentage,
    BatteryLow {
        threshold: Option<u8>,
    },
    BatteryVoltage,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SetParserSpec {
    #[default]
    Passthrough,
    BoolToInt,
    Scale {
        multiplier: f64,
    },
}

impl ParserSpec {
    pub fn build(&self, config: &Config) -> ValueParser {
        match self {
            ParserSpec::Passthrough => ValueParser::Passthrough,
            ParserSpec::Boolean => ValueParser::Boolean,
            ParserSpec::Bit { bit } => ValueParser::Bit(*bit),
            ParserSpec::Scale { divisor } => ValueParser::Scale { divisor: *divisor },
            ParserSpec::BatteryPercentage => ValueParser::BatteryPercentage,
            ParserSpec::BatteryLow { threshold } => ValueParser::BatteryLow {
                threshold: threshold.unwrap_or(config.battery.low_threshold),
            },
            ParserSpec::BatteryVoltage => ValueParser::BatteryVoltage,
        }
    }
}

impl SetParserSpec {
    pub fn build(&self) -> SetParser {
        match self {
            SetParserSpec::Passthrough => SetParser::Passthrough,
            SetParserSpec::BoolToInt => SetParser::BoolToInt,
            SetParserSpec::Scale { multiplier } => SetParser::Scale {
                multiplier: *multiplier,
            },
        }
    }
}

impl DeviceManifest {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build validated bindings, resolving cluster names through the
    /// configured catalog.
    pub fn bindings(&self, config: &Config) -> Result<Vec<CapabilityBinding>> {
        self.capabilities
            .iter()
            .map(|entry| entry.to_binding(config))
            .collect()
    }

    pub fn datapoint_handlers(&self, config: &Config) -> Vec<(u8, DatapointHandler)> {
        self.datapoints
            .iter()
            .map(|entry| {
                let mut handler = DatapointHandler::new(
                    entry.capability.clone(),
                    entry.data_type,
                    entry.parser.build(config),
                );
                if let Some(set) = &entry.set {
                    handler = handler.writable(set.build());
                }
                (entry.dp, handler)
            })
            .collect()
    }
}

impl CapabilityEntry {
    fn to_binding(&self, config: &Config) -> Result<CapabilityBinding> {
        let cluster_id = config
            .clusters
            .resolve(&self.cluster)
            .ok_or_else(|| LayerError::UnknownCluster(self.cluster.clone()))?;

        let parser = self.parser.build(config);
        let mut binding = CapabilityBinding::new(self.capability.clone(), cluster_id);
        if let Some(attr) = &self.get {
            binding = binding.with_get(attr.clone(), parser.clone());
        } else {
            binding.get_parser = parser.clone();
        }
        if let Some(attr) = &self.report {
            let report_parser = self
                .report_parser
                .as_ref()
                .map(|p| p.build(config))
                .unwrap_or(parser);
            binding = binding.with_report(attr.clone(), report_parser);
        }
        if let Some(set) = &self.set {
            let path = match (&set.attribute, &set.command) {
                (Some(attr), None) => SetPath::Attribute(attr.clone()),
                (None, Some(name)) => SetPath::Command {
                    name: name.clone(),
                    argument: set.argument.clone(),
                },
                _ => {
                    return Err(LayerError::Validation {
                        capability: self.capability.clone(),
                        reason: "set needs exactly one of attribute or command".to_string(),
                    });
                }
            };
            binding = binding.with_set(path, set.parser.build());
        }
        if let Some(reporting) = self.reporting {
            binding = binding.with_reporting(reporting);
        }
        if let Some(ms) = self.poll_interval_ms {
            let ms = if ms == 0 {
                config.polling.default_interval_ms
            } else {
                ms
            };
            binding = binding.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.auto_reset_ms {
            binding = binding.with_auto_reset(Duration::from_millis(ms));
        }

        binding.validate()?;
        Ok(binding)
    }
}
