use std::time::Duration;

use super::parser::{SetParser, ValueParser};
use crate::error::{LayerError, Result};
use crate::zcl::ReportingConfig;

/// How a capability write reaches the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetPath {
    /// Write a single attribute.
    Attribute(String),
    /// Invoke a cluster command; the parsed value is passed as `argument`
    /// when one is named, otherwise the command carries no payload.
    Command {
        name: String,
        argument: Option<String>,
    },
}

/// Declarative mapping from one capability to one cluster.
///
/// # Example
/// ```ignore
/// let binding = CapabilityBinding::new("measure_battery", POWER_CONFIGURATION)
///     .with_report("batteryPercentageRemaining", ValueParser::BatteryPercentage)
///     .with_reporting(ReportingConfig { min_interval_seconds: 3600, max_interval_seconds: 43200, min_change: 2.0 });
/// ```
#[derive(Debug, Clone)]
pub struct CapabilityBinding {
    pub capability_id: String,
    pub cluster_id: u16,
    pub get_attribute: Option<String>,
    pub report_attribute: Option<String>,
    pub set_path: Option<SetPath>,
    pub get_parser: ValueParser,
    pub report_parser: Option<ValueParser>,
    pub set_parser: SetParser,
    pub reporting: Option<ReportingConfig>,
    pub poll_interval: Option<Duration>,
    /// Reset a `true` boolean back to `false` after this delay.
    pub auto_reset: Option<Duration>,
}

impl CapabilityBinding {
    pub fn new(capability_id: impl Into<String>, cluster_id: u16) -> Self {
        Self {
            capability_id: capability_id.into(),
            cluster_id,
            get_attribute: None,
            report_attribute: None,
            set_path: None,
            get_parser: ValueParser::Passthrough,
            report_parser: None,
            set_parser: SetParser::Passthrough,
            reporting: None,
            poll_interval: None,
            auto_reset: None,
        }
    }

    pub fn with_get(mut self, attribute: impl Into<String>, parser: ValueParser) -> Self {
        self.get_attribute = Some(attribute.into());
        self.get_parser = parser;
        self
    }

    pub fn with_report(mut self, attribute: impl Into<String>, parser: ValueParser) -> Self {
        self.report_attribute = Some(attribute.into());
        self.report_parser = Some(parser);
        self
    }

    pub fn with_set(mut self, path: SetPath, parser: SetParser) -> Self {
        self.set_path = Some(path);
        self.set_parser = parser;
        self
    }

    pub fn with_reporting(mut self, config: ReportingConfig) -> Self {
        self.reporting = Some(config);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_auto_reset(mut self, delay: Duration) -> Self {
        self.auto_reset = Some(delay);
        self
    }

    /// Parser applied to inbound reports. Falls back to the get parser so a
    /// binding that only declares a get attribute still handles reports of it.
    pub fn parser_for_report(&self) -> &ValueParser {
        self.report_parser.as_ref().unwrap_or(&self.get_parser)
    }

    /// Whether an inbound report of `attribute` on `cluster_id` feeds this binding.
    pub fn matches(&self, cluster_id: u16, attribute: &str) -> bool {
        self.cluster_id == cluster_id
            && (self.report_attribute.as_deref() == Some(attribute)
                || self.get_attribute.as_deref() == Some(attribute))
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| LayerError::Validation {
            capability: self.capability_id.clone(),
            reason: reason.to_string(),
        };

        if self.capability_id.trim().is_empty() {
            return Err(invalid("capability id is empty"));
        }
        if self.get_attribute.is_none() && self.report_attribute.is_none() && self.set_path.is_none()
        {
            return Err(invalid("needs at least one of get, report or set"));
        }
        if self.reporting.is_some() && self.report_attribute.is_none() {
            return Err(invalid("reporting config requires a report attribute"));
        }
        if let Some(config) = &self.reporting
            && config.min_interval_seconds > config.max_interval_seconds
            && config.max_interval_seconds != 0
        {
            return Err(invalid("reporting min interval exceeds max interval"));
        }
        if let Some(interval) = self.poll_interval {
            if self.get_attribute.is_none() {
                return Err(invalid("poll interval requires a get attribute"));
            }
            if interval.is_zero() {
                return Err(invalid("poll interval must be non-zero"));
            }
        }
        Ok(())
    }
}
