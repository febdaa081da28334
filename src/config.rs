use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::ias::zone::{DEFAULT_ZONE_ID, ENROLL_SUCCESS};
use crate::tuya::time_sync::DEFAULT_RESYNC_HOUR;
use crate::zcl::ClusterCatalog;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            if (value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\''))
            {
                value = &value[1..value.len() - 1];
            }

            // Env vars already set take precedence
            if std::env::var(key).is_err() {
                // SAFETY: called from main before the async runtime starts any threads
                unsafe { std::env::set_var(key, value) };
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub polling: PollingConfig,
    pub enrollment: EnrollmentConfig,
    pub battery: BatteryConfig,
    pub session: SessionConfig,
    pub tuya: TuyaConfig,
    pub clusters: ClusterCatalog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Consecutive failures on one binding before the session is degraded.
    pub failure_threshold: u32,
    /// Interval used by manifests that ask for polling without a value.
    pub default_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    pub zone_id: u8,
    pub response_code: u8,
    /// Hub IEEE address written to `iasCieAddress` at init, as 16 hex
    /// digits. No write when unset.
    pub cie_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub low_threshold: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on init work (enrollment + reporting negotiation).
    pub init_timeout_ms: u64,
    pub event_channel_capacity: usize,
    /// Failures kept by the error sink for diagnostics.
    pub failure_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuyaConfig {
    pub time_sync_on_init: bool,
    /// Resend the time once a day at `resync_hour` local time.
    pub daily_resync: bool,
    pub resync_hour: u32,
    /// Ask the device for every mapped datapoint at init.
    pub query_on_init: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            default_interval_ms: 60_000,
        }
    }
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            zone_id: DEFAULT_ZONE_ID,
            response_code: ENROLL_SUCCESS,
            cie_address: None,
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            low_threshold: crate::capability::battery::DEFAULT_LOW_THRESHOLD,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: 30_000,
            event_channel_capacity: 64,
            failure_history: 32,
        }
    }
}

impl Default for TuyaConfig {
    fn default() -> Self {
        Self {
            time_sync_on_init: true,
            daily_resync: true,
            resync_hour: DEFAULT_RESYNC_HOUR,
            query_on_init: true,
        }
    }
}

impl EnrollmentConfig {
    /// Parsed CIE address. Accepts a `0x` prefix and `:` separators;
    /// anything else malformed is ignored with a warning.
    pub fn cie_address(&self) -> Option<u64> {
        let raw = self.cie_address.as_deref()?;
        let digits: String = raw
            .trim()
            .trim_start_matches("0x")
            .chars()
            .filter(|c| *c != ':')
            .collect();
        match u64::from_str_radix(&digits, 16) {
            Ok(address) if digits.len() == 16 => Some(address),
            _ => {
                log::warn!("[IASZone] Ignoring malformed CIE address {:?}", raw);
                None
            }
        }
    }
}

impl SessionConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Overlay values from a variable lookup (the process environment in
    /// [`Config::from_env`]).
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("POLL_FAILURE_THRESHOLD")
            && let Ok(n) = v.parse()
        {
            self.polling.failure_threshold = n;
        }
        if let Some(v) = var("POLL_DEFAULT_INTERVAL_MS")
            && let Ok(n) = v.parse()
        {
            self.polling.default_interval_ms = n;
        }
        if let Some(v) = var("IAS_ZONE_ID")
            && let Ok(n) = v.parse()
        {
            self.enrollment.zone_id = n;
        }
        if let Some(v) = var("BATTERY_LOW_THRESHOLD")
            && let Ok(n) = v.parse()
        {
            self.battery.low_threshold = n;
        }
        if let Some(v) = var("SESSION_INIT_TIMEOUT_MS")
            && let Ok(n) = v.parse()
        {
            self.session.init_timeout_ms = n;
        }
        if let Some(v) = var("TUYA_TIME_SYNC")
            && let Ok(b) = v.parse()
        {
            self.tuya.time_sync_on_init = b;
        }
        if let Some(v) = var("TUYA_DAILY_RESYNC")
            && let Ok(b) = v.parse()
        {
            self.tuya.daily_resync = b;
        }
        if let Some(v) = var("TUYA_QUERY_ON_INIT")
            && let Ok(b) = v.parse()
        {
            self.tuya.query_on_init = b;
        }
        if let Some(v) = var("IAS_CIE_ADDRESS") {
            self.enrollment.cie_address = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.polling.failure_threshold, 3);
        assert_eq!(config.enrollment.zone_id, 10);
        assert_eq!(config.enrollment.response_code, 0);
        assert_eq!(config.battery.low_threshold, 20);
        assert_eq!(config.clusters.resolve("iasZone"), Some(1280));
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("POLL_FAILURE_THRESHOLD", "5"),
            ("IAS_ZONE_ID", "23"),
            ("TUYA_TIME_SYNC", "false"),
            ("BATTERY_LOW_THRESHOLD", "not-a-number"),
            ("IAS_CIE_ADDRESS", "00124b0001020304"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.polling.failure_threshold, 5);
        assert_eq!(config.enrollment.zone_id, 23);
        assert!(!config.tuya.time_sync_on_init);
        assert_eq!(config.battery.low_threshold, 20);
        assert_eq!(config.enrollment.cie_address(), Some(0x0012_4B00_0102_0304));
    }

    #[test]
    fn test_partial_json() {
        let config = Config::from_json_str(r#"{ "polling": { "failure_threshold": 7 } }"#).unwrap();
        assert_eq!(config.polling.failure_threshold, 7);
        assert_eq!(config.polling.default_interval_ms, 60_000);
        assert_eq!(config.session.event_channel_capacity, 64);
        assert!(config.tuya.daily_resync);
        assert_eq!(config.tuya.resync_hour, 3);
    }

    #[test]
    fn test_cie_address_forms() {
        let mut enrollment = EnrollmentConfig::default();
        assert_eq!(enrollment.cie_address(), None);

        enrollment.cie_address = Some("00:12:4b:00:01:02:03:04".to_string());
        assert_eq!(enrollment.cie_address(), Some(0x0012_4B00_0102_0304));
        enrollment.cie_address = Some("0x00124b0001020304".to_string());
        assert_eq!(enrollment.cie_address(), Some(0x0012_4B00_0102_0304));

        enrollment.cie_address = Some("124b".to_string());
        assert_eq!(enrollment.cie_address(), None);
        enrollment.cie_address = Some("zz124b0001020304".to_string());
        assert_eq!(enrollment.cie_address(), None);
    }
}
