//! IAS Zone enrollment and zone status decoding.
//!
//! Many inexpensive sensors send their Zone Enroll Request the moment they
//! join, usually before any listener is attached. The response is therefore
//! sent proactively at session init and again for every request that does
//! arrive. Both sends use the same fixed zone id and are safe to repeat.
//!
//! Zone status is processed whether or not enrollment ever completed.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ClusterError;
use crate::zcl::{AttributeReportEvent, AttributeValue, ClusterHandle, CommandPayload, IAS_ZONE};

pub const ZONE_ENROLL_RESPONSE: &str = "zoneEnrollResponse";
pub const ZONE_STATUS_ATTRIBUTE: &str = "zoneStatus";
pub const CIE_ADDRESS_ATTRIBUTE: &str = "iasCieAddress";
/// `enrollResponseCode` for success.
pub const ENROLL_SUCCESS: u8 = 0;
pub const DEFAULT_ZONE_ID: u8 = 10;

/// IAS Zone status bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneStatus(pub u16);

impl ZoneStatus {
    pub const ALARM1: u16 = 1 << 0;
    pub const ALARM2: u16 = 1 << 1;
    pub const TAMPER: u16 = 1 << 2;
    pub const BATTERY_LOW: u16 = 1 << 3;

    /// The alarm value every IAS capability is derived from.
    pub fn alarm(&self) -> bool {
        self.0 & Self::ALARM1 != 0
    }

    pub fn alarm2(&self) -> bool {
        self.0 & Self::ALARM2 != 0
    }

    pub fn tamper(&self) -> bool {
        self.0 & Self::TAMPER != 0
    }

    pub fn battery_low(&self) -> bool {
        self.0 & Self::BATTERY_LOW != 0
    }

    /// The same status as a `zoneStatus` attribute report, so notifications
    /// and reports share one routing path.
    pub fn to_report_event(self) -> AttributeReportEvent {
        AttributeReportEvent::new(
            IAS_ZONE,
            ZONE_STATUS_ATTRIBUTE,
            AttributeValue::Int(i64::from(self.0)),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    NotEnrolled,
    EnrollRequested,
    /// Terminal for the lifetime of the session.
    Enrolled,
}

#[derive(Debug)]
struct Inner {
    state: EnrollmentState,
    last_enroll_attempt: Option<DateTime<Utc>>,
    responses_sent: u32,
}

/// Enrollment handshake for one session.
#[derive(Debug)]
pub struct ZoneEnrollment {
    zone_id: u8,
    response_code: u8,
    inner: Mutex<Inner>,
}

impl ZoneEnrollment {
    pub fn new(zone_id: u8, response_code: u8) -> Self {
        Self {
            zone_id,
            response_code,
            inner: Mutex::new(Inner {
                state: EnrollmentState::NotEnrolled,
                last_enroll_attempt: None,
                responses_sent: 0,
            }),
        }
    }

    pub fn state(&self) -> EnrollmentState {
        self.inner.lock().state
    }

    pub fn zone_id(&self) -> u8 {
        self.zone_id
    }

    pub fn last_enroll_attempt(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_enroll_attempt
    }

    /// Number of responses the device acknowledged.
    pub fn responses_sent(&self) -> u32 {
        self.inner.lock().responses_sent
    }

    fn response_payload(&self) -> CommandPayload {
        let mut payload = CommandPayload::new();
        payload.insert(
            "enrollResponseCode".to_string(),
            AttributeValue::Int(i64::from(self.response_code)),
        );
        payload.insert(
            "zoneId".to_string(),
            AttributeValue::Int(i64::from(self.zone_id)),
        );
        payload
    }

    async fn send_response(&self, handle: &Arc<dyn ClusterHandle>) -> bool {
        self.inner.lock().last_enroll_attempt = Some(Utc::now());
        match handle
            .invoke_command(ZONE_ENROLL_RESPONSE, self.response_payload())
            .await
        {
            Ok(()) => {
                self.inner.lock().responses_sent += 1;
                true
            }
            Err(e) => {
                log::warn!("[IASZone] Failed to send Zone Enroll Response: {}", e);
                false
            }
        }
    }

    /// Point the device at the hub by writing `iasCieAddress`, unless it
    /// already holds a non-zero address. The address goes out little-endian.
    ///
    /// Returns `Ok(true)` when a write was sent.
    pub async fn write_cie_address(
        &self,
        handle: &Arc<dyn ClusterHandle>,
        address: u64,
    ) -> Result<bool, ClusterError> {
        match handle.read_attributes(&[CIE_ADDRESS_ATTRIBUTE]).await {
            Ok(values) => {
                if let Some(existing) = values.get(CIE_ADDRESS_ATTRIBUTE)
                    && is_address_set(existing)
                {
                    log::info!("[IASZone] CIE address already set: {}", existing);
                    return Ok(false);
                }
            }
            Err(e) => log::debug!("[IASZone] Cannot read CIE address: {}", e),
        }

        log::info!("[IASZone] Writing CIE address {:016x}", address);
        handle
            .write_attributes(HashMap::from([(
                CIE_ADDRESS_ATTRIBUTE.to_string(),
                AttributeValue::Bytes(address.to_le_bytes().to_vec()),
            )]))
            .await?;
        Ok(true)
    }

    /// Send the response without waiting for a request.
    ///
    /// A failed send is logged; the request-triggered path still covers it.
    pub async fn enroll_proactively(&self, handle: &Arc<dyn ClusterHandle>) {
        log::info!(
            "[IASZone] Sending proactive Zone Enroll Response (zoneId: {})",
            self.zone_id
        );
        if self.send_response(handle).await {
            let mut inner = self.inner.lock();
            if inner.state == EnrollmentState::NotEnrolled {
                inner.state = EnrollmentState::EnrollRequested;
            }
            log::info!("[IASZone] Proactive Zone Enroll Response sent");
        }
    }

    /// Answer a Zone Enroll Request. Idempotent.
    ///
    /// Returns `true` only for the send that moved the session to `Enrolled`.
    pub async fn on_enroll_request(&self, handle: &Arc<dyn ClusterHandle>) -> bool {
        log::info!("[IASZone] Zone Enroll Request received");
        if !self.send_response(handle).await {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.state == EnrollmentState::Enrolled {
            log::debug!("[IASZone] Already enrolled, response repeated");
            return false;
        }
        inner.state = EnrollmentState::Enrolled;
        log::info!("[IASZone] Enrolled (zoneId: {})", self.zone_id);
        true
    }
}

fn is_address_set(value: &AttributeValue) -> bool {
    match value {
        AttributeValue::Bytes(bytes) => bytes.iter().any(|b| *b != 0),
        AttributeValue::Text(text) => text.chars().any(|c| c.is_ascii_hexdigit() && c != '0'),
        other => other.as_i64().is_some_and(|v| v != 0),
    }
}

impl Default for ZoneEnrollment {
    fn default() -> Self {
        Self::new(DEFAULT_ZONE_ID, ENROLL_SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::simulation::SimulatedCluster;

    #[test]
    fn test_zone_status_bits() {
        let status = ZoneStatus(0b1101);
        assert!(status.alarm());
        assert!(!status.alarm2());
        assert!(status.tamper());
        assert!(status.battery_low());
        assert!(!ZoneStatus(0b0010).alarm());
    }

    #[test]
    fn test_status_as_report_event() {
        let event = ZoneStatus(0x21).to_report_event();
        assert_eq!(event.cluster_id, IAS_ZONE);
        assert_eq!(event.attribute, ZONE_STATUS_ATTRIBUTE);
        assert_eq!(event.raw_value, AttributeValue::Int(0x21));
    }

    #[tokio::test]
    async fn test_proactive_then_request() {
        let cluster = Arc::new(SimulatedCluster::new(IAS_ZONE));
        let handle: Arc<dyn ClusterHandle> = cluster.clone();
        let enrollment = ZoneEnrollment::default();

        enrollment.enroll_proactively(&handle).await;
        assert_eq!(enrollment.state(), EnrollmentState::EnrollRequested);
        assert!(enrollment.last_enroll_attempt().is_some());

        assert!(enrollment.on_enroll_request(&handle).await);
        assert_eq!(enrollment.state(), EnrollmentState::Enrolled);

        let commands = cluster.commands();
        assert_eq!(commands.len(), 2);
        for (name, payload) in commands {
            assert_eq!(name, ZONE_ENROLL_RESPONSE);
            assert_eq!(payload["zoneId"], AttributeValue::Int(10));
            assert_eq!(payload["enrollResponseCode"], AttributeValue::Int(0));
        }
    }

    #[tokio::test]
    async fn test_duplicate_requests_enroll_once() {
        let cluster = Arc::new(SimulatedCluster::new(IAS_ZONE));
        let handle: Arc<dyn ClusterHandle> = cluster.clone();
        let enrollment = ZoneEnrollment::default();

        let transitions = [
            enrollment.on_enroll_request(&handle).await,
            enrollment.on_enroll_request(&handle).await,
            enrollment.on_enroll_request(&handle).await,
        ];
        assert_eq!(transitions, [true, false, false]);
        assert_eq!(enrollment.state(), EnrollmentState::Enrolled);
        assert_eq!(enrollment.responses_sent(), 3);
    }

    #[tokio::test]
    async fn test_cie_address_written_when_unset() {
        let cluster = Arc::new(
            SimulatedCluster::new(IAS_ZONE)
                .with_attribute(CIE_ADDRESS_ATTRIBUTE, AttributeValue::Bytes(vec![0; 8])),
        );
        let handle: Arc<dyn ClusterHandle> = cluster.clone();
        let enrollment = ZoneEnrollment::default();

        assert_eq!(
            enrollment.write_cie_address(&handle, 0x0012_4B00_0102_0304).await,
            Ok(true)
        );
        assert_eq!(
            cluster.attribute(CIE_ADDRESS_ATTRIBUTE),
            Some(AttributeValue::Bytes(vec![
                0x04, 0x03, 0x02, 0x01, 0x00, 0x4B, 0x12, 0x00
            ]))
        );

        // Now set, so a second call only reads.
        assert_eq!(
            enrollment.write_cie_address(&handle, 0x0012_4B00_0102_0304).await,
            Ok(false)
        );
        assert_eq!(cluster.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_cie_write_failure_is_returned() {
        let cluster = Arc::new(SimulatedCluster::new(IAS_ZONE));
        cluster.fail_reads(true);
        cluster.fail_writes(true);
        let handle: Arc<dyn ClusterHandle> = cluster.clone();
        let enrollment = ZoneEnrollment::default();
        assert!(enrollment.write_cie_address(&handle, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_sends_do_not_advance() {
        let cluster = Arc::new(SimulatedCluster::new(IAS_ZONE));
        cluster.fail_commands(true);
        let handle: Arc<dyn ClusterHandle> = cluster.clone();
        let enrollment = ZoneEnrollment::new(23, ENROLL_SUCCESS);

        enrollment.enroll_proactively(&handle).await;
        assert_eq!(enrollment.state(), EnrollmentState::NotEnrolled);
        assert!(!enrollment.on_enroll_request(&handle).await);
        assert_eq!(enrollment.state(), EnrollmentState::NotEnrolled);

        cluster.fail_commands(false);
        assert!(enrollment.on_enroll_request(&handle).await);
        assert_eq!(enrollment.zone_id(), 23);
    }
}
