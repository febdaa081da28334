//! Simulated device input for development and testing.
//!
//! [`SimulatedCluster`] stands in for a paired endpoint's cluster handle and
//! records every call made through it. [`RecordingSink`] captures capability
//! updates. [`run_zone_simulation`] periodically flips an IAS Zone alarm the
//! way a motion sensor would.

use async_trait::async_trait;
use log::info;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capability::{CapabilitySink, CapabilityValue};
use crate::error::{ClusterError, SinkError};
use crate::zcl::{AttributeValue, ClusterEvent, ClusterHandle, CommandPayload, ReportingConfig};

/// A call received by a [`SimulatedCluster`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterCall {
    Read(Vec<String>),
    Write(HashMap<String, AttributeValue>),
    Command(String, CommandPayload),
    ConfigureReporting(String, ReportingConfig),
}

/// In-memory cluster handle.
pub struct SimulatedCluster {
    cluster_id: u16,
    attributes: Mutex<HashMap<String, AttributeValue>>,
    calls: Mutex<Vec<ClusterCall>>,
    fail_reads: AtomicBool,
    fail_next_reads: AtomicU32,
    fail_writes: AtomicBool,
    fail_commands: AtomicBool,
    fail_reporting: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl SimulatedCluster {
    pub fn new(cluster_id: u16) -> Self {
        Self {
            cluster_id,
            attributes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_next_reads: AtomicU32::new(0),
            fail_writes: AtomicBool::new(false),
            fail_commands: AtomicBool::new(false),
            fail_reporting: AtomicBool::new(false),
            latency: Mutex::new(None),
        }
    }

    pub fn with_attribute(self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn cluster_id(&self) -> u16 {
        self.cluster_id
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: AttributeValue) {
        self.attributes.lock().insert(name.into(), value);
    }

    pub fn attribute(&self, name: &str) -> Option<AttributeValue> {
        self.attributes.lock().get(name).cloned()
    }

    /// Fail every read until switched off.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Fail only the next `count` reads.
    pub fn fail_next_reads(&self, count: u32) {
        self.fail_next_reads.store(count, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reporting(&self, fail: bool) {
        self.fail_reporting.store(fail, Ordering::SeqCst);
    }

    /// Delay every call, as a sleepy end device would.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.calls.lock().clone()
    }

    pub fn commands(&self) -> Vec<(String, CommandPayload)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ClusterCall::Command(name, payload) => Some((name.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<HashMap<String, AttributeValue>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ClusterCall::Write(values) => Some(values.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reporting_requests(&self) -> Vec<(String, ReportingConfig)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ClusterCall::ConfigureReporting(attr, config) => Some((attr.clone(), *config)),
                _ => None,
            })
            .collect()
    }

    pub fn read_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, ClusterCall::Read(_)))
            .count()
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_read_failure(&self) -> bool {
        if self.fail_reads.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ClusterHandle for SimulatedCluster {
    async fn read_attributes(
        &self,
        names: &[&str],
    ) -> Result<HashMap<String, AttributeValue>, ClusterError> {
        self.calls
            .lock()
            .push(ClusterCall::Read(names.iter().map(|n| n.to_string()).collect()));
        self.delay().await;
        if self.take_read_failure() {
            return Err(ClusterError::Timeout(format!(
                "read {:?} on 0x{:04X}",
                names, self.cluster_id
            )));
        }
        let attributes = self.attributes.lock();
        let mut values = HashMap::new();
        for name in names {
            if let Some(value) = attributes.get(*name) {
                values.insert(name.to_string(), value.clone());
            }
        }
        Ok(values)
    }

    async fn write_attributes(
        &self,
        values: HashMap<String, AttributeValue>,
    ) -> Result<(), ClusterError> {
        self.calls.lock().push(ClusterCall::Write(values.clone()));
        self.delay().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ClusterError::Rejected {
                status: 0x88,
                message: format!("read only on 0x{:04X}", self.cluster_id),
            });
        }
        self.attributes.lock().extend(values);
        Ok(())
    }

    async fn invoke_command(
        &self,
        name: &str,
        payload: CommandPayload,
    ) -> Result<(), ClusterError> {
        self.calls
            .lock()
            .push(ClusterCall::Command(name.to_string(), payload));
        self.delay().await;
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(ClusterError::Timeout(format!("command {}", name)));
        }
        Ok(())
    }

    async fn configure_reporting(
        &self,
        attribute: &str,
        config: &ReportingConfig,
    ) -> Result<(), ClusterError> {
        self.calls.lock().push(ClusterCall::ConfigureReporting(
            attribute.to_string(),
            *config,
        ));
        self.delay().await;
        if self.fail_reporting.load(Ordering::SeqCst) {
            return Err(ClusterError::Rejected {
                status: 0x86,
                message: format!("unsupported attribute {}", attribute),
            });
        }
        Ok(())
    }
}

/// Capability sink that keeps every update in memory.
#[derive(Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<(String, CapabilityValue)>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn updates(&self) -> Vec<(String, CapabilityValue)> {
        self.updates.lock().clone()
    }

    /// Most recent value set for a capability.
    pub fn last(&self, capability_id: &str) -> Option<CapabilityValue> {
        self.updates
            .lock()
            .iter()
            .rev()
            .find(|(id, _)| id == capability_id)
            .map(|(_, v)| v.clone())
    }

    pub fn values_for(&self, capability_id: &str) -> Vec<CapabilityValue> {
        self.updates
            .lock()
            .iter()
            .filter(|(id, _)| id == capability_id)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

#[async_trait]
impl CapabilitySink for RecordingSink {
    async fn set_capability_value(
        &self,
        capability_id: &str,
        value: CapabilityValue,
    ) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError {
                capability: capability_id.to_string(),
                message: "device unavailable".to_string(),
            });
        }
        info!("[Sim] {} = {}", capability_id, value);
        self.updates
            .lock()
            .push((capability_id.to_string(), value));
        Ok(())
    }
}

/// Spawn a task that sends one Zone Enroll Request, then toggles the IAS
/// Zone alarm through status change notifications every `period`.
///
/// # Returns
///
/// A `JoinHandle` that can be used to abort the simulation task.
pub fn run_zone_simulation(
    events: mpsc::Sender<ClusterEvent>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if events
            .send(ClusterEvent::ZoneEnrollRequest {
                zone_type: 0x000D,
                manufacturer_code: 0x1141,
            })
            .await
            .is_err()
        {
            return;
        }
        let mut interval = tokio::time::interval(period);
        let mut alarm = false;
        loop {
            interval.tick().await;
            alarm = !alarm;
            info!("[Sim] Zone alarm toggled to: {}", alarm);
            let event = ClusterEvent::ZoneStatusChangeNotification {
                zone_status: u16::from(alarm),
                extended_status: 0,
            };
            if events.send(event).await.is_err() {
                break;
            }
        }
    })
}
