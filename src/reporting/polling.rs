//! Interval polling for bindings whose device does not report on its own.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

use crate::capability::{CapabilityBinding, CapabilityValue};
use crate::error::{ClusterError, LayerError, Result};
use crate::session::timers::TimerSet;
use crate::zcl::ClusterHandle;

/// Receiver of poll outcomes, normally the owning session.
#[async_trait]
pub trait PollTarget: Send + Sync {
    async fn on_poll_result(&self, capability_id: &str, result: Result<Option<CapabilityValue>>);
}

/// Read the binding's get attribute once and parse it.
pub async fn poll_once(
    binding: &CapabilityBinding,
    handle: &dyn ClusterHandle,
) -> Result<Option<CapabilityValue>> {
    let Some(attribute) = binding.get_attribute.as_deref() else {
        return Ok(None);
    };
    let mut values = handle.read_attributes(&[attribute]).await?;
    let raw = values
        .remove(attribute)
        .ok_or_else(|| LayerError::Cluster(ClusterError::MissingAttribute(attribute.to_string())))?;
    Ok(binding.get_parser.parse(&raw)?)
}

/// One recurring poll timer per capability.
#[derive(Debug, Default)]
pub struct PollingScheduler {
    timers: TimerSet,
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling `binding` at its poll interval, replacing an earlier
    /// timer for the same capability.
    ///
    /// The first read happens one full interval after scheduling.
    pub fn schedule(
        &self,
        binding: &CapabilityBinding,
        handle: Arc<dyn ClusterHandle>,
        target: Arc<dyn PollTarget>,
    ) -> bool {
        let (Some(interval), Some(attribute)) = (binding.poll_interval, &binding.get_attribute)
        else {
            return false;
        };
        log::info!(
            "[Poll] {} every {:?} (0x{:04X}/{})",
            binding.capability_id,
            interval,
            binding.cluster_id,
            attribute
        );

        let binding = binding.clone();
        self.timers.spawn_keyed(binding.capability_id.clone(), async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let result = poll_once(&binding, handle.as_ref()).await;
                if let Err(e) = &result {
                    log::debug!("[Poll] {} read failed: {}", binding.capability_id, e);
                }
                target.on_poll_result(&binding.capability_id, result).await;
            }
        })
    }

    pub fn cancel(&self, capability_id: &str) -> bool {
        self.timers.cancel(capability_id)
    }

    /// Stop every poll timer. Idempotent.
    pub fn cancel_all(&self) -> bool {
        self.timers.cancel_all()
    }

    pub fn is_scheduled(&self, capability_id: &str) -> bool {
        self.timers.is_active(capability_id)
    }

    pub fn active(&self) -> usize {
        self.timers.active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ValueParser;
    use crate::input::simulation::SimulatedCluster;
    use crate::zcl::{AttributeValue, POWER_CONFIGURATION};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Collector {
        results: Mutex<Vec<std::result::Result<Option<CapabilityValue>, String>>>,
    }

    #[async_trait]
    impl PollTarget for Collector {
        async fn on_poll_result(&self, _capability_id: &str, result: Result<Option<CapabilityValue>>) {
            self.results.lock().push(result.map_err(|e| e.to_string()));
        }
    }

    fn battery_binding() -> CapabilityBinding {
        CapabilityBinding::new("measure_battery", POWER_CONFIGURATION)
            .with_get("batteryPercentageRemaining", ValueParser::BatteryPercentage)
            .with_poll_interval(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_poll_once() {
        let cluster = SimulatedCluster::new(POWER_CONFIGURATION)
            .with_attribute("batteryPercentageRemaining", AttributeValue::Int(136));
        let value = poll_once(&battery_binding(), &cluster).await.unwrap();
        assert_eq!(value, Some(CapabilityValue::Number(68.0)));
    }

    #[tokio::test]
    async fn test_poll_once_missing_attribute() {
        let cluster = SimulatedCluster::new(POWER_CONFIGURATION);
        let err = poll_once(&battery_binding(), &cluster).await.unwrap_err();
        assert!(matches!(
            err,
            LayerError::Cluster(ClusterError::MissingAttribute(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_polls_each_interval() {
        let cluster = Arc::new(
            SimulatedCluster::new(POWER_CONFIGURATION)
                .with_attribute("batteryPercentageRemaining", AttributeValue::Int(200)),
        );
        cluster.fail_next_reads(1);
        let collector = Arc::new(Collector::default());
        let scheduler = PollingScheduler::new();
        assert!(scheduler.schedule(&battery_binding(), cluster.clone(), collector.clone()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(cluster.read_count(), 0);

        tokio::time::sleep(Duration::from_secs(100)).await;
        let results = collector.results.lock().clone();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert_eq!(results[1], Ok(Some(CapabilityValue::Number(100.0))));

        assert!(scheduler.cancel_all());
        assert!(!scheduler.cancel_all());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(cluster.read_count(), 2);
    }

    #[tokio::test]
    async fn test_binding_without_interval_not_scheduled() {
        let scheduler = PollingScheduler::new();
        let binding = CapabilityBinding::new("onoff", 6).with_get("onOff", ValueParser::Boolean);
        let cluster: Arc<dyn ClusterHandle> = Arc::new(SimulatedCluster::new(6));
        assert!(!scheduler.schedule(&binding, cluster, Arc::new(Collector::default())));
        assert_eq!(scheduler.active(), 0);
    }
}
