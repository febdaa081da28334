//! One paired device endpoint and everything bound to it.
//!
//! A [`DeviceSession`] owns the cluster handles handed over at pairing, the
//! capability bindings and datapoint handlers registered during setup, and
//! every timer and listener started by [`DeviceSession::initialize`].
//! Inbound cluster events are applied strictly in arrival order. After
//! [`DeviceSession::teardown`] nothing runs and late events are dropped.

pub mod timers;

pub use timers::TimerSet;

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::capability::{
    CapabilityBinding, CapabilityRegistry, CapabilitySink, CapabilityValue, SetPath,
};
use crate::config::Config;
use crate::error::{FrameError, LayerError, Result};
use crate::error_sink::{ErrorSink, Severity};
use crate::ias::{EnrollmentState, ZoneEnrollment, ZoneStatus};
use crate::reporting::{self, PollTarget, PollingScheduler};
use crate::tuya::time_sync::{TIME_SYNC_DATAPOINT, next_resync_delay, time_sync_payload};
use crate::tuya::{
    self, DATA_QUERY_COMMAND, DATA_REQUEST_COMMAND, DATAPOINT_ARGUMENT, DataType,
    DatapointDispatchTable, DatapointHandler, DatapointValue, DispatchOutcome, FRAME_ARGUMENT,
};
use crate::zcl::{
    AttributeReportEvent, AttributeValue, ClusterEvent, ClusterHandle, CommandPayload, IAS_ZONE,
    TUYA_DATAPOINTS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum SessionState {
    Initializing,
    Ready,
    /// Sustained failures on at least one binding. Last values are kept.
    Degraded,
    Deleted,
}

/// Cloneable handle to a device session.
#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    endpoint: u8,
    config: Arc<Config>,
    clusters: HashMap<u16, Arc<dyn ClusterHandle>>,
    registry: RwLock<CapabilityRegistry>,
    datapoints: RwLock<DatapointDispatchTable>,
    sink: Arc<dyn CapabilitySink>,
    state: Mutex<SessionState>,
    init_started: AtomicBool,
    enrollment: ZoneEnrollment,
    errors: ErrorSink,
    polling: PollingScheduler,
    timers: TimerSet,
    event_order: tokio::sync::Mutex<()>,
    transaction_id: AtomicU8,
    events_tx: mpsc::Sender<ClusterEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ClusterEvent>>>,
}

impl DeviceSession {
    pub fn new(
        endpoint: u8,
        clusters: HashMap<u16, Arc<dyn ClusterHandle>>,
        sink: Arc<dyn CapabilitySink>,
        config: Arc<Config>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.session.event_channel_capacity.max(1));
        let inner = SessionInner {
            id: Uuid::new_v4(),
            endpoint,
            clusters,
            registry: RwLock::new(CapabilityRegistry::new()),
            datapoints: RwLock::new(DatapointDispatchTable::new()),
            sink,
            state: Mutex::new(SessionState::Initializing),
            init_started: AtomicBool::new(false),
            enrollment: ZoneEnrollment::new(
                config.enrollment.zone_id,
                config.enrollment.response_code,
            ),
            errors: ErrorSink::new(
                config.polling.failure_threshold,
                config.session.failure_history,
            ),
            polling: PollingScheduler::new(),
            timers: TimerSet::new(),
            event_order: tokio::sync::Mutex::new(()),
            transaction_id: AtomicU8::new(0),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn endpoint(&self) -> u8 {
        self.inner.endpoint
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    pub fn enrollment_state(&self) -> EnrollmentState {
        self.inner.enrollment.state()
    }

    pub fn errors(&self) -> &ErrorSink {
        &self.inner.errors
    }

    pub fn is_polling(&self, capability_id: &str) -> bool {
        self.inner.polling.is_scheduled(capability_id)
    }

    /// Poll timers, reset timers and the event listener still running.
    pub fn active_timers(&self) -> usize {
        self.inner.polling.active() + self.inner.timers.active()
    }

    /// Sender for inbound cluster events. Events queued before
    /// [`DeviceSession::initialize`] are applied once it has run.
    pub fn event_sender(&self) -> mpsc::Sender<ClusterEvent> {
        self.inner.events_tx.clone()
    }

    /// Add or replace a capability binding. Only allowed before
    /// [`DeviceSession::initialize`].
    pub fn register(&self, binding: CapabilityBinding) -> Result<()> {
        self.inner.ensure_configurable()?;
        debug!(
            "[Session] {} register {} on 0x{:04X}",
            self.inner.id, binding.capability_id, binding.cluster_id
        );
        self.inner.registry.write().register(binding)
    }

    /// Add or replace the handler for a Tuya datapoint id.
    pub fn register_datapoint(&self, datapoint_id: u8, handler: DatapointHandler) -> Result<()> {
        self.inner.ensure_configurable()?;
        if datapoint_id == 0 {
            return Err(FrameError::ReservedDatapoint.into());
        }
        self.inner.datapoints.write().register(datapoint_id, handler);
        Ok(())
    }

    /// Bring the session up.
    ///
    /// Order: cluster check, IAS Zone CIE address and proactive enrollment,
    /// reporting negotiation, Tuya time sync and datapoint query, poll
    /// timers, daily time resync, event listener. Every device exchange
    /// shares the configured init timeout; running out of time is logged and
    /// the session still becomes ready.
    ///
    /// A binding whose cluster has no handle is fatal: the error is returned
    /// from this call and the session never becomes ready.
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        if inner.init_started.swap(true, Ordering::SeqCst) {
            return Err(LayerError::AlreadyInitialized);
        }

        let (bindings, mut required) = {
            let registry = inner.registry.read();
            (registry.iter().cloned().collect::<Vec<_>>(), registry.clusters())
        };
        if !inner.datapoints.read().is_empty() {
            required.insert(TUYA_DATAPOINTS);
        }
        if let Some(&missing) = required.iter().find(|id| !inner.clusters.contains_key(id)) {
            let err = LayerError::MissingCluster(missing);
            inner.errors.record("setup", &err);
            return Err(err);
        }

        info!(
            "[Session] {} initializing endpoint {} with {} binding(s)",
            inner.id,
            inner.endpoint,
            bindings.len()
        );
        let deadline = Instant::now() + inner.config.session.init_timeout();

        if required.contains(&IAS_ZONE)
            && let Some(handle) = inner.clusters.get(&IAS_ZONE)
        {
            // Held so no inbound event overtakes the proactive response
            let _order = inner.event_order.lock().await;
            let enroll = async {
                if let Some(address) = inner.config.enrollment.cie_address()
                    && let Err(e) = inner.enrollment.write_cie_address(handle, address).await
                {
                    inner.errors.record_transient("ias/cie_address", &e.into());
                }
                inner.enrollment.enroll_proactively(handle).await;
            };
            if tokio::time::timeout_at(deadline, enroll).await.is_err() {
                warn!("[IASZone] Proactive enrollment timed out");
            }
        }

        if tokio::time::timeout_at(
            deadline,
            reporting::negotiate(&bindings, &inner.clusters, &inner.errors),
        )
        .await
        .is_err()
        {
            warn!(
                "[Reporting] Negotiation for {} did not finish within {:?}",
                inner.id,
                inner.config.session.init_timeout()
            );
        }

        if inner.clusters.contains_key(&TUYA_DATAPOINTS) {
            let tuya = &inner.config.tuya;
            let exchange = async {
                if tuya.time_sync_on_init {
                    inner.send_time_sync().await;
                }
                if tuya.query_on_init {
                    inner.query_datapoints().await;
                }
            };
            if tokio::time::timeout_at(deadline, exchange).await.is_err() {
                warn!("[Tuya] Init exchange did not finish before the init timeout");
            }
            if tuya.daily_resync {
                inner.timers.spawn_keyed(
                    DAILY_RESYNC_KEY,
                    daily_resync(Arc::downgrade(inner), tuya.resync_hour),
                );
            }
        }

        let target: Arc<dyn PollTarget> = Arc::new(SessionRef(Arc::downgrade(inner)));
        for binding in bindings.iter().filter(|b| b.poll_interval.is_some()) {
            if let Some(handle) = inner.clusters.get(&binding.cluster_id) {
                inner
                    .polling
                    .schedule(binding, handle.clone(), target.clone());
            }
        }

        if let Some(rx) = inner.events_rx.lock().take() {
            inner.timers.spawn(listen(Arc::downgrade(inner), rx));
        }

        let mut state = inner.state.lock();
        if *state == SessionState::Deleted {
            return Err(LayerError::SessionDeleted(inner.id));
        }
        *state = if inner.errors.is_degraded() {
            SessionState::Degraded
        } else {
            SessionState::Ready
        };
        info!("[Session] {} is {}", inner.id, *state);
        Ok(())
    }

    /// Apply one inbound event. Dropped silently once the session is deleted.
    ///
    /// Before [`DeviceSession::initialize`] has started the listener the
    /// event is queued behind the init exchange, like events sent through
    /// [`DeviceSession::event_sender`].
    pub async fn handle_event(&self, event: ClusterEvent) {
        let inner = &self.inner;
        if !inner.is_deleted() && inner.events_rx.lock().is_some() {
            debug!("[Session] {} not listening yet, queueing {:?}", inner.id, event);
            if let Err(e) = inner.events_tx.try_send(event) {
                warn!("[Session] {} dropping early event: {}", inner.id, e);
            }
            return;
        }
        inner.handle_event(event).await;
    }

    /// Write a capability value to the device through its set path, or
    /// through its Tuya datapoint when the capability is datapoint-backed.
    pub async fn set_capability(&self, capability_id: &str, value: CapabilityValue) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_alive()?;

        let target = inner
            .registry
            .read()
            .get(capability_id)
            .ok()
            .and_then(|b| {
                b.set_path
                    .clone()
                    .map(|path| (b.cluster_id, path, b.set_parser.clone()))
            });
        if let Some((cluster_id, path, parser)) = target {
            let raw = parser.parse(&value)?;
            let handle = inner.handle(cluster_id)?;
            let sent = match path {
                SetPath::Attribute(attribute) => {
                    handle
                        .write_attributes(HashMap::from([(attribute, raw)]))
                        .await
                }
                SetPath::Command { name, argument } => {
                    let mut payload = CommandPayload::new();
                    if let Some(argument) = argument {
                        payload.insert(argument, raw);
                    }
                    handle.invoke_command(&name, payload).await
                }
            };
            inner.track(capability_id, sent.map_err(LayerError::from))?;
            info!("[Session] {} set to {}", capability_id, value);
            return Ok(());
        }

        let datapoint = inner
            .datapoints
            .read()
            .find_capability(capability_id)
            .map(|(dp, h)| (dp, h.data_type, h.set_parser.clone()));
        match datapoint {
            Some((dp, data_type, Some(parser))) => {
                let raw = parser.parse(&value)?;
                let dp_value = DatapointValue::from_attribute(data_type, &raw)?;
                let sent = inner.send_datapoint(dp, data_type, dp_value).await;
                inner.track(capability_id, sent)?;
                info!("[Tuya] {} set to {} via dp {}", capability_id, value, dp);
                Ok(())
            }
            Some((_, _, None)) => Err(LayerError::NotWritable(capability_id.to_string())),
            None => {
                let bound = inner.registry.read().get(capability_id).is_ok();
                if bound {
                    Err(LayerError::NotWritable(capability_id.to_string()))
                } else {
                    Err(LayerError::NotFound(capability_id.to_string()))
                }
            }
        }
    }

    /// Send one datapoint to the device with `dataRequest`. Failures count
    /// toward the `dp<id>` failure run.
    ///
    /// Returns the transaction id used; ids wrap after 255.
    pub async fn write_datapoint(
        &self,
        datapoint_id: u8,
        data_type: DataType,
        value: DatapointValue,
    ) -> Result<u8> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        let sent = inner.send_datapoint(datapoint_id, data_type, value).await;
        inner.track(&format!("dp{}", datapoint_id), sent)
    }

    /// Cancel every timer and listener and mark the session deleted.
    ///
    /// Returns `false` if the session was already deleted.
    pub fn teardown(&self) -> bool {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if *state == SessionState::Deleted {
                return false;
            }
            *state = SessionState::Deleted;
        }
        inner.polling.cancel_all();
        inner.timers.cancel_all();
        info!("[Session] {} deleted", inner.id);
        true
    }
}

impl SessionInner {
    fn is_deleted(&self) -> bool {
        *self.state.lock() == SessionState::Deleted
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_deleted() {
            return Err(LayerError::SessionDeleted(self.id));
        }
        Ok(())
    }

    fn ensure_configurable(&self) -> Result<()> {
        self.ensure_alive()?;
        if self.init_started.load(Ordering::SeqCst) {
            return Err(LayerError::AlreadyInitialized);
        }
        Ok(())
    }

    /// Count an I/O outcome against `context` and move between Ready and
    /// Degraded accordingly.
    fn track<T>(&self, context: &str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                if self.errors.record_success(context) {
                    self.recover();
                }
            }
            Err(e) => {
                if self.errors.record(context, e) == Severity::Persistent {
                    self.degrade(context);
                }
            }
        }
        result
    }

    async fn send_datapoint(
        &self,
        datapoint_id: u8,
        data_type: DataType,
        value: DatapointValue,
    ) -> Result<u8> {
        let handle = self.handle(TUYA_DATAPOINTS)?;
        let transaction_id = self.transaction_id.fetch_add(1, Ordering::SeqCst);
        let frame = tuya::encode(transaction_id, datapoint_id, data_type, &value)?;
        debug!(
            "[Tuya] dataRequest tid {} dp {}: {}",
            transaction_id,
            datapoint_id,
            hex::encode(&frame)
        );

        let mut payload = CommandPayload::new();
        payload.insert(FRAME_ARGUMENT.to_string(), AttributeValue::Bytes(frame));
        handle.invoke_command(DATA_REQUEST_COMMAND, payload).await?;
        Ok(transaction_id)
    }

    async fn send_time_sync(&self) {
        let payload = time_sync_payload(chrono::Local::now().naive_local());
        info!("[Tuya] Sending time sync");
        let sent = self
            .send_datapoint(
                TIME_SYNC_DATAPOINT,
                DataType::Raw,
                DatapointValue::Raw(payload.to_vec()),
            )
            .await;
        if let Err(e) = sent {
            self.errors.record_transient("time_sync", &e);
        }
    }

    /// Ask the device to report every mapped datapoint.
    async fn query_datapoints(&self) {
        let ids = self.datapoints.read().datapoint_ids();
        if ids.is_empty() {
            return;
        }
        let Ok(handle) = self.handle(TUYA_DATAPOINTS) else {
            return;
        };
        info!("[Tuya] Querying {} datapoint(s)", ids.len());
        for dp in ids {
            let mut payload = CommandPayload::new();
            payload.insert(
                DATAPOINT_ARGUMENT.to_string(),
                AttributeValue::Int(i64::from(dp)),
            );
            if let Err(e) = handle.invoke_command(DATA_QUERY_COMMAND, payload).await {
                self.errors.record_transient("tuya/query", &e.into());
            }
        }
    }

    fn handle(&self, cluster_id: u16) -> Result<Arc<dyn ClusterHandle>> {
        self.clusters
            .get(&cluster_id)
            .cloned()
            .ok_or(LayerError::MissingCluster(cluster_id))
    }

    async fn handle_event(&self, event: ClusterEvent) {
        if self.is_deleted() {
            debug!("[Session] {} deleted, dropping {:?}", self.id, event);
            return;
        }
        let _order = self.event_order.lock().await;
        if self.is_deleted() {
            return;
        }

        match event {
            ClusterEvent::AttributeReport(report) => self.apply_report(&report).await,
            ClusterEvent::ZoneEnrollRequest {
                zone_type,
                manufacturer_code,
            } => {
                debug!(
                    "[IASZone] Enroll request (zone type 0x{:04X}, manufacturer 0x{:04X})",
                    zone_type, manufacturer_code
                );
                match self.clusters.get(&IAS_ZONE) {
                    Some(handle) => {
                        self.enrollment.on_enroll_request(handle).await;
                    }
                    None => warn!("[IASZone] Enroll request but no IAS Zone handle"),
                }
            }
            ClusterEvent::ZoneStatusChangeNotification {
                zone_status,
                extended_status,
            } => {
                let status = ZoneStatus(zone_status);
                debug!(
                    "[IASZone] Status 0x{:04X} (alarm: {}, alarm2: {}, tamper: {}, battery low: {}, extended: {})",
                    zone_status,
                    status.alarm(),
                    status.alarm2(),
                    status.tamper(),
                    status.battery_low(),
                    extended_status
                );
                self.apply_report(&status.to_report_event()).await;
            }
            ClusterEvent::DatapointReport(bytes) => self.apply_datapoints(&bytes).await,
        }
    }

    async fn apply_report(&self, report: &AttributeReportEvent) {
        let routed = reporting::route(&self.registry.read(), report);
        for (capability_id, error) in routed.failures {
            self.errors.record(&capability_id, &error.into());
        }
        for (capability_id, value) in routed.updates {
            self.push_update(&capability_id, value).await;
        }
    }

    async fn apply_datapoints(&self, bytes: &[u8]) {
        let frames = match tuya::decode_all(bytes) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("[Tuya] Dropping frame {}: {}", hex::encode(bytes), e);
                self.errors.record("tuya", &e.into());
                return;
            }
        };

        for frame in frames {
            if frame.is_unparsed() {
                debug!(
                    "[Tuya] dp {} has unknown data type {}",
                    frame.datapoint_id, frame.data_type
                );
            }
            let outcome = self
                .datapoints
                .read()
                .dispatch(frame.datapoint_id, &frame.value);
            match outcome {
                DispatchOutcome::Update {
                    capability_id,
                    value,
                } => self.push_update(&capability_id, value).await,
                DispatchOutcome::ParseFailed {
                    capability_id,
                    error,
                } => {
                    self.errors.record(&capability_id, &error.into());
                }
                DispatchOutcome::NoUpdate { .. } | DispatchOutcome::Unmapped => {}
            }
        }
    }

    async fn push_update(&self, capability_id: &str, value: CapabilityValue) {
        let auto_reset = self
            .registry
            .read()
            .get(capability_id)
            .ok()
            .and_then(|b| b.auto_reset);

        if let Err(e) = self
            .sink
            .set_capability_value(capability_id, value.clone())
            .await
        {
            self.errors.record(capability_id, &e.into());
            return;
        }

        if let Some(delay) = auto_reset {
            match value {
                CapabilityValue::Bool(true) => self.schedule_reset(capability_id, delay),
                _ => {
                    self.timers.cancel(&reset_key(capability_id));
                }
            }
        }
    }

    fn schedule_reset(&self, capability_id: &str, delay: Duration) {
        let sink = self.sink.clone();
        let capability_id = capability_id.to_string();
        self.timers
            .spawn_keyed(reset_key(&capability_id), async move {
                tokio::time::sleep(delay).await;
                debug!("[Session] Auto-reset {}", capability_id);
                if let Err(e) = sink
                    .set_capability_value(&capability_id, CapabilityValue::Bool(false))
                    .await
                {
                    warn!("[Session] Auto-reset of {} failed: {}", capability_id, e);
                }
            });
    }

    fn degrade(&self, capability_id: &str) {
        let mut state = self.state.lock();
        if *state == SessionState::Ready {
            *state = SessionState::Degraded;
            warn!(
                "[Session] {} degraded: {} failed {} times in a row",
                self.id,
                capability_id,
                self.errors.consecutive_failures(capability_id)
            );
        }
    }

    fn recover(&self) {
        let mut state = self.state.lock();
        if *state == SessionState::Degraded && !self.errors.is_degraded() {
            *state = SessionState::Ready;
            info!("[Session] {} recovered", self.id);
        }
    }
}

const DAILY_RESYNC_KEY: &str = "tuya:daily_resync";

fn reset_key(capability_id: &str) -> String {
    format!("reset:{}", capability_id)
}

/// Resend the time every day at `hour` local time.
async fn daily_resync(session: Weak<SessionInner>, hour: u32) {
    loop {
        let delay = next_resync_delay(chrono::Local::now().naive_local(), hour)
            .max(Duration::from_secs(60));
        info!("[Tuya] Next time sync in {}h", (delay.as_secs() + 1800) / 3600);
        tokio::time::sleep(delay).await;
        let Some(inner) = session.upgrade() else {
            break;
        };
        if inner.is_deleted() {
            break;
        }
        inner.send_time_sync().await;
    }
}

async fn listen(session: Weak<SessionInner>, mut rx: mpsc::Receiver<ClusterEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        inner.handle_event(event).await;
    }
}

/// Poll target that does not keep the session alive.
struct SessionRef(Weak<SessionInner>);

#[async_trait]
impl PollTarget for SessionRef {
    async fn on_poll_result(&self, capability_id: &str, result: Result<Option<CapabilityValue>>) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        if inner.is_deleted() {
            return;
        }
        if let Ok(Some(value)) = inner.track(capability_id, result) {
            inner.push_update(capability_id, value).await;
        }
    }
}
