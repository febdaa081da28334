//! Failure classification and per-binding failure runs.
//!
//! Every failure the layer does not propagate to a caller ends up here.
//! Cluster I/O failures are counted per context (usually a capability id);
//! once a context reaches the configured run length the failure is
//! [`Severity::Persistent`] and the owning session degrades. A success on the
//! same context clears its run.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use crate::error::LayerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Transient,
    Persistent,
    Fatal,
}

/// One recorded failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub context: String,
    pub message: String,
    pub severity: Severity,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<String, u32>,
    history: VecDeque<FailureRecord>,
}

#[derive(Debug)]
pub struct ErrorSink {
    threshold: u32,
    history_len: usize,
    inner: Mutex<Inner>,
}

impl ErrorSink {
    pub fn new(threshold: u32, history_len: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            history_len,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Classify and record a failure.
    pub fn record(&self, context: &str, error: &LayerError) -> Severity {
        let mut inner = self.inner.lock();
        let severity = match error {
            LayerError::MissingCluster(_)
            | LayerError::UnknownCluster(_)
            | LayerError::Validation { .. } => Severity::Fatal,
            LayerError::Cluster(_) => {
                let run = inner.runs.entry(context.to_string()).or_insert(0);
                *run += 1;
                if *run >= self.threshold {
                    Severity::Persistent
                } else {
                    Severity::Transient
                }
            }
            _ => Severity::Transient,
        };

        match severity {
            Severity::Fatal => log::error!("[Errors] {}: {}", context, error),
            Severity::Persistent => log::warn!(
                "[Errors] {}: {} ({} consecutive failures)",
                context,
                error,
                inner.runs.get(context).copied().unwrap_or_default()
            ),
            Severity::Transient => log::warn!("[Errors] {}: {}", context, error),
        }

        self.push(&mut inner, context, error, severity);
        severity
    }

    /// Record a failure of best-effort housekeeping (time sync, queries,
    /// CIE address writes). Never counts toward a failure run.
    pub fn record_transient(&self, context: &str, error: &LayerError) {
        log::warn!("[Errors] {}: {}", context, error);
        let mut inner = self.inner.lock();
        self.push(&mut inner, context, error, Severity::Transient);
    }

    fn push(&self, inner: &mut Inner, context: &str, error: &LayerError, severity: Severity) {
        if self.history_len == 0 {
            return;
        }
        if inner.history.len() == self.history_len {
            inner.history.pop_front();
        }
        inner.history.push_back(FailureRecord {
            context: context.to_string(),
            message: error.to_string(),
            severity,
            at: Utc::now(),
        });
    }

    /// Clear the failure run of `context`.
    ///
    /// Returns `true` when the run had reached the threshold.
    pub fn record_success(&self, context: &str) -> bool {
        match self.inner.lock().runs.remove(context) {
            Some(run) => run >= self.threshold,
            None => false,
        }
    }

    pub fn consecutive_failures(&self, context: &str) -> u32 {
        self.inner.lock().runs.get(context).copied().unwrap_or_default()
    }

    /// Whether any context is at or over the threshold.
    pub fn is_degraded(&self) -> bool {
        self.inner
            .lock()
            .runs
            .values()
            .any(|&run| run >= self.threshold)
    }

    /// Recent failures, oldest first.
    pub fn history(&self) -> Vec<FailureRecord> {
        self.inner.lock().history.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClusterError, ParseError};

    fn timeout() -> LayerError {
        ClusterError::Timeout("read".to_string()).into()
    }

    #[test]
    fn test_run_reaches_threshold() {
        let sink = ErrorSink::new(3, 16);
        assert_eq!(sink.record("measure_battery", &timeout()), Severity::Transient);
        assert_eq!(sink.record("measure_battery", &timeout()), Severity::Transient);
        assert!(!sink.is_degraded());
        assert_eq!(sink.record("measure_battery", &timeout()), Severity::Persistent);
        assert!(sink.is_degraded());
        assert_eq!(sink.consecutive_failures("measure_battery"), 3);
    }

    #[test]
    fn test_runs_are_per_context() {
        let sink = ErrorSink::new(2, 16);
        sink.record("a", &timeout());
        sink.record("b", &timeout());
        assert!(!sink.is_degraded());
        assert!(!sink.record_success("a"));
        assert_eq!(sink.record("b", &timeout()), Severity::Persistent);
    }

    #[test]
    fn test_success_clears_run() {
        let sink = ErrorSink::new(2, 16);
        sink.record("onoff", &timeout());
        sink.record("onoff", &timeout());
        assert!(sink.record_success("onoff"));
        assert!(!sink.is_degraded());
        assert_eq!(sink.record("onoff", &timeout()), Severity::Transient);
    }

    #[test]
    fn test_classification() {
        let sink = ErrorSink::new(1, 16);
        assert_eq!(
            sink.record("setup", &LayerError::MissingCluster(0x0500)),
            Severity::Fatal
        );
        let parse = LayerError::Parse(ParseError::Custom("bad".to_string()));
        assert_eq!(sink.record("alarm_motion", &parse), Severity::Transient);
        assert_eq!(sink.record("alarm_motion", &parse), Severity::Transient);
        assert!(!sink.is_degraded());
    }

    #[test]
    fn test_housekeeping_failures_never_degrade() {
        let sink = ErrorSink::new(1, 16);
        sink.record_transient("time_sync", &timeout());
        sink.record_transient("time_sync", &timeout());
        assert!(!sink.is_degraded());
        assert_eq!(sink.consecutive_failures("time_sync"), 0);
        assert_eq!(sink.history().len(), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let sink = ErrorSink::new(100, 2);
        sink.record("first", &timeout());
        sink.record("second", &timeout());
        sink.record("third", &timeout());
        let history = sink.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].context, "second");
        assert_eq!(history[1].context, "third");
        assert_eq!(history[1].severity.to_string(), "transient");
    }
}
