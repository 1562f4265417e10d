//! Test helpers.
//!
//! [`RecordingSink`] captures every sink notification so tests can assert on
//! the exact event sequence. Available to downstream crates through the
//! `testing` feature.

use std::sync::Mutex;

use crate::activity::Activity;
use crate::diagnostics::{CorrelationSink, StackAnomaly};

/// One captured sink notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    /// `activity_started`
    Started(String),
    /// `activity_stopped`
    Stopped(String),
    /// `activity_restored`
    Restored(String),
    /// `activity_lost`
    Lost(String),
    /// `restored_activity_stopped`
    RestoredStopped(String),
    /// `stack_anomaly`
    StackAnomaly {
        /// Id of the activity the anomaly was observed on.
        id: String,
        /// Its operation name.
        operation_name: String,
        /// The anomaly kind.
        kind: StackAnomaly,
    },
    /// `header_parse_failure`
    HeaderParseFailure {
        /// The header being parsed.
        header_name: String,
        /// The value that was skipped.
        raw_value: String,
    },
}

/// A [`CorrelationSink`] that records every notification.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    disabled: bool,
    operation_filter: Option<String>,
    veto_start: bool,
}

impl RecordingSink {
    /// A sink that reports no consumer attached.
    pub fn disabled() -> Self {
        RecordingSink {
            disabled: true,
            ..RecordingSink::default()
        }
    }

    /// A sink interested only in the given operation name.
    pub fn for_operation(operation_name: impl Into<String>) -> Self {
        RecordingSink {
            operation_filter: Some(operation_name.into()),
            ..RecordingSink::default()
        }
    }

    /// A sink that vetoes every activity start.
    pub fn vetoing() -> Self {
        RecordingSink {
            veto_start: true,
            ..RecordingSink::default()
        }
    }

    /// All captured events, in emission order.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.lock().clone()
    }

    /// The captured header parse failures as `(header_name, raw_value)`.
    pub fn header_parse_failures(&self) -> Vec<(String, String)> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::HeaderParseFailure {
                    header_name,
                    raw_value,
                } => Some((header_name.clone(), raw_value.clone())),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SinkEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, event: SinkEvent) {
        self.lock().push(event);
    }
}

impl CorrelationSink for RecordingSink {
    fn is_enabled(&self) -> bool {
        !self.disabled
    }

    fn is_operation_enabled(&self, operation_name: &str) -> bool {
        self.operation_filter
            .as_deref()
            .map_or(true, |filter| filter == operation_name)
    }

    fn should_start(&self, _activity: &Activity) -> bool {
        !self.veto_start
    }

    fn activity_started(&self, id: &str) {
        self.record(SinkEvent::Started(id.to_string()));
    }

    fn activity_stopped(&self, id: &str) {
        self.record(SinkEvent::Stopped(id.to_string()));
    }

    fn activity_restored(&self, id: &str) {
        self.record(SinkEvent::Restored(id.to_string()));
    }

    fn activity_lost(&self, id: &str) {
        self.record(SinkEvent::Lost(id.to_string()));
    }

    fn restored_activity_stopped(&self, id: &str) {
        self.record(SinkEvent::RestoredStopped(id.to_string()));
    }

    fn stack_anomaly(&self, id: &str, operation_name: &str, kind: StackAnomaly) {
        self.record(SinkEvent::StackAnomaly {
            id: id.to_string(),
            operation_name: operation_name.to_string(),
            kind,
        });
    }

    fn header_parse_failure(&self, header_name: &str, raw_value: &str) {
        self.record(SinkEvent::HeaderParseFailure {
            header_name: header_name.to_string(),
            raw_value: raw_value.to_string(),
        });
    }
}
