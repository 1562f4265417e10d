//! Advisory diagnostics emitted by the reconciliation engine.
//!
//! The engine notifies a [`CorrelationSink`] about activity lifecycle events
//! and anomalies. Delivery is best-effort: the engine calls the sink but never
//! depends on delivery succeeding, and no sink method may fail.
//!
//! The sink also carries the enablement predicates that gate root creation.
//! They are injected per engine instead of living in process-wide listener
//! state, so enablement is testable in isolation and independent engine
//! instances do not interfere.

use crate::activity::Activity;

/// The kind of stack anomaly observed while unwinding at end-of-request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum StackAnomaly {
    /// The unwind loop hit its iteration bound, indicating a cycle or a
    /// pathologically deep ambient stack.
    TooDeep,
    /// Stopping the current activity had no observable effect: it was already
    /// finished by a different execution context.
    FinishedActivity,
}

/// Receiver for engine notifications, plus the enablement predicates that
/// gate span creation.
///
/// All notification methods default to no-ops so sinks implement only what
/// they consume. The enablement predicates default to "interested", matching
/// a consumer that attached without filters.
pub trait CorrelationSink: Send + Sync {
    /// Coarse filter: is any consumer attached at all?
    ///
    /// When this returns `false` the engine skips extraction and span
    /// construction entirely.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Fine filter: is this specific named operation of interest?
    fn is_operation_enabled(&self, operation_name: &str) -> bool {
        let _ = operation_name;
        true
    }

    /// Last-chance veto, given the fully seeded but unstarted activity.
    fn should_start(&self, activity: &Activity) -> bool {
        let _ = activity;
        true
    }

    /// A root activity was started.
    fn activity_started(&self, id: &str) {
        let _ = id;
    }

    /// The root activity was stopped normally at end-of-request.
    fn activity_stopped(&self, id: &str) {
        let _ = id;
    }

    /// A lost ambient pointer was restored to the given activity.
    fn activity_restored(&self, id: &str) {
        let _ = id;
    }

    /// The root activity could not be found on the ambient stack at
    /// end-of-request.
    fn activity_lost(&self, id: &str) {
        let _ = id;
    }

    /// The activity recorded to patch a lost ambient pointer was stopped.
    ///
    /// Under the synthetic-child restore strategy this is a different span
    /// than the root and gets its own stop notification.
    fn restored_activity_stopped(&self, id: &str) {
        let _ = id;
    }

    /// The end-of-request unwind observed a structural anomaly.
    fn stack_anomaly(&self, id: &str, operation_name: &str, kind: StackAnomaly) {
        let _ = (id, operation_name, kind);
    }

    /// An individual header value could not be parsed and was skipped.
    fn header_parse_failure(&self, header_name: &str, raw_value: &str) {
        let _ = (header_name, raw_value);
    }
}

/// A sink with no consumer attached.
///
/// Reports `is_enabled() == false`, so an engine wired to it creates no
/// activities at all. This is the default sink.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl CorrelationSink for NoopSink {
    fn is_enabled(&self) -> bool {
        false
    }
}
