//! The ambient-stack reconciliation engine.
//!
//! One [`CorrelationEngine`] serves a host pipeline. The host wires three
//! entry points into its request lifecycle:
//!
//! * [`CorrelationEngine::create_root`] at request start: seeds and starts
//!   the root activity from the inbound headers.
//! * [`CorrelationEngine::restore_if_needed`] at each pipeline stage start:
//!   detects a lost ambient pointer and patches it. Idempotent; zero or more
//!   calls per request.
//! * [`CorrelationEngine::stop`] at request end, exactly once: unwinds
//!   whatever the ambient stack holds and closes the root, resolving every
//!   failure mode to a deterministic [`StopOutcome`].
//!
//! The engine never panics past the host boundary: malformed input is
//! skipped, lost ambient state is detected and reported, and anomalies are
//! advisory sink events rather than errors.

use std::fmt;
use std::sync::Arc;

use crate::activity::{Activity, ActivityRef};
use crate::ambient::{AmbientStack, LocalAmbientStack};
use crate::diagnostics::{CorrelationSink, NoopSink, StackAnomaly};
use crate::propagation::{extract, ExtractError, HeaderStore};

mod slot;

pub use slot::RequestSlot;

/// Operation name given to root activities unless overridden.
pub const DEFAULT_OPERATION_NAME: &str = "http.server.request";

/// Default bound on the end-of-request unwind walk.
///
/// Converts a cyclic or pathologically deep ambient stack into a bounded walk
/// with a reported anomaly instead of a hang.
pub const MAX_AMBIENT_STACK_DEPTH: usize = 128;

/// How a lost ambient pointer is patched.
///
/// Pick one per deployment; the two strategies are not mixed at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreStrategy {
    /// Reassign the ambient pointer directly to the stored root. The cheapest
    /// and most correct restoration; requires
    /// [`AmbientStack::supports_reassign`].
    Reassign,
    /// Start a synthetic child carrying the root's operation name, lineage,
    /// start time and baggage, and make it current. Keeps correlation on
    /// hosts whose ambient slot has no setter, at the cost of one extra span
    /// in the tree.
    SyntheticChild,
}

/// Terminal outcome of [`CorrelationEngine::stop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// No root was ever created for this request.
    NoOp,
    /// The root was found on the ambient stack and stopped normally.
    Stopped,
    /// The ambient chain ran out before reaching the root; the root was
    /// stopped directly for cleanup.
    Lost,
    /// The walk observed structural corruption (no forward progress, or the
    /// depth bound); the root was stopped directly for cleanup.
    Broken,
}

/// Creates the root activity, restores a lost ambient pointer, and performs
/// the bounded unwind-and-stop at end-of-request.
pub struct CorrelationEngine {
    operation_name: String,
    ambient: Arc<dyn AmbientStack>,
    sink: Arc<dyn CorrelationSink>,
    strategy: RestoreStrategy,
    max_unwind_depth: usize,
    parse_headers: bool,
}

impl fmt::Debug for CorrelationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationEngine")
            .field("operation_name", &self.operation_name)
            .field("strategy", &self.strategy)
            .field("max_unwind_depth", &self.max_unwind_depth)
            .field("parse_headers", &self.parse_headers)
            .finish()
    }
}

/// Builder for [`CorrelationEngine`].
#[derive(Default)]
pub struct CorrelationEngineBuilder {
    operation_name: Option<String>,
    ambient: Option<Arc<dyn AmbientStack>>,
    sink: Option<Arc<dyn CorrelationSink>>,
    strategy: Option<RestoreStrategy>,
    max_unwind_depth: Option<usize>,
    parse_headers: Option<bool>,
}

impl CorrelationEngineBuilder {
    /// Operation name for root activities. Defaults to
    /// [`DEFAULT_OPERATION_NAME`].
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// The host's ambient stack. Defaults to a fresh
    /// [`LocalAmbientStack`].
    pub fn with_ambient_stack(mut self, ambient: Arc<dyn AmbientStack>) -> Self {
        self.ambient = Some(ambient);
        self
    }

    /// The diagnostics sink. Defaults to [`NoopSink`], under which the
    /// engine creates no activities at all.
    pub fn with_sink(mut self, sink: Arc<dyn CorrelationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Restore strategy. Defaults to [`RestoreStrategy::Reassign`] when the
    /// ambient stack supports it, [`RestoreStrategy::SyntheticChild`]
    /// otherwise.
    pub fn with_restore_strategy(mut self, strategy: RestoreStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Bound on the end-of-request unwind walk. Defaults to
    /// [`MAX_AMBIENT_STACK_DEPTH`].
    pub fn with_max_unwind_depth(mut self, depth: usize) -> Self {
        self.max_unwind_depth = Some(depth);
        self
    }

    /// Whether [`CorrelationEngine::create_root`] parses the inbound
    /// correlation headers. Defaults to `true`.
    pub fn with_header_parsing(mut self, parse: bool) -> Self {
        self.parse_headers = Some(parse);
        self
    }

    /// Builds the engine.
    pub fn build(self) -> CorrelationEngine {
        let ambient = self
            .ambient
            .unwrap_or_else(|| Arc::new(LocalAmbientStack::new()));
        let strategy = self.strategy.unwrap_or_else(|| {
            if ambient.supports_reassign() {
                RestoreStrategy::Reassign
            } else {
                RestoreStrategy::SyntheticChild
            }
        });
        CorrelationEngine {
            operation_name: self
                .operation_name
                .unwrap_or_else(|| DEFAULT_OPERATION_NAME.to_string()),
            ambient,
            sink: self.sink.unwrap_or_else(|| Arc::new(NoopSink)),
            strategy,
            max_unwind_depth: self.max_unwind_depth.unwrap_or(MAX_AMBIENT_STACK_DEPTH),
            parse_headers: self.parse_headers.unwrap_or(true),
        }
    }
}

impl CorrelationEngine {
    /// Starts building an engine.
    pub fn builder() -> CorrelationEngineBuilder {
        CorrelationEngineBuilder::default()
    }

    /// The operation name used for root activities.
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// The restore strategy in effect.
    pub fn restore_strategy(&self) -> RestoreStrategy {
        self.strategy
    }

    /// Creates, seeds and starts the root activity for an inbound request.
    ///
    /// Returns `None` without constructing anything when the sink reports no
    /// interest (coarse [`CorrelationSink::is_enabled`], then fine
    /// [`CorrelationSink::is_operation_enabled`]), and `None` without storing
    /// anything when the sink vetoes the start of the seeded activity.
    /// Extraction failure is not fatal: a request without correlation headers
    /// still gets a root activity, just a parentless one.
    pub fn create_root(
        &self,
        slot: &mut RequestSlot,
        headers: &dyn HeaderStore,
    ) -> Option<ActivityRef> {
        if !self.sink.is_enabled() || !self.sink.is_operation_enabled(&self.operation_name) {
            return None;
        }

        let activity: ActivityRef = Arc::new(Activity::new(self.operation_name.clone()));
        if self.parse_headers {
            match extract(&activity, headers, self.sink.as_ref()) {
                Ok(()) | Err(ExtractError::MissingParentId) => {}
                Err(err) => {
                    crate::corr_warn!(
                        name: "create_root.extract_rejected",
                        error = err.to_string()
                    );
                }
            }
        }

        if !self.sink.should_start(&activity) {
            crate::corr_debug!(name: "create_root.vetoed");
            return None;
        }
        if activity.start().is_err() {
            return None;
        }
        self.ambient.activate(activity.clone());
        slot.root = Some(activity.clone());
        self.sink.activity_started(&id_of(&activity));
        crate::corr_debug!(name: "activity.started", id = id_of(&activity));
        Some(activity)
    }

    /// Patches the ambient pointer if it was lost.
    ///
    /// No-op when the ambient pointer is intact, when this request never
    /// created a root (or it was already stopped), or when a restoration was
    /// already recorded, so calling this from every pipeline stage is safe and
    /// never nests synthetic activities.
    pub fn restore_if_needed(&self, slot: &mut RequestSlot) {
        if self.ambient.current().is_some() {
            return;
        }
        let Some(root) = slot.root.clone() else { return };
        if slot.restored.is_some() {
            return;
        }

        let restored = match self.strategy {
            RestoreStrategy::Reassign => {
                self.ambient.reassign(root.clone());
                root
            }
            RestoreStrategy::SyntheticChild => {
                let child: ActivityRef = Arc::new(Activity::new(root.operation_name()));
                if let Some(root_id) = root.id() {
                    let _ = child.set_parent_id(root_id);
                }
                if let Some(start_time) = root.start_time() {
                    let _ = child.set_start_time(start_time);
                }
                for (key, value) in root.baggage().iter() {
                    child.add_baggage(key, value);
                }
                if child.start().is_err() {
                    return;
                }
                self.ambient.activate(child.clone());
                child
            }
        };

        self.sink.activity_restored(&id_of(&restored));
        crate::corr_debug!(name: "activity.restored", id = id_of(&restored));
        slot.restored = Some(restored);
    }

    /// Unwinds the ambient stack down to the root and stops it.
    ///
    /// Invoked exactly once, at request end. Descendants found above the root
    /// are stopped silently; only the root's own stop is reported. Every
    /// path stops the root (its duration is always recorded), stops a
    /// distinct restored activity with its own notification, and clears the
    /// slot.
    pub fn stop(&self, slot: &mut RequestSlot) -> StopOutcome {
        let Some(target) = slot.root.clone() else {
            return StopOutcome::NoOp;
        };

        let Some(mut current) = self.ambient.current() else {
            return self.finish_lost(slot, &target);
        };

        let mut iteration = 0;
        while !Arc::ptr_eq(&current, &target) {
            self.ambient.deactivate(&current);
            let Some(next) = self.ambient.current() else {
                return self.finish_lost(slot, &target);
            };
            if Arc::ptr_eq(&next, &current) {
                // The activity is still on the observable stack but already
                // finished: it was stopped from a child execution context.
                // The root cannot be reached; stop it directly to clean up.
                self.sink.stack_anomaly(
                    &id_of(&current),
                    current.operation_name(),
                    StackAnomaly::FinishedActivity,
                );
                crate::corr_error!(
                    name: "stop.finished_activity_detected",
                    id = id_of(&current),
                    operation = current.operation_name()
                );
                return self.finish_broken(slot, &target);
            }
            if iteration == self.max_unwind_depth {
                self.sink.stack_anomaly(
                    &id_of(&current),
                    current.operation_name(),
                    StackAnomaly::TooDeep,
                );
                crate::corr_error!(
                    name: "stop.stack_too_deep",
                    id = id_of(&current),
                    operation = current.operation_name()
                );
                return self.finish_broken(slot, &target);
            }
            iteration += 1;
            current = next;
        }

        self.ambient.deactivate(&target);
        self.sink.activity_stopped(&id_of(&target));
        crate::corr_debug!(name: "activity.stopped", id = id_of(&target));
        slot.root = None;
        self.stop_restored(slot, &target);
        StopOutcome::Stopped
    }

    fn finish_lost(&self, slot: &mut RequestSlot, target: &ActivityRef) -> StopOutcome {
        target.end();
        self.sink.activity_lost(&id_of(target));
        crate::corr_warn!(name: "activity.lost", id = id_of(target));
        slot.root = None;
        self.stop_restored(slot, target);
        StopOutcome::Lost
    }

    fn finish_broken(&self, slot: &mut RequestSlot, target: &ActivityRef) -> StopOutcome {
        target.end();
        slot.root = None;
        self.stop_restored(slot, target);
        StopOutcome::Broken
    }

    fn stop_restored(&self, slot: &mut RequestSlot, target: &ActivityRef) {
        if let Some(restored) = slot.restored.take() {
            // Under the reassign strategy the restored entry is the root
            // itself; it already got its stop and must not report twice.
            if !Arc::ptr_eq(&restored, target) {
                restored.end();
                self.sink.restored_activity_stopped(&id_of(&restored));
            }
        }
    }
}

fn id_of(activity: &Activity) -> String {
    activity.id().unwrap_or_default()
}
