//! The host's "current activity" slot, modeled as an injected capability.
//!
//! The ambient stack is conceptually a call stack of activities whose top is
//! "current". It is owned by the host execution model, not by this crate: the
//! stack visible at any call site may be empty, may belong to an unrelated
//! flow (a continuation that failed to propagate it), or may hold the
//! expected activity with additional descendants pushed by other instrumented
//! code. Every read of [`AmbientStack::current`] is a snapshot that may be
//! stale by the next line, and the reconciliation engine never assumes
//! otherwise.
//!
//! Hosts with an explicit context-passing mechanism implement the trait over
//! their own slot; [`LocalAmbientStack`] is the reference implementation for
//! hosts (and tests) that let this crate own the slot.

use std::sync::{Arc, Mutex};

use crate::activity::ActivityRef;

/// Host-provided access to the ambient "current activity" pointer.
pub trait AmbientStack: Send + Sync {
    /// A snapshot of the current activity pointer.
    fn current(&self) -> Option<ActivityRef>;

    /// Pushes a newly started activity as the new current, recording its
    /// in-memory parent link from the previous top.
    fn activate(&self, activity: ActivityRef);

    /// Stops `activity` and pops it if this call performed the stop.
    ///
    /// Contract: when `activity` had already ended before this call (stopped
    /// from a different execution context), the current pointer must be left
    /// unchanged. The engine relies on that lack of progress to detect broken
    /// chains.
    fn deactivate(&self, activity: &ActivityRef);

    /// Whether [`AmbientStack::reassign`] is available.
    ///
    /// Hosts whose ambient slot has no public setter return `false`, which
    /// selects the synthetic-child restore strategy.
    fn supports_reassign(&self) -> bool {
        false
    }

    /// Reassigns the current pointer directly to `activity`.
    ///
    /// Only called when [`AmbientStack::supports_reassign`] is `true`; the
    /// default implementation does nothing.
    fn reassign(&self, activity: ActivityRef) {
        let _ = activity;
    }
}

/// Reference [`AmbientStack`] backed by a mutex-guarded vector.
///
/// [`LocalAmbientStack::clear`] models the host transition that loses the
/// ambient pointer (a continuation hop that fails to propagate it); hosts
/// call it at such boundaries and tests use it to inject loss.
#[derive(Debug, Default)]
pub struct LocalAmbientStack {
    stack: Mutex<Vec<ActivityRef>>,
}

impl LocalAmbientStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        LocalAmbientStack::default()
    }

    /// Drops the whole stack, as a lost continuation would.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Current stack depth.
    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ActivityRef>> {
        self.stack.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AmbientStack for LocalAmbientStack {
    fn current(&self) -> Option<ActivityRef> {
        self.lock().last().cloned()
    }

    fn activate(&self, activity: ActivityRef) {
        let mut stack = self.lock();
        if let Some(top) = stack.last() {
            activity.set_parent(top);
        }
        stack.push(activity);
    }

    fn deactivate(&self, activity: &ActivityRef) {
        // End first, outside the stack lock; the transition result decides
        // whether this context still owns the pop.
        let ended_here = activity.end();
        if ended_here {
            let mut stack = self.lock();
            if stack.last().map_or(false, |top| Arc::ptr_eq(top, activity)) {
                stack.pop();
            }
        }
    }

    fn supports_reassign(&self) -> bool {
        true
    }

    fn reassign(&self, activity: ActivityRef) {
        self.lock().push(activity);
    }
}
