//! Per-request storage for the reconciliation engine.

use crate::activity::ActivityRef;

/// Holds the engine's activity references for the lifetime of one request,
/// independently of the ambient stack.
///
/// At most two entries are ever live: the `root` created at request start
/// and, if a lost ambient pointer was patched, the `restored` activity. The
/// host creates the slot alongside its own per-request storage and hands it
/// to every engine call; only the engine mutates it. Entries are cleared when
/// the corresponding activity is stopped, and a request that never reaches
/// [`stop`](crate::correlation::CorrelationEngine::stop) simply leaks the
/// slot along with the host's request storage.
#[derive(Debug, Default)]
pub struct RequestSlot {
    pub(crate) root: Option<ActivityRef>,
    pub(crate) restored: Option<ActivityRef>,
}

impl RequestSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        RequestSlot::default()
    }

    /// The root activity created at request start, if still live.
    pub fn root(&self) -> Option<&ActivityRef> {
        self.root.as_ref()
    }

    /// The activity recorded when a lost ambient pointer was patched.
    pub fn restored(&self) -> Option<&ActivityRef> {
        self.restored.as_ref()
    }

    /// Returns `true` once both entries have been cleared.
    pub fn is_empty(&self) -> bool {
        self.root.is_none() && self.restored.is_none()
    }
}
