//! The in-memory record of one unit of work.
//!
//! An [`Activity`] is created unstarted, optionally seeded with a parent id
//! and baggage (see [`crate::propagation`]), then started exactly once, which
//! assigns its id. Stopping fixes its duration exactly once; a second stop is
//! a deterministic no-op.
//!
//! Activities are shared between the ambient stack, the request slot and the
//! reconciliation engine as [`ActivityRef`]s, so all mutable state lives
//! behind a mutex and identity comparisons use [`Arc::ptr_eq`].

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime};

use rand::Rng;
use thiserror::Error;

use crate::baggage::Baggage;

/// A shared handle to an [`Activity`].
pub type ActivityRef = Arc<Activity>;

/// Usage errors raised by [`Activity`] state transitions.
///
/// These indicate caller mistakes (starting twice, re-parenting a started
/// activity) and are surfaced as results, never as panics.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ActivityError {
    /// The activity has already been started and its id assigned.
    #[error("activity is already started")]
    AlreadyStarted,
    /// The parent id may only be set once, before start.
    #[error("parent id is already set on activity")]
    ParentIdAlreadySet,
}

/// A timed unit of work with identity, optional parent linkage and baggage.
#[derive(Debug)]
pub struct Activity {
    operation_name: String,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    id: Option<String>,
    parent_id: Option<String>,
    start_time: Option<SystemTime>,
    duration: Option<Duration>,
    baggage: Baggage,
    parent: Weak<Activity>,
}

impl Activity {
    /// Creates a new, unstarted activity.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Activity {
            operation_name: operation_name.into(),
            inner: Mutex::default(),
        }
    }

    /// The operation name given at creation. Immutable.
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// The id assigned on start, or `None` while unstarted.
    pub fn id(&self) -> Option<String> {
        self.with_inner(|inner| inner.id.clone())
    }

    /// The parent id, if one was set before start.
    pub fn parent_id(&self) -> Option<String> {
        self.with_inner(|inner| inner.parent_id.clone())
    }

    /// Sets the parent id. Allowed at most once, and only before start.
    pub fn set_parent_id(&self, parent_id: impl Into<String>) -> Result<(), ActivityError> {
        self.with_inner(|inner| {
            if inner.id.is_some() {
                return Err(ActivityError::AlreadyStarted);
            }
            if inner.parent_id.is_some() {
                return Err(ActivityError::ParentIdAlreadySet);
            }
            inner.parent_id = Some(parent_id.into());
            Ok(())
        })
    }

    /// Overrides the start time recorded when the activity starts.
    ///
    /// Used by the synthetic-child restore path, which copies the root's
    /// start time so the patched-in activity covers the same interval.
    pub fn set_start_time(&self, start_time: SystemTime) -> Result<(), ActivityError> {
        self.with_inner(|inner| {
            if inner.id.is_some() {
                return Err(ActivityError::AlreadyStarted);
            }
            inner.start_time = Some(start_time);
            Ok(())
        })
    }

    /// Appends a baggage entry. Duplicate keys are preserved.
    pub fn add_baggage(&self, key: impl Into<String>, value: impl Into<String>) {
        self.with_inner(|inner| inner.baggage.insert(key, value));
    }

    /// A snapshot of the current baggage, in insertion order.
    pub fn baggage(&self) -> Baggage {
        self.with_inner(|inner| inner.baggage.clone())
    }

    /// Starts the activity, assigning its id.
    ///
    /// The id is assigned only here, after parent id and baggage have been
    /// finalized. Roots get a fresh hierarchical id; activities with a parent
    /// id get an id derived from it.
    pub fn start(&self) -> Result<(), ActivityError> {
        self.with_inner(|inner| {
            if inner.id.is_some() {
                return Err(ActivityError::AlreadyStarted);
            }
            if inner.start_time.is_none() {
                inner.start_time = Some(SystemTime::now());
            }
            inner.id = Some(generate_id(inner.parent_id.as_deref()));
            Ok(())
        })
    }

    /// Stops the activity, fixing its duration.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// activity was unstarted or already stopped. The distinction matters to
    /// ambient stack implementations: stopping an activity that was already
    /// finished by another execution context must leave the current pointer
    /// unchanged.
    pub fn end(&self) -> bool {
        self.with_inner(|inner| {
            if inner.id.is_none() || inner.duration.is_some() {
                return false;
            }
            let start = inner.start_time.unwrap_or_else(SystemTime::now);
            inner.duration = Some(start.elapsed().unwrap_or_default());
            true
        })
    }

    /// Whether the activity has been started.
    pub fn is_started(&self) -> bool {
        self.with_inner(|inner| inner.id.is_some())
    }

    /// Whether the activity has been stopped.
    pub fn is_ended(&self) -> bool {
        self.with_inner(|inner| inner.duration.is_some())
    }

    /// The start time, recorded on start (or set explicitly before it).
    pub fn start_time(&self) -> Option<SystemTime> {
        self.with_inner(|inner| inner.start_time)
    }

    /// The duration, fixed exactly once on stop.
    pub fn duration(&self) -> Option<Duration> {
        self.with_inner(|inner| inner.duration)
    }

    /// The in-memory parent, if it is still alive.
    ///
    /// Only valid within the logical execution context that started this
    /// activity as a child; following it across a lost-context boundary is
    /// unsafe, which is exactly the condition the reconciliation engine
    /// guards against. Prefer [`Activity::parent_id`] for correlation.
    pub fn parent(&self) -> Option<ActivityRef> {
        self.with_inner(|inner| inner.parent.upgrade())
    }

    pub(crate) fn set_parent(&self, parent: &ActivityRef) {
        self.with_inner(|inner| inner.parent = Arc::downgrade(parent));
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }
}

/// Hierarchical id encoding: `|<root>.` for roots, `<parent>.<suffix>.` for
/// children, so an id always embeds its lineage.
fn generate_id(parent_id: Option<&str>) -> String {
    let mut rng = rand::thread_rng();
    match parent_id {
        None => format!("|{:016x}.", rng.gen::<u64>()),
        Some(parent) => {
            let mut id = String::with_capacity(parent.len() + 10);
            id.push_str(parent);
            if !parent.ends_with(['.', '_']) {
                id.push('.');
            }
            id.push_str(&format!("{:08x}.", rng.gen::<u32>()));
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_assigned_on_start_only() {
        let activity = Activity::new("test");
        assert_eq!(activity.id(), None);
        assert!(!activity.is_started());

        activity.start().unwrap();
        let id = activity.id().expect("id assigned on start");
        assert!(id.starts_with('|'), "root ids carry the root marker: {id}");
        assert!(id.ends_with('.'));
    }

    #[test]
    fn start_twice_is_rejected() {
        let activity = Activity::new("test");
        activity.start().unwrap();
        let id = activity.id();

        assert_eq!(activity.start(), Err(ActivityError::AlreadyStarted));
        assert_eq!(activity.id(), id, "id unchanged by the rejected start");
    }

    #[test]
    fn child_id_embeds_parent_id() {
        let activity = Activity::new("test");
        activity.set_parent_id("|abc.1.").unwrap();
        activity.start().unwrap();

        let id = activity.id().unwrap();
        assert!(id.starts_with("|abc.1."), "got {id}");
        assert_ne!(id, "|abc.1.");
    }

    #[test]
    fn parent_id_is_set_at_most_once_before_start() {
        let activity = Activity::new("test");
        activity.set_parent_id("|abc.1").unwrap();
        assert_eq!(
            activity.set_parent_id("|def.1"),
            Err(ActivityError::ParentIdAlreadySet)
        );

        let started = Activity::new("test");
        started.start().unwrap();
        assert_eq!(
            started.set_parent_id("|abc.1"),
            Err(ActivityError::AlreadyStarted)
        );
    }

    #[test]
    fn end_fixes_duration_exactly_once() {
        let activity = Activity::new("test");
        activity.start().unwrap();
        std::thread::sleep(Duration::from_millis(2));

        assert!(activity.end());
        let duration = activity.duration().expect("duration set on stop");
        assert!(duration > Duration::ZERO);

        assert!(!activity.end(), "second stop is a no-op");
        assert_eq!(activity.duration(), Some(duration));
    }

    #[test]
    fn end_before_start_is_a_no_op() {
        let activity = Activity::new("test");
        assert!(!activity.end());
        assert_eq!(activity.duration(), None);
    }

    #[test]
    fn explicit_start_time_survives_start() {
        let epoch = SystemTime::UNIX_EPOCH;
        let activity = Activity::new("test");
        activity.set_start_time(epoch).unwrap();
        activity.start().unwrap();
        assert_eq!(activity.start_time(), Some(epoch));

        assert_eq!(
            activity.set_start_time(SystemTime::now()),
            Err(ActivityError::AlreadyStarted)
        );
    }

    #[test]
    fn parent_link_upgrades_while_alive() {
        let parent = Arc::new(Activity::new("parent"));
        let child = Arc::new(Activity::new("child"));
        child.set_parent(&parent);

        let got = child.parent().expect("parent alive");
        assert!(Arc::ptr_eq(&got, &parent));

        drop(got);
        drop(parent);
        assert!(child.parent().is_none(), "weak link does not keep parent alive");
    }
}
