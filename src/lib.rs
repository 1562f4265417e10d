//! Correlates a tree of request activities across host pipelines that lose
//! the runtime's ambient "current span" pointer.
//!
//! Host pipelines whose execution hops between threads or continuations can
//! drop the ambient current-activity pointer mid-request. This crate covers
//! the two algorithms such a host needs:
//!
//! * **Header extraction** ([`propagation`]): seeds a root
//!   [`Activity`](activity::Activity)'s parent id and baggage from the
//!   inbound `Request-Id` / `Correlation-Context` headers.
//! * **Ambient-stack reconciliation** ([`correlation`]): creates the root
//!   activity at request start, detects and repairs a lost ambient pointer
//!   between pipeline stages, and performs a bounded, cycle-safe
//!   unwind-and-stop at request end, resolving every failure mode to a
//!   deterministic [`StopOutcome`].
//!
//! The host wires three lifecycle hooks: [`CorrelationEngine::create_root`]
//! at request start, [`CorrelationEngine::restore_if_needed`] at each
//! pipeline stage start (zero or more, idempotent), and
//! [`CorrelationEngine::stop`] at request end, exactly once.
//!
//! This is not a tracing SDK: there is no sampling, no exporter and no span
//! storage. Consumers observe activity lifecycles through an injected
//! [`CorrelationSink`], whose notifications are best-effort and advisory.
//!
//! # Getting started
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use telemetry_correlation::{
//!     CorrelationEngine, CorrelationSink, LocalAmbientStack, RequestSlot, StopOutcome,
//! };
//!
//! #[derive(Debug)]
//! struct PrintSink;
//!
//! impl CorrelationSink for PrintSink {
//!     fn activity_started(&self, id: &str) {
//!         println!("started {id}");
//!     }
//! }
//!
//! let ambient = Arc::new(LocalAmbientStack::new());
//! let engine = CorrelationEngine::builder()
//!     .with_ambient_stack(ambient.clone())
//!     .with_sink(Arc::new(PrintSink))
//!     .build();
//!
//! // request start
//! let mut headers: HashMap<String, Vec<String>> = HashMap::new();
//! headers.insert("Request-Id".into(), vec!["|upstream.1.".into()]);
//! let mut slot = RequestSlot::new();
//! let root = engine.create_root(&mut slot, &headers).expect("root started");
//! assert_eq!(root.parent_id().as_deref(), Some("|upstream.1."));
//!
//! // a continuation hop drops the ambient pointer...
//! ambient.clear();
//! // ...and the next pipeline stage repairs it
//! engine.restore_if_needed(&mut slot);
//!
//! // request end
//! assert_eq!(engine.stop(&mut slot), StopOutcome::Stopped);
//! assert!(root.duration().is_some());
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod activity;
pub mod ambient;
pub mod baggage;
pub mod correlation;
pub mod diagnostics;
mod internal_logging;
pub mod propagation;
#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

pub use activity::{Activity, ActivityError, ActivityRef};
pub use ambient::{AmbientStack, LocalAmbientStack};
pub use baggage::Baggage;
pub use correlation::{
    CorrelationEngine, CorrelationEngineBuilder, RequestSlot, RestoreStrategy, StopOutcome,
    DEFAULT_OPERATION_NAME, MAX_AMBIENT_STACK_DEPTH,
};
pub use diagnostics::{CorrelationSink, NoopSink, StackAnomaly};
pub use propagation::{
    extract, ExtractError, HeaderStore, CORRELATION_CONTEXT_HEADER,
    MAX_CORRELATION_CONTEXT_LENGTH, REQUEST_ID_HEADER,
};

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, error, warn};
}
