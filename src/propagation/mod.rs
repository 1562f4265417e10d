//! Reading correlation state out of inbound request headers.
//!
//! [`HeaderStore`] is the uniform read-only view over a host's header
//! collection; one small adapter per host API implements it. [`extract`]
//! parses the legacy correlation headers out of a store and seeds a
//! not-yet-started [`Activity`](crate::activity::Activity) with a parent id
//! and baggage.

use std::borrow::Cow;
use std::collections::HashMap;

mod extract;

pub use extract::{
    extract, ExtractError, CORRELATION_CONTEXT_HEADER, MAX_CORRELATION_CONTEXT_LENGTH,
    REQUEST_ID_HEADER,
};

/// Read-only view over a host header collection.
///
/// Header names are matched case-insensitively. A header may be present
/// multiple times; [`HeaderStore::get_all`] returns every value in order of
/// appearance.
pub trait HeaderStore {
    /// All values for a header, or `None` if it is absent.
    fn get_all(&self, name: &str) -> Option<Vec<Cow<'_, str>>>;

    /// The first value for a header, if present.
    fn get(&self, name: &str) -> Option<Cow<'_, str>> {
        self.get_all(name).and_then(|values| values.into_iter().next())
    }
}

impl<S: std::hash::BuildHasher> HeaderStore for HashMap<String, Vec<String>, S> {
    fn get_all(&self, name: &str) -> Option<Vec<Cow<'_, str>>> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.iter().map(|v| Cow::Borrowed(v.as_str())).collect())
    }
}

/// [`HeaderStore`] over an [`http::HeaderMap`]. Values that are not valid
/// UTF-8 are skipped.
#[cfg(feature = "http")]
impl HeaderStore for http::HeaderMap {
    fn get_all(&self, name: &str) -> Option<Vec<Cow<'_, str>>> {
        let values: Vec<Cow<'_, str>> = http::HeaderMap::get_all(self, name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(Cow::Borrowed)
            .collect();
        if self.contains_key(name) {
            Some(values)
        } else {
            None
        }
    }
}
