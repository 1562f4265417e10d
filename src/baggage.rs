//! Name/value pairs propagated from a parent activity to its descendants.
//!
//! Baggage is application-defined data carried alongside span identity. It is
//! seeded from the inbound `Correlation-Context` header and copied
//! entry-for-entry when a lost ambient pointer is patched with a synthetic
//! child activity.
//!
//! Unlike map-based baggage implementations, keys are *not* required to be
//! unique: duplicate keys are preserved, and insertion order is the only
//! defined order. Consumers that need a specific order must re-sort.

/// An insertion-ordered multimap of baggage entries.
///
/// # Examples
///
/// ```
/// use telemetry_correlation::baggage::Baggage;
///
/// let mut baggage = Baggage::new();
/// baggage.insert("k1", "v1");
/// baggage.insert("k1", "v3");
///
/// // duplicates are preserved, first entry wins for `get`
/// assert_eq!(baggage.get("k1"), Some("v1"));
/// assert_eq!(baggage.len(), 2);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Baggage {
    entries: Vec<(String, String)>,
}

impl Baggage {
    /// Creates an empty `Baggage`.
    pub fn new() -> Self {
        Baggage::default()
    }

    /// Appends a name/value pair.
    ///
    /// Existing entries under the same key are kept; the new entry is added
    /// after them in insertion order.
    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.entries.push((key.into(), value.into()));
    }

    /// Returns the value of the *first* entry with the given key, if any.
    pub fn get<K: AsRef<str>>(&self, key: K) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key.as_ref())
            .map(|(_, v)| v.as_str())
    }

    /// Returns all values recorded under the given key, in insertion order.
    pub fn get_all<K: AsRef<str>>(&self, key: K) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k == key.as_ref())
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Iterates over all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries, counting duplicates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a Baggage {
    type Item = &'a (String, String);
    type IntoIter = std::slice::Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<(String, String)> for Baggage {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Baggage {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_is_preserved() {
        let mut baggage = Baggage::new();
        baggage.insert("k1", "v1");
        baggage.insert("k2", "v2");
        baggage.insert("k1", "v3");

        let entries: Vec<_> = baggage.iter().collect();
        assert_eq!(entries, vec![("k1", "v1"), ("k2", "v2"), ("k1", "v3")]);
    }

    #[test]
    fn duplicate_keys_are_not_merged() {
        let mut baggage = Baggage::new();
        baggage.insert("k1", "v1");
        baggage.insert("k1", "v3");

        assert_eq!(baggage.get("k1"), Some("v1"));
        assert_eq!(baggage.get_all("k1"), vec!["v1", "v3"]);
        assert_eq!(baggage.len(), 2);
    }

    #[test]
    fn get_missing_key() {
        let baggage = Baggage::new();
        assert_eq!(baggage.get("absent"), None);
        assert!(baggage.get_all("absent").is_empty());
        assert!(baggage.is_empty());
    }
}
