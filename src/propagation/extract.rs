//! The wire-header extraction protocol.

use thiserror::Error;

use super::HeaderStore;
use crate::activity::{Activity, ActivityError};
use crate::diagnostics::CorrelationSink;

/// Header carrying the parent request id.
pub const REQUEST_ID_HEADER: &str = "Request-Id";

/// Header carrying correlation baggage as comma-separated `key=value` pairs.
pub const CORRELATION_CONTEXT_HEADER: &str = "Correlation-Context";

/// Cumulative budget, in bytes of pair text including separators, across all
/// `Correlation-Context` header instances. A guard against oversized inbound
/// headers; baggage past the budget is dropped.
pub const MAX_CORRELATION_CONTEXT_LENGTH: usize = 1024;

/// Why extraction did not seed the activity.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExtractError {
    /// Extraction must run before the activity is started.
    #[error("activity is already started")]
    AlreadyStarted,
    /// Extraction must run before a parent id is assigned.
    #[error("parent id is already set on activity")]
    AlreadyParented,
    /// The request carries no usable parent id header.
    #[error("request headers carry no usable parent id")]
    MissingParentId,
}

impl From<ActivityError> for ExtractError {
    fn from(err: ActivityError) -> Self {
        match err {
            ActivityError::AlreadyStarted => ExtractError::AlreadyStarted,
            ActivityError::ParentIdAlreadySet => ExtractError::AlreadyParented,
        }
    }
}

/// Seeds `activity` with the parent id and baggage found in `headers`.
///
/// The first value of the first `Request-Id` header instance is
/// authoritative; additional instances are tolerated and ignored. Baggage is
/// best-effort: malformed pairs are skipped individually (reported to the
/// sink as [`CorrelationSink::header_parse_failure`]) and parsing stops once
/// the cumulative [`MAX_CORRELATION_CONTEXT_LENGTH`] budget is exceeded.
/// Success means a parent id was found, regardless of how much baggage was
/// kept.
///
/// Calling this on a started or already-parented activity is a usage error:
/// the activity is left untouched and the error is returned.
pub fn extract(
    activity: &Activity,
    headers: &dyn HeaderStore,
    sink: &dyn CorrelationSink,
) -> Result<(), ExtractError> {
    if activity.is_started() {
        crate::corr_warn!(
            name: "extract.rejected",
            reason = "activity is already started"
        );
        return Err(ExtractError::AlreadyStarted);
    }
    if activity.parent_id().is_some() {
        crate::corr_warn!(
            name: "extract.rejected",
            reason = "parent id is already set"
        );
        return Err(ExtractError::AlreadyParented);
    }

    let parent_id = headers
        .get_all(REQUEST_ID_HEADER)
        .and_then(|values| values.into_iter().next())
        .filter(|value| !value.is_empty())
        .ok_or(ExtractError::MissingParentId)?;
    activity.set_parent_id(parent_id.into_owned())?;

    if let Some(values) = headers.get_all(CORRELATION_CONTEXT_HEADER) {
        // Counter starts at -1 so the leading pair is charged without a
        // separator; this matches the upstream counting byte-for-byte.
        let mut consumed: isize = -1;
        'values: for value in &values {
            if consumed >= MAX_CORRELATION_CONTEXT_LENGTH as isize {
                break;
            }
            for pair in value.split(',') {
                consumed += pair.len() as isize + 1;
                if consumed >= MAX_CORRELATION_CONTEXT_LENGTH as isize {
                    break 'values;
                }
                if pair.trim().is_empty() {
                    continue;
                }
                match parse_name_value(pair) {
                    Some((name, value)) => activity.add_baggage(name, value),
                    None => {
                        crate::corr_debug!(
                            name: "extract.bad_baggage_pair",
                            pair = pair
                        );
                        sink.header_parse_failure(CORRELATION_CONTEXT_HEADER, pair);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Parses one `name=value` pair using header parameter syntax: a token name
/// and a token or quoted-string value.
fn parse_name_value(pair: &str) -> Option<(String, String)> {
    let (name, value) = pair.trim().split_once('=')?;
    let name = name.trim_end();
    if name.is_empty() || !name.bytes().all(is_token_char) {
        return None;
    }
    let value = value.trim_start();
    let value = if value.starts_with('"') {
        parse_quoted_string(value)?
    } else {
        if value.is_empty() || !value.bytes().all(is_token_char) {
            return None;
        }
        value.to_string()
    };
    Some((name.to_string(), value))
}

// RFC 7230 tchar
fn is_token_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

fn parse_quoted_string(value: &str) -> Option<String> {
    let inner = value.strip_prefix('"')?.strip_suffix('"')?;
    let mut unescaped = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => unescaped.push(chars.next()?),
            '"' => return None,
            _ => unescaped.push(c),
        }
    }
    Some(unescaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use std::collections::HashMap;

    type Headers = HashMap<String, Vec<String>>;

    fn headers(entries: &[(&str, &[&str])]) -> Headers {
        entries
            .iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    values.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect()
    }

    fn baggage_of(activity: &Activity) -> Vec<(String, String)> {
        activity
            .baggage()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn no_parent_header_means_failure_without_mutation() {
        let activity = Activity::new("test");
        let sink = RecordingSink::default();

        let result = extract(&activity, &Headers::new(), &sink);

        assert_eq!(result, Err(ExtractError::MissingParentId));
        assert_eq!(activity.parent_id(), None);
        assert!(activity.baggage().is_empty());
    }

    #[test]
    fn empty_first_parent_value_means_failure() {
        let activity = Activity::new("test");
        let sink = RecordingSink::default();
        let headers = headers(&[("Request-Id", &[""])]);

        assert_eq!(
            extract(&activity, &headers, &sink),
            Err(ExtractError::MissingParentId)
        );
        assert_eq!(activity.parent_id(), None);
    }

    #[test]
    fn first_parent_header_instance_wins() {
        let activity = Activity::new("test");
        let sink = RecordingSink::default();
        let headers = headers(&[(
            "Request-Id",
            &["|aba2f1e978b11111.1", "|aba2f1e978b22222.1"],
        )]);

        extract(&activity, &headers, &sink).unwrap();

        assert_eq!(activity.parent_id().as_deref(), Some("|aba2f1e978b11111.1"));
        assert!(activity.baggage().is_empty());
    }

    #[test]
    fn parent_id_and_baggage_are_seeded() {
        let activity = Activity::new("test");
        let sink = RecordingSink::default();
        let headers = headers(&[
            ("Request-Id", &["|abc.1"]),
            ("Correlation-Context", &["k1=v1,k2=v2"]),
        ]);

        extract(&activity, &headers, &sink).unwrap();

        assert_eq!(activity.parent_id().as_deref(), Some("|abc.1"));
        assert_eq!(
            baggage_of(&activity),
            vec![
                ("k1".to_string(), "v1".to_string()),
                ("k2".to_string(), "v2".to_string())
            ]
        );
    }

    #[test]
    fn multiple_baggage_instances_concatenate_and_keep_duplicates() {
        let activity = Activity::new("test");
        let sink = RecordingSink::default();
        let headers = headers(&[
            ("Request-Id", &["|abc.1"]),
            ("Correlation-Context", &["k1=v1,k2=v2", "k1=v3"]),
        ]);

        extract(&activity, &headers, &sink).unwrap();

        let baggage = activity.baggage();
        assert_eq!(baggage.len(), 3);
        assert_eq!(baggage.get_all("k1"), vec!["v1", "v3"]);
        assert_eq!(baggage.get_all("k2"), vec!["v2"]);
    }

    #[test]
    fn malformed_pairs_are_skipped_individually() {
        let activity = Activity::new("test");
        let sink = RecordingSink::default();
        let headers = headers(&[
            ("Request-Id", &["|abc.1"]),
            (
                "Correlation-Context",
                &["key1=123,key2=456,key3=789", "key4=abc;key5=def", "key6????xyz", "key7=123=456"],
            ),
        ]);

        extract(&activity, &headers, &sink).unwrap();

        assert_eq!(
            baggage_of(&activity),
            vec![
                ("key1".to_string(), "123".to_string()),
                ("key2".to_string(), "456".to_string()),
                ("key3".to_string(), "789".to_string())
            ]
        );
        assert_eq!(sink.header_parse_failures().len(), 3);
    }

    #[test]
    fn quoted_string_values_are_unescaped() {
        let activity = Activity::new("test");
        let sink = RecordingSink::default();
        let headers = headers(&[
            ("Request-Id", &["|abc.1"]),
            ("Correlation-Context", &[r#"k1="v 1",k2="a\"b""#]),
        ]);

        extract(&activity, &headers, &sink).unwrap();

        assert_eq!(
            baggage_of(&activity),
            vec![
                ("k1".to_string(), "v 1".to_string()),
                ("k2".to_string(), "a\"b".to_string())
            ]
        );
    }

    #[test]
    fn baggage_past_the_cumulative_budget_is_dropped() {
        // each pair is 8 bytes of text, charged 9 with its separator; the
        // 114th pair pushes the counter past 1024 and ends processing.
        let pairs: Vec<String> = (0..120).map(|i| format!("k{i:03}=aaa")).collect();
        let value = pairs.join(",");
        let activity = Activity::new("test");
        let sink = RecordingSink::default();
        let headers = headers(&[
            ("Request-Id", &["|abc.1"]),
            ("Correlation-Context", &[value.as_str()]),
        ]);

        extract(&activity, &headers, &sink).unwrap();

        let baggage = activity.baggage();
        assert_eq!(baggage.len(), 113);
        assert_eq!(baggage.get("k000"), Some("aaa"));
        assert_eq!(baggage.get("k112"), Some("aaa"));
        assert_eq!(baggage.get("k113"), None);
    }

    #[test]
    fn budget_spans_multiple_header_instances() {
        let first: Vec<String> = (0..113).map(|i| format!("k{i:03}=aaa")).collect();
        let first = first.join(",");
        let activity = Activity::new("test");
        let sink = RecordingSink::default();
        let headers = headers(&[
            ("Request-Id", &["|abc.1"]),
            ("Correlation-Context", &[first.as_str(), "late=entry"]),
        ]);

        extract(&activity, &headers, &sink).unwrap();

        let baggage = activity.baggage();
        assert_eq!(baggage.len(), 113);
        assert_eq!(baggage.get("late"), None, "budget already exhausted");
    }

    #[test]
    fn oversized_single_pair_still_reports_success() {
        let oversized = format!("k={}", "a".repeat(1100));
        let activity = Activity::new("test");
        let sink = RecordingSink::default();
        let headers = headers(&[
            ("Request-Id", &["|abc.1"]),
            ("Correlation-Context", &[oversized.as_str()]),
        ]);

        extract(&activity, &headers, &sink).unwrap();

        assert_eq!(activity.parent_id().as_deref(), Some("|abc.1"));
        assert!(activity.baggage().is_empty());
    }

    #[test]
    fn started_activity_is_rejected_without_mutation() {
        let activity = Activity::new("test");
        activity.start().unwrap();
        let sink = RecordingSink::default();
        let headers = headers(&[("Request-Id", &["|abc.1"])]);

        assert_eq!(
            extract(&activity, &headers, &sink),
            Err(ExtractError::AlreadyStarted)
        );
        assert_eq!(activity.parent_id(), None);
    }

    #[test]
    fn parented_activity_is_rejected_without_mutation() {
        let activity = Activity::new("test");
        activity.set_parent_id("|existing.1").unwrap();
        let sink = RecordingSink::default();
        let headers = headers(&[
            ("Request-Id", &["|abc.1"]),
            ("Correlation-Context", &["k1=v1"]),
        ]);

        assert_eq!(
            extract(&activity, &headers, &sink),
            Err(ExtractError::AlreadyParented)
        );
        assert_eq!(activity.parent_id().as_deref(), Some("|existing.1"));
        assert!(activity.baggage().is_empty());
    }
}
