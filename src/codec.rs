//! Encoding of queue/registry members as ordered strings.
//!
//! Both persisted collections keep their members inside an unordered string
//! set, so each member carries its own ordering information: a decimal
//! millisecond timestamp, a sentinel character, and an escaped
//! field-separated payload. Decoding a record with a missing or non-numeric
//! timestamp prefix means the persisted data was corrupted outside this
//! process and is reported as a [`CodecError`].

use std::num::ParseIntError;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Separator between payload fields. Doubled at field boundaries.
const FIELD_SEPARATOR: char = ';';

/// Escape character protecting separators (and itself) inside field values.
const ESCAPE: char = '\\';

/// Sentinel between the decimal timestamp prefix and the payload.
const TIME_SENTINEL: char = '_';

/// Errors raised when a persisted record cannot be decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The record has no timestamp sentinel at all.
    #[error("corrupt record {record:?}: missing '{TIME_SENTINEL}' timestamp sentinel")]
    MissingSentinel {
        /// The raw record that failed to decode.
        record: String,
    },

    /// The prefix before the sentinel is not a decimal timestamp.
    #[error("corrupt record {record:?}: invalid timestamp prefix")]
    InvalidTimestamp {
        /// The raw record that failed to decode.
        record: String,
        /// The underlying integer parse failure.
        #[source]
        source: ParseIntError,
    },
}

/// Joins field values into a single string.
///
/// Each value has `\` and `;` escaped, then values are joined with the
/// doubled separator `;;`. [`split_fields`] is the exact inverse for any
/// input values, including values containing separators or escapes.
#[must_use]
pub fn join_fields(fields: &[&str]) -> String {
    let escaped: Vec<String> = fields.iter().map(|field| escape(field)).collect();
    escaped.join(&format!("{FIELD_SEPARATOR}{FIELD_SEPARATOR}"))
}

/// Splits a string produced by [`join_fields`] back into field values.
#[must_use]
pub fn split_fields(encoded: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = encoded.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == ESCAPE {
            // Escaped character; a trailing lone escape is kept literally.
            match chars.next() {
                Some(escaped) => current.push(escaped),
                None => current.push(ESCAPE),
            }
        } else if ch == FIELD_SEPARATOR && chars.peek() == Some(&FIELD_SEPARATOR) {
            chars.next();
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }

    fields.push(current);
    fields
}

/// Prefixes a payload with its ordering timestamp.
#[must_use]
pub fn encode_ordered(timestamp_millis: i64, payload: &str) -> String {
    format!("{timestamp_millis}{TIME_SENTINEL}{payload}")
}

/// Splits an ordered record into its timestamp and payload.
///
/// # Errors
///
/// Returns [`CodecError`] when the timestamp prefix is missing or not a
/// decimal number.
pub fn decode_ordered(record: &str) -> Result<(i64, &str), CodecError> {
    let Some((prefix, payload)) = record.split_once(TIME_SENTINEL) else {
        return Err(CodecError::MissingSentinel {
            record: record.to_string(),
        });
    };
    let timestamp = prefix
        .parse::<i64>()
        .map_err(|source| CodecError::InvalidTimestamp {
            record: record.to_string(),
            source,
        })?;
    Ok((timestamp, payload))
}

/// Last timestamp handed out by [`next_timestamp_millis`].
static LAST_ISSUED: AtomicI64 = AtomicI64::new(0);

/// Returns a wall-clock millisecond timestamp that is strictly greater than
/// any previously issued one.
///
/// Appends racing within the same millisecond still receive distinct,
/// totally ordered timestamps.
#[must_use]
pub fn next_timestamp_millis() -> i64 {
    let now = unix_millis();
    let mut previous = LAST_ISSUED.load(Ordering::SeqCst);
    loop {
        let candidate = now.max(previous + 1);
        match LAST_ISSUED.compare_exchange(
            previous,
            candidate,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => return candidate,
            Err(observed) => previous = observed,
        }
    }
}

/// Current wall-clock time in milliseconds since the epoch.
pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

fn escape(field: &str) -> String {
    let mut escaped = String::with_capacity(field.len());
    for ch in field.chars() {
        if ch == ESCAPE || ch == FIELD_SEPARATOR {
            escaped.push(ESCAPE);
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn roundtrip(fields: &[&str]) {
        let encoded = join_fields(fields);
        let decoded = split_fields(&encoded);
        assert_eq!(decoded, fields, "encoded form was {encoded:?}");
    }

    #[test]
    fn test_join_fields_plain_values() {
        assert_eq!(join_fields(&["id", "url"]), "id;;url");
    }

    #[test]
    fn test_split_fields_roundtrip_plain() {
        roundtrip(&["0c5a", "https://example.com/v/1"]);
    }

    #[test]
    fn test_split_fields_roundtrip_with_separator() {
        roundtrip(&["a;b", "c"]);
        roundtrip(&["a;;b", "c"]);
        roundtrip(&[";;", ";"]);
    }

    #[test]
    fn test_split_fields_roundtrip_trailing_separator() {
        // A field ending in the separator must not bleed into its neighbour.
        roundtrip(&["a;", "b"]);
    }

    #[test]
    fn test_split_fields_roundtrip_with_escape_character() {
        roundtrip(&["a\\", "b"]);
        roundtrip(&["a\\;b", "c\\\\d"]);
    }

    #[test]
    fn test_split_fields_roundtrip_with_sentinel_character() {
        roundtrip(&["under_score", "more_under_scores"]);
    }

    #[test]
    fn test_split_fields_roundtrip_empty_fields() {
        roundtrip(&["", ""]);
        roundtrip(&["", "value", ""]);
    }

    #[test]
    fn test_encode_ordered_prefixes_timestamp() {
        assert_eq!(encode_ordered(1234, "payload"), "1234_payload");
    }

    #[test]
    fn test_decode_ordered_splits_on_first_sentinel() {
        let (timestamp, payload) = decode_ordered("1234_pay_load").unwrap();
        assert_eq!(timestamp, 1234);
        assert_eq!(payload, "pay_load");
    }

    #[test]
    fn test_decode_ordered_roundtrip() {
        let encoded = encode_ordered(987_654_321, "id;;url");
        let (timestamp, payload) = decode_ordered(&encoded).unwrap();
        assert_eq!(timestamp, 987_654_321);
        assert_eq!(payload, "id;;url");
    }

    #[test]
    fn test_decode_ordered_missing_sentinel() {
        let error = decode_ordered("no sentinel here").unwrap_err();
        assert!(matches!(error, CodecError::MissingSentinel { .. }));
        assert!(error.to_string().contains("missing"));
    }

    #[test]
    fn test_decode_ordered_invalid_prefix() {
        let error = decode_ordered("abc_payload").unwrap_err();
        assert!(matches!(error, CodecError::InvalidTimestamp { .. }));
    }

    #[test]
    fn test_decode_ordered_overflowing_prefix() {
        let error = decode_ordered("99999999999999999999999999_payload").unwrap_err();
        assert!(matches!(error, CodecError::InvalidTimestamp { .. }));
    }

    #[test]
    fn test_next_timestamp_millis_strictly_increasing() {
        let mut previous = next_timestamp_millis();
        for _ in 0..1000 {
            let next = next_timestamp_millis();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_next_timestamp_millis_tracks_wall_clock() {
        let now = unix_millis();
        let issued = next_timestamp_millis();
        assert!(issued >= now);
    }
}
