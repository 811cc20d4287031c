//! Payload transformers for server-sent events.
//!
//! A transformer turns the raw `data` string of an event into a typed value.
//! Every transformer has the same shape, `Fn(&str) -> Result<T, TransformError>`,
//! so they can be handed to a connection manager directly and combined with
//! [`safe`], [`safe_or`] and [`pipe`].
//!
//! None of these functions hold state or perform I/O.

pub mod error;

pub use error::TransformError;

use serde::de::DeserializeOwned;
use serde_json::Value;

pub type TransformResult<T> = Result<T, TransformError>;

/// Passes the payload through unchanged.
pub fn text(data: &str) -> TransformResult<String> {
    Ok(data.to_string())
}

/// Parses the payload as a single JSON value.
pub fn json(data: &str) -> TransformResult<Value> {
    Ok(serde_json::from_str(data)?)
}

/// Deserializes the payload into `T`.
pub fn json_as<T: DeserializeOwned>(data: &str) -> TransformResult<T> {
    Ok(serde_json::from_str(data)?)
}

/// Parses newline-delimited JSON. Empty lines are skipped; the first line that
/// fails to parse fails the whole payload.
pub fn ndjson(data: &str) -> TransformResult<Vec<Value>> {
    data.split('\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(TransformError::from))
        .collect()
}

/// Splits the payload into its non-empty lines. Never fails.
pub fn lines(data: &str) -> TransformResult<Vec<String>> {
    Ok(data
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Numeric coercion of the whole payload.
///
/// Surrounding whitespace is ignored and an empty payload is `0.0`. Anything
/// that is not a decimal, `0x`/`0o`/`0b` prefixed or `Infinity` literal becomes
/// `NaN`. Never fails.
pub fn number(data: &str) -> TransformResult<f64> {
    Ok(coerce_number(data.trim()))
}

fn coerce_number(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = s.strip_prefix(prefix) {
            return u64::from_str_radix(digits, radix)
                .map(|n| n as f64)
                .unwrap_or(f64::NAN);
        }
    }

    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }

    // f64's parser also accepts "inf" and "nan", which are not numeric literals
    // here.
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
    {
        return f64::NAN;
    }

    s.parse::<f64>().unwrap_or(f64::NAN)
}

/// Wraps `transform` so that a failure yields `None` instead of an error.
pub fn safe<T, F>(transform: F) -> impl Fn(&str) -> TransformResult<Option<T>>
where
    F: Fn(&str) -> TransformResult<T>,
{
    move |data| Ok(transform(data).ok())
}

/// Wraps `transform` so that a failure yields a clone of `fallback`.
pub fn safe_or<T, F>(transform: F, fallback: T) -> impl Fn(&str) -> TransformResult<T>
where
    T: Clone,
    F: Fn(&str) -> TransformResult<T>,
{
    move |data| Ok(transform(data).unwrap_or_else(|_| fallback.clone()))
}

/// Composes two transformers: `pipe(a, b)(x) == b(a(x))`.
///
/// Errors from either stage propagate unchanged.
pub fn pipe<T, U, A, B>(a: A, b: B) -> impl Fn(&str) -> TransformResult<U>
where
    A: Fn(&str) -> TransformResult<T>,
    B: Fn(T) -> TransformResult<U>,
{
    move |data| b(a(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json as value;

    #[test]
    fn json_parses_a_single_value() {
        assert_eq!(json(r#"{"a":1}"#).unwrap(), value!({"a": 1}));
        assert!(json("not json").is_err());
    }

    #[test]
    fn json_as_deserializes_typed_payloads() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Tick {
            price: u32,
        }

        let tick: Tick = json_as(r#"{"price":42}"#).unwrap();
        assert_eq!(tick, Tick { price: 42 });
        assert!(json_as::<Tick>(r#"{"price":"high"}"#).is_err());
    }

    #[test]
    fn ndjson_drops_empty_lines_and_tolerates_trailing_newline() {
        let parsed = ndjson("{\"a\":1}\n\n{\"b\":2}\n").unwrap();
        assert_eq!(parsed, vec![value!({"a": 1}), value!({"b": 2})]);
    }

    #[test]
    fn ndjson_fails_on_any_bad_line() {
        assert!(ndjson("{\"a\":1}\nnope\n{\"b\":2}").is_err());
    }

    #[test]
    fn lines_drops_empty_lines() {
        assert_eq!(lines("one\n\ntwo\n").unwrap(), vec!["one", "two"]);
        assert!(lines("").unwrap().is_empty());
    }

    #[test]
    fn number_coerces_like_a_numeric_literal() {
        assert_eq!(number("42").unwrap(), 42.0);
        assert_eq!(number(" -3.5 ").unwrap(), -3.5);
        assert_eq!(number("1e3").unwrap(), 1000.0);
        assert_eq!(number("0x1f").unwrap(), 31.0);
        assert_eq!(number("").unwrap(), 0.0);
        assert_eq!(number("   ").unwrap(), 0.0);
        assert_eq!(number("-Infinity").unwrap(), f64::NEG_INFINITY);
        assert!(number("abc").unwrap().is_nan());
        assert!(number("inf").unwrap().is_nan());
        assert!(number("12px").unwrap().is_nan());
    }

    #[test]
    fn safe_returns_none_instead_of_failing() {
        let transform = safe(json);
        assert_eq!(transform("not json").unwrap(), None);
        assert_eq!(transform(r#"{"a":1}"#).unwrap(), Some(value!({"a": 1})));
    }

    #[test]
    fn safe_or_returns_the_fallback() {
        let transform = safe_or(json, value!({"fallback": true}));
        assert_eq!(transform("not json").unwrap(), value!({"fallback": true}));
        assert_eq!(transform("[1]").unwrap(), value!([1]));
    }

    #[test]
    fn pipe_composes_left_to_right() {
        let shout = pipe(|s: &str| Ok(s.to_uppercase()), |s: String| Ok(s + "!"));
        assert_eq!(shout("hi").unwrap(), "HI!");
    }

    #[test]
    fn pipe_propagates_errors_from_the_first_stage() {
        let transform = pipe(json, |v: Value| Ok(v.is_object()));
        assert!(transform("{").is_err());
        assert!(transform("{}").unwrap());
    }

    #[test]
    fn pipe_and_safe_combine() {
        let count = safe(pipe(ndjson, |items: Vec<Value>| Ok(items.len())));
        assert_eq!(count("1\n2\n3").unwrap(), Some(3));
        assert_eq!(count("1\n{").unwrap(), None);
    }
}
