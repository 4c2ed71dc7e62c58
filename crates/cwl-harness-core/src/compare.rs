//! Structural comparison of a runner's result mapping against an expected one.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::record::normalize;

/// A single difference at an RFC 6901 JSON pointer path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDelta {
    /// JSON pointer, e.g. `"/output/checksum"`.
    pub pointer: String,
    /// Value in the (normalized) actual result, `None` if absent.
    pub actual: Option<Value>,
    /// Value in the expected result, `None` if absent.
    pub expected: Option<Value>,
}

/// Actual and expected results differ after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct MismatchError {
    /// Output whose volatile fields were stripped.
    pub output_key: String,
    /// Normalized actual result.
    pub actual: Value,
    /// Expected result.
    pub expected: Value,
    /// Every differing path.
    pub differences: Vec<FieldDelta>,
}

impl fmt::Display for MismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "result mismatch on output '{}': {} difference(s)",
            self.output_key,
            self.differences.len()
        )?;
        if let Some(first) = self.differences.first() {
            write!(f, ", first at '{}'", first.pointer)?;
        }
        Ok(())
    }
}

impl std::error::Error for MismatchError {}

impl MismatchError {
    /// Human-readable report with both payloads and every differing path.
    pub fn report(&self) -> String {
        let render = |v: &Value| serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string());
        let absent = "<absent>".to_string();

        let mut out = format!("{self}\n");
        for d in &self.differences {
            out.push_str(&format!(
                "  {}: actual={} expected={}\n",
                d.pointer,
                d.actual.as_ref().map(Value::to_string).unwrap_or_else(|| absent.clone()),
                d.expected.as_ref().map(Value::to_string).unwrap_or_else(|| absent.clone()),
            ));
        }
        out.push_str("actual:\n");
        out.push_str(&render(&self.actual));
        out.push_str("\nexpected:\n");
        out.push_str(&render(&self.expected));
        out.push('\n');
        out
    }
}

/// Compare a runner's full result mapping with the expected mapping.
///
/// Volatile fields are removed from `actual[output_key]` only; every other
/// key of every declared output must match exactly, and an expected record
/// missing a key the actual record carries is a mismatch.
pub fn compare(actual: &Value, expected: &Value, output_key: &str) -> Result<(), MismatchError> {
    let normalized = normalize(actual, output_key);
    if normalized == *expected {
        return Ok(());
    }

    let mut differences = Vec::new();
    diff_values("", Some(&normalized), Some(expected), &mut differences);

    Err(MismatchError {
        output_key: output_key.to_string(),
        actual: normalized,
        expected: expected.clone(),
        differences,
    })
}

/// Collect every differing path between two JSON values.
pub fn diff_values(
    pointer: &str,
    actual: Option<&Value>,
    expected: Option<&Value>,
    out: &mut Vec<FieldDelta>,
) {
    match (actual, expected) {
        (Some(Value::Object(a)), Some(Value::Object(e))) => {
            let mut keys: Vec<&String> = a.keys().chain(e.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = format!("{pointer}/{}", escape_pointer_token(key));
                diff_values(&child, a.get(key), e.get(key), out);
            }
        }
        (Some(Value::Array(a)), Some(Value::Array(e))) => {
            for i in 0..a.len().max(e.len()) {
                let child = format!("{pointer}/{i}");
                diff_values(&child, a.get(i), e.get(i), out);
            }
        }
        (a, e) if a != e => out.push(FieldDelta {
            pointer: if pointer.is_empty() { "/".to_string() } else { pointer.to_string() },
            actual: a.cloned(),
            expected: e.cloned(),
        }),
        _ => {}
    }
}

/// Escape a key for use as an RFC 6901 reference token.
fn escape_pointer_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}
