//! Content fingerprints used as cache keys.
//!
//! A fingerprint is `sha256(sha256(bytes) ‖ sha256(canonical(context)))`,
//! hex encoded. The context is serialised canonically (object keys sorted
//! at every depth, no whitespace) so two contexts that differ only in key
//! order hash identically.

use crate::error::ExtractError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Caller-supplied key/value context mixed into a fingerprint.
pub type FingerprintContext = BTreeMap<String, Value>;

/// Opaque, deterministic cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an already-computed fingerprint (e.g. read back from disk).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compute the fingerprint of `bytes` under an optional `context`.
///
/// Pure: no I/O, no clock, no randomness.
///
/// # Errors
/// [`ExtractError::EmptyBuffer`] when `bytes` is empty.
pub fn fingerprint(
    bytes: &[u8],
    context: Option<&FingerprintContext>,
) -> Result<Fingerprint, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::EmptyBuffer);
    }

    let content_digest = hex::encode(Sha256::digest(bytes));
    let context_digest = hex::encode(Sha256::digest(canonical_context(context).as_bytes()));

    let mut hasher = Sha256::new();
    hasher.update(content_digest.as_bytes());
    hasher.update(context_digest.as_bytes());
    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Canonical JSON for a context; the empty string when absent.
fn canonical_context(context: Option<&FingerprintContext>) -> String {
    let mut out = String::new();
    if let Some(ctx) = context {
        out.push('{');
        for (idx, (key, value)) in ctx.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            write_string(key, &mut out);
            out.push(':');
            write_canonical(value, &mut out);
        }
        out.push('}');
    }
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // Serialising a &str to JSON cannot fail.
    out.push_str(&Value::String(s.to_owned()).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, Value)]) -> FingerprintContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn identical_inputs_identical_fingerprints() {
        let c = ctx(&[("documentType", json!("statement")), ("userId", json!(42))]);
        let a = fingerprint(b"%PDF-1.7 body", Some(&c)).unwrap();
        let b = fingerprint(b"%PDF-1.7 body", Some(&c)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn context_changes_fingerprint() {
        let a = fingerprint(b"same bytes", Some(&ctx(&[("userId", json!("u1"))]))).unwrap();
        let b = fingerprint(b"same bytes", Some(&ctx(&[("userId", json!("u2"))]))).unwrap();
        let none = fingerprint(b"same bytes", None).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, none);
    }

    #[test]
    fn one_byte_changes_fingerprint() {
        let a = fingerprint(b"statement-2024-a", None).unwrap();
        let b = fingerprint(b"statement-2024-b", None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn nested_key_order_is_irrelevant() {
        let a: FingerprintContext =
            serde_json::from_str(r#"{"filters":{"b":1,"a":[{"y":2,"x":1}]},"kind":"pdf"}"#)
                .unwrap();
        let b: FingerprintContext =
            serde_json::from_str(r#"{"kind":"pdf","filters":{"a":[{"x":1,"y":2}],"b":1}}"#)
                .unwrap();
        assert_eq!(
            fingerprint(b"doc", Some(&a)).unwrap(),
            fingerprint(b"doc", Some(&b)).unwrap()
        );
    }

    #[test]
    fn empty_context_differs_from_absent_context() {
        let empty = FingerprintContext::new();
        assert_ne!(
            fingerprint(b"doc", Some(&empty)).unwrap(),
            fingerprint(b"doc", None).unwrap()
        );
    }

    #[test]
    fn empty_bytes_rejected() {
        assert!(matches!(
            fingerprint(b"", None),
            Err(ExtractError::EmptyBuffer)
        ));
    }

    #[test]
    fn stable_across_processes() {
        // sha256(sha256("abc") ‖ sha256("")) — a fixed value, independent of
        // process state.
        let fp = fingerprint(b"abc", None).unwrap();
        let again = {
            let inner = format!(
                "{}{}",
                hex::encode(Sha256::digest(b"abc")),
                hex::encode(Sha256::digest(b""))
            );
            hex::encode(Sha256::digest(inner.as_bytes()))
        };
        assert_eq!(fp.as_str(), again);
    }
}
